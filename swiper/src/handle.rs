use parking_lot::{Mutex, MutexGuard};

use crate::gc::Address;

pub const HANDLE_BLOCK_SIZE: usize = 256;

/// Scoped storage for explicit root handles. Every live handle slot is part
/// of the collector's root set; the collector rewrites the slots in place
/// when the referenced objects move.
pub struct HandleMemory {
    inner: Mutex<HandleMemoryInner>,
}

impl HandleMemory {
    pub fn new() -> HandleMemory {
        HandleMemory {
            inner: Mutex::new(HandleMemoryInner::new()),
        }
    }

    pub fn create(&self, object_address: Address) -> Handle {
        let location = self.inner.lock().create(object_address);
        Handle(location.to_mut_ptr())
    }

    pub fn push_border(&self) {
        self.inner.lock().push_border();
    }

    pub fn pop_border(&self) {
        self.inner.lock().pop_border();
    }

    pub fn iter(&self) -> HandleMemoryIter {
        let inner = self.inner.lock();
        let len = inner.blocks.len();
        let free = inner.free;

        HandleMemoryIter {
            mem: inner,
            block_idx: 0,
            element_idx: 0,
            filled_blocks: if len == 0 { 0 } else { len - 1 },
            handles_in_last_block: free,
        }
    }
}

struct HandleMemoryInner {
    /// All blocks, Box is important since HandleBlock
    /// is a big struct that needs to get moved/copied on resizes.
    blocks: Vec<Box<HandleBlock>>,

    // Store positions of inserted borders.
    borders: Vec<BorderData>,

    // Index of next free position in the last block.
    free: usize,
}

impl HandleMemoryInner {
    fn new() -> HandleMemoryInner {
        let initial_block = Box::new(HandleBlock::new());

        HandleMemoryInner {
            blocks: vec![initial_block],
            borders: Vec::new(),
            free: 0,
        }
    }

    fn create(&mut self, object_address: Address) -> Address {
        if self.free >= HANDLE_BLOCK_SIZE {
            self.push_block();
            self.free = 0;
        }

        let block = self.blocks.last_mut().unwrap();

        let idx = self.free;
        let elem = &mut block.elements[idx];
        self.free = idx + 1;

        *elem = object_address;

        Address::from_ptr(elem)
    }

    fn push_block(&mut self) {
        self.blocks.push(Box::new(HandleBlock::new()));
    }

    fn push_border(&mut self) {
        let blocks = self.blocks.len();
        let element = self.free;

        self.borders.push(BorderData { blocks, element });
    }

    fn pop_border(&mut self) {
        let border = self.borders.pop().expect("no border left");

        self.blocks.truncate(border.blocks);
        self.free = border.element;
    }
}

struct HandleBlock {
    elements: [Address; HANDLE_BLOCK_SIZE],
}

impl HandleBlock {
    fn new() -> HandleBlock {
        HandleBlock {
            elements: [Address::null(); HANDLE_BLOCK_SIZE],
        }
    }
}

struct BorderData {
    blocks: usize,
    element: usize,
}

/// An explicit root: points at a slot inside `HandleMemory` that holds the
/// object reference. Dereference with `direct`, which always reads the
/// current (possibly relocated) address.
#[repr(C)]
pub struct Handle(*mut Address);

impl Handle {
    pub fn direct(self) -> Address {
        unsafe { *self.0 }
    }

    pub fn location(&self) -> Address {
        Address::from_ptr(self.0)
    }

    pub fn from_address(location: Address) -> Handle {
        Handle(location.to_mut_ptr())
    }
}

// known limitation of #[derive(Copy, Clone)]
// traits need to be implemented manually
impl Copy for Handle {}
impl Clone for Handle {
    fn clone(&self) -> Handle {
        *self
    }
}

pub struct HandleMemoryIter<'a> {
    mem: MutexGuard<'a, HandleMemoryInner>,
    block_idx: usize,
    element_idx: usize,
    filled_blocks: usize,
    handles_in_last_block: usize,
}

impl<'a> Iterator for HandleMemoryIter<'a> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        if self.element_idx == HANDLE_BLOCK_SIZE {
            self.block_idx += 1;
            self.element_idx = 0;
        }

        if (self.block_idx < self.filled_blocks)
            || (self.block_idx == self.filled_blocks
                && self.element_idx < self.handles_in_last_block)
        {
            let idx = self.element_idx;
            self.element_idx += 1;

            let block = &self.mem.blocks[self.block_idx];
            Some(Handle::from_address(Address::from_ptr(
                &block.elements[idx],
            )))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_iteration() {
        let sizes = [
            0,
            4,
            HANDLE_BLOCK_SIZE / 4,
            3 * HANDLE_BLOCK_SIZE,
            3 * HANDLE_BLOCK_SIZE + HANDLE_BLOCK_SIZE / 2,
            3 * HANDLE_BLOCK_SIZE + HANDLE_BLOCK_SIZE / 4,
        ];

        for size in sizes {
            let hm = HandleMemory::new();

            for _ in 0..size {
                hm.create(1.into());
            }

            hm.push_border();

            for _ in 0..size {
                hm.create(2.into());
            }

            hm.create(2.into());

            hm.pop_border();

            assert_eq!(hm.iter().count(), size);
            assert!(hm.iter().all(|handle| handle.direct() == 1.into()));
        }
    }

    #[test]
    fn handle_reads_updated_slot() {
        let hm = HandleMemory::new();
        let handle = hm.create(0x10.into());

        // simulate the collector rewriting the slot in place
        for root in hm.iter() {
            unsafe {
                *root.location().to_mut_ptr::<Address>() = 0x20.into();
            }
        }

        assert_eq!(handle.direct(), 0x20.into());
    }
}
