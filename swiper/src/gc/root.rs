use parking_lot::Mutex;

use crate::gc::{Address, Heap};

/// Collect all strong root slots: every live handle plus every registered
/// global cell. The slots are owned by the runtime; the collector reads
/// them and rewrites them in place when referents move.
pub fn determine_strong_roots(heap: &Heap) -> Vec<Slot> {
    let mut rootset = Vec::new();

    iterate_strong_roots(heap, |slot| {
        rootset.push(slot);
    });

    rootset
}

pub fn iterate_strong_roots<F: FnMut(Slot)>(heap: &Heap, mut callback: F) {
    for handle in heap.handles().iter() {
        callback(Slot::at(handle.location()));
    }

    heap.globals().iterate(&mut callback);
}

/// A memory location holding an object reference.
#[derive(Copy, Clone)]
pub struct Slot(Address);

impl Slot {
    pub fn at(addr: Address) -> Slot {
        Slot(addr)
    }

    pub fn address(self) -> Address {
        self.0
    }

    pub fn get(self) -> Address {
        unsafe { *self.0.to_ptr::<Address>() }
    }

    pub fn set(self, obj: Address) {
        unsafe {
            *self.0.to_mut_ptr::<Address>() = obj;
        }
    }
}

/// Global root cells. The heap owns the storage (boxed, so cell addresses
/// stay stable), the runtime reads and writes the cells through
/// `GlobalHandle`.
pub struct GlobalRoots {
    cells: Mutex<Vec<Box<Address>>>,
}

impl GlobalRoots {
    pub fn new() -> GlobalRoots {
        GlobalRoots {
            cells: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, value: Address) -> GlobalHandle {
        let mut cells = self.cells.lock();
        cells.push(Box::new(value));

        let location: &mut Address = cells.last_mut().unwrap();
        GlobalHandle(location as *mut Address)
    }

    pub fn iterate<F: FnMut(Slot)>(&self, callback: &mut F) {
        let cells = self.cells.lock();

        for cell in cells.iter() {
            callback(Slot::at(Address::from_ptr(&**cell as *const Address)));
        }
    }
}

/// Reference to a registered global root cell. Stores into the cell need no
/// write barrier since roots are scanned in full by every collection.
#[repr(C)]
pub struct GlobalHandle(*mut Address);

impl GlobalHandle {
    pub fn get(self) -> Address {
        unsafe { *self.0 }
    }

    pub fn set(self, value: Address) {
        unsafe {
            *self.0 = value;
        }
    }

    pub fn location(&self) -> Address {
        Address::from_ptr(self.0)
    }
}

impl Copy for GlobalHandle {}
impl Clone for GlobalHandle {
    fn clone(&self) -> GlobalHandle {
        *self
    }
}
