use std::alloc::{alloc, dealloc, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::gc::Address;
use crate::mem::ptr_width_usize;

const SEGMENT_SIZE: usize = 1024;
const SEGMENT_ENTRY_CAPACITY: usize =
    (SEGMENT_SIZE - size_of::<SegmentHeader>()) / ptr_width_usize();

/// Segmented worklist of pending object addresses. Tracing uses an explicit
/// worklist instead of recursion, so collection never depends on the depth
/// of the object graph.
pub struct Worklist {
    head: *mut SegmentHeader,
    tail: *mut SegmentHeader,
}

impl Worklist {
    pub fn new() -> Worklist {
        Worklist {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn push(&mut self, address: Address) {
        if !self.tail.is_null() && self.tail_mut().push(address) {
            return;
        }

        self.push_segment(WorklistSegment::new());
        let pushed = self.tail_mut().push(address);
        debug_assert!(pushed);
    }

    pub fn pop(&mut self) -> Option<Address> {
        loop {
            if self.head.is_null() {
                return None;
            }

            if let Some(address) = self.head_mut().pop() {
                return Some(address);
            }

            // Head segment is drained, release it and try the next one.
            let segment = self.pop_segment().expect("missing segment");
            drop(segment);
        }
    }

    fn push_segment(&mut self, segment: WorklistSegment) {
        let ptr = segment.ptr.as_ptr();
        std::mem::forget(segment);

        if self.head.is_null() {
            self.head = ptr;
            self.tail = ptr;
        } else {
            self.tail_mut().next = ptr;
            self.tail = ptr;
        }

        debug_assert!(self.tail().next.is_null());
    }

    fn pop_segment(&mut self) -> Option<WorklistSegment> {
        if self.head.is_null() {
            None
        } else {
            let result = self.head;
            let new_head = self.head().next;

            self.head = new_head;
            if new_head.is_null() {
                self.tail = ptr::null_mut();
            }

            unsafe {
                (*result).next = ptr::null_mut();
            }

            Some(WorklistSegment {
                ptr: unsafe { NonNull::new_unchecked(result) },
            })
        }
    }

    pub fn clear(&mut self) {
        while let Some(segment) = self.pop_segment() {
            drop(segment);
        }
    }

    fn head(&self) -> &SegmentHeader {
        unsafe { &*self.head }
    }

    fn head_mut(&mut self) -> &mut SegmentHeader {
        unsafe { &mut *self.head }
    }

    fn tail(&self) -> &SegmentHeader {
        unsafe { &*self.tail }
    }

    fn tail_mut(&mut self) -> &mut SegmentHeader {
        unsafe { &mut *self.tail }
    }
}

impl Drop for Worklist {
    fn drop(&mut self) {
        self.clear();
    }
}

struct WorklistSegment {
    ptr: NonNull<SegmentHeader>,
}

impl WorklistSegment {
    fn new() -> WorklistSegment {
        WorklistSegment {
            ptr: alloc_segment(),
        }
    }

    #[cfg(test)]
    fn push(&mut self, address: Address) -> bool {
        unsafe { self.ptr.as_mut().push(address) }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        unsafe { self.ptr.as_ref().len() }
    }
}

#[repr(C)]
struct SegmentHeader {
    next: *mut SegmentHeader,
    len: usize,
}

impl SegmentHeader {
    fn len(&self) -> usize {
        self.len
    }

    fn push(&mut self, address: Address) -> bool {
        let old_len = self.len();
        if old_len < SEGMENT_ENTRY_CAPACITY {
            unsafe {
                ptr::write(self.data_raw_mut().add(old_len), address);
                self.len = old_len + 1;
            }
            true
        } else {
            false
        }
    }

    fn pop(&mut self) -> Option<Address> {
        let len = self.len();
        if len > 0 {
            self.len = len - 1;
            let value = unsafe { ptr::read(self.data_raw_mut().add(len - 1)) };
            Some(value)
        } else {
            None
        }
    }

    fn data_raw_mut(&mut self) -> *mut Address {
        unsafe { (self as *mut _ as *mut u8).add(size_of::<SegmentHeader>()) as *mut _ }
    }
}

impl Drop for WorklistSegment {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr() as *mut _, layout_segment());
        }
    }
}

fn alloc_segment() -> NonNull<SegmentHeader> {
    unsafe {
        let header = alloc(layout_segment()) as *mut SegmentHeader;

        if header.is_null() {
            panic!("native heap allocation failed");
        }

        (*header).next = ptr::null_mut();
        (*header).len = 0;

        NonNull::new_unchecked(header)
    }
}

fn layout_segment() -> Layout {
    Layout::from_size_align(SEGMENT_SIZE, ptr_width_usize()).expect("broken layout")
}

#[cfg(test)]
mod tests {
    use super::{Worklist, WorklistSegment, SEGMENT_ENTRY_CAPACITY};

    #[test]
    fn push_into_segment() {
        let mut seg = WorklistSegment::new();
        for idx in 0..SEGMENT_ENTRY_CAPACITY {
            assert_eq!(seg.len(), idx);
            assert!(seg.push(1.into()));
        }
        assert_eq!(seg.len(), SEGMENT_ENTRY_CAPACITY);
        assert!(!seg.push(1.into()));
    }

    #[test]
    fn push_and_pop_across_segments(){
        let mut worklist = Worklist::new();
        assert!(worklist.is_empty());

        let total = 3 * SEGMENT_ENTRY_CAPACITY + 7;

        for value in 0..total {
            worklist.push((value + 1).into());
        }

        assert!(!worklist.is_empty());

        let mut popped = 0;
        while let Some(address) = worklist.pop() {
            assert!(address.is_non_null());
            popped += 1;
        }

        assert_eq!(popped, total);
        assert!(worklist.is_empty());
    }

    #[test]
    fn clear_releases_segments() {
        let mut worklist = Worklist::new();

        for value in 0..2 * SEGMENT_ENTRY_CAPACITY {
            worklist.push((value + 1).into());
        }

        worklist.clear();
        assert!(worklist.is_empty());
        assert!(worklist.pop().is_none());
    }
}
