use std::sync::atomic::{AtomicUsize, Ordering};

use crate::gc::Address;

/// Plain bump-pointer allocation into a contiguous region. Freed storage is
/// never reused individually, dead space is reclaimed wholesale when the
/// collector resets the allocator.
pub struct BumpAllocator {
    top: AtomicUsize,
    limit: AtomicUsize,
}

impl BumpAllocator {
    pub fn new(top: Address, limit: Address) -> BumpAllocator {
        BumpAllocator {
            top: AtomicUsize::new(top.to_usize()),
            limit: AtomicUsize::new(limit.to_usize()),
        }
    }

    pub fn reset(&self, top: Address, limit: Address) {
        debug_assert!(top <= limit);
        self.top.store(top.to_usize(), Ordering::Relaxed);
        self.limit.store(limit.to_usize(), Ordering::Relaxed);
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Relaxed).into()
    }

    pub fn limit(&self) -> Address {
        self.limit.load(Ordering::Relaxed).into()
    }

    pub fn bump_alloc(&self, size: usize) -> Address {
        let mut old = self.top.load(Ordering::Relaxed);
        let mut new;

        loop {
            new = old + size;

            if new > self.limit.load(Ordering::Relaxed) {
                return Address::null();
            }

            let res =
                self.top
                    .compare_exchange_weak(old, new, Ordering::SeqCst, Ordering::Relaxed);

            match res {
                Ok(_) => break,
                Err(x) => old = x,
            }
        }

        old.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_until_full() {
        let backing = vec![0u8; 64];
        let start = Address::from_ptr(backing.as_ptr());
        let alloc = BumpAllocator::new(start, start.offset(64));

        assert_eq!(alloc.bump_alloc(32), start);
        assert_eq!(alloc.bump_alloc(32), start.offset(32));
        assert!(alloc.bump_alloc(1).is_null());

        alloc.reset(start, start.offset(64));
        assert_eq!(alloc.bump_alloc(64), start);
    }
}
