use std::sync::atomic::{AtomicUsize, Ordering};

use crate::gc::bump::BumpAllocator;
use crate::gc::{Address, Region};
use crate::os::{self, MemoryPermission};

/// The nursery: two equal semi-spaces. The mutator bump-allocates into the
/// to-space; a minor collection swaps the spaces and evacuates survivors
/// out of the (then) from-space. The age marker records the allocation top
/// at the end of the previous collection: anything below it has already
/// survived one collection and is promoted on the next one.
pub struct YoungGen {
    // bounds of both semi-spaces
    total: Region,

    // full (reserved) extent of each semi-space
    semispaces: [Region; 2],

    // decides which of the semi-spaces is the from-space
    from_index: AtomicUsize,

    // committed bytes per semi-space
    committed_semi_size: usize,

    // inaccessible from-space while the mutator runs
    protect: bool,

    // bump allocation into the current to-space
    alloc: BumpAllocator,

    age_marker: AtomicUsize,
}

impl YoungGen {
    pub fn new(total: Region, young_size: usize, protect: bool) -> YoungGen {
        let semi_size = young_size / 2;
        assert!(semi_size > 0);
        assert!(crate::mem::is_os_page_aligned(semi_size));

        let total_semi_size = total.size() / 2;
        assert!(semi_size <= total_semi_size);

        let first = total.start.region_start(total_semi_size);
        let second = Region::new(first.end, total.end);

        os::commit_at(first.start, semi_size, MemoryPermission::ReadWrite);
        os::commit_at(second.start, semi_size, MemoryPermission::ReadWrite);

        // from-space is the first semi-space, allocation starts in the second
        let to_space = second.start.region_start(semi_size);

        let young = YoungGen {
            total,
            semispaces: [first, second],
            from_index: AtomicUsize::new(0),
            committed_semi_size: semi_size,
            protect,
            alloc: BumpAllocator::new(to_space.start, to_space.end),
            age_marker: AtomicUsize::new(to_space.start.to_usize()),
        };

        young.protect_from();

        young
    }

    pub fn total(&self) -> Region {
        self.total
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.total.contains(addr)
    }

    pub fn committed_semi_size(&self) -> usize {
        self.committed_semi_size
    }

    pub fn committed_size(&self) -> usize {
        2 * self.committed_semi_size
    }

    pub fn from_committed(&self) -> Region {
        self.from_total().start.region_start(self.committed_semi_size)
    }

    pub fn from_total(&self) -> Region {
        self.semispaces[self.from_index()]
    }

    pub fn to_committed(&self) -> Region {
        self.to_total().start.region_start(self.committed_semi_size)
    }

    pub fn to_total(&self) -> Region {
        self.semispaces[self.to_index()]
    }

    /// Objects currently alive in the allocation space.
    pub fn to_active(&self) -> Region {
        Region::new(self.to_total().start, self.alloc.top())
    }

    pub fn active_size(&self) -> usize {
        self.to_active().size()
    }

    pub fn top(&self) -> Address {
        self.alloc.top()
    }

    pub fn bump_alloc(&self, size: usize) -> Option<Address> {
        let address = self.alloc.bump_alloc(size);

        if address.is_null() {
            None
        } else {
            Some(address)
        }
    }

    pub fn age_marker(&self) -> Address {
        self.age_marker.load(Ordering::Relaxed).into()
    }

    /// True when the object survived the previous minor collection already
    /// and should move to the old generation now.
    pub fn should_be_promoted(&self, addr: Address) -> bool {
        debug_assert!(self.from_committed().contains(addr));
        addr.to_usize() < self.age_marker.load(Ordering::Relaxed)
    }

    /// Flip the semi-spaces at the start of a minor collection. The old
    /// allocation space becomes the from-space holding the objects to
    /// evacuate; copies are bump-allocated into the fresh to-space.
    pub fn swap_semi(&self) {
        let from_index = self.from_index();
        self.from_index.store(from_index ^ 1, Ordering::Relaxed);

        let to_committed = self.to_committed();
        self.alloc.reset(to_committed.start, to_committed.end);
    }

    /// Evacuation finished: every surviving object sits below the current
    /// top. The from-space contents are dead from here on.
    pub fn minor_success(&self) {
        self.age_marker
            .store(self.alloc.top().to_usize(), Ordering::Relaxed);
        self.protect_from();
    }

    /// A full collection promoted everything; both semi-spaces are empty.
    pub fn reset_after_full_gc(&self) {
        let to_committed = self.to_committed();
        self.alloc.reset(to_committed.start, to_committed.end);
        self.age_marker
            .store(to_committed.start.to_usize(), Ordering::Relaxed);
    }

    // Make from-space writable before evacuation copies out of it.
    pub fn unprotect_from(&self) {
        if cfg!(debug_assertions) || self.protect {
            let from_space = self.from_committed();

            os::protect(
                from_space.start,
                from_space.size(),
                MemoryPermission::ReadWrite,
            );
        }
    }

    // Make from-space inaccessible: any stray access through a stale
    // reference faults immediately instead of reading dead objects.
    pub fn protect_from(&self) {
        if cfg!(debug_assertions) || self.protect {
            let from_space = self.from_committed();
            os::protect(from_space.start, from_space.size(), MemoryPermission::None);
        }
    }

    fn from_index(&self) -> usize {
        self.from_index.load(Ordering::Relaxed)
    }

    fn to_index(&self) -> usize {
        self.from_index() ^ 1
    }
}
