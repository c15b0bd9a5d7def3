use parking_lot::Mutex;

use crate::gc::swiper::card::CardTable;
use crate::gc::swiper::crossing::CrossingMap;
use crate::gc::{Address, Region};

/// The old generation: a single bump-allocated region filled by promotion
/// and compaction. Its usable capacity is capped below the region size so
/// that young + old never exceed the configured maximum heap size.
pub struct OldGen {
    total: Region,

    // upper bound for allocation, total.start + old generation share
    limit: Address,

    protected: Mutex<OldGenProtected>,

    crossing_map: CrossingMap,
    card_table: CardTable,
}

impl OldGen {
    pub fn new(
        start: Address,
        end: Address,
        limit: usize,
        crossing_map: CrossingMap,
        card_table: CardTable,
    ) -> OldGen {
        let total = Region::new(start, end);
        assert!(limit <= total.size());

        OldGen {
            total,
            limit: start.offset(limit),
            protected: Mutex::new(OldGenProtected { top: start }),

            crossing_map,
            card_table,
        }
    }

    pub fn total(&self) -> Region {
        self.total
    }

    pub fn total_start(&self) -> Address {
        self.total.start
    }

    /// Usable capacity in bytes.
    pub fn committed_size(&self) -> usize {
        self.limit.offset_from(self.total.start)
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn active(&self) -> Region {
        Region::new(self.total.start, self.top())
    }

    pub fn active_size(&self) -> usize {
        self.top().offset_from(self.total.start)
    }

    pub fn free_size(&self) -> usize {
        self.limit.offset_from(self.top())
    }

    pub fn top(&self) -> Address {
        let protected = self.protected.lock();
        protected.top
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.total.start <= addr && addr < self.top()
    }

    /// Bump-allocate promoted storage; keeps the crossing map consistent.
    pub fn allocate(&self, size: usize) -> Option<Address> {
        let mut protected = self.protected.lock();

        let object_start = protected.top;
        let object_end = object_start.offset(size);

        if object_end > self.limit {
            return None;
        }

        protected.top = object_end;
        self.crossing_map.update(object_start, object_end);

        Some(object_start)
    }

    /// Reset the allocation top after compaction relocated all survivors.
    pub fn reset_top(&self, top: Address) {
        debug_assert!(self.total.start <= top && top <= self.limit);

        let mut protected = self.protected.lock();
        protected.top = top;
    }

    pub fn update_crossing(&self, object_start: Address, object_end: Address) {
        self.crossing_map.update(object_start, object_end);
    }

    pub fn crossing_map(&self) -> &CrossingMap {
        &self.crossing_map
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }
}

struct OldGenProtected {
    top: Address,
}
