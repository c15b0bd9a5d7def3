use crate::gc::swiper::{CardIdx, CARD_SIZE, CARD_SIZE_BITS};
use crate::gc::{Address, Region};

/// Byte-per-card side table over the old generation. The write barrier
/// dirties the card covering a slot whenever an old-to-young reference is
/// stored; minor collections scan dirty cards as additional roots. Entries
/// may over-approximate (a stale dirty card is re-scanned harmlessly) but
/// must never miss a live old-to-young edge.
#[derive(Clone)]
pub struct CardTable {
    // boundaries for card table entries
    start: Address,
    end: Address,

    // the old generation region covered by this table
    covered: Region,
}

impl CardTable {
    pub fn new(start: Address, end: Address, covered: Region) -> CardTable {
        debug_assert!(end.offset_from(start) >= covered.size() >> CARD_SIZE_BITS);

        let table = CardTable {
            start,
            end,
            covered,
        };

        // The underlying memory is freshly committed and therefore zeroed,
        // which is exactly "all cards clean".
        debug_assert!(table.get(CardIdx::from(0)).is_clean());

        table
    }

    pub fn covered_region(&self) -> Region {
        self.covered
    }

    /// Card covering the given old-generation address.
    pub fn card_idx(&self, addr: Address) -> CardIdx {
        debug_assert!(self.covered.contains(addr));
        (addr.offset_from(self.covered.start) >> CARD_SIZE_BITS).into()
    }

    /// First address covered by the given card.
    pub fn to_address(&self, card: CardIdx) -> Address {
        self.covered.start.offset(card.to_usize() << CARD_SIZE_BITS)
    }

    /// Region of the heap covered by the given card.
    pub fn card_region(&self, card: CardIdx) -> Region {
        let start = self.to_address(card);
        Region::new(start, start.offset(CARD_SIZE))
    }

    /// Number of cards needed for the active part of the old generation
    /// ending at `top`.
    pub fn cards_for(&self, top: Address) -> usize {
        debug_assert!(self.covered.valid_top(top));
        let active = top.offset_from(self.covered.start);
        (active + CARD_SIZE - 1) >> CARD_SIZE_BITS
    }

    /// The write barrier: dirty the card covering `slot`.
    pub fn mark_dirty_at(&self, slot: Address) {
        self.set(self.card_idx(slot), CardEntry::Dirty);
    }

    pub fn get(&self, card: CardIdx) -> CardEntry {
        let ptr = self.entry_address(card);
        let value = unsafe { *ptr.to_ptr::<u8>() };

        if value == 0 {
            CardEntry::Clean
        } else {
            CardEntry::Dirty
        }
    }

    pub fn set(&self, card: CardIdx, entry: CardEntry) {
        let value = match entry {
            CardEntry::Clean => 0,
            CardEntry::Dirty => 1,
        };

        let ptr = self.entry_address(card);
        unsafe {
            *ptr.to_mut_ptr::<u8>() = value;
        }
    }

    /// Reset every card to clean; used after a full collection left the
    /// young generation empty.
    pub fn reset(&self) {
        let cards = self.covered.size() >> CARD_SIZE_BITS;

        unsafe {
            std::ptr::write_bytes(self.start.to_mut_ptr::<u8>(), 0, cards);
        }
    }

    fn entry_address(&self, card: CardIdx) -> Address {
        let entry = self.start.offset(card.to_usize());
        debug_assert!(entry < self.end);
        entry
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CardEntry {
    Clean,
    Dirty,
}

impl CardEntry {
    pub fn is_clean(self) -> bool {
        self == CardEntry::Clean
    }

    pub fn is_dirty(self) -> bool {
        self == CardEntry::Dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::swiper::CARD_SIZE;

    fn table_with_backing(backing: &mut Vec<u8>, covered_size: usize) -> CardTable {
        let cards = covered_size >> CARD_SIZE_BITS;
        backing.resize(cards, 0);

        let covered_start = Address::from(1024 * 1024);
        let start = Address::from_ptr(backing.as_ptr());

        CardTable::new(
            start,
            start.offset(cards),
            covered_start.region_start(covered_size),
        )
    }

    #[test]
    fn card_indexing() {
        let mut backing = Vec::new();
        let table = table_with_backing(&mut backing, 16 * CARD_SIZE);
        let covered = table.covered_region();

        assert_eq!(table.card_idx(covered.start).to_usize(), 0);
        assert_eq!(table.card_idx(covered.start.offset(CARD_SIZE - 1)).to_usize(), 0);
        assert_eq!(table.card_idx(covered.start.offset(CARD_SIZE)).to_usize(), 1);
        assert_eq!(table.to_address(CardIdx::from(2)), covered.start.offset(2 * CARD_SIZE));

        assert_eq!(table.cards_for(covered.start), 0);
        assert_eq!(table.cards_for(covered.start.offset(1)), 1);
        assert_eq!(table.cards_for(covered.start.offset(CARD_SIZE + 1)), 2);
    }

    #[test]
    fn dirty_and_reset() {
        let mut backing = Vec::new();
        let table = table_with_backing(&mut backing, 16 * CARD_SIZE);
        let covered = table.covered_region();

        let slot = covered.start.offset(3 * CARD_SIZE + 8);
        assert!(table.get(CardIdx::from(3)).is_clean());

        table.mark_dirty_at(slot);
        assert!(table.get(CardIdx::from(3)).is_dirty());
        assert!(table.get(CardIdx::from(2)).is_clean());

        // dirtying is idempotent
        table.mark_dirty_at(slot);
        assert!(table.get(CardIdx::from(3)).is_dirty());

        table.reset();
        assert!(table.get(CardIdx::from(3)).is_clean());
    }
}
