use crate::gc::swiper::{CardIdx, CARD_SIZE_BITS};
use crate::gc::{Address, Region};
use crate::mem;

// see GC Handbook 11.8: Crossing Maps
// meaning of byte value
//
// 0 <= v < 64: FirstObject(v)
//     first object header in this card starts v words after card start
//
// 64: NoObjectStart
//     no object starts in this card, it is covered by an object that
//     starts in an earlier card

const NO_OBJECT_START: u8 = 64;

/// One byte per old-generation card, recording where the first object of
/// the card starts. Dirty-card scanning needs this to find an object
/// header to walk from; a zeroed map reads as `FirstObject(0)`, which is
/// correct for the empty old generation since allocation is contiguous
/// from the region start.
#[derive(Clone)]
pub struct CrossingMap {
    // boundaries for crossing map
    start: Address,
    end: Address,

    // the old generation region covered by this map
    covered: Region,
}

impl CrossingMap {
    pub fn new(start: Address, end: Address, covered: Region) -> CrossingMap {
        debug_assert!(end.offset_from(start) >= covered.size() >> CARD_SIZE_BITS);

        CrossingMap {
            start,
            end,
            covered,
        }
    }

    pub fn set_no_object_start(&self, card: CardIdx) {
        self.set(card, NO_OBJECT_START);
    }

    pub fn set_first_object(&self, card: CardIdx, words: usize) {
        assert!(words < 64);
        self.set(card, words as u8);
    }

    fn set(&self, card: CardIdx, val: u8) {
        let entry = self.start.offset(card.to_usize());
        debug_assert!(entry < self.end);

        unsafe {
            *entry.to_mut_ptr::<u8>() = val;
        }
    }

    pub fn get(&self, card: CardIdx) -> CrossingEntry {
        let entry = self.start.offset(card.to_usize());
        debug_assert!(entry < self.end);

        let val = unsafe { *entry.to_ptr::<u8>() };

        if val < 64 {
            CrossingEntry::FirstObject(val)
        } else if val == NO_OBJECT_START {
            CrossingEntry::NoObjectStart
        } else {
            panic!("invalid crossing table entry")
        }
    }

    /// Record an allocation of `[object_start; object_end)`. Cards fully
    /// covered by the object get `NoObjectStart`; the card the object ends
    /// in records the offset at which the next contiguous allocation will
    /// start.
    pub fn update(&self, object_start: Address, object_end: Address) {
        debug_assert!(self.covered.valid_top(object_start) && self.covered.valid_top(object_end));

        if (object_start.to_usize() >> CARD_SIZE_BITS) != (object_end.to_usize() >> CARD_SIZE_BITS)
        {
            let start_card_idx = self.card_idx(object_start);
            let end_card_idx = self.card_idx_for_end(object_end);

            // all cards between ]start_card; end_card[ are covered entirely
            for card in start_card_idx + 1..end_card_idx {
                self.set_no_object_start(card.into());
            }

            // end_card stores x words of object, then the next object
            if object_end < self.covered.end {
                let end_card_addr = self.card_address(end_card_idx);
                self.set_first_object(
                    end_card_idx.into(),
                    object_end.offset_from(end_card_addr) / mem::ptr_width_usize(),
                );
            }
        }
    }

    /// Address of an object header from which a forward walk reaches the
    /// first word of the given card. When the card's leading words belong
    /// to an object that started earlier this walks back through the map
    /// until it finds a card with an object header. Only valid for cards
    /// inside the old generation's active region.
    pub fn first_object_reaching(&self, card: CardIdx) -> Address {
        let mut idx = card.to_usize();

        if self.get(card) == CrossingEntry::FirstObject(0) {
            return self.card_address(idx);
        }

        // The card starts inside an object from an earlier card: find the
        // closest preceding card that starts an object and walk forward
        // from its first object.
        debug_assert!(idx > 0, "card 0 always starts an object");
        idx -= 1;

        loop {
            match self.get(idx.into()) {
                CrossingEntry::FirstObject(words) => {
                    return self.card_address(idx).add_ptr(words as usize);
                }

                CrossingEntry::NoObjectStart => {
                    debug_assert!(idx > 0, "card 0 always starts an object");
                    idx -= 1;
                }
            }
        }
    }

    fn card_idx(&self, address: Address) -> usize {
        address.offset_from(self.covered.start) >> CARD_SIZE_BITS
    }

    fn card_idx_for_end(&self, address: Address) -> usize {
        // an object ending exactly at a card boundary "ends" in the
        // following card: that card's first object starts at offset 0
        address.offset_from(self.covered.start) >> CARD_SIZE_BITS
    }

    fn card_address(&self, card: usize) -> Address {
        self.covered.start.offset(card << CARD_SIZE_BITS)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CrossingEntry {
    NoObjectStart,
    FirstObject(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::swiper::CARD_SIZE;

    fn map_with_backing(backing: &mut Vec<u8>, covered_size: usize) -> CrossingMap {
        let cards = covered_size >> CARD_SIZE_BITS;
        backing.resize(cards, 0);

        let covered_start = Address::from(1024 * 1024);
        let start = Address::from_ptr(backing.as_ptr());

        CrossingMap::new(
            start,
            start.offset(cards),
            covered_start.region_start(covered_size),
        )
    }

    #[test]
    fn small_objects_keep_entries() {
        let mut backing = Vec::new();
        let map = map_with_backing(&mut backing, 8 * CARD_SIZE);
        let covered_start = Address::from(1024 * 1024);

        // object within a single card changes nothing
        map.update(covered_start, covered_start.offset(64));
        assert_eq!(map.get(CardIdx::from(0)), CrossingEntry::FirstObject(0));
        assert_eq!(map.get(CardIdx::from(1)), CrossingEntry::FirstObject(0));
    }

    #[test]
    fn spanning_object_records_cards() {
        let mut backing = Vec::new();
        let map = map_with_backing(&mut backing, 8 * CARD_SIZE);
        let covered_start = Address::from(1024 * 1024);

        // object spanning cards 0..=2, ending 16 bytes into card 2
        let object_start = covered_start.offset(32);
        let object_end = covered_start.offset(2 * CARD_SIZE + 16);
        map.update(object_start, object_end);

        assert_eq!(map.get(CardIdx::from(1)), CrossingEntry::NoObjectStart);
        assert_eq!(
            map.get(CardIdx::from(2)),
            CrossingEntry::FirstObject((16 / crate::mem::ptr_width_usize()) as u8)
        );

        // both the covered card and the card holding the object's tail
        // walk back to the object starting in card 0
        assert_eq!(map.first_object_reaching(CardIdx::from(1)), covered_start);
        assert_eq!(map.first_object_reaching(CardIdx::from(2)), covered_start);
    }

    #[test]
    fn walk_back_over_covered_cards() {
        let mut backing = Vec::new();
        let map = map_with_backing(&mut backing, 8 * CARD_SIZE);
        let covered_start = Address::from(1024 * 1024);

        // large object covering cards 1..=4 entirely
        let object_start = covered_start.offset(CARD_SIZE - 16);
        let object_end = covered_start.offset(5 * CARD_SIZE);
        map.update(object_start, object_end);

        // cards 1..=4 are covered, card 5 starts the next object
        for card in 1..5 {
            assert_eq!(map.get(CardIdx::from(card)), CrossingEntry::NoObjectStart);
        }
        assert_eq!(map.get(CardIdx::from(5)), CrossingEntry::FirstObject(0));

        // walking back from a covered card lands on card 0's first object
        assert_eq!(map.first_object_reaching(CardIdx::from(3)), covered_start);
    }
}
