use std::fmt;

use fixedbitset::FixedBitSet;

use crate::gc::root::Slot;
use crate::gc::swiper::card::CardTable;
use crate::gc::swiper::crossing::{CrossingEntry, CrossingMap};
use crate::gc::swiper::old::OldGen;
use crate::gc::swiper::young::YoungGen;
use crate::gc::swiper::{on_different_cards, walk_region, CardIdx};
use crate::gc::{Address, Heap, Region};
use crate::mem;
use crate::object::{Obj, ShapeWordKind};

#[derive(Copy, Clone)]
pub enum VerifierPhase {
    PreMinor,
    PostMinor,
    PreFull,
    PostFull,
}

impl VerifierPhase {
    fn is_pre(self) -> bool {
        match self {
            VerifierPhase::PreMinor => true,
            VerifierPhase::PostMinor => false,
            VerifierPhase::PreFull => true,
            VerifierPhase::PostFull => false,
        }
    }

    fn is_post_full(self) -> bool {
        match self {
            VerifierPhase::PostFull => true,
            _ => false,
        }
    }
}

impl fmt::Display for VerifierPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            VerifierPhase::PreMinor => "pre minor",
            VerifierPhase::PostMinor => "post minor",
            VerifierPhase::PreFull => "pre full",
            VerifierPhase::PostFull => "post full",
        };

        write!(f, "{}", text)
    }
}

/// Structural heap validation, run before and after every collection when
/// enabled. Any violation is a collector bug: the verifier aborts instead
/// of letting the mutator continue on corrupted state.
///
/// Checked invariants:
/// - every reference is null or points at a well-formed header of a
///   registered shape inside the active part of a generation
/// - nothing points into the inactive from-space
/// - no object carries leftover mark or forwarding state
/// - every old-generation card holding young references is dirty (the
///   remembered set never under-approximates); after a collection dirty
///   cards conversely hold at least one young reference
/// - the crossing map locates the first object of every old card
pub struct Verifier<'a> {
    heap: &'a Heap,
    young: &'a YoungGen,
    old: &'a OldGen,
    card_table: &'a CardTable,
    crossing_map: &'a CrossingMap,
    rootset: &'a [Slot],

    in_old: bool,
    refs_to_young: Vec<usize>,

    young_total: Region,
    to_active: Region,
    old_active: Region,
    heap_region: Region,

    phase: VerifierPhase,
}

impl<'a> Verifier<'a> {
    pub fn new(
        heap: &'a Heap,
        young: &'a YoungGen,
        old: &'a OldGen,
        card_table: &'a CardTable,
        crossing_map: &'a CrossingMap,
        rootset: &'a [Slot],
        heap_region: Region,
        phase: VerifierPhase,
    ) -> Verifier<'a> {
        let cards = card_table.cards_for(old.top());

        Verifier {
            heap,
            young,
            old,
            card_table,
            crossing_map,
            rootset,

            in_old: false,
            refs_to_young: vec![0; cards],

            young_total: young.total(),
            to_active: young.to_active(),
            old_active: old.active(),
            heap_region,

            phase,
        }
    }

    pub fn verify(&mut self) {
        self.verify_roots();
        self.verify_young();
        self.verify_old();
        self.verify_card_table();
        self.verify_reachability();
    }

    fn verify_roots(&mut self) {
        for &root in self.rootset {
            self.verify_reference(root, Address::null());
        }
    }

    fn verify_young(&mut self) {
        debug_assert!(!self.in_old);

        if self.phase.is_post_full() && !self.to_active.empty() {
            self.fatal(format_args!(
                "young generation not empty after full collection: {}",
                self.to_active,
            ));
        }

        let to_active = self.to_active;

        walk_region(to_active, |object, address, _size| {
            self.verify_object(object, address);
        });
    }

    fn verify_old(&mut self) {
        self.in_old = true;

        if !self.old_active.empty() {
            let first = self.crossing_map.get(CardIdx::from(0));

            if first != CrossingEntry::FirstObject(0) {
                self.fatal(format_args!(
                    "crossing map does not start with an object at {}",
                    self.old_active.start,
                ));
            }
        }

        let old_active = self.old_active;

        walk_region(old_active, |object, address, size| {
            self.verify_object(object, address);

            let object_end = address.offset(size);

            if on_different_cards(address, object_end) {
                self.verify_crossing(address, object_end);
            }
        });

        self.in_old = false;
    }

    fn verify_object(&mut self, object: &Obj, address: Address) {
        let shape_address = match object.header().shape_or_fwdptr() {
            ShapeWordKind::Shape(shape_address) => shape_address,
            ShapeWordKind::Fwdptr(forward) => {
                self.fatal(format_args!(
                    "object {} still carries forwarding address {}",
                    address, forward,
                ));
            }
        };

        if !self.heap.shapes().is_known(shape_address) {
            self.fatal(format_args!(
                "object {} has unknown shape address {}",
                address, shape_address,
            ));
        }

        if object.header().metadata_raw() != 0 {
            self.fatal(format_args!(
                "object {} carries mark/forwarding metadata outside a collection",
                address,
            ));
        }

        let in_old = self.in_old;

        object.visit_reference_fields(|slot| {
            self.verify_reference(slot, address);

            if in_old {
                let value = slot.get();

                if self.young_total.contains(value) {
                    let card = self.card_table.card_idx(slot.address());
                    self.refs_to_young[card.to_usize()] += 1;
                }
            }
        });
    }

    fn verify_reference(&mut self, slot: Slot, container: Address) {
        let reference = slot.get();

        if reference.is_null() {
            return;
        }

        if self.to_active.contains(reference) || self.old_active.contains(reference) {
            let object = reference.to_obj();

            // The reference must hit an object start: its header word has
            // to name a registered shape.
            match object.header().shape_or_fwdptr() {
                ShapeWordKind::Shape(shape_address) => {
                    if !self.heap.shapes().is_known(shape_address) {
                        self.fatal(format_args!(
                            "reference {} (slot {}, object {}) does not point at an object header",
                            reference,
                            slot.address(),
                            container,
                        ));
                    }
                }

                ShapeWordKind::Fwdptr(_) => {
                    self.fatal(format_args!(
                        "reference {} (slot {}, object {}) points at a forwarded object",
                        reference,
                        slot.address(),
                        container,
                    ));
                }
            }

            return;
        }

        if self.young_total.contains(reference) {
            println!(
                "reference points into the young generation but not into the active space;"
            );
            println!("from-space contents are dead after a collection.");
        }

        self.fatal(format_args!(
            "invalid reference to {} (slot {}, object {}) in phase {}",
            reference,
            slot.address(),
            container,
            self.phase,
        ));
    }

    fn verify_card_table(&mut self) {
        for (card, &refs) in self.refs_to_young.iter().enumerate() {
            let card = CardIdx::from(card);
            let entry = self.card_table.get(card);

            if refs > 0 && self.phase.is_post_full() {
                // full collections promote everything into the old
                // generation, the young generation must be empty
                self.fatal(format_args!(
                    "card {} holds {} young references after full collection",
                    card.to_usize(),
                    refs,
                ));
            }

            // A live old-to-young edge must always be covered by a dirty
            // card, otherwise a minor collection would miss it.
            if refs > 0 && entry.is_clean() {
                self.fatal(format_args!(
                    "card {} ({}) is clean but holds {} young reference(s) in phase {}",
                    card.to_usize(),
                    self.card_table.to_address(card),
                    refs,
                    self.phase,
                ));
            }

            // Directly after a collection the card table is exact: stale
            // dirty entries are only tolerated while the mutator runs.
            if !self.phase.is_pre() && refs == 0 && entry.is_dirty() {
                self.fatal(format_args!(
                    "card {} ({}) is dirty but holds no young reference in phase {}",
                    card.to_usize(),
                    self.card_table.to_address(card),
                    self.phase,
                ));
            }
        }
    }

    fn verify_crossing(&mut self, object_start: Address, object_end: Address) {
        let start_card = self.card_table.card_idx(object_start);
        let end_card_idx =
            object_end.offset_from(self.old_active.start) >> crate::gc::swiper::CARD_SIZE_BITS;

        for card in start_card.to_usize() + 1..end_card_idx {
            if self.crossing_map.get(card.into()) != CrossingEntry::NoObjectStart {
                self.fatal(format_args!(
                    "crossing entry of covered card {} is not NoObjectStart",
                    card,
                ));
            }
        }

        if object_end < self.old_active.end {
            let end_card = CardIdx::from(end_card_idx);
            let end_card_address = self.card_table.to_address(end_card);
            let offset_words = object_end.offset_from(end_card_address) / mem::ptr_width_usize();

            let actual = self.crossing_map.get(end_card);
            let expected = CrossingEntry::FirstObject(offset_words as u8);

            if actual != expected {
                self.fatal(format_args!(
                    "crossing entry of card {} is {:?}, expected {:?}",
                    end_card_idx, actual, expected,
                ));
            }
        }
    }

    /// Walk every object transitively reachable from the root set. The
    /// visited set lives in a side bitset, so verification never mutates
    /// object state.
    fn verify_reachability(&mut self) {
        let words = self.heap_region.size() / mem::ptr_width_usize();
        let mut visited = FixedBitSet::with_capacity(words);
        let mut worklist = Vec::new();

        for &root in self.rootset {
            let reference = root.get();

            if reference.is_non_null() && self.mark_visited(&mut visited, reference) {
                worklist.push(reference);
            }
        }

        while let Some(address) = worklist.pop() {
            let object = address.to_obj();

            object.visit_reference_fields(|slot| {
                let value = slot.get();

                if value.is_non_null() && self.mark_visited(&mut visited, value) {
                    worklist.push(value);
                }
            });
        }
    }

    fn mark_visited(&self, visited: &mut FixedBitSet, address: Address) -> bool {
        if !self.to_active.contains(address) && !self.old_active.contains(address) {
            self.fatal(format_args!(
                "reachable reference {} outside the active generations",
                address,
            ));
        }

        let word = address.offset_from(self.heap_region.start) / mem::ptr_width_usize();

        if visited.contains(word) {
            false
        } else {
            visited.insert(word);
            true
        }
    }

    fn fatal(&self, message: fmt::Arguments) -> ! {
        self.dump_spaces();
        panic!("heap integrity violation ({}): {}", self.phase, message);
    }

    fn dump_spaces(&self) {
        println!(
            " TO: {}; active: {} (size 0x{:x})",
            self.young.to_total(),
            self.to_active,
            self.to_active.size(),
        );
        println!(
            "FROM: {}",
            self.young.from_total(),
        );
        println!(
            "OLD total: {}; active: {} (size 0x{:x})",
            self.old.total(),
            self.old_active,
            self.old_active.size(),
        );
        println!("TTL: {}-{}", self.heap_region.start, self.heap_region.end);
    }
}
