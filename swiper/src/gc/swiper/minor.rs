use std::cmp;

use crate::gc::root::Slot;
use crate::gc::swiper::card::{CardEntry, CardTable};
use crate::gc::swiper::crossing::CrossingMap;
use crate::gc::swiper::old::OldGen;
use crate::gc::swiper::young::YoungGen;
use crate::gc::swiper::CardIdx;
use crate::gc::swiper::controller::MinorCollectorPhases;
use crate::gc::worklist::Worklist;
use crate::gc::{Address, GcReason, Heap, Region};
use crate::object::{Obj, ShapeWordKind};
use crate::shape::Shape;
use crate::timer::Timer;

/// Copying collection of the young generation. Roots are the runtime's
/// root slots plus every old-to-young edge found on dirty cards. Survivors
/// past the age marker are promoted into the old generation, everything
/// else is copied to the to-space. The forwarding word collapses shared
/// and cyclic references, the explicit worklist bounds the stack.
pub struct MinorCollector<'a> {
    heap: &'a Heap,

    young: &'a YoungGen,
    old: &'a OldGen,
    card_table: &'a CardTable,
    crossing_map: &'a CrossingMap,

    rootset: &'a [Slot],
    _reason: GcReason,

    // the space being evacuated, captured right after the semi-space flip
    from_region: Region,

    // old generation extent before any promotion of this cycle
    old_top_start: Address,

    worklist: Worklist,

    promoted_size: usize,
    copied_size: usize,
    promotion_failed: bool,

    phases: MinorCollectorPhases,
}

impl<'a> MinorCollector<'a> {
    pub fn new(
        heap: &'a Heap,
        young: &'a YoungGen,
        old: &'a OldGen,
        card_table: &'a CardTable,
        crossing_map: &'a CrossingMap,
        rootset: &'a [Slot],
        reason: GcReason,
    ) -> MinorCollector<'a> {
        MinorCollector {
            heap,

            young,
            old,
            card_table,
            crossing_map,

            rootset,
            _reason: reason,

            from_region: Region::default(),
            old_top_start: old.top(),

            worklist: Worklist::new(),

            promoted_size: 0,
            copied_size: 0,
            promotion_failed: false,

            phases: MinorCollectorPhases::new(),
        }
    }

    pub fn phases(&self) -> MinorCollectorPhases {
        self.phases.clone()
    }

    pub fn promoted_size(&self) -> usize {
        self.promoted_size
    }

    pub fn copied_size(&self) -> usize {
        self.copied_size
    }

    /// Returns true when the old generation ran full mid-promotion; the
    /// affected survivors stayed in the young generation and the driver
    /// should follow up with a full collection.
    pub fn collect(&mut self) -> bool {
        let stats = self.heap.flags().gc_stats;
        let mut timer = Timer::new(stats);

        self.young.unprotect_from();
        self.young.swap_semi();
        self.from_region = self.young.from_committed();

        self.visit_roots();
        self.visit_dirty_cards();

        if stats {
            self.phases.roots = timer.stop();
        }

        self.trace_gray_objects();

        if stats {
            self.phases.tracing = timer.stop();
        }

        self.young.minor_success();

        self.promotion_failed
    }

    fn visit_roots(&mut self) {
        for &root in self.rootset {
            let object_address = root.get();

            if self.from_region.contains(object_address) {
                root.set(self.evacuate(object_address));
            }
        }
    }

    /// Scan the remembered set: every dirty card of the old generation is
    /// walked from its first object, old-to-young edges are evacuated and
    /// rewritten. A card stays dirty only if it still references the young
    /// generation afterwards.
    fn visit_dirty_cards(&mut self) {
        let cards = self.card_table.cards_for(self.old_top_start);

        for card in 0..cards {
            let card = CardIdx::from(card);

            if self.card_table.get(card).is_dirty() {
                self.visit_dirty_card(card);
            }
        }
    }

    fn visit_dirty_card(&mut self, card: CardIdx) {
        self.card_table.set(card, CardEntry::Clean);

        let full_region = self.card_table.card_region(card);
        let card_region = Region::new(
            full_region.start,
            cmp::min(full_region.end, self.old_top_start),
        );

        let mut ref_to_young = false;
        let mut scan = self.crossing_map.first_object_reaching(card);

        while scan < card_region.end {
            let object = scan.to_obj();
            let object_size = object.size();
            let object_end = scan.offset(object_size);

            if object_end > card_region.start {
                self.visit_remembered_object(object, card_region, &mut ref_to_young);
            }

            scan = object_end;
        }

        if ref_to_young {
            self.card_table.set(card, CardEntry::Dirty);
        }
    }

    fn visit_remembered_object(
        &mut self,
        object: &Obj,
        card_region: Region,
        ref_to_young: &mut bool,
    ) {
        let from_region = self.from_region;
        let young_total = self.young.total();

        object.visit_reference_fields_in_range(card_region, |slot| {
            let pointer = slot.get();

            if from_region.contains(pointer) {
                let copied = self.evacuate(pointer);
                slot.set(copied);

                if young_total.contains(copied) {
                    *ref_to_young = true;
                }
            } else if young_total.contains(pointer) {
                *ref_to_young = true;
            }
        });
    }

    fn trace_gray_objects(&mut self) {
        while let Some(object_address) = self.worklist.pop() {
            if self.young.contains(object_address) {
                self.trace_young_object(object_address);
            } else {
                self.trace_promoted_object(object_address);
            }
        }
    }

    fn trace_young_object(&mut self, object_address: Address) {
        let object = object_address.to_obj();
        let from_region = self.from_region;

        object.visit_reference_fields(|slot| {
            let pointer = slot.get();

            if from_region.contains(pointer) {
                slot.set(self.evacuate(pointer));
            }
        });
    }

    /// A promoted object is immediately reachable from the old generation:
    /// any young reference it keeps has to show up in the remembered set,
    /// so the cards covering its slots are dirtied here.
    fn trace_promoted_object(&mut self, object_address: Address) {
        let object = object_address.to_obj();
        let from_region = self.from_region;
        let young_total = self.young.total();

        object.visit_reference_fields(|slot| {
            let pointer = slot.get();

            if from_region.contains(pointer) {
                let copied = self.evacuate(pointer);
                slot.set(copied);

                if young_total.contains(copied) {
                    self.card_table.mark_dirty_at(slot.address());
                }
            }
        });
    }

    fn evacuate(&mut self, object_address: Address) -> Address {
        let object = object_address.to_obj();

        // Check if object was already copied.
        let shape_address = match object.header().shape_or_fwdptr() {
            ShapeWordKind::Fwdptr(forward_address) => {
                return forward_address;
            }

            ShapeWordKind::Shape(shape_address) => shape_address,
        };

        let shape = unsafe { &*shape_address.to_ptr::<Shape>() };
        let object_size = object.size_for_shape(shape);

        // If the object is old enough, copy it into the old generation.
        if self.young.should_be_promoted(object_address) {
            if let Some(copy_address) = self.promote(object, object_size) {
                return copy_address;
            }

            // Old generation is full: keep the survivor in the young
            // generation for now, a full collection cleans this up.
            self.promotion_failed = true;
        }

        let copy_address = match self.young.bump_alloc(object_size) {
            Some(address) => address,
            None => panic!("not enough space for evacuation during minor collection"),
        };

        object.copy_to(copy_address, object_size);
        object.header().install_fwdptr(copy_address);

        self.copied_size += object_size;
        self.worklist.push(copy_address);

        copy_address
    }

    fn promote(&mut self, object: &Obj, object_size: usize) -> Option<Address> {
        let copy_address = self.old.allocate(object_size)?;

        object.copy_to(copy_address, object_size);
        copy_address.to_obj().header().clear_metadata();
        object.header().install_fwdptr(copy_address);

        self.promoted_size += object_size;
        self.worklist.push(copy_address);

        Some(copy_address)
    }
}
