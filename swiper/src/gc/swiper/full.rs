use crate::gc::marking;
use crate::gc::root::Slot;
use crate::gc::swiper::card::CardTable;
use crate::gc::swiper::controller::FullCollectorPhases;
use crate::gc::swiper::old::OldGen;
use crate::gc::swiper::young::YoungGen;
use crate::gc::swiper::walk_region;
use crate::gc::{Address, GcReason, Heap, OutOfMemory, Region};
use crate::timer::Timer;

/// Mark-compact collection over the whole heap. Everything reachable is
/// moved to the front of the old generation: compaction removes
/// fragmentation and leaves the young generation empty. The compaction
/// forwarding address lives in the metadata word, symmetric to the minor
/// collector's forwarding in the shape word.
pub struct FullCollector<'a> {
    heap: &'a Heap,

    young: &'a YoungGen,
    old: &'a OldGen,
    card_table: &'a CardTable,

    rootset: &'a [Slot],
    _reason: GcReason,

    young_active: Region,
    old_active: Region,

    // compaction cursor
    top: Address,

    phases: FullCollectorPhases,
}

impl<'a> FullCollector<'a> {
    pub fn new(
        heap: &'a Heap,
        young: &'a YoungGen,
        old: &'a OldGen,
        card_table: &'a CardTable,
        rootset: &'a [Slot],
        reason: GcReason,
    ) -> FullCollector<'a> {
        FullCollector {
            heap,

            young,
            old,
            card_table,

            rootset,
            _reason: reason,

            young_active: young.to_active(),
            old_active: old.active(),

            top: old.total_start(),

            phases: FullCollectorPhases::new(),
        }
    }

    pub fn phases(&self) -> FullCollectorPhases {
        self.phases.clone()
    }

    pub fn collect(&mut self) -> Result<(), OutOfMemory> {
        let stats = self.heap.flags().gc_stats;
        let mut timer = Timer::new(stats);

        let live_bytes = marking::mark_live(self.rootset, self.young_active, self.old_active);

        if stats {
            self.phases.marking = timer.stop();
        }

        // Compaction moves every survivor into the old generation; bail
        // out before touching anything when they cannot fit.
        if live_bytes > self.old.committed_size() {
            self.unmark_all();
            return Err(OutOfMemory);
        }

        self.compute_forward();

        if stats {
            self.phases.compute_forward = timer.stop();
        }

        self.update_references();

        if stats {
            self.phases.update_refs = timer.stop();
        }

        self.relocate();

        if stats {
            self.phases.relocate = timer.stop();
        }

        // The young generation is empty now, so no old-to-young edge is
        // left and the whole card table reads clean.
        self.card_table.reset();
        self.old.reset_top(self.top);
        self.young.reset_after_full_gc();

        Ok(())
    }

    fn compute_forward(&mut self) {
        self.walk_old_and_young(|full, object, _address, object_size| {
            if object.header().is_marked() {
                let forward = full.allocate(object_size);
                object.header().set_metadata_fwdptr(forward);
            }
        });
    }

    fn update_references(&mut self) {
        self.walk_old_and_young(|full, object, _address, _object_size| {
            if object.header().is_marked() {
                object.visit_reference_fields(|field| {
                    full.forward_reference(field);
                });
            }
        });

        for &root in self.rootset {
            self.forward_reference(root);
        }
    }

    fn relocate(&mut self) {
        self.walk_old_and_young(|full, object, address, object_size| {
            if object.header().is_marked() {
                let dest = object.header().metadata_fwdptr();
                debug_assert!(full.old.total().contains(dest));

                if address != dest {
                    object.copy_to(dest, object_size);
                }

                let dest_object = dest.to_obj();
                dest_object.header().clear_metadata();

                full.old.update_crossing(dest, dest.offset(object_size));
            }
        });
    }

    fn unmark_all(&mut self) {
        self.walk_old_and_young(|_full, object, _address, _object_size| {
            if object.header().is_marked() {
                object.header().clear_metadata();
            }
        });
    }

    fn forward_reference(&mut self, slot: Slot) {
        let object_address = slot.get();

        if self.young_active.contains(object_address) || self.old_active.contains(object_address) {
            let object = object_address.to_obj();
            debug_assert!(object.header().is_marked());

            let forward_address = object.header().metadata_fwdptr();
            debug_assert!(self.old.total().contains(forward_address));

            slot.set(forward_address);
        } else {
            debug_assert!(object_address.is_null());
        }
    }

    /// Walk the old generation first, then the young survivors: compaction
    /// destinations are assigned in exactly this order, so during
    /// relocation every move is either in-place or towards a lower
    /// address of the same walk.
    fn walk_old_and_young<F>(&mut self, mut fct: F)
    where
        F: FnMut(&mut FullCollector, &crate::object::Obj, Address, usize),
    {
        let old_active = self.old_active;
        let young_active = self.young_active;

        walk_region(old_active, |object, address, object_size| {
            fct(self, object, address, object_size);
        });

        walk_region(young_active, |object, address, object_size| {
            fct(self, object, address, object_size);
        });
    }

    fn allocate(&mut self, object_size: usize) -> Address {
        let address = self.top;
        let next = self.top.offset(object_size);

        if next > self.old.limit() {
            // mark_live already proved the live set fits
            panic!("not enough space for compaction in old generation");
        }

        self.top = next;
        address
    }
}
