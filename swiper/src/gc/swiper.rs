use std::cmp::min;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::flags::HeapFlags;
use crate::gc::root::{determine_strong_roots, Slot};
use crate::gc::swiper::card::CardTable;
use crate::gc::swiper::controller::{HeapController, SharedHeapConfig};
use crate::gc::swiper::crossing::CrossingMap;
use crate::gc::swiper::full::FullCollector;
use crate::gc::swiper::minor::MinorCollector;
use crate::gc::swiper::old::OldGen;
use crate::gc::swiper::verify::{Verifier, VerifierPhase};
use crate::gc::swiper::young::YoungGen;
use crate::gc::{Address, GcReason, Heap, OutOfMemory, Region};
use crate::mem;
use crate::object::Obj;
use crate::os::{self, MemoryPermission, Reservation};

pub mod card;
pub mod controller;
pub mod crossing;
pub mod full;
pub mod minor;
pub mod old;
pub mod verify;
pub mod young;

// the heap is divided into cards of size CARD_SIZE.
// a card entry determines whether this part of the heap was modified
// in minor collections those parts of the heap need to be analyzed
pub const CARD_SIZE_BITS: usize = 9;
pub const CARD_SIZE: usize = 1 << CARD_SIZE_BITS;

/// The generational collector: a copying young generation with an
/// age-marker promotion policy, a mark-compact old generation, and a card
/// table recording old-to-young edges for minor-collection root scanning.
/// Collections are stop-the-world; the single mutator sits in the
/// triggering call.
pub struct Swiper {
    // contiguous memory for young & old generation
    heap: Region,

    young: YoungGen,
    old: OldGen,

    card_table: CardTable,
    crossing_map: CrossingMap,

    config: SharedHeapConfig,

    max_heap_size: usize,

    _reservation: Reservation,
}

impl Swiper {
    pub fn new(args: &HeapFlags) -> Swiper {
        let page_size = os::page_size();

        let max_heap_size = mem::align_usize_up(args.max_heap_size(), 2 * page_size);
        let min_heap_size = min(
            mem::align_usize_up(args.min_heap_size(), page_size),
            max_heap_size,
        );

        let mut config = HeapController::new(min_heap_size, max_heap_size);
        controller::init(&mut config, args);

        // Determine size for card table and crossing map; both cover the
        // old generation with one byte per card.
        let card_size = mem::os_page_align_up(max_heap_size >> CARD_SIZE_BITS);
        let crossing_size = card_size;

        // Determine full reservation size.
        let reserve_size = 2 * max_heap_size + card_size + crossing_size;

        // Reserve all memory.
        let reservation = os::reserve_align(reserve_size, page_size);
        let heap_start = reservation.start();

        // Heap is young & old generation.
        let heap_end = heap_start.offset(2 * max_heap_size);

        // Determine boundaries of young generation.
        let young_total = heap_start.region_start(max_heap_size);

        // Determine boundaries of old generation.
        let old_start = young_total.end;
        let old_total = Region::new(old_start, heap_end);

        // Determine boundaries for card table.
        let card_start = heap_end;
        let card_end = card_start.offset(card_size);

        os::commit_at(card_start, card_size, MemoryPermission::ReadWrite);

        // Determine boundaries for crossing map.
        let crossing_start = card_end;
        let crossing_end = crossing_start.offset(crossing_size);

        os::commit_at(crossing_start, crossing_size, MemoryPermission::ReadWrite);

        // The old generation is committed as a whole, pages are only
        // backed once touched.
        os::commit_at(old_start, old_total.size(), MemoryPermission::ReadWrite);

        let card_table = CardTable::new(card_start, card_end, old_total);
        let crossing_map = CrossingMap::new(crossing_start, crossing_end, old_total);
        let young = YoungGen::new(young_total, config.young_size, args.gc_verify);
        let old = OldGen::new(
            old_start,
            old_total.end,
            config.old_limit,
            crossing_map.clone(),
            card_table.clone(),
        );

        Swiper {
            heap: Region::new(heap_start, heap_end),

            young,
            old,

            card_table,
            crossing_map,

            config: Arc::new(Mutex::new(config)),

            max_heap_size,

            _reservation: reservation,
        }
    }

    pub(crate) fn max_heap_size(&self) -> usize {
        self.max_heap_size
    }

    pub(crate) fn alloc(&self, heap: &Heap, size: usize) -> Option<Address> {
        if size <= self.young.committed_semi_size() {
            self.alloc_normal(heap, size)
        } else {
            self.alloc_old_direct(heap, size)
        }
    }

    fn alloc_normal(&self, heap: &Heap, size: usize) -> Option<Address> {
        if let Some(address) = self.young.bump_alloc(size) {
            return Some(address);
        }

        let kind = controller::choose_collection_kind(&self.young, &self.old);
        let promotion_failed = match self.perform_collection(heap, kind, GcReason::AllocationFailure)
        {
            Ok(promotion_failed) => promotion_failed,
            Err(OutOfMemory) => return None,
        };

        if let Some(address) = self.young.bump_alloc(size) {
            return Some(address);
        }

        let reason = if promotion_failed {
            GcReason::PromotionFailure
        } else {
            GcReason::AllocationFailure
        };

        if self
            .perform_collection(heap, CollectionKind::Full, reason)
            .is_err()
        {
            return None;
        }

        self.young.bump_alloc(size)
    }

    /// Objects that can never fit into a semi-space go straight to the old
    /// generation.
    fn alloc_old_direct(&self, heap: &Heap, size: usize) -> Option<Address> {
        if let Some(address) = self.old.allocate(size) {
            return Some(address);
        }

        if self
            .perform_collection(heap, CollectionKind::Full, GcReason::AllocationFailure)
            .is_err()
        {
            return None;
        }

        self.old.allocate(size)
    }

    pub(crate) fn minor_collect(&self, heap: &Heap, reason: GcReason) {
        let result = self.perform_collection(heap, CollectionKind::Minor, reason);
        debug_assert!(result.is_ok());
    }

    pub(crate) fn collect(&self, heap: &Heap, reason: GcReason) -> Result<(), OutOfMemory> {
        self.perform_collection(heap, CollectionKind::Full, reason)
            .map(|_promotion_failed| ())
    }

    /// Stop-the-world collection cycle. A full cycle always runs a minor
    /// collection first and then compacts the whole heap. Returns whether
    /// a minor collection failed to promote.
    fn perform_collection(
        &self,
        heap: &Heap,
        kind: CollectionKind,
        reason: GcReason,
    ) -> Result<bool, OutOfMemory> {
        controller::start(&self.config, &self.young, &self.old);

        let rootset = determine_strong_roots(heap);

        let result = match kind {
            CollectionKind::Minor => Ok(self.minor_phase(heap, reason, &rootset)),

            CollectionKind::Full => {
                self.minor_phase(heap, reason, &rootset);
                self.full_phase(heap, reason, &rootset).map(|()| false)
            }
        };

        controller::stop(&self.config, kind, &self.young, &self.old, heap.flags(), reason);

        result
    }

    fn minor_phase(&self, heap: &Heap, reason: GcReason, rootset: &[Slot]) -> bool {
        self.verify(heap, VerifierPhase::PreMinor, rootset);

        let promotion_failed;

        {
            let mut collector = MinorCollector::new(
                heap,
                &self.young,
                &self.old,
                &self.card_table,
                &self.crossing_map,
                rootset,
                reason,
            );

            promotion_failed = collector.collect();

            let mut config = self.config.lock();
            config.minor_promoted = collector.promoted_size();
            config.minor_copied = collector.copied_size();

            if heap.flags().gc_stats {
                config.add_minor(collector.phases());
            }
        }

        self.verify(heap, VerifierPhase::PostMinor, rootset);

        promotion_failed
    }

    fn full_phase(&self, heap: &Heap, reason: GcReason, rootset: &[Slot]) -> Result<(), OutOfMemory> {
        self.verify(heap, VerifierPhase::PreFull, rootset);

        {
            let mut collector = FullCollector::new(
                heap,
                &self.young,
                &self.old,
                &self.card_table,
                rootset,
                reason,
            );

            collector.collect()?;

            if heap.flags().gc_stats {
                let mut config = self.config.lock();
                config.add_full(collector.phases());
            }
        }

        self.verify(heap, VerifierPhase::PostFull, rootset);

        Ok(())
    }

    fn verify(&self, heap: &Heap, phase: VerifierPhase, rootset: &[Slot]) {
        if heap.flags().gc_verify {
            let mut verifier = Verifier::new(
                heap,
                &self.young,
                &self.old,
                &self.card_table,
                &self.crossing_map,
                rootset,
                self.heap,
                phase,
            );

            verifier.verify();
        }
    }

    /// The write barrier: record `value` being stored into the reference
    /// slot at `slot`. Dirty-card marking is idempotent and commutative,
    /// so barrier invocations need no ordering among each other.
    pub(crate) fn write_barrier(&self, slot: Address, value: Address) {
        if self.old.total().contains(slot) && self.young.contains(value) {
            self.card_table.mark_dirty_at(slot);
        }
    }

    pub(crate) fn young_active_size(&self) -> usize {
        self.young.active_size()
    }

    pub(crate) fn old_active_size(&self) -> usize {
        self.old.active_size()
    }

    pub(crate) fn dump_summary(&self, runtime: f32) {
        let config = self.config.lock();
        let total_gc = config.total_minor_pause + config.total_full_pause;
        let gc_percentage = ((total_gc / runtime) * 100.0).round();
        let mutator = runtime - total_gc;
        let mutator_percentage = 100.0 - gc_percentage;

        println!("GC stats: total={:.1}", runtime);
        println!("GC stats: mutator={:.1}", mutator);
        println!("GC stats: collection={:.1}", total_gc);
        println!("GC stats: collection-minor={:.1}", config.total_minor_pause);
        println!("GC stats: collection-full={:.1}", config.total_full_pause);

        println!(
            "GC summary: {:.1}ms minor ({}), {:.1}ms full ({}), {:.1}ms collection, {:.1}ms mutator, {:.1}ms total ({}% mutator, {}% GC)",
            config.total_minor_pause,
            config.total_minor_collections,
            config.total_full_pause,
            config.total_full_collections,
            total_gc,
            mutator,
            runtime,
            mutator_percentage,
            gc_percentage,
        );

        println!("\nMinor:");
        println!("\tRoots:\t\t{}", config.minor_roots());
        println!("\tTracing:\t{}", config.minor_tracing());
        println!("\tTotal:\t\t{}", config.minor_total());

        println!("\nFull:");
        println!("\tMarking:\t{}", config.full_marking());
        println!("\tCompute Fwd:\t{}", config.full_compute_forward());
        println!("\tUpdate Refs:\t{}", config.full_update_refs());
        println!("\tRelocate:\t{}", config.full_relocate());
        println!("\tTotal:\t\t{}", config.full_total());
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CardIdx(usize);

impl CardIdx {
    pub fn to_usize(self) -> usize {
        self.0
    }

    pub fn offset(self, val: usize) -> CardIdx {
        (self.0 + val).into()
    }
}

impl From<usize> for CardIdx {
    fn from(val: usize) -> CardIdx {
        CardIdx(val)
    }
}

pub fn on_different_cards(curr: Address, next: Address) -> bool {
    (curr.to_usize() >> CARD_SIZE_BITS) != (next.to_usize() >> CARD_SIZE_BITS)
}

#[derive(Copy, Clone)]
pub enum CollectionKind {
    Minor,
    Full,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CollectionKind::Minor => "Minor",
            CollectionKind::Full => "Full",
        };

        write!(f, "{}", name)
    }
}

/// Walk all objects in a densely packed region.
pub fn walk_region<F>(region: Region, mut fct: F)
where
    F: FnMut(&Obj, Address, usize),
{
    let mut scan = region.start;

    while scan < region.end {
        let object = scan.to_obj();
        let object_size = object.size();

        fct(object, scan, object_size);
        scan = scan.offset(object_size);
    }

    assert_eq!(scan, region.end);
}
