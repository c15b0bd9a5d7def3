use std::cmp::{max, min};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::flags::HeapFlags;
use crate::gc::swiper::old::OldGen;
use crate::gc::swiper::young::YoungGen;
use crate::gc::swiper::CollectionKind;
use crate::gc::{formatted_size, GcReason};
use crate::mem;
use crate::os;

pub type SharedHeapConfig = Arc<Mutex<HeapController>>;

/// Derive the generation sizes from the configured maximum heap size.
/// Every capacity is fixed from here on: the young generation gets its
/// configured share (half the heap by default), the old generation the
/// rest. No generation ever grows past its share.
pub fn init(config: &mut HeapController, args: &HeapFlags) {
    assert!(config.min_heap_size <= config.max_heap_size);

    let page_size = os::page_size();

    let young_size = if let Some(young_size) = args.young_size() {
        min(young_size, config.max_heap_size - 2 * page_size)
    } else {
        config.max_heap_size / YOUNG_RATIO
    };

    // both semi-spaces need at least one OS page
    let semi_size = max(mem::align_usize_down(young_size / 2, page_size), page_size);
    let young_size = semi_size * 2;
    assert!(young_size < config.max_heap_size);

    config.young_size = young_size;
    config.old_limit = config.max_heap_size - young_size;
}

// determines default size of young generation in heap
// young generation size = heap size / YOUNG_RATIO
const YOUNG_RATIO: usize = 2;

/// Pick the collection kind for an allocation failure: stay minor as long
/// as the old generation can absorb a worst-case promotion of a full
/// semi-space, otherwise go straight to a full collection.
pub fn choose_collection_kind(young: &YoungGen, old: &OldGen) -> CollectionKind {
    if old.free_size() < young.committed_semi_size() {
        CollectionKind::Full
    } else {
        CollectionKind::Minor
    }
}

pub fn start(config: &SharedHeapConfig, young: &YoungGen, old: &OldGen) {
    let mut config = config.lock();

    config.gc_start = Some(Instant::now());
    config.start_memory_size = memory_size(young, old);
}

pub fn stop(
    config: &SharedHeapConfig,
    kind: CollectionKind,
    young: &YoungGen,
    old: &OldGen,
    args: &HeapFlags,
    reason: GcReason,
) {
    let mut config = config.lock();

    let gc_duration = config.gc_start.expect("not started").elapsed();
    let gc_duration_ms = gc_duration.as_secs_f32() * 1000.0f32;

    config.end_memory_size = memory_size(young, old);

    match kind {
        CollectionKind::Minor => {
            config.total_minor_collections += 1;
            config.total_minor_pause += gc_duration_ms;

            if args.gc_stats {
                if let Some(phases) = config.minor_phases.last_mut() {
                    phases.total = gc_duration_ms;
                }
            }
        }

        CollectionKind::Full => {
            config.total_full_collections += 1;
            config.total_full_pause += gc_duration_ms;

            // a failed full collection records no phases
            if args.gc_stats {
                if let Some(phases) = config.full_phases.last_mut() {
                    phases.total = gc_duration_ms;
                }
            }
        }
    }

    if args.gc_verbose {
        print(&*config, kind, reason, gc_duration_ms);
    }
}

fn print(config: &HeapController, kind: CollectionKind, reason: GcReason, gc_duration: f32) {
    match kind {
        CollectionKind::Minor => {
            println!(
                "GC: {} ({}) {} -> {}; {:.2} ms; {} promoted; {} copied",
                kind,
                reason,
                formatted_size(config.start_memory_size),
                formatted_size(config.end_memory_size),
                gc_duration,
                formatted_size(config.minor_promoted),
                formatted_size(config.minor_copied),
            );
        }

        CollectionKind::Full => {
            println!(
                "GC: {} ({}) {} -> {}; {:.2} ms",
                kind,
                reason,
                formatted_size(config.start_memory_size),
                formatted_size(config.end_memory_size),
                gc_duration,
            );
        }
    }
}

fn memory_size(young: &YoungGen, old: &OldGen) -> usize {
    young.active_size() + old.active_size()
}

pub struct HeapController {
    pub min_heap_size: usize,
    pub max_heap_size: usize,

    pub young_size: usize,
    pub old_limit: usize,

    gc_start: Option<Instant>,

    start_memory_size: usize,
    end_memory_size: usize,

    pub minor_promoted: usize,
    pub minor_copied: usize,

    pub total_minor_collections: usize,
    pub total_minor_pause: f32,
    pub total_full_collections: usize,
    pub total_full_pause: f32,

    full_phases: Vec<FullCollectorPhases>,
    minor_phases: Vec<MinorCollectorPhases>,
}

impl HeapController {
    pub fn new(min_heap_size: usize, max_heap_size: usize) -> HeapController {
        assert!(min_heap_size <= max_heap_size);

        HeapController {
            min_heap_size,
            max_heap_size,

            young_size: 0,
            old_limit: 0,

            gc_start: None,

            start_memory_size: 0,
            end_memory_size: 0,

            minor_promoted: 0,
            minor_copied: 0,

            total_minor_collections: 0,
            total_minor_pause: 0f32,
            total_full_collections: 0,
            total_full_pause: 0f32,

            full_phases: Vec::new(),
            minor_phases: Vec::new(),
        }
    }

    pub fn add_full(&mut self, phases: FullCollectorPhases) {
        self.full_phases.push(phases);
    }

    pub fn add_minor(&mut self, phases: MinorCollectorPhases) {
        self.minor_phases.push(phases);
    }

    pub fn full_marking(&self) -> Numbers {
        let values: Vec<_> = self.full_phases.iter().map(|x| x.marking).collect();
        calculate_numbers(&values)
    }

    pub fn full_compute_forward(&self) -> Numbers {
        let values: Vec<_> = self.full_phases.iter().map(|x| x.compute_forward).collect();
        calculate_numbers(&values)
    }

    pub fn full_update_refs(&self) -> Numbers {
        let values: Vec<_> = self.full_phases.iter().map(|x| x.update_refs).collect();
        calculate_numbers(&values)
    }

    pub fn full_relocate(&self) -> Numbers {
        let values: Vec<_> = self.full_phases.iter().map(|x| x.relocate).collect();
        calculate_numbers(&values)
    }

    pub fn full_total(&self) -> Numbers {
        let values: Vec<_> = self.full_phases.iter().map(|x| x.total).collect();
        calculate_numbers(&values)
    }

    pub fn minor_roots(&self) -> Numbers {
        let values: Vec<_> = self.minor_phases.iter().map(|x| x.roots).collect();
        calculate_numbers(&values)
    }

    pub fn minor_tracing(&self) -> Numbers {
        let values: Vec<_> = self.minor_phases.iter().map(|x| x.tracing).collect();
        calculate_numbers(&values)
    }

    pub fn minor_total(&self) -> Numbers {
        let values: Vec<_> = self.minor_phases.iter().map(|x| x.total).collect();
        calculate_numbers(&values)
    }
}

pub struct Numbers {
    pub avg: f32,
    pub sum: f32,
    pub min: f32,
    pub max: f32,
}

impl Numbers {
    fn zero() -> Numbers {
        Numbers {
            avg: 0f32,
            sum: 0f32,
            min: 0f32,
            max: 0f32,
        }
    }
}

impl fmt::Display for Numbers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "avg={:<8.1} sum={:<8.1} min={:<8.1} max={:<8.1}",
            self.avg, self.sum, self.min, self.max
        )
    }
}

fn calculate_numbers(data: &[f32]) -> Numbers {
    if data.len() == 0 {
        return Numbers::zero();
    }

    let mut sum = 0f32;
    let mut xmin = data[0];
    let mut xmax = data[0];

    for el in data {
        sum += *el;
        xmin = f32::min(xmin, *el);
        xmax = f32::max(xmax, *el);
    }

    let avg = sum / (data.len() as f32);

    Numbers {
        avg,
        sum,
        min: xmin,
        max: xmax,
    }
}

#[derive(Clone)]
pub struct FullCollectorPhases {
    pub marking: f32,
    pub compute_forward: f32,
    pub update_refs: f32,
    pub relocate: f32,
    pub total: f32,
}

impl FullCollectorPhases {
    pub fn new() -> FullCollectorPhases {
        FullCollectorPhases {
            marking: 0f32,
            compute_forward: 0f32,
            update_refs: 0f32,
            relocate: 0f32,
            total: 0f32,
        }
    }
}

#[derive(Clone)]
pub struct MinorCollectorPhases {
    pub roots: f32,
    pub tracing: f32,
    pub total: f32,
}

impl MinorCollectorPhases {
    pub fn new() -> MinorCollectorPhases {
        MinorCollectorPhases {
            roots: 0f32,
            tracing: 0f32,
            total: 0f32,
        }
    }
}
