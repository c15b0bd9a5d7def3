use std::process;
use std::time::Instant;

use clap::Parser;

use swiper::object::Header;
use swiper::{Address, Heap, ShapeId, ShapeKind};

mod flags;

use flags::Cli;

fn main() {
    let cli = Cli::parse();
    let start = Instant::now();

    let heap = Heap::new(cli.to_heap_flags());
    let shapes = Shapes::register(&heap);

    let result = match cli.scenario.as_str() {
        "promote" => run_iterations(&heap, &shapes, cli.iterations, promote),
        "churn" => run_iterations(&heap, &shapes, cli.iterations, churn),
        "graphs" => run_iterations(&heap, &shapes, cli.iterations, graphs),
        "limit" => limit(&heap, &shapes),
        "all" => run_iterations(&heap, &shapes, cli.iterations, promote)
            .and_then(|()| run_iterations(&heap, &shapes, cli.iterations, churn))
            .and_then(|()| run_iterations(&heap, &shapes, cli.iterations, graphs)),
        unknown => {
            eprintln!("unknown scenario '{}', expected: promote, churn, graphs, limit, all", unknown);
            process::exit(2);
        }
    };

    if cli.gc_stats {
        let runtime = start.elapsed().as_secs_f32() * 1000.0;
        heap.dump_summary(runtime);
    }

    match result {
        Ok(()) => println!("scenario '{}' finished", cli.scenario),
        Err(message) => {
            eprintln!("scenario '{}' failed: {}", cli.scenario, message);
            process::exit(1);
        }
    }
}

struct Shapes {
    record: ShapeId,
    object_array: ShapeId,
}

impl Shapes {
    fn register(heap: &Heap) -> Shapes {
        let record = heap.register_shape(
            "Record",
            ShapeKind::Fixed {
                instance_size: Header::size() + 2 * swiper::mem::ptr_width_usize(),
                ref_offsets: vec![next_offset()],
            },
        );

        let object_array = heap.register_shape("Array[Object]", ShapeKind::ObjArray);

        Shapes {
            record,
            object_array,
        }
    }
}

fn x_offset() -> usize {
    Header::size()
}

fn next_offset() -> usize {
    Header::size() + swiper::mem::ptr_width_usize()
}

fn run_iterations(
    heap: &Heap,
    shapes: &Shapes,
    iterations: usize,
    scenario: fn(&Heap, &Shapes) -> Result<(), String>,
) -> Result<(), String> {
    for _ in 0..iterations {
        heap.handle_scope(|| scenario(heap, shapes))?;
    }

    Ok(())
}

/// Fill an array's first and last slot, force several minor collections
/// and check that the promoted slots kept their values while untouched
/// slots stayed null.
fn promote(heap: &Heap, shapes: &Shapes) -> Result<(), String> {
    let first = heap
        .handle(heap.allocate(shapes.record).map_err(|e| e.to_string())?);
    heap.store_word(first.direct(), x_offset(), 1);

    let last = heap
        .handle(heap.allocate(shapes.record).map_err(|e| e.to_string())?);
    heap.store_word(last.direct(), x_offset(), 2);

    let slots = heap
        .handle(heap.allocate_array(shapes.object_array, 64).map_err(|e| e.to_string())?);
    heap.array_set_ref(slots.direct(), 0, first.direct());
    heap.array_set_ref(slots.direct(), 63, last.direct());

    for _ in 0..3 {
        heap.force_minor_collect();
    }

    expect(heap.load_word(heap.array_get_ref(slots.direct(), 0), x_offset()) == 1, "slot 0 lost")?;
    expect(heap.load_word(heap.array_get_ref(slots.direct(), 63), x_offset()) == 2, "slot 63 lost")?;

    for index in 1..63 {
        expect(heap.array_get_ref(slots.direct(), index).is_null(), "untouched slot not null")?;
    }

    Ok(())
}

/// Allocate a batch of arrays, null out every fifth reference and force a
/// full collection; the nulled share stays null, the rest stays valid and
/// occupancy shrinks.
fn churn(heap: &Heap, shapes: &Shapes) -> Result<(), String> {
    const COUNT: usize = 100;
    const STEP: usize = 5;

    let holder = heap
        .handle(heap.allocate_array(shapes.object_array, COUNT).map_err(|e| e.to_string())?);

    for index in 0..COUNT {
        let element = heap
            .allocate_array(shapes.object_array, 64)
            .map_err(|e| e.to_string())?;
        heap.array_set_ref(holder.direct(), index, element);
    }

    heap.force_collect().map_err(|e| e.to_string())?;
    let before = heap.old_active_size() + heap.young_active_size();

    for index in (0..COUNT).step_by(STEP) {
        heap.array_set_ref(holder.direct(), index, Address::null());
    }

    heap.force_collect().map_err(|e| e.to_string())?;
    let after = heap.old_active_size() + heap.young_active_size();

    let nulled = (0..COUNT)
        .filter(|&index| heap.array_get_ref(holder.direct(), index).is_null())
        .count();

    expect(nulled == COUNT / STEP, "wrong number of reclaimed slots")?;
    expect(after < before, "full collection reclaimed nothing")?;

    Ok(())
}

/// Shared and cyclic object graphs keep their identity across minor and
/// full collections.
fn graphs(heap: &Heap, shapes: &Shapes) -> Result<(), String> {
    let first = heap
        .handle(heap.allocate(shapes.record).map_err(|e| e.to_string())?);
    let second = heap
        .handle(heap.allocate(shapes.record).map_err(|e| e.to_string())?);
    let alias = heap.handle(first.direct());

    heap.store_ref(first.direct(), next_offset(), second.direct());
    heap.store_ref(second.direct(), next_offset(), first.direct());

    heap.force_minor_collect();
    heap.force_collect().map_err(|e| e.to_string())?;

    expect(first.direct() == alias.direct(), "shared node duplicated")?;
    expect(
        heap.load_ref(first.direct(), next_offset()) == second.direct(),
        "cycle broken",
    )?;
    expect(
        heap.load_ref(second.direct(), next_offset()) == first.direct(),
        "cycle broken",
    )?;

    Ok(())
}

/// Allocate live data until the configured maximum heap size fails the
/// allocation; the collector must report out-of-memory instead of growing.
fn limit(heap: &Heap, shapes: &Shapes) -> Result<(), String> {
    const ELEMENT_BYTES: usize = 8 * 1024 * 8;

    // twice as many attempts as could ever fit
    let attempts = 2 * (heap.max_heap_size() / ELEMENT_BYTES).max(1);

    heap.handle_scope(|| {
        let holder = heap
            .handle(heap.allocate_array(shapes.object_array, attempts).map_err(|e| e.to_string())?);

        for index in 0..attempts {
            match heap.allocate_array(shapes.object_array, 8 * 1024) {
                Ok(element) => heap.array_set_ref(holder.direct(), index, element),
                Err(error) => {
                    println!("allocation {} failed: {}", index, error);
                    return Ok(());
                }
            }
        }

        Err("allocation never failed below the configured limit".to_string())
    })
}

fn expect(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}
