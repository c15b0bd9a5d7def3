use std::cmp::{Ord, Ordering, PartialOrd};
use std::fmt;

use crate::flags::HeapFlags;
use crate::gc::root::{GlobalHandle, GlobalRoots, Slot};
use crate::gc::swiper::Swiper;
use crate::handle::{Handle, HandleMemory};
use crate::object::{
    array_element_address, array_length, compute_array_size, set_array_length, Header, Obj,
};
use crate::shape::{ShapeId, ShapeKind, ShapeRegistry};

pub mod bump;
pub mod marking;
pub mod root;
pub mod swiper;
pub mod worklist;

pub const K: usize = 1024;
pub const M: usize = K * K;

/// The collector context: owns the heap configuration, the generation
/// regions, the shape registry and all root storage. The embedding runtime
/// creates exactly one `Heap`, allocates through it and reports every
/// reference store via `write_barrier` (or the store helpers below).
///
/// All collection entry points stop the single mutator by construction:
/// the mutator sits in the call itself, with its reference state fully
/// published through handles and global roots.
pub struct Heap {
    flags: HeapFlags,
    shapes: ShapeRegistry,
    handles: HandleMemory,
    globals: GlobalRoots,
    collector: Swiper,
}

impl Heap {
    pub fn new(flags: HeapFlags) -> Heap {
        let collector = Swiper::new(&flags);

        Heap {
            flags,
            shapes: ShapeRegistry::new(),
            handles: HandleMemory::new(),
            globals: GlobalRoots::new(),
            collector,
        }
    }

    pub fn flags(&self) -> &HeapFlags {
        &self.flags
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    pub fn register_shape(&self, name: &str, kind: ShapeKind) -> ShapeId {
        self.shapes.register(name, kind)
    }

    /// Allocate a fixed-layout object, zero-initialized except for its
    /// header. Overflowing the young generation triggers a minor collection
    /// and a single retry, then a full collection and a final retry; after
    /// that the allocation fails with `OutOfMemory`.
    pub fn allocate(&self, shape_id: ShapeId) -> Result<Address, OutOfMemory> {
        let shape = self.shapes.get(shape_id);
        assert!(!shape.is_array(), "use allocate_array for array shapes");

        let size = shape.instance_size();
        debug_assert!(size >= Header::size());

        let object = self.raw_alloc(size)?;
        object.to_obj().header().setup(shape.address());

        Ok(object)
    }

    /// Allocate an array with `length` elements. Element slots of reference
    /// arrays start out as the null reference, scalar elements as zero.
    pub fn allocate_array(&self, shape_id: ShapeId, length: usize) -> Result<Address, OutOfMemory> {
        let shape = self.shapes.get(shape_id);
        assert!(shape.is_array(), "use allocate for fixed shapes");

        let size = compute_array_size(shape.element_size(), length).ok_or(OutOfMemory)?;

        let object = self.raw_alloc(size)?;
        object.to_obj().header().setup(shape.address());
        set_array_length(object, length);

        Ok(object)
    }

    fn raw_alloc(&self, size: usize) -> Result<Address, OutOfMemory> {
        assert!(size > 0);

        if self.flags.gc_stress_minor {
            self.collector.minor_collect(self, GcReason::StressMinor);
        }

        if self.flags.gc_stress {
            self.collector.collect(self, GcReason::Stress)?;
        }

        let object = self.collector.alloc(self, size).ok_or(OutOfMemory)?;

        unsafe {
            std::ptr::write_bytes(object.to_mut_ptr::<u8>(), 0, size);
        }

        Ok(object)
    }

    /// Exactly one minor collection, regardless of occupancy.
    pub fn force_minor_collect(&self) {
        self.collector.minor_collect(self, GcReason::ForceMinorCollect);
    }

    /// A minor collection followed by a full mark-compact collection. Fails
    /// only when the surviving objects do not fit into the configured
    /// maximum heap size.
    pub fn force_collect(&self) -> Result<(), OutOfMemory> {
        self.collector.collect(self, GcReason::ForceCollect)
    }

    /// Record a store of `value` into the reference slot at `slot`. No-op
    /// unless the slot lives in the old generation and `value` points into
    /// the young generation. Idempotent.
    pub fn write_barrier(&self, slot: Address, value: Address) {
        self.collector.write_barrier(slot, value);
    }

    /// Store a reference field, write barrier included.
    pub fn store_ref(&self, object: Address, offset: usize, value: Address) {
        debug_assert!(offset >= Header::size());
        let slot = Slot::at(object.offset(offset));
        slot.set(value);
        self.write_barrier(slot.address(), value);
    }

    pub fn load_ref(&self, object: Address, offset: usize) -> Address {
        debug_assert!(offset >= Header::size());
        Slot::at(object.offset(offset)).get()
    }

    /// Store a scalar field. Scalars never create cross-generation edges,
    /// so no barrier is involved.
    pub fn store_word(&self, object: Address, offset: usize, value: usize) {
        debug_assert!(offset >= Header::size());
        unsafe {
            *object.offset(offset).to_mut_ptr::<usize>() = value;
        }
    }

    pub fn load_word(&self, object: Address, offset: usize) -> usize {
        debug_assert!(offset >= Header::size());
        unsafe { *object.offset(offset).to_ptr::<usize>() }
    }

    pub fn array_length(&self, array: Address) -> usize {
        array_length(array)
    }

    /// Store into a reference array element, write barrier included.
    pub fn array_set_ref(&self, array: Address, index: usize, value: Address) {
        let slot = self.array_ref_slot(array, index);
        slot.set(value);
        self.write_barrier(slot.address(), value);
    }

    pub fn array_get_ref(&self, array: Address, index: usize) -> Address {
        self.array_ref_slot(array, index).get()
    }

    fn array_ref_slot(&self, array: Address, index: usize) -> Slot {
        let shape = array.to_obj().header().shape();
        assert!(matches!(shape.kind(), ShapeKind::ObjArray));
        assert!(index < array_length(array), "array index out of bounds");

        Slot::at(array_element_address(
            array,
            crate::mem::ptr_width_usize(),
            index,
        ))
    }

    /// Create an explicit root handle for the given object.
    pub fn handle(&self, object: Address) -> Handle {
        self.handles.create(object)
    }

    /// Run `f` with a fresh handle scope; handles created inside are
    /// released afterwards.
    pub fn handle_scope<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.handles.push_border();
        let result = f();
        self.handles.pop_border();
        result
    }

    /// Register a global root cell holding `value`. The cell stays a root
    /// for the lifetime of the heap.
    pub fn register_global(&self, value: Address) -> GlobalHandle {
        self.globals.register(value)
    }

    pub(crate) fn handles(&self) -> &HandleMemory {
        &self.handles
    }

    pub(crate) fn globals(&self) -> &GlobalRoots {
        &self.globals
    }

    /// Configured maximum heap size, page-aligned.
    pub fn max_heap_size(&self) -> usize {
        self.collector.max_heap_size()
    }

    /// Bytes occupied by objects in the young generation's active space.
    pub fn young_active_size(&self) -> usize {
        self.collector.young_active_size()
    }

    /// Bytes occupied by objects in the old generation.
    pub fn old_active_size(&self) -> usize {
        self.collector.old_active_size()
    }

    pub fn dump_summary(&self, runtime: f32) {
        self.collector.dump_summary(runtime);
    }
}

/// Allocation could not be satisfied even after a full collection cycle;
/// the heap has hit its configured ceiling.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "out of memory: maximum heap size reached")
    }
}

impl std::error::Error for OutOfMemory {}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct Address(usize);

impl Address {
    #[inline(always)]
    pub fn from(val: usize) -> Address {
        Address(val)
    }

    #[inline(always)]
    pub fn region_start(self, size: usize) -> Region {
        Region::new(self, self.offset(size))
    }

    #[inline(always)]
    pub fn offset_from(self, base: Address) -> usize {
        debug_assert!(self >= base);

        self.to_usize() - base.to_usize()
    }

    #[inline(always)]
    pub fn offset(self, offset: usize) -> Address {
        Address(self.0 + offset)
    }

    #[inline(always)]
    pub fn sub(self, offset: usize) -> Address {
        Address(self.0 - offset)
    }

    #[inline(always)]
    pub fn add_ptr(self, words: usize) -> Address {
        Address(self.0 + words * crate::mem::ptr_width_usize())
    }

    #[inline(always)]
    pub fn to_obj(self) -> &'static Obj {
        unsafe { &*self.to_mut_ptr::<Obj>() }
    }

    #[inline(always)]
    pub fn to_usize(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    #[inline(always)]
    pub fn to_ptr<T>(&self) -> *const T {
        self.0 as *const T
    }

    #[inline(always)]
    pub fn to_mut_ptr<T>(&self) -> *mut T {
        self.0 as *const T as *mut T
    }

    #[inline(always)]
    pub fn null() -> Address {
        Address(0)
    }

    #[inline(always)]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_non_null(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub fn is_os_page_aligned(self) -> bool {
        crate::mem::is_os_page_aligned(self.to_usize())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.to_usize())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.to_usize())
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Address) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Address) -> Ordering {
        self.to_usize().cmp(&other.to_usize())
    }
}

impl From<usize> for Address {
    fn from(val: usize) -> Address {
        Address(val)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Region {
    pub start: Address,
    pub end: Address,
}

impl Region {
    pub fn new(start: Address, end: Address) -> Region {
        debug_assert!(start <= end);

        Region { start, end }
    }

    #[inline(always)]
    pub fn start(&self) -> Address {
        self.start
    }

    #[inline(always)]
    pub fn end(&self) -> Address {
        self.end
    }

    #[inline(always)]
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    #[inline(always)]
    pub fn valid_top(&self, addr: Address) -> bool {
        self.start <= addr && addr <= self.end
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.end.to_usize() - self.start.to_usize()
    }

    #[inline(always)]
    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    #[inline(always)]
    pub fn disjunct(&self, other: &Region) -> bool {
        self.end <= other.start || self.start >= other.end
    }

    #[inline(always)]
    pub fn overlaps(&self, other: &Region) -> bool {
        !self.disjunct(other)
    }
}

impl Default for Region {
    fn default() -> Region {
        Region {
            start: Address::null(),
            end: Address::null(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

pub(crate) struct FormattedSize {
    size: usize,
}

impl fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

pub(crate) fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum GcReason {
    PromotionFailure,
    AllocationFailure,
    ForceCollect,
    ForceMinorCollect,
    Stress,
    StressMinor,
}

impl GcReason {
    fn message(&self) -> &'static str {
        match self {
            GcReason::PromotionFailure => "promo failure",
            GcReason::AllocationFailure => "alloc failure",
            GcReason::ForceCollect => "force collect",
            GcReason::ForceMinorCollect => "force minor collect",
            GcReason::Stress => "stress",
            GcReason::StressMinor => "stress minor",
        }
    }
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{HeapFlags, MemSize};
    use crate::mem;
    use crate::object::Header;
    use crate::shape::ShapeKind;

    fn heap_with_max(max: usize) -> Heap {
        Heap::new(HeapFlags {
            max_heap_size: Some(MemSize(max)),
            gc_verify: true,
            ..Default::default()
        })
    }

    // record with a scalar field `x` and a reference field `next`
    fn record_shape(heap: &Heap) -> ShapeId {
        heap.register_shape(
            "Record",
            ShapeKind::Fixed {
                instance_size: Header::size() + 2 * mem::ptr_width_usize(),
                ref_offsets: vec![next_offset()],
            },
        )
    }

    fn array_shape(heap: &Heap) -> ShapeId {
        heap.register_shape("Array[Object]", ShapeKind::ObjArray)
    }

    fn x_offset() -> usize {
        Header::size()
    }

    fn next_offset() -> usize {
        Header::size() + mem::ptr_width_usize()
    }

    #[test]
    fn promotion_preserves_array_slots() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);
        let array = array_shape(&heap);

        let first = heap.handle(heap.allocate(record).unwrap());
        heap.store_word(first.direct(), x_offset(), 1);

        let last = heap.handle(heap.allocate(record).unwrap());
        heap.store_word(last.direct(), x_offset(), 2);

        let slots = heap.handle(heap.allocate_array(array, 64).unwrap());
        heap.array_set_ref(slots.direct(), 0, first.direct());
        heap.array_set_ref(slots.direct(), 63, last.direct());

        for _ in 0..4 {
            heap.force_minor_collect();
        }

        let slots_now = slots.direct();
        assert_eq!(heap.array_length(slots_now), 64);

        let first_now = heap.array_get_ref(slots_now, 0);
        let last_now = heap.array_get_ref(slots_now, 63);

        assert_eq!(first_now, first.direct());
        assert_eq!(last_now, last.direct());
        assert_eq!(heap.load_word(first_now, x_offset()), 1);
        assert_eq!(heap.load_word(last_now, x_offset()), 2);

        for index in 1..63 {
            assert!(heap.array_get_ref(slots_now, index).is_null());
        }
    }

    #[test]
    fn promoted_objects_stop_moving() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);

        let object = heap.handle(heap.allocate(record).unwrap());
        heap.store_word(object.direct(), x_offset(), 7);

        // first collection copies within the young generation, the second
        // one promotes
        heap.force_minor_collect();
        heap.force_minor_collect();

        let promoted = object.direct();
        heap.force_minor_collect();

        assert_eq!(object.direct(), promoted);
        assert_eq!(heap.load_word(promoted, x_offset()), 7);
    }

    #[test]
    fn generational_reclamation() {
        let heap = heap_with_max(4 * M);
        let array = array_shape(&heap);

        const COUNT: usize = 100;
        const STEP: usize = 5;

        let holder = heap.handle(heap.allocate_array(array, COUNT).unwrap());

        for index in 0..COUNT {
            let element = heap.allocate_array(array, 64).unwrap();
            heap.array_set_ref(holder.direct(), index, element);
        }

        heap.force_collect().unwrap();
        let occupied_before = heap.old_active_size() + heap.young_active_size();

        for index in (0..COUNT).step_by(STEP) {
            heap.array_set_ref(holder.direct(), index, Address::null());
        }

        heap.force_collect().unwrap();
        let occupied_after = heap.old_active_size() + heap.young_active_size();

        let mut nulled = 0;

        for index in 0..COUNT {
            let element = heap.array_get_ref(holder.direct(), index);

            if element.is_null() {
                nulled += 1;
            } else {
                assert_eq!(heap.array_length(element), 64);
            }
        }

        assert_eq!(nulled, COUNT / STEP);
        assert!(occupied_after < occupied_before);
    }

    #[test]
    fn structural_sharing_preserved() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);

        let first = heap.handle(heap.allocate(record).unwrap());
        let second = heap.handle(heap.allocate(record).unwrap());
        let alias = heap.handle(first.direct());

        // mutually referential pair
        heap.store_ref(first.direct(), next_offset(), second.direct());
        heap.store_ref(second.direct(), next_offset(), first.direct());

        heap.force_minor_collect();
        heap.force_minor_collect();
        heap.force_collect().unwrap();

        assert_eq!(first.direct(), alias.direct());
        assert_eq!(heap.load_ref(first.direct(), next_offset()), second.direct());
        assert_eq!(heap.load_ref(second.direct(), next_offset()), first.direct());
    }

    #[test]
    fn self_referential_object_survives() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);

        let object = heap.handle(heap.allocate(record).unwrap());
        heap.store_ref(object.direct(), next_offset(), object.direct());

        heap.force_minor_collect();
        heap.force_collect().unwrap();

        assert_eq!(
            heap.load_ref(object.direct(), next_offset()),
            object.direct()
        );
    }

    #[test]
    fn remembered_set_keeps_young_object_alive() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);

        let container = heap.handle(heap.allocate(record).unwrap());
        heap.force_minor_collect();
        heap.force_minor_collect();

        // the only path to the young object is the old-to-young edge
        // recorded by the write barrier
        heap.handle_scope(|| {
            let young = heap.allocate(record).unwrap();
            heap.store_word(young, x_offset(), 42);
            heap.store_ref(container.direct(), next_offset(), young);
        });

        heap.force_minor_collect();

        let target = heap.load_ref(container.direct(), next_offset());
        assert!(target.is_non_null());
        assert_eq!(heap.load_word(target, x_offset()), 42);
    }

    #[test]
    fn global_roots_survive_collections() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);

        let object = heap.allocate(record).unwrap();
        heap.store_word(object, x_offset(), 11);
        let global = heap.register_global(object);

        heap.force_minor_collect();
        heap.force_collect().unwrap();

        assert_eq!(heap.load_word(global.get(), x_offset()), 11);
    }

    #[test]
    fn heap_size_enforced() {
        let heap = heap_with_max(1 * M);
        let array = array_shape(&heap);

        let holder = heap.handle(heap.allocate_array(array, 64).unwrap());
        let mut failed = false;

        for index in 0..64 {
            match heap.allocate_array(array, 8 * K) {
                Ok(element) => {
                    heap.array_set_ref(holder.direct(), index, element);
                }

                Err(OutOfMemory) => {
                    failed = true;
                    break;
                }
            }
        }

        assert!(failed, "allocation beyond max-heap-size must fail");

        // the kept data is intact after the failure
        for index in 0..64 {
            let element = heap.array_get_ref(holder.direct(), index);

            if element.is_non_null() {
                assert_eq!(heap.array_length(element), 8 * K);
            }
        }
    }

    #[test]
    fn forced_collection_is_idempotent() {
        let heap = heap_with_max(2 * M);
        let record = record_shape(&heap);
        let array = array_shape(&heap);

        let holder = heap.handle(heap.allocate_array(array, 16).unwrap());

        for index in 0..16 {
            let element = heap.allocate(record).unwrap();
            heap.store_word(element, x_offset(), index);
            heap.array_set_ref(holder.direct(), index, element);
        }

        heap.force_collect().unwrap();
        let first = (heap.young_active_size(), heap.old_active_size());

        heap.force_collect().unwrap();
        let second = (heap.young_active_size(), heap.old_active_size());

        assert_eq!(first, second);

        for index in 0..16 {
            let element = heap.array_get_ref(holder.direct(), index);
            assert_eq!(heap.load_word(element, x_offset()), index);
        }
    }

    #[test]
    #[should_panic(expected = "heap integrity violation")]
    fn verifier_catches_corrupted_reference() {
        let heap = heap_with_max(1 * M);
        let record = record_shape(&heap);

        let object = heap.handle(heap.allocate(record).unwrap());

        // smash the reference field with an address outside any generation
        heap.store_word(object.direct(), next_offset(), 0xdead_b000);

        heap.force_minor_collect();
    }

    #[test]
    fn allocation_under_stress_flags() {
        let heap = Heap::new(HeapFlags {
            max_heap_size: Some(MemSize(2 * M)),
            gc_verify: true,
            gc_stress_minor: true,
            ..Default::default()
        });
        let record = record_shape(&heap);

        let object = heap.handle(heap.allocate(record).unwrap());
        heap.store_word(object.direct(), x_offset(), 5);

        for _ in 0..8 {
            let other = heap.allocate(record).unwrap();
            heap.store_word(other, x_offset(), 9);
        }

        assert_eq!(heap.load_word(object.direct(), x_offset()), 5);
    }

    #[test]
    fn out_of_memory_display() {
        assert_eq!(
            OutOfMemory.to_string(),
            "out of memory: maximum heap size reached"
        );
    }
}
