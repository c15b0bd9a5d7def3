use std::cmp;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::gc::root::Slot;
use crate::gc::{Address, Region};
use crate::mem;
use crate::shape::{Shape, ShapeKind};

/// Two-word object header.
///
/// The first word holds the shape address. While an object sits forwarded in
/// from-space during a minor collection the same word holds the forwarding
/// address tagged with `FWDPTR_BIT`, which lets the collector tell
/// "already forwarded" apart from "not yet visited" without extra state.
///
/// The second word is only used by full collections: it carries the mark bit
/// and, between the compute-forward and relocate phases, the compaction
/// target address. Outside of a collection it is always zero.
#[repr(C)]
pub struct Header {
    word: HeaderWord,
    metadata: MetadataWord,
}

const FWDPTR_BIT: usize = 1;

#[repr(C)]
struct HeaderWord(AtomicUsize);

impl HeaderWord {
    fn setup(&self, shape: Address) {
        debug_assert_eq!(shape.to_usize() & FWDPTR_BIT, 0);
        self.set_raw(shape.to_usize());
    }

    fn shape_or_fwdptr(&self) -> ShapeWordKind {
        let value = self.raw();

        if (value & FWDPTR_BIT) != 0 {
            ShapeWordKind::Fwdptr((value & !FWDPTR_BIT).into())
        } else {
            ShapeWordKind::Shape(value.into())
        }
    }

    fn install_fwdptr(&self, address: Address) {
        debug_assert_eq!(address.to_usize() & FWDPTR_BIT, 0);
        self.set_raw(address.to_usize() | FWDPTR_BIT);
    }

    fn raw(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn set_raw(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }
}

pub const MARK_BIT: usize = 1;

#[repr(C)]
struct MetadataWord(AtomicUsize);

impl MetadataWord {
    fn is_marked(&self) -> bool {
        (self.raw() & MARK_BIT) != 0
    }

    fn mark(&self) {
        self.set_raw(self.raw() | MARK_BIT);
    }

    fn fwdptr(&self) -> Address {
        (self.raw() & !MARK_BIT).into()
    }

    fn set_fwdptr(&self, address: Address) {
        debug_assert_eq!(address.to_usize() & MARK_BIT, 0);
        debug_assert!(self.is_marked());
        self.set_raw(address.to_usize() | MARK_BIT);
    }

    fn clear(&self) {
        self.set_raw(0);
    }

    fn raw(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn set_raw(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }
}

pub enum ShapeWordKind {
    Shape(Address),
    Fwdptr(Address),
}

impl Header {
    #[inline(always)]
    pub const fn size() -> usize {
        std::mem::size_of::<Header>()
    }

    /// Header plus the length word of arrays.
    #[inline(always)]
    pub fn array_header_size() -> usize {
        Header::size() + mem::ptr_width_usize()
    }

    pub fn setup(&self, shape: Address) {
        self.word.setup(shape);
        self.metadata.clear();
    }

    #[inline(always)]
    pub fn shape(&self) -> &Shape {
        match self.word.shape_or_fwdptr() {
            ShapeWordKind::Shape(address) => unsafe { &*address.to_ptr::<Shape>() },
            ShapeWordKind::Fwdptr(_) => panic!("object is forwarded"),
        }
    }

    #[inline(always)]
    pub fn shape_address(&self) -> Address {
        debug_assert_eq!(self.word.raw() & FWDPTR_BIT, 0);
        self.word.raw().into()
    }

    #[inline(always)]
    pub fn shape_or_fwdptr(&self) -> ShapeWordKind {
        self.word.shape_or_fwdptr()
    }

    #[inline(always)]
    pub fn install_fwdptr(&self, address: Address) {
        self.word.install_fwdptr(address);
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.metadata.is_marked()
    }

    /// Single mutator, stop-the-world: marking never races, so this
    /// returns whether the object was unmarked before.
    #[inline(always)]
    pub fn try_mark(&self) -> bool {
        if self.metadata.is_marked() {
            false
        } else {
            self.metadata.mark();
            true
        }
    }

    #[inline(always)]
    pub fn metadata_fwdptr(&self) -> Address {
        self.metadata.fwdptr()
    }

    #[inline(always)]
    pub fn set_metadata_fwdptr(&self, address: Address) {
        self.metadata.set_fwdptr(address);
    }

    #[inline(always)]
    pub fn clear_metadata(&self) {
        self.metadata.clear();
    }

    #[inline(always)]
    pub fn metadata_raw(&self) -> usize {
        self.metadata.raw()
    }
}

/// Used to reference any object on the heap.
#[repr(C)]
pub struct Obj {
    header: Header,
    data: u8,
}

impl Obj {
    #[inline(always)]
    pub fn address(&self) -> Address {
        Address::from_ptr(self as *const _)
    }

    #[inline(always)]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline(always)]
    pub fn data(&self) -> Address {
        Address::from_ptr(&self.data as *const u8)
    }

    pub fn size_for_shape(&self, shape: &Shape) -> usize {
        let instance_size = shape.instance_size();

        if instance_size != 0 {
            return instance_size;
        }

        determine_array_size(self.address(), shape.element_size())
    }

    pub fn size(&self) -> usize {
        self.size_for_shape(self.header().shape())
    }

    pub fn visit_reference_fields<F>(&self, f: F)
    where
        F: FnMut(Slot),
    {
        visit_refs(self.address(), self.header().shape(), None, f);
    }

    /// Visit only the reference fields whose slots fall into `range`. Used
    /// when scanning single dirty cards of objects that span several cards.
    pub fn visit_reference_fields_in_range<F>(&self, range: Region, f: F)
    where
        F: FnMut(Slot),
    {
        visit_refs(self.address(), self.header().shape(), Some(range), f);
    }

    pub fn copy_to(&self, dest: Address, size: usize) {
        unsafe {
            ptr::copy(
                self as *const Obj as *const u8,
                dest.to_mut_ptr::<u8>(),
                size,
            );
        }
    }
}

fn visit_refs<F>(object: Address, shape: &Shape, range: Option<Region>, mut f: F)
where
    F: FnMut(Slot),
{
    match shape.kind() {
        ShapeKind::Fixed { ref_offsets, .. } => {
            for &offset in ref_offsets {
                let slot = Slot::at(object.offset(offset));

                if let Some(range) = range {
                    if !range.contains(slot.address()) {
                        continue;
                    }
                }

                f(slot);
            }
        }

        ShapeKind::ObjArray => {
            let length = array_length(object);

            let mut ptr = object.offset(Header::array_header_size());
            let mut limit = ptr.add_ptr(length);

            if let Some(range) = range {
                ptr = cmp::max(ptr, range.start);
                limit = cmp::min(limit, range.end);
            }

            while ptr < limit {
                f(Slot::at(ptr));
                ptr = ptr.add_ptr(1);
            }
        }

        ShapeKind::PrimitiveArray { .. } => {}
    }
}

#[inline(always)]
pub fn array_length(object: Address) -> usize {
    unsafe { *object.offset(Header::size()).to_ptr::<usize>() }
}

pub fn set_array_length(object: Address, length: usize) {
    unsafe {
        *object.offset(Header::size()).to_mut_ptr::<usize>() = length;
    }
}

/// Address of the element slot `index` of the given array object.
pub fn array_element_address(object: Address, element_size: usize, index: usize) -> Address {
    object
        .offset(Header::array_header_size())
        .offset(index * element_size)
}

pub fn determine_array_size(object: Address, element_size: usize) -> usize {
    let length = array_length(object);

    let size = Header::array_header_size() + length * element_size;
    mem::align_usize_up(size, mem::ptr_width_usize())
}

/// Total size of an array with the given element size and length, or `None`
/// if the computation overflows.
pub fn compute_array_size(element_size: usize, length: usize) -> Option<usize> {
    let elements = element_size.checked_mul(length)?;
    let size = Header::array_header_size().checked_add(elements)?;

    Some(mem::align_usize_up(size, mem::ptr_width_usize()))
}
