use std::sync::Arc;

use parking_lot::Mutex;

use crate::gc::Address;
use crate::mem;
use crate::object::Header;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShapeId(pub usize);

/// Layout description for objects managed by the collector. Shapes are the
/// runtime-supplied type descriptors the object header points at; they never
/// move and live as long as the heap.
pub struct Shape {
    id: ShapeId,
    name: String,
    kind: ShapeKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    /// Fixed-layout object: `instance_size` covers the header, `ref_offsets`
    /// are the byte offsets (from the object start) of all reference fields.
    Fixed {
        instance_size: usize,
        ref_offsets: Vec<usize>,
    },

    /// Array of references.
    ObjArray,

    /// Array of scalars with the given element size in bytes.
    PrimitiveArray { element_size: usize },
}

impl Shape {
    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    pub fn is_array(&self) -> bool {
        match self.kind {
            ShapeKind::Fixed { .. } => false,
            ShapeKind::ObjArray | ShapeKind::PrimitiveArray { .. } => true,
        }
    }

    /// Object size for fixed shapes, 0 for arrays (size depends on the
    /// length stored in the object).
    pub fn instance_size(&self) -> usize {
        match self.kind {
            ShapeKind::Fixed { instance_size, .. } => instance_size,
            ShapeKind::ObjArray | ShapeKind::PrimitiveArray { .. } => 0,
        }
    }

    pub fn element_size(&self) -> usize {
        match self.kind {
            ShapeKind::Fixed { .. } => unreachable!("not an array shape"),
            ShapeKind::ObjArray => mem::ptr_width_usize(),
            ShapeKind::PrimitiveArray { element_size } => element_size,
        }
    }

    pub fn address(&self) -> Address {
        Address::from_ptr(self as *const Shape)
    }
}

/// Owns all registered shapes. Shapes are handed out as `Arc`s with stable
/// addresses, the raw address is what object headers store.
pub struct ShapeRegistry {
    shapes: Mutex<Vec<Arc<Shape>>>,
}

impl ShapeRegistry {
    pub fn new() -> ShapeRegistry {
        ShapeRegistry {
            shapes: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, name: &str, kind: ShapeKind) -> ShapeId {
        match kind {
            ShapeKind::Fixed {
                instance_size,
                ref ref_offsets,
            } => {
                assert!(instance_size >= Header::size());
                assert!(mem::is_ptr_aligned(instance_size));

                for &offset in ref_offsets {
                    assert!(offset >= Header::size());
                    assert!(offset + mem::ptr_width_usize() <= instance_size);
                    assert!(mem::is_ptr_aligned(offset));
                }
            }

            ShapeKind::ObjArray => {}

            ShapeKind::PrimitiveArray { element_size } => {
                assert!(element_size > 0);
            }
        }

        let mut shapes = self.shapes.lock();
        let id = ShapeId(shapes.len());

        shapes.push(Arc::new(Shape {
            id,
            name: name.to_string(),
            kind,
        }));

        id
    }

    pub fn get(&self, id: ShapeId) -> Arc<Shape> {
        let shapes = self.shapes.lock();
        shapes[id.0].clone()
    }

    /// Used by the verifier: is the given address the address of a
    /// registered shape?
    pub fn is_known(&self, address: Address) -> bool {
        let shapes = self.shapes.lock();
        shapes.iter().any(|shape| shape.address() == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = ShapeRegistry::new();

        let fixed = registry.register(
            "Pair",
            ShapeKind::Fixed {
                instance_size: Header::size() + 2 * mem::ptr_width_usize(),
                ref_offsets: vec![Header::size(), Header::size() + mem::ptr_width_usize()],
            },
        );
        let array = registry.register("Array[Object]", ShapeKind::ObjArray);

        assert_eq!(fixed, ShapeId(0));
        assert_eq!(array, ShapeId(1));

        let shape = registry.get(fixed);
        assert_eq!(shape.name(), "Pair");
        assert!(!shape.is_array());
        assert!(registry.is_known(shape.address()));

        let shape = registry.get(array);
        assert!(shape.is_array());
        assert_eq!(shape.element_size(), mem::ptr_width_usize());
    }

    #[test]
    fn shape_addresses_are_stable() {
        let registry = ShapeRegistry::new();
        let id = registry.register("Node", ShapeKind::ObjArray);

        let first = registry.get(id).address();

        for idx in 0..100 {
            registry.register(&format!("Filler{}", idx), ShapeKind::ObjArray);
        }

        assert_eq!(first, registry.get(id).address());
    }

    #[test]
    #[should_panic]
    fn reject_unaligned_ref_offset() {
        let registry = ShapeRegistry::new();
        registry.register(
            "Broken",
            ShapeKind::Fixed {
                instance_size: Header::size() + 2 * mem::ptr_width_usize(),
                ref_offsets: vec![Header::size() + 1],
            },
        );
    }
}
