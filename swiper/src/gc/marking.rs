use crate::gc::root::Slot;
use crate::gc::worklist::Worklist;
use crate::gc::Region;

/// Mark every object reachable from the root set. Traversal is iterative
/// via an explicit worklist; shared and cyclic structures terminate because
/// the mark bit doubles as the visited flag. Returns the number of live
/// bytes, which the full collector compares against the old generation's
/// capacity before it commits to compaction.
pub fn mark_live(rootset: &[Slot], young_active: Region, old_active: Region) -> usize {
    let mut worklist = Worklist::new();
    let mut live_bytes = 0;

    let in_heap = |addr| young_active.contains(addr) || old_active.contains(addr);

    for root in rootset {
        let object_address = root.get();

        if in_heap(object_address) {
            let object = object_address.to_obj();

            if object.header().try_mark() {
                live_bytes += object.size();
                worklist.push(object_address);
            }
        } else {
            debug_assert!(object_address.is_null());
        }
    }

    while let Some(object_address) = worklist.pop() {
        let object = object_address.to_obj();

        object.visit_reference_fields(|field| {
            let field_address = field.get();

            if in_heap(field_address) {
                let field_object = field_address.to_obj();

                if field_object.header().try_mark() {
                    live_bytes += field_object.size();
                    worklist.push(field_address);
                }
            } else {
                debug_assert!(field_address.is_null());
            }
        });
    }

    live_bytes
}
