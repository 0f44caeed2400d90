//! A one-field heap record.
//!
//! Boxes give callers an identity-bearing payload: two boxes holding the
//! same integer are still different keys. The stress driver and the tests
//! use them as tree values and hash map keys.

use std::error::Error;

use crate::heap::Heap;

use super::gc_handle::GcHandle;
use super::handle_arena::HandleScope;
use super::type_ids::TYPE_ID_BOX;

const FIELD_VALUE: usize = 0;

pub struct GcBox;

impl GcBox {
    /// Allocate a box holding `value`. `value` stays rooted across the
    /// allocation, so it may itself be a heap pointer.
    pub fn new(heap: &mut Heap, value: usize) -> Result<usize, Box<dyn Error>> {
        let mut scope = HandleScope::new(heap);
        let value_h = scope.alloc(value);
        let box_h = scope.allocate(1, TYPE_ID_BOX)?;
        scope.set_field_handle(box_h, FIELD_VALUE, value_h);
        Ok(scope.get(box_h))
    }

    pub fn get(boxed: usize) -> usize {
        GcHandle::from_tagged(boxed).get_field(FIELD_VALUE)
    }

    pub fn set(heap: &mut Heap, boxed: usize, value: usize) {
        heap.set_field_with_barrier(boxed, FIELD_VALUE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::AllocatorOptions;
    use crate::types::BuiltInTypes;

    #[test]
    fn test_box_keeps_pointer_payload_alive() {
        let mut heap = Heap::new(AllocatorOptions {
            gc_always: true,
            ..AllocatorOptions::default()
        })
        .unwrap();
        let inner = GcBox::new(&mut heap, BuiltInTypes::construct_int(4) as usize).unwrap();
        let outer = GcBox::new(&mut heap, inner).unwrap();
        let root = heap.add_root(outer);

        heap.gc();

        let outer = heap.get_root(root);
        let inner = GcBox::get(outer);
        assert_eq!(GcBox::get(inner), BuiltInTypes::construct_int(4) as usize);

        GcBox::set(&mut heap, outer, BuiltInTypes::construct_int(1) as usize);
        assert_eq!(GcBox::get(outer), BuiltInTypes::construct_int(1) as usize);
    }
}
