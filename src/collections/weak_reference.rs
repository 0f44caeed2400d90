//! Weak references.
//!
//! ```text
//! WeakReference (2 fields):
//!   [0] target  - referent, or null once the collector found it dead
//!   [1] vm_next - link in the heap's weak-reference list
//! ```
//!
//! The collector never traces either field. After tracing it walks the
//! list, forwards targets that survived and nulls the rest.

use std::error::Error;

use crate::heap::Heap;
use crate::types::BuiltInTypes;

use super::gc_handle::GcHandle;
use super::handle_arena::{Handle, HandleScope};
use super::type_ids::TYPE_ID_WEAK_REFERENCE;

pub const FIELD_TARGET: usize = 0;
pub const FIELD_VM_NEXT: usize = 1;

pub struct WeakReference;

impl WeakReference {
    /// Allocate a weak reference to `target` and link it into the heap's
    /// weak list.
    pub fn new(heap: &mut Heap, target: usize) -> Result<usize, Box<dyn Error>> {
        let mut scope = HandleScope::new(heap);
        let target_h = scope.alloc(target);
        let weak_h = Self::new_in_scope(&mut scope, target_h)?;
        Ok(scope.get(weak_h))
    }

    /// Same as [`WeakReference::new`], for callers already holding a scope.
    /// The result stays rooted in `scope`.
    pub fn new_in_scope(
        scope: &mut HandleScope<'_>,
        target: Handle,
    ) -> Result<Handle, Box<dyn Error>> {
        let weak_h = scope.allocate(2, TYPE_ID_WEAK_REFERENCE)?;
        // Raw store: a weak target must not show up in the remembered set.
        GcHandle::from_tagged(scope.get(weak_h)).set_field(FIELD_TARGET, scope.get(target));
        let weak = scope.get(weak_h);
        scope.heap().register_weak_reference(weak);
        Ok(weak_h)
    }

    /// The referent, or `None` once it has been cleared.
    pub fn target(weak: usize) -> Option<usize> {
        let target = GcHandle::from_tagged(weak).get_field(FIELD_TARGET);
        if BuiltInTypes::is_null(target) {
            None
        } else {
            Some(target)
        }
    }

    /// Clear the referent by hand, the way the collector does for a dead
    /// target.
    pub fn clear(weak: usize) {
        GcHandle::from_tagged(weak).set_field(FIELD_TARGET, BuiltInTypes::null_value() as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::GcBox;
    use crate::gc::AllocatorOptions;

    #[test]
    fn test_weak_reference_does_not_keep_target_alive() {
        let mut heap = Heap::new(AllocatorOptions::default()).unwrap();
        let target = GcBox::new(&mut heap, BuiltInTypes::construct_int(3) as usize).unwrap();
        let weak = WeakReference::new(&mut heap, target).unwrap();
        let weak_root = heap.add_root(weak);
        assert_eq!(WeakReference::target(weak), Some(target));
        assert_eq!(heap.remembered_set().len(), 0);

        heap.gc();

        assert_eq!(WeakReference::target(heap.get_root(weak_root)), None);
        // Only the weak reference itself survived.
        assert_eq!(heap.objects().count(), 1);
    }

    #[test]
    fn test_clear_by_hand() {
        let mut heap = Heap::new(AllocatorOptions::default()).unwrap();
        let target = GcBox::new(&mut heap, BuiltInTypes::construct_int(3) as usize).unwrap();
        let weak = WeakReference::new(&mut heap, target).unwrap();
        WeakReference::clear(weak);
        assert_eq!(WeakReference::target(weak), None);
        assert_eq!(heap.weak_reference_count(), 1);
    }
}
