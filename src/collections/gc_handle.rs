//! GcHandle - thin wrapper around a tagged heap pointer.
//!
//! # GC Safety
//!
//! A GcHandle is a bare address. It is only valid until the next
//! allocation, because any allocation may run the collector and move the
//! object. Anything that has to survive an allocation lives in a
//! [`HandleScope`](super::HandleScope) slot instead.

use crate::types::{BuiltInTypes, HeapObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHandle {
    tagged_ptr: usize,
}

impl GcHandle {
    /// # Panics
    /// Panics if the pointer is not a valid heap pointer.
    pub fn from_tagged(ptr: usize) -> Self {
        debug_assert!(
            BuiltInTypes::is_heap_pointer(ptr),
            "GcHandle::from_tagged called with non-heap pointer: {:#x}",
            ptr
        );
        Self { tagged_ptr: ptr }
    }

    pub fn as_tagged(&self) -> usize {
        self.tagged_ptr
    }

    pub fn as_heap_object(&self) -> HeapObject {
        HeapObject::from_tagged(self.tagged_ptr)
    }

    pub fn get_field(&self, index: usize) -> usize {
        self.as_heap_object().get_field(index)
    }

    /// Raw store, no write barrier. Only for initialising an object that
    /// was allocated after the last collection point, or for non-pointer
    /// bits such as the tree colour.
    pub fn set_field(&self, index: usize, value: usize) {
        self.as_heap_object().write_field(index, value);
    }

    pub fn field_count(&self) -> usize {
        self.as_heap_object().field_count()
    }

    pub fn get_type_id(&self) -> u8 {
        self.as_heap_object().get_type_id()
    }

    /// Copy the first `count` fields verbatim, packed bits included.
    /// Used for copy-on-write cloning.
    pub fn copy_fields_to(&self, dest: &GcHandle, count: usize) {
        if count == 0 {
            return;
        }
        let src_obj = self.as_heap_object();
        let src = src_obj.get_fields();
        let mut dest_obj = dest.as_heap_object();
        let dst = dest_obj.get_fields_mut();
        dst[..count].copy_from_slice(&src[..count]);
    }
}
