//! HandleScope - GC-safe local references.
//!
//! Provides stable handles (slot indices) into the heap's root set. The
//! collector rewrites root slots when it moves objects, so a handle stays
//! valid across any number of allocations until its scope exits.
//!
//! Rule of thumb for code in this crate: a raw `usize` reference may be
//! held only between two allocation points. Anything that crosses an
//! allocation goes into a handle first and is re-read afterwards.

use std::error::Error;

use crate::heap::Heap;

use super::root_set::RootIdx;

/// A rooted local reference.
///
/// Handles are slot indices - the underlying value may be updated by GC,
/// but the handle itself remains valid until its scope exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle {
    slot: RootIdx,
}

/// RAII scope guard for handle allocation.
///
/// Handles allocated within this scope are released when the scope is
/// dropped, including when a fatal consistency check unwinds through it.
/// Scopes nest by reborrowing the heap through [`HandleScope::heap`].
pub struct HandleScope<'a> {
    heap: &'a mut Heap,
    slots: Vec<RootIdx>,
}

impl<'a> HandleScope<'a> {
    pub fn new(heap: &'a mut Heap) -> Self {
        Self {
            heap,
            slots: Vec::with_capacity(16),
        }
    }

    /// Root a raw value (may or may not be a heap pointer).
    #[inline]
    pub fn alloc(&mut self, value: usize) -> Handle {
        let slot = self.heap.roots_mut().protect(value);
        self.slots.push(slot);
        Handle { slot }
    }

    /// Current value of a handle.
    #[inline]
    pub fn get(&self, handle: Handle) -> usize {
        self.heap.roots().get(handle.slot)
    }

    /// Point an existing handle at a different value.
    #[inline]
    pub fn set(&mut self, handle: Handle, value: usize) {
        self.heap.roots_mut().set(handle.slot, value);
    }

    /// Allocate a new heap object with every field set to null and return
    /// a handle to it. This may run a collection, which updates every
    /// handle.
    pub fn allocate(&mut self, num_fields: usize, type_id: u8) -> Result<Handle, Box<dyn Error>> {
        let ptr = self.heap.allocate(num_fields, type_id)?;
        Ok(self.alloc(ptr))
    }

    /// Set a field on a Handle's object with proper write barrier.
    #[inline]
    pub fn set_field(&mut self, handle: Handle, index: usize, value: usize) {
        let object_ptr = self.get(handle);
        self.heap.set_field_with_barrier(object_ptr, index, value);
    }

    /// Set a field on a Handle's object to another Handle's value.
    #[inline]
    pub fn set_field_handle(&mut self, handle: Handle, index: usize, value_handle: Handle) {
        let value = self.get(value_handle);
        self.set_field(handle, index, value);
    }

    /// Number of handles this scope has registered.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn heap(&mut self) -> &mut Heap {
        self.heap
    }

    #[inline]
    pub fn heap_ref(&self) -> &Heap {
        self.heap
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        for &slot in &self.slots {
            self.heap.roots_mut().release(slot);
        }
    }
}
