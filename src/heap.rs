//! The heap facade every collection in this crate talks to.
//!
//! It owns the collector, the root set, the process-wide weak-reference
//! list and the collection-phase flag, and exposes the four primitives the
//! collections need: allocation (which may collect), root registration,
//! the write barrier, and weak-reference registration.

use std::error::Error;
use std::time::Instant;

use crate::collections::root_set::{RootIdx, RootSet};
use crate::collections::weak_reference;
use crate::gc::compacting::CompactingHeap;
use crate::gc::debug_trace::{self, TraceEventKind};
use crate::gc::heap_dump::HeapDump;
use crate::gc::{AllocatorOptions, GcStats};
use crate::types::{BuiltInTypes, HeapObject, Word};

/// Runs at the end of every collection, while [`Heap::is_collecting`] is
/// still true. Allocation from a hook never starts a nested collection.
pub type CollectionHook = Box<dyn FnMut(&mut Heap)>;

pub struct Heap {
    allocator: CompactingHeap,
    roots: RootSet,
    weak_references: usize,
    collecting: bool,
    options: AllocatorOptions,
    stats: GcStats,
    remembered_set: Vec<usize>,
    collection_hooks: Vec<CollectionHook>,
}

impl Heap {
    pub fn new(options: AllocatorOptions) -> Result<Self, Box<dyn Error>> {
        debug_trace::init();
        Ok(Self {
            allocator: CompactingHeap::new(options.segment_bytes)?,
            roots: RootSet::new(),
            weak_references: BuiltInTypes::null_value() as usize,
            collecting: false,
            options,
            stats: GcStats::default(),
            remembered_set: Vec::new(),
            collection_hooks: Vec::new(),
        })
    }

    pub fn options(&self) -> AllocatorOptions {
        self.options
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Allocate an object with `num_fields` fields, all null.
    ///
    /// Any allocation may run a full collection first, which moves every
    /// live object. Callers must hold everything they still need in roots.
    pub fn allocate(&mut self, num_fields: usize, type_id: u8) -> Result<usize, Box<dyn Error>> {
        let words = Word::from_word(num_fields);
        if self.options.gc
            && !self.collecting
            && (self.options.gc_always || !self.allocator.can_allocate(words))
        {
            self.gc();
        }
        if !self.allocator.can_allocate(words) {
            self.allocator.grow(words)?;
            self.stats.heap_grows += 1;
        }
        let pointer = self.allocator.allocate(words, type_id)?;
        self.stats.allocations += 1;
        debug_trace::trace_alloc(type_id, num_fields);
        Ok(pointer)
    }

    /// Run a full collection now. Does nothing if one is already running
    /// or collection is disabled.
    pub fn gc(&mut self) {
        if self.collecting || !self.options.gc {
            return;
        }
        self.collecting = true;
        let collection = self.stats.collections;
        let start = Instant::now();
        debug_trace::record(TraceEventKind::GcStart { collection });

        // Remembered addresses are about to go stale.
        self.remembered_set.clear();

        let cleared_before = self.stats.weak_references_cleared;
        let copied_before = self.stats.bytes_copied;
        self.allocator.gc(
            self.roots.roots_mut(),
            &mut self.weak_references,
            &mut self.stats,
        );
        self.stats.collections += 1;

        let cleared = self.stats.weak_references_cleared - cleared_before;
        if cleared > 0 {
            debug_trace::record(TraceEventKind::WeakCleared { count: cleared });
        }
        debug_trace::record(TraceEventKind::GcEnd {
            collection,
            bytes_copied: self.stats.bytes_copied - copied_before,
            duration_us: start.elapsed().as_micros() as u64,
        });
        if self.options.print_stats {
            println!("GC took: {:?}", start.elapsed());
        }

        self.run_collection_hooks();
        self.collecting = false;
    }

    fn run_collection_hooks(&mut self) {
        let mut hooks = std::mem::take(&mut self.collection_hooks);
        for hook in hooks.iter_mut() {
            hook(self);
        }
        hooks.append(&mut self.collection_hooks);
        self.collection_hooks = hooks;
    }

    pub fn on_collect(&mut self, hook: CollectionHook) {
        self.collection_hooks.push(hook);
    }

    /// True while a collection (including its hooks) is running.
    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    /// Store `value` into a field of `object_ptr` and record the store for
    /// the collector.
    #[inline]
    pub fn set_field_with_barrier(&mut self, object_ptr: usize, index: usize, value: usize) {
        let obj = HeapObject::from_tagged(object_ptr);
        obj.write_field(index, value);
        self.write_barrier(object_ptr, value);
    }

    #[inline]
    pub fn write_barrier(&mut self, object_ptr: usize, new_value: usize) {
        if BuiltInTypes::is_heap_pointer(new_value) {
            self.stats.barrier_hits += 1;
            // Nothing ever drains the set when collection is off.
            if self.options.gc && self.remembered_set.last() != Some(&object_ptr) {
                self.remembered_set.push(object_ptr);
            }
        }
    }

    /// Objects written through the barrier since the last collection.
    pub fn remembered_set(&self) -> &[usize] {
        &self.remembered_set
    }

    /// Link a freshly allocated weak reference into the process-wide weak
    /// list. The list is owned here; maps only ever prepend to it.
    pub fn register_weak_reference(&mut self, weak: usize) {
        debug_assert!(BuiltInTypes::is_heap_pointer(weak));
        HeapObject::from_tagged(weak).write_field(weak_reference::FIELD_VM_NEXT, self.weak_references);
        self.weak_references = weak;
    }

    /// Head of the weak-reference list (null when empty).
    pub fn weak_references(&self) -> usize {
        self.weak_references
    }

    pub fn weak_reference_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.weak_references;
        while BuiltInTypes::is_heap_pointer(current) {
            count += 1;
            current = HeapObject::from_tagged(current).get_field(weak_reference::FIELD_VM_NEXT);
        }
        count
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    pub fn roots_mut(&mut self) -> &mut RootSet {
        &mut self.roots
    }

    /// Register a long-lived root, released with [`Heap::remove_root`].
    pub fn add_root(&mut self, value: usize) -> RootIdx {
        self.roots.protect(value)
    }

    pub fn get_root(&self, idx: RootIdx) -> usize {
        self.roots.get(idx)
    }

    pub fn set_root(&mut self, idx: RootIdx, value: usize) {
        self.roots.set(idx, value);
    }

    pub fn remove_root(&mut self, idx: RootIdx) {
        self.roots.release(idx);
    }

    /// True if `value` points into the live half of the heap.
    pub fn contains(&self, value: usize) -> bool {
        self.allocator.contains(value)
    }

    pub fn bytes_used(&self) -> usize {
        self.allocator.bytes_used()
    }

    pub fn bytes_mapped(&self) -> usize {
        self.allocator.bytes_mapped()
    }

    pub fn objects(&self) -> impl Iterator<Item = HeapObject> + '_ {
        self.allocator.objects()
    }

    pub fn dump(&self) -> HeapDump {
        HeapDump::capture(self)
    }
}
