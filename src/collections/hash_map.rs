//! Chained hash map whose storage lives on the collected heap.
//!
//! # Structure
//!
//! ```text
//! HashMap / WeakHashMap (2 fields):
//!   [0] array - raw array of bucket chains, length a power of two, or null
//!   [1] size  - entry count (tagged int), cleared weak entries included
//!
//! Triple (3 fields):
//!   [0] key   - the key, or a WeakReference to it in a weak map
//!   [1] value
//!   [2] next  - next triple in the bucket, or null
//! ```
//!
//! Hash and equality are passed to every call instead of being stored.
//! Objects move, so `hash` must depend on a key's contents, never on its
//! address, and it must not allocate.
//!
//! The array grows to twice its length once `size` reaches `2 * length` and
//! shrinks to fit once `size` falls to `length / 3`, which keeps `size` in
//! `[length / 3, 2 * length)` outside a collection.
//!
//! A weak map never keeps its keys alive. The collector nulls the target of
//! a weak key when nothing else holds it; lookups skip such entries and
//! `remove` and `resize` unlink them when they walk past.

use std::error::Error;

use crate::gc::debug_trace::{self, TraceEventKind};
use crate::heap::Heap;
use crate::types::BuiltInTypes;

use super::gc_handle::GcHandle;
use super::handle_arena::{Handle, HandleScope};
use super::type_ids::{TYPE_ID_HASH_MAP, TYPE_ID_RAW_ARRAY, TYPE_ID_TRIPLE, TYPE_ID_WEAK_HASH_MAP};
use super::weak_reference::WeakReference;

const FIELD_ARRAY: usize = 0;
const FIELD_SIZE: usize = 1;

const FIELD_KEY: usize = 0;
const FIELD_VALUE: usize = 1;
const FIELD_NEXT: usize = 2;

pub struct GcHashMap;

impl GcHashMap {
    pub fn new(heap: &mut Heap, weak: bool) -> Result<usize, Box<dyn Error>> {
        let type_id = if weak {
            TYPE_ID_WEAK_HASH_MAP
        } else {
            TYPE_ID_HASH_MAP
        };
        let map = heap.allocate(2, type_id)?;
        heap.set_field_with_barrier(map, FIELD_SIZE, BuiltInTypes::construct_int(0) as usize);
        Ok(map)
    }

    pub fn is_weak(map: usize) -> bool {
        GcHandle::from_tagged(map).get_type_id() == TYPE_ID_WEAK_HASH_MAP
    }

    /// Number of entries, counting weak entries the collector has cleared
    /// but nothing has unlinked yet.
    pub fn len(map: usize) -> usize {
        BuiltInTypes::untag(GcHandle::from_tagged(map).get_field(FIELD_SIZE))
    }

    pub fn is_empty(map: usize) -> bool {
        Self::len(map) == 0
    }

    /// Length of the bucket array, 0 when there is none.
    pub fn capacity(map: usize) -> usize {
        let array = Self::array(map);
        if BuiltInTypes::is_null(array) {
            0
        } else {
            GcHandle::from_tagged(array).field_count()
        }
    }

    fn array(map: usize) -> usize {
        GcHandle::from_tagged(map).get_field(FIELD_ARRAY)
    }

    fn set_size(heap: &mut Heap, map: usize, size: usize) {
        heap.set_field_with_barrier(map, FIELD_SIZE, BuiltInTypes::construct_int(size as isize) as usize);
    }

    fn bucket(hash: u32, length: usize) -> usize {
        hash as usize & (length - 1)
    }

    /// The key a triple stands for, `None` if it was a weak key that has
    /// been cleared.
    fn live_key(weak: bool, triple: usize) -> Option<usize> {
        let key = GcHandle::from_tagged(triple).get_field(FIELD_KEY);
        if weak {
            WeakReference::target(key)
        } else {
            Some(key)
        }
    }

    pub fn entry_value(triple: usize) -> usize {
        GcHandle::from_tagged(triple).get_field(FIELD_VALUE)
    }

    fn entry_next(triple: usize) -> usize {
        GcHandle::from_tagged(triple).get_field(FIELD_NEXT)
    }

    /// Find the triple for `key`. Cleared weak entries are skipped but left
    /// in place.
    pub fn find<H, E>(heap: &Heap, map: usize, key: usize, hash: H, equal: E) -> Option<usize>
    where
        H: Fn(&Heap, usize) -> u32,
        E: Fn(&Heap, usize, usize) -> bool,
    {
        let array = Self::array(map);
        if BuiltInTypes::is_null(array) {
            return None;
        }
        let weak = Self::is_weak(map);
        let array = GcHandle::from_tagged(array);
        let index = Self::bucket(hash(heap, key), array.field_count());
        let mut entry = array.get_field(index);
        while !BuiltInTypes::is_null(entry) {
            if let Some(candidate) = Self::live_key(weak, entry) {
                if equal(heap, key, candidate) {
                    return Some(entry);
                }
            }
            entry = Self::entry_next(entry);
        }
        None
    }

    pub fn get<H, E>(heap: &Heap, map: usize, key: usize, hash: H, equal: E) -> Option<usize>
    where
        H: Fn(&Heap, usize) -> u32,
        E: Fn(&Heap, usize, usize) -> bool,
    {
        Self::find(heap, map, key, hash, equal).map(Self::entry_value)
    }

    /// Add an entry. Duplicate keys are not detected; look the key up first
    /// when that matters.
    ///
    /// Every allocation here may collect, and a collection may resize the
    /// map, so the array is read again after each one.
    pub fn insert<H>(
        heap: &mut Heap,
        map: usize,
        key: usize,
        value: usize,
        hash: H,
    ) -> Result<(), Box<dyn Error>>
    where
        H: Fn(&Heap, usize) -> u32,
    {
        let key_hash = hash(heap, key);
        let mut scope = HandleScope::new(heap);
        let map_h = scope.alloc(map);
        let key_h = scope.alloc(key);
        let value_h = scope.alloc(value);

        let size = Self::len(map) + 1;
        Self::set_size(scope.heap(), map, size);

        let length = Self::capacity(map);
        if length == 0 || size >= 2 * length {
            let target = if length == 0 { size } else { 2 * length };
            Self::resize_rooted(&mut scope, map_h, &hash, target)?;
        }

        let stored_key = if Self::is_weak(scope.get(map_h)) {
            WeakReference::new_in_scope(&mut scope, key_h)?
        } else {
            key_h
        };
        let triple = scope.allocate(3, TYPE_ID_TRIPLE)?;
        scope.set_field_handle(triple, FIELD_KEY, stored_key);
        scope.set_field_handle(triple, FIELD_VALUE, value_h);

        // A hook may have cleared the array while we were allocating. That
        // also zeroed the size, so count the pending entry again.
        while Self::capacity(scope.get(map_h)) == 0 {
            let map = scope.get(map_h);
            let size = Self::len(map) + 1;
            Self::set_size(scope.heap(), map, size);
            Self::resize_rooted(&mut scope, map_h, &hash, size)?;
        }

        let array = Self::array(scope.get(map_h));
        let index = Self::bucket(key_hash, GcHandle::from_tagged(array).field_count());
        let triple_ptr = scope.get(triple);
        let head = GcHandle::from_tagged(array).get_field(index);
        scope.heap().set_field_with_barrier(triple_ptr, FIELD_NEXT, head);
        scope.heap().set_field_with_barrier(array, index, triple_ptr);

        // Entries purged during a collection can leave the map too sparse.
        let map = scope.get(map_h);
        if Self::len(map) <= Self::capacity(map) / 3 {
            let size = Self::len(map).max(1);
            Self::resize_rooted(&mut scope, map_h, &hash, size)?;
        }
        Ok(())
    }

    /// Remove `key` and return its value. Cleared weak entries met in the
    /// bucket on the way are unlinked too. Each unlink decrements the size.
    ///
    /// The returned value is a raw reference, valid until the next
    /// allocation.
    pub fn remove<H, E>(
        heap: &mut Heap,
        map: usize,
        key: usize,
        hash: H,
        equal: E,
    ) -> Result<Option<usize>, Box<dyn Error>>
    where
        H: Fn(&Heap, usize) -> u32,
        E: Fn(&Heap, usize, usize) -> bool,
    {
        let array = Self::array(map);
        if BuiltInTypes::is_null(array) {
            return Ok(None);
        }
        let weak = Self::is_weak(map);
        let length = GcHandle::from_tagged(array).field_count();
        let index = Self::bucket(hash(heap, key), length);

        let mut removed = None;
        let mut previous = None;
        let mut entry = GcHandle::from_tagged(array).get_field(index);
        while !BuiltInTypes::is_null(entry) {
            match Self::live_key(weak, entry) {
                None => entry = Self::unlink(heap, map, index, previous, entry),
                Some(candidate) if equal(heap, key, candidate) => {
                    removed = Some(Self::entry_value(entry));
                    Self::unlink(heap, map, index, previous, entry);
                    break;
                }
                Some(_) => {
                    previous = Some(entry);
                    entry = Self::entry_next(entry);
                }
            }
        }

        // Shrinking allocates, which is off limits while collecting.
        if !heap.is_collecting() && Self::len(map) <= length / 3 {
            let mut scope = HandleScope::new(heap);
            let map_h = scope.alloc(map);
            let removed_h = scope.alloc(removed.unwrap_or(BuiltInTypes::null_value() as usize));
            Self::resize_rooted(&mut scope, map_h, &hash, Self::len(map))?;
            removed = removed.map(|_| scope.get(removed_h));
        }
        Ok(removed)
    }

    /// Splice `entry` out of bucket `index`. Returns the entry after it.
    fn unlink(
        heap: &mut Heap,
        map: usize,
        index: usize,
        previous: Option<usize>,
        entry: usize,
    ) -> usize {
        let next = Self::entry_next(entry);
        match previous {
            Some(previous) => heap.set_field_with_barrier(previous, FIELD_NEXT, next),
            None => heap.set_field_with_barrier(Self::array(map), index, next),
        }
        Self::set_size(heap, map, Self::len(map) - 1);
        next
    }

    /// Rebuild the bucket array with the next power of two at or above
    /// `target` buckets. A target of 0 drops the array and every entry.
    /// Does nothing when the length would not change.
    pub fn resize<H>(heap: &mut Heap, map: usize, hash: H, target: usize) -> Result<(), Box<dyn Error>>
    where
        H: Fn(&Heap, usize) -> u32,
    {
        let mut scope = HandleScope::new(heap);
        let map_h = scope.alloc(map);
        Self::resize_rooted(&mut scope, map_h, &hash, target)
    }

    fn resize_rooted<H>(
        scope: &mut HandleScope<'_>,
        map_h: Handle,
        hash: &H,
        target: usize,
    ) -> Result<(), Box<dyn Error>>
    where
        H: Fn(&Heap, usize) -> u32,
    {
        let old_length = Self::capacity(scope.get(map_h));
        if target == 0 {
            let null = BuiltInTypes::null_value() as usize;
            let map = scope.get(map_h);
            scope.heap().set_field_with_barrier(map, FIELD_ARRAY, null);
            Self::set_size(scope.heap(), map, 0);
            debug_trace::record(TraceEventKind::MapResize {
                from: old_length,
                to: 0,
            });
            return Ok(());
        }

        let new_length = target.next_power_of_two();
        if old_length == new_length {
            return Ok(());
        }

        let old_array = scope.alloc(Self::array(scope.get(map_h)));
        let new_array = scope.allocate(new_length, TYPE_ID_RAW_ARRAY)?;

        if scope.get(old_array) != Self::array(scope.get(map_h)) {
            // The allocation collected and something resized the map
            // meanwhile. Its array is current; ours is garbage.
            debug_trace::record(TraceEventKind::MapResizeSkipped { requested: target });
            return Ok(());
        }

        let map = scope.get(map_h);
        let old = scope.get(old_array);
        let new = scope.get(new_array);
        let weak = Self::is_weak(map);
        let mut dropped = 0;
        if !BuiltInTypes::is_null(old) {
            let old = GcHandle::from_tagged(old);
            for bucket in 0..old.field_count() {
                let mut entry = old.get_field(bucket);
                while !BuiltInTypes::is_null(entry) {
                    let next = Self::entry_next(entry);
                    match Self::live_key(weak, entry) {
                        Some(key) => {
                            let index = Self::bucket(hash(scope.heap_ref(), key), new_length);
                            let head = GcHandle::from_tagged(new).get_field(index);
                            scope.heap().set_field_with_barrier(entry, FIELD_NEXT, head);
                            scope.heap().set_field_with_barrier(new, index, entry);
                        }
                        None => dropped += 1,
                    }
                    entry = next;
                }
            }
        }

        scope.heap().set_field_with_barrier(map, FIELD_ARRAY, new);
        debug_trace::record(TraceEventKind::MapResize {
            from: old_length,
            to: new_length,
        });
        if dropped > 0 {
            let size = Self::len(map) - dropped;
            Self::set_size(scope.heap(), map, size);
            // The target was picked from a size that still counted the
            // dropped entries.
            if size <= new_length / 3 {
                return Self::resize_rooted(scope, map_h, hash, size);
            }
        }
        Ok(())
    }

    /// Visit every live entry as `(key, value)`. Cleared weak entries are
    /// skipped. Does not allocate.
    pub fn for_each(map: usize, mut f: impl FnMut(usize, usize)) {
        let array = Self::array(map);
        if BuiltInTypes::is_null(array) {
            return;
        }
        let weak = Self::is_weak(map);
        let array = GcHandle::from_tagged(array);
        for bucket in 0..array.field_count() {
            let mut entry = array.get_field(bucket);
            while !BuiltInTypes::is_null(entry) {
                if let Some(key) = Self::live_key(weak, entry) {
                    f(key, Self::entry_value(entry));
                }
                entry = Self::entry_next(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;
    use crate::collections::GcBox;
    use crate::gc::AllocatorOptions;

    fn int(value: isize) -> usize {
        BuiltInTypes::construct_int(value) as usize
    }

    fn hash_int(_heap: &Heap, key: usize) -> u32 {
        BuiltInTypes::untag(key) as u32
    }

    fn equal_int(_heap: &Heap, a: usize, b: usize) -> bool {
        a == b
    }

    /// Boxed keys hash and compare by contents.
    fn hash_boxed(_heap: &Heap, key: usize) -> u32 {
        BuiltInTypes::untag(GcBox::get(key)) as u32
    }

    fn equal_boxed(_heap: &Heap, a: usize, b: usize) -> bool {
        GcBox::get(a) == GcBox::get(b)
    }

    fn same_bucket(_heap: &Heap, _key: usize) -> u32 {
        0
    }

    fn heap(gc_always: bool) -> Heap {
        Heap::new(AllocatorOptions {
            gc_always,
            ..AllocatorOptions::default()
        })
        .unwrap()
    }

    /// Triples physically linked into the array, cleared or not.
    fn chain_length(map: usize) -> usize {
        let array = GcHandle::from_tagged(GcHashMap::array(map));
        let mut count = 0;
        for bucket in 0..array.field_count() {
            let mut entry = array.get_field(bucket);
            while !BuiltInTypes::is_null(entry) {
                count += 1;
                entry = GcHashMap::entry_next(entry);
            }
        }
        count
    }

    fn assert_load_factor(map: usize) {
        let length = GcHashMap::capacity(map);
        if length > 0 {
            let size = GcHashMap::len(map);
            assert!(length.is_power_of_two());
            assert!(3 * size >= length, "size {} too small for {}", size, length);
            assert!(size < 2 * length, "size {} too large for {}", size, length);
        }
    }

    #[test]
    fn test_insert_twenty_int_keys() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);

        let mut capacities = Vec::new();
        for key in 1..=20 {
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), int(key * 100), hash_int).unwrap();
            capacities.push(GcHashMap::capacity(heap.get_root(map_root)));
            assert_load_factor(heap.get_root(map_root));
        }

        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 20);
        assert_eq!(GcHashMap::capacity(map), 16);
        assert_eq!(capacities.iter().filter(|c| **c == 16).count(), 5);
        assert_eq!(capacities[14], 8);
        assert_eq!(
            GcHashMap::get(&heap, map, int(15), hash_int, equal_int),
            Some(int(1500))
        );
        assert_eq!(GcHashMap::find(&heap, map, int(99), hash_int, equal_int), None);
    }

    #[test]
    fn test_remove_returns_value_and_shrinks() {
        let mut heap = heap(true);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..40 {
            let value = GcBox::new(&mut heap, int(key)).unwrap();
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), value, hash_int).unwrap();
        }
        assert_eq!(GcHashMap::capacity(heap.get_root(map_root)), 32);

        for key in 0..38 {
            let map = heap.get_root(map_root);
            let removed = GcHashMap::remove(&mut heap, map, int(key), hash_int, equal_int)
                .unwrap()
                .unwrap();
            assert_eq!(GcBox::get(removed), int(key));
            assert_load_factor(heap.get_root(map_root));
        }
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 2);
        assert_eq!(GcHashMap::capacity(map), 2);
        assert_eq!(GcHashMap::remove(&mut heap, map, int(0), hash_int, equal_int).unwrap(), None);

        for key in [38, 39] {
            let map = heap.get_root(map_root);
            GcHashMap::remove(&mut heap, map, int(key), hash_int, equal_int).unwrap();
        }
        let map = heap.get_root(map_root);
        assert!(GcHashMap::is_empty(map));
        assert_eq!(GcHashMap::capacity(map), 0);
    }

    #[test]
    fn test_strong_map_keeps_keys_alive() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..10 {
            let boxed = GcBox::new(&mut heap, int(key)).unwrap();
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, boxed, int(key), hash_boxed).unwrap();
        }
        heap.gc();

        let probe = GcBox::new(&mut heap, int(7)).unwrap();
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::get(&heap, map, probe, hash_boxed, equal_boxed), Some(int(7)));
        let mut seen = 0;
        GcHashMap::for_each(map, |_, _| seen += 1);
        assert_eq!(seen, 10);
    }

    #[test]
    fn test_weak_entry_skipped_then_purged_by_remove() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, true).unwrap();
        let map_root = heap.add_root(map);

        let mut kept = Vec::new();
        for key in 1..=3 {
            let boxed = GcBox::new(&mut heap, int(key)).unwrap();
            let root = heap.add_root(boxed);
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, boxed, int(key), same_bucket).unwrap();
            if key != 2 {
                kept.push(root);
            } else {
                heap.remove_root(root);
            }
        }

        heap.gc();

        // Key 2 is gone but still counted.
        let probe = GcBox::new(&mut heap, int(2)).unwrap();
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::find(&heap, map, probe, same_bucket, equal_boxed), None);
        assert_eq!(GcHashMap::len(map), 3);
        assert_eq!(chain_length(map), 3);
        let mut live = 0;
        GcHashMap::for_each(map, |_, _| live += 1);
        assert_eq!(live, 2);

        // The chain is newest first (3, 2, 1), so removing 1 walks past 2.
        let one = heap.get_root(kept[0]);
        let removed = GcHashMap::remove(&mut heap, map, one, same_bucket, equal_boxed).unwrap();
        assert_eq!(removed, Some(int(1)));
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 1);
        assert_eq!(chain_length(map), 1);
        let three = heap.get_root(kept[1]);
        assert_eq!(GcHashMap::get(&heap, map, three, same_bucket, equal_boxed), Some(int(3)));
    }

    #[test]
    fn test_weak_entries_purged_by_resize() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, true).unwrap();
        let map_root = heap.add_root(map);
        let survivor = GcBox::new(&mut heap, int(0)).unwrap();
        let survivor_root = heap.add_root(survivor);
        let map = heap.get_root(map_root);
        GcHashMap::insert(&mut heap, map, survivor, int(0), hash_boxed).unwrap();
        for key in 1..6 {
            let boxed = GcBox::new(&mut heap, int(key)).unwrap();
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, boxed, int(key), hash_boxed).unwrap();
        }

        heap.gc();
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 6);
        assert_eq!(heap.stats().weak_references_cleared, 5);

        // Asked for 32, but one survivor cannot fill that.
        GcHashMap::resize(&mut heap, map, hash_boxed, 32).unwrap();
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::capacity(map), 1);
        assert_eq!(GcHashMap::len(map), 1);
        assert_load_factor(map);
        assert_eq!(chain_length(map), 1);
        let survivor = heap.get_root(survivor_root);
        assert_eq!(
            GcHashMap::get(&heap, map, survivor, hash_boxed, equal_boxed),
            Some(int(0))
        );
    }

    #[test]
    fn test_weak_shrink_accounts_for_purged_entries() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, true).unwrap();
        let map_root = heap.add_root(map);
        let mut kept = Vec::new();
        for key in 0..32 {
            let boxed = GcBox::new(&mut heap, int(key)).unwrap();
            if key < 2 {
                kept.push(heap.add_root(boxed));
            }
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, boxed, int(key), hash_boxed).unwrap();
        }
        assert_eq!(GcHashMap::capacity(heap.get_root(map_root)), 32);
        heap.gc();

        // Each remove unlinks one cleared entry; the shrink at the end
        // meets the rest of them in other buckets.
        for key in 2..24 {
            let probe = GcBox::new(&mut heap, int(key)).unwrap();
            let map = heap.get_root(map_root);
            let removed = GcHashMap::remove(&mut heap, map, probe, hash_boxed, equal_boxed).unwrap();
            assert_eq!(removed, None);
            assert_load_factor(heap.get_root(map_root));
        }

        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 2);
        assert_eq!(GcHashMap::capacity(map), 2);
        assert_eq!(chain_length(map), 2);
        for (key, root) in kept.iter().enumerate() {
            let boxed = heap.get_root(*root);
            assert_eq!(
                GcHashMap::get(&heap, map, boxed, hash_boxed, equal_boxed),
                Some(int(key as isize))
            );
        }
    }

    #[test]
    fn test_insert_survives_array_cleared_by_collection() {
        let mut heap = heap(true);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..6 {
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), int(key), hash_int).unwrap();
        }

        let armed = Rc::new(Cell::new(false));
        let hook_armed = armed.clone();
        heap.on_collect(Box::new(move |heap: &mut Heap| {
            if hook_armed.replace(false) {
                let map = heap.get_root(map_root);
                GcHashMap::resize(heap, map, hash_int, 0).unwrap();
            }
        }));

        armed.set(true);
        let map = heap.get_root(map_root);
        GcHashMap::insert(&mut heap, map, int(100), int(7), hash_int).unwrap();
        assert!(!armed.get());

        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 1);
        assert_eq!(GcHashMap::capacity(map), 1);
        assert_load_factor(map);
        assert_eq!(GcHashMap::get(&heap, map, int(100), hash_int, equal_int), Some(int(7)));
        assert_eq!(GcHashMap::get(&heap, map, int(3), hash_int, equal_int), None);
        assert_eq!(
            GcHashMap::remove(&mut heap, map, int(100), hash_int, equal_int).unwrap(),
            Some(int(7))
        );
    }

    #[test]
    fn test_resize_to_current_capacity_is_a_no_op() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..6 {
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), int(key), hash_int).unwrap();
        }
        let map = heap.get_root(map_root);
        let array = GcHashMap::array(map);
        let allocations = heap.stats().allocations;
        let barrier_hits = heap.stats().barrier_hits;

        GcHashMap::resize(&mut heap, map, hash_int, 4).unwrap();
        GcHashMap::resize(&mut heap, map, hash_int, 3).unwrap();

        assert_eq!(GcHashMap::capacity(map), 4);
        assert_eq!(GcHashMap::array(map), array);
        assert_eq!(heap.stats().allocations, allocations);
        assert_eq!(heap.stats().barrier_hits, barrier_hits);
    }

    #[test]
    fn test_resize_zero_drops_array() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        GcHashMap::insert(&mut heap, map, int(1), int(1), hash_int).unwrap();
        GcHashMap::resize(&mut heap, map, hash_int, 0).unwrap();
        assert_eq!(GcHashMap::capacity(map), 0);
        assert_eq!(GcHashMap::len(map), 0);
        assert_eq!(GcHashMap::find(&heap, map, int(1), hash_int, equal_int), None);
    }

    #[test]
    fn test_resize_during_allocation_is_not_redone() {
        let mut heap = heap(true);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..6 {
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), int(key), hash_int).unwrap();
        }

        let armed = Rc::new(Cell::new(false));
        let hook_armed = armed.clone();
        heap.on_collect(Box::new(move |heap: &mut Heap| {
            if hook_armed.replace(false) {
                let map = heap.get_root(map_root);
                GcHashMap::resize(heap, map, hash_int, 64).unwrap();
            }
        }));

        armed.set(true);
        let map = heap.get_root(map_root);
        GcHashMap::resize(&mut heap, map, hash_int, 16).unwrap();

        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::capacity(map), 64);
        assert_eq!(GcHashMap::len(map), 6);
        for key in 0..6 {
            assert_eq!(GcHashMap::get(&heap, map, int(key), hash_int, equal_int), Some(int(key)));
        }
    }

    #[test]
    fn test_shrink_deferred_while_collecting() {
        let mut heap = heap(false);
        let map = GcHashMap::new(&mut heap, false).unwrap();
        let map_root = heap.add_root(map);
        for key in 0..16 {
            let map = heap.get_root(map_root);
            GcHashMap::insert(&mut heap, map, int(key), int(key), hash_int).unwrap();
        }
        heap.on_collect(Box::new(move |heap: &mut Heap| {
            let map = heap.get_root(map_root);
            for key in 0..14 {
                GcHashMap::remove(heap, map, int(key), hash_int, equal_int).unwrap();
            }
        }));
        heap.gc();

        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::len(map), 2);
        assert_eq!(GcHashMap::capacity(map), 16);

        // The next insert notices the map is too sparse.
        GcHashMap::insert(&mut heap, map, int(100), int(100), hash_int).unwrap();
        let map = heap.get_root(map_root);
        assert_eq!(GcHashMap::capacity(map), 4);
        assert_load_factor(map);
    }

    proptest! {
        #[test]
        fn prop_load_factor_and_contents(
            ops in proptest::collection::vec((any::<bool>(), 0isize..48), 1..150),
            gc_always in any::<bool>(),
        ) {
            let mut heap = heap(gc_always);
            let map = GcHashMap::new(&mut heap, false).unwrap();
            let map_root = heap.add_root(map);
            let mut model = HashSet::new();

            for (insert, key) in ops {
                if insert && !model.contains(&key) {
                    let value = GcBox::new(&mut heap, int(key)).unwrap();
                    let map = heap.get_root(map_root);
                    GcHashMap::insert(&mut heap, map, int(key), value, hash_int).unwrap();
                    model.insert(key);
                } else if !insert {
                    let map = heap.get_root(map_root);
                    let removed = GcHashMap::remove(&mut heap, map, int(key), hash_int, equal_int).unwrap();
                    prop_assert_eq!(removed.map(GcBox::get), model.remove(&key).then(|| int(key)));
                }
                let map = heap.get_root(map_root);
                prop_assert_eq!(GcHashMap::len(map), model.len());
                assert_load_factor(map);
            }

            let map = heap.get_root(map_root);
            for key in 0..48 {
                let found = GcHashMap::get(&heap, map, int(key), hash_int, equal_int);
                prop_assert_eq!(found.map(GcBox::get), model.contains(&key).then(|| int(key)));
            }
        }

        /// 0 inserts, 1 removes, 2 lets the key die and collects.
        #[test]
        fn prop_weak_load_factor_with_cleared_keys(
            ops in proptest::collection::vec((0u8..3, 0isize..32), 1..150),
            gc_always in any::<bool>(),
        ) {
            let mut heap = heap(gc_always);
            let map = GcHashMap::new(&mut heap, true).unwrap();
            let map_root = heap.add_root(map);
            let mut model = HashMap::new();

            for (op, key) in ops {
                match op {
                    0 if !model.contains_key(&key) => {
                        let boxed = GcBox::new(&mut heap, int(key)).unwrap();
                        let root = heap.add_root(boxed);
                        let map = heap.get_root(map_root);
                        GcHashMap::insert(&mut heap, map, boxed, int(key), hash_boxed).unwrap();
                        model.insert(key, root);
                    }
                    1 => {
                        let probe = GcBox::new(&mut heap, int(key)).unwrap();
                        let map = heap.get_root(map_root);
                        let removed = GcHashMap::remove(&mut heap, map, probe, hash_boxed, equal_boxed).unwrap();
                        let expected = model.remove(&key).map(|root| {
                            heap.remove_root(root);
                            int(key)
                        });
                        prop_assert_eq!(removed, expected);
                    }
                    2 => {
                        if let Some(root) = model.remove(&key) {
                            heap.remove_root(root);
                        }
                        heap.gc();
                    }
                    _ => {}
                }
                let map = heap.get_root(map_root);
                assert_load_factor(map);
                prop_assert!(GcHashMap::len(map) >= model.len());
                let mut live = 0;
                GcHashMap::for_each(map, |_, _| live += 1);
                prop_assert_eq!(live, model.len());
            }

            let map = heap.get_root(map_root);
            for (key, root) in &model {
                let boxed = heap.get_root(*root);
                prop_assert_eq!(
                    GcHashMap::get(&heap, map, boxed, hash_boxed, equal_boxed),
                    Some(int(*key))
                );
            }
        }
    }
}
