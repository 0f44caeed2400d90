use std::error::Error;
use std::mem;

use mmap_rs::{MmapMut, MmapOptions};

use crate::collections::type_ids::{TYPE_ID_TREE_NODE, TYPE_ID_WEAK_REFERENCE};
use crate::collections::{tree, weak_reference};
use crate::types::{BuiltInTypes, HeapObject, Word};

use super::GcStats;

struct Segment {
    memory: MmapMut,
    offset: usize,
    size: usize,
    memory_range: std::ops::Range<*const u8>,
}

impl Segment {
    fn new(size: usize) -> Result<Self, Box<dyn Error>> {
        let size = size.next_multiple_of(MmapOptions::page_size());
        let memory = MmapOptions::new(size)?.map_mut()?;
        let memory_range = memory.as_ptr_range();
        Ok(Self {
            memory,
            offset: 0,
            size,
            memory_range,
        })
    }

    fn fits(&self, bytes: usize) -> bool {
        self.offset + bytes <= self.size
    }
}

struct Space {
    segments: Vec<Segment>,
    segment_offset: usize,
    segment_size: usize,
}

impl Space {
    fn new(segment_size: usize) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            segments: vec![Segment::new(segment_size)?],
            segment_offset: 0,
            segment_size,
        })
    }

    fn contains(&self, pointer: *const u8) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.memory_range.contains(&pointer))
    }

    /// True if `bytes` fit in the current segment or in one of the
    /// already mapped segments after it.
    fn can_allocate(&self, bytes: usize) -> bool {
        self.segments[self.segment_offset..]
            .iter()
            .any(|segment| segment.fits(bytes))
    }

    /// Bump-allocate `bytes`, moving on to later segments and mapping a new
    /// one if nothing mapped has room.
    fn bump(&mut self, bytes: usize) -> Result<*mut u8, Box<dyn Error>> {
        while !self.segments[self.segment_offset].fits(bytes) {
            self.segment_offset += 1;
            if self.segment_offset == self.segments.len() {
                self.segments
                    .push(Segment::new(self.segment_size.max(bytes))?);
            }
        }
        let segment = &mut self.segments[self.segment_offset];
        let pointer = unsafe { segment.memory.as_mut_ptr().add(segment.offset) };
        segment.offset += bytes;
        debug_assert!(segment.offset % 8 == 0, "Heap offset is not aligned");
        Ok(pointer)
    }

    fn allocate(&mut self, words: Word, type_id: u8) -> Result<usize, Box<dyn Error>> {
        let full_size = words.to_bytes() + HeapObject::HEADER_SIZE;
        let pointer = self.bump(full_size)?;
        let mut object = HeapObject::from_untagged(pointer);
        object.write_header(type_id, words);
        let null = BuiltInTypes::null_value() as usize;
        for field in object.get_fields_mut() {
            *field = null;
        }
        Ok(object.tagged_pointer())
    }

    fn copy_data_to_offset(&mut self, data: &[u8]) -> Result<usize, Box<dyn Error>> {
        let pointer = self.bump(data.len())?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), pointer, data.len()) };
        Ok(pointer as usize)
    }

    /// Make sure a mapped segment can hold `bytes`, adding segments
    /// after the current one.
    fn resize(&mut self, bytes: usize) -> Result<(), Box<dyn Error>> {
        if self.can_allocate(bytes) {
            return Ok(());
        }
        self.segments
            .push(Segment::new(self.segment_size.max(bytes))?);
        Ok(())
    }

    fn clear(&mut self) {
        for segment in self.segments.iter_mut() {
            segment.offset = 0;
        }
        self.segment_offset = 0;
    }

    fn bytes_used(&self) -> usize {
        self.segments.iter().map(|segment| segment.offset).sum()
    }

    fn bytes_mapped(&self) -> usize {
        self.segments.iter().map(|segment| segment.size).sum()
    }

    fn objects(&self) -> impl Iterator<Item = HeapObject> + '_ {
        self.segments.iter().flat_map(|segment| {
            let base = segment.memory.as_ptr();
            let mut offset = 0;
            std::iter::from_fn(move || {
                if offset >= segment.offset {
                    return None;
                }
                let object = HeapObject::from_untagged(unsafe { base.add(offset) });
                offset += object.full_size();
                Some(object)
            })
        })
    }
}

/// Semispace copying collector. Every collection moves every live object,
/// which is exactly the hazard the collections in this crate are written
/// against.
pub struct CompactingHeap {
    from_space: Space,
    to_space: Space,
}

impl CompactingHeap {
    pub fn new(segment_bytes: usize) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            from_space: Space::new(segment_bytes)?,
            to_space: Space::new(segment_bytes)?,
        })
    }

    pub fn can_allocate(&self, words: Word) -> bool {
        self.from_space
            .can_allocate(words.to_bytes() + HeapObject::HEADER_SIZE)
    }

    pub fn allocate(&mut self, words: Word, type_id: u8) -> Result<usize, Box<dyn Error>> {
        self.from_space.allocate(words, type_id)
    }

    pub fn grow(&mut self, words: Word) -> Result<(), Box<dyn Error>> {
        self.from_space
            .resize(words.to_bytes() + HeapObject::HEADER_SIZE)
    }

    pub fn contains(&self, tagged: usize) -> bool {
        BuiltInTypes::is_heap_pointer(tagged)
            && self
                .from_space
                .contains(BuiltInTypes::untag(tagged) as *const u8)
    }

    pub fn bytes_used(&self) -> usize {
        self.from_space.bytes_used()
    }

    pub fn bytes_mapped(&self) -> usize {
        self.from_space.bytes_mapped() + self.to_space.bytes_mapped()
    }

    pub fn objects(&self) -> impl Iterator<Item = HeapObject> + '_ {
        self.from_space.objects()
    }

    /// Copy everything reachable from `roots` into the other space and
    /// flip. Root slots are rewritten in place. The weak-reference list
    /// starting at `weak_head` is not traced; it is rebuilt afterwards with
    /// the surviving weak references only.
    pub fn gc(&mut self, roots: &mut [usize], weak_head: &mut usize, stats: &mut GcStats) {
        for root in roots.iter_mut() {
            *root = unsafe { self.copy(*root) };
        }

        unsafe { self.scan_to_space() };
        stats.bytes_copied += self.to_space.bytes_used();
        stats.weak_references_cleared += self.process_weak_references(weak_head);

        mem::swap(&mut self.from_space, &mut self.to_space);
        self.to_space.clear();
    }

    unsafe fn scan_to_space(&mut self) {
        let mut segment_index = 0;
        let mut offset = 0;
        while segment_index < self.to_space.segments.len() {
            let segment = &self.to_space.segments[segment_index];
            if offset >= segment.offset {
                if segment_index >= self.to_space.segment_offset {
                    break;
                }
                segment_index += 1;
                offset = 0;
                continue;
            }
            let mut object =
                HeapObject::from_untagged(unsafe { segment.memory.as_ptr().add(offset) });
            offset += object.full_size();

            match object.get_type_id() {
                TYPE_ID_WEAK_REFERENCE => {}
                TYPE_ID_TREE_NODE => {
                    let raw = object.get_field(tree::FIELD_VALUE);
                    let colour = raw & tree::RED_BIT;
                    let moved = unsafe { self.copy(raw & !tree::RED_BIT) };
                    object.write_field(tree::FIELD_VALUE, moved | colour);
                    for index in [tree::FIELD_LEFT, tree::FIELD_RIGHT] {
                        let moved = unsafe { self.copy(object.get_field(index)) };
                        object.write_field(index, moved);
                    }
                }
                _ => {
                    for datum in object.get_fields_mut() {
                        *datum = unsafe { self.copy(*datum) };
                    }
                }
            }
        }
    }

    unsafe fn copy(&mut self, value: usize) -> usize {
        if !BuiltInTypes::is_heap_pointer(value) {
            return value;
        }
        let heap_object = HeapObject::from_tagged(value);
        if let Some(forwarded) = heap_object.forwarded_to() {
            return forwarded;
        }
        debug_assert!(
            self.from_space.contains(heap_object.get_pointer()),
            "Reference {:#x} points outside the heap",
            value
        );
        let data = heap_object.get_full_object_data();
        let new_pointer = self
            .to_space
            .copy_data_to_offset(data)
            .unwrap_or_else(|e| panic!("Out of memory while copying live objects: {}", e));
        debug_assert!(new_pointer % 8 == 0, "Pointer is not aligned");
        let tagged_new = BuiltInTypes::HeapObject.tag(new_pointer as isize) as usize;
        heap_object.forward_to(tagged_new);
        tagged_new
    }

    /// Runs after tracing, so an object is live exactly when it has been
    /// forwarded. Returns the number of targets cleared.
    fn process_weak_references(&self, weak_head: &mut usize) -> usize {
        let null = BuiltInTypes::null_value() as usize;
        let mut survivors = Vec::new();
        let mut cleared = 0;
        let mut current = *weak_head;
        while BuiltInTypes::is_heap_pointer(current) {
            let old = HeapObject::from_tagged(current);
            match old.forwarded_to() {
                Some(moved) => {
                    let weak = HeapObject::from_tagged(moved);
                    let target = weak.get_field(weak_reference::FIELD_TARGET);
                    if BuiltInTypes::is_heap_pointer(target) {
                        match HeapObject::from_tagged(target).forwarded_to() {
                            Some(new_target) => {
                                weak.write_field(weak_reference::FIELD_TARGET, new_target)
                            }
                            None => {
                                weak.write_field(weak_reference::FIELD_TARGET, null);
                                cleared += 1;
                            }
                        }
                    }
                    current = weak.get_field(weak_reference::FIELD_VM_NEXT);
                    survivors.push(moved);
                }
                // The weak reference itself died; its old copy is intact.
                None => current = old.get_field(weak_reference::FIELD_VM_NEXT),
            }
        }

        let mut head = null;
        for weak in survivors.iter().rev() {
            HeapObject::from_tagged(*weak).write_field(weak_reference::FIELD_VM_NEXT, head);
            head = *weak;
        }
        *weak_head = head;
        cleared
    }
}
