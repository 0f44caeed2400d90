//! Heap dump mechanism for GC debugging
//!
//! Captures a snapshot of:
//! - Every object in the live half of the heap
//! - All root slots
//! - The weak-reference list
//! - Collector statistics
//!
//! Dumps are saved as JSON for easy exploration and diffing.

use std::error::Error;
use std::fs::File;
use std::io::Write;

use nanoserde::{DeJson, SerJson};

use crate::collections::type_ids::{TYPE_ID_TREE_NODE, type_name};
use crate::collections::{tree, weak_reference};
use crate::heap::Heap;
use crate::types::{BuiltInTypes, HeapObject};

use super::GcStats;

#[derive(Debug, Clone, SerJson, DeJson)]
pub struct HeapDump {
    pub stats: GcStats,
    pub bytes_used: usize,
    pub bytes_mapped: usize,
    pub roots: Vec<String>,
    pub weak_references: Vec<WeakSnapshot>,
    pub objects: Vec<ObjectSnapshot>,
}

#[derive(Debug, Clone, SerJson, DeJson)]
pub struct ObjectSnapshot {
    /// Tagged pointer to this object
    pub tagged_ptr: String,
    pub type_id: u8,
    pub type_name: String,
    /// Size in bytes (including header)
    pub full_size: usize,
    pub fields: Vec<FieldSnapshot>,
}

#[derive(Debug, Clone, SerJson, DeJson)]
pub struct FieldSnapshot {
    pub index: usize,
    pub value: String,
    pub tag: String,
    pub is_heap_ptr: bool,
    /// Set on tree node value fields that carry the red bit.
    pub red: bool,
}

#[derive(Debug, Clone, SerJson, DeJson)]
pub struct WeakSnapshot {
    pub weak_ptr: String,
    /// None once the collector has cleared the target.
    pub target: Option<String>,
}

fn describe(value: usize) -> (String, String) {
    let tag = match value & BuiltInTypes::TAG_MASK {
        0b000 => "int",
        0b010 => "null",
        0b110 => "heap",
        _ => "invalid",
    };
    (format!("{:#x}", value), tag.to_string())
}

impl HeapDump {
    pub fn capture(heap: &Heap) -> Self {
        let objects = heap.objects().map(|object| snapshot_object(&object)).collect();

        let roots = heap
            .roots()
            .roots()
            .iter()
            .filter(|root| !BuiltInTypes::is_null(**root))
            .map(|root| format!("{:#x}", root))
            .collect();

        let mut weak_references = Vec::new();
        let mut current = heap.weak_references();
        while BuiltInTypes::is_heap_pointer(current) {
            let weak = HeapObject::from_tagged(current);
            let target = weak.get_field(weak_reference::FIELD_TARGET);
            weak_references.push(WeakSnapshot {
                weak_ptr: format!("{:#x}", current),
                target: (!BuiltInTypes::is_null(target)).then(|| format!("{:#x}", target)),
            });
            current = weak.get_field(weak_reference::FIELD_VM_NEXT);
        }

        HeapDump {
            stats: heap.stats(),
            bytes_used: heap.bytes_used(),
            bytes_mapped: heap.bytes_mapped(),
            roots,
            weak_references,
            objects,
        }
    }

    pub fn to_json(&self) -> String {
        self.serialize_json()
    }

    pub fn write_to_file(&self, path: &str) -> Result<(), Box<dyn Error>> {
        let mut file = File::create(path)?;
        file.write_all(self.to_json().as_bytes())?;
        Ok(())
    }
}

fn snapshot_object(object: &HeapObject) -> ObjectSnapshot {
    let type_id = object.get_type_id();
    let fields = object
        .get_fields()
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let red = type_id == TYPE_ID_TREE_NODE
                && index == tree::FIELD_VALUE
                && raw & tree::RED_BIT != 0;
            let value = if red { raw & !tree::RED_BIT } else { *raw };
            let (value_text, tag) = describe(value);
            FieldSnapshot {
                index,
                value: value_text,
                tag,
                is_heap_ptr: BuiltInTypes::is_heap_pointer(value),
                red,
            }
        })
        .collect();
    ObjectSnapshot {
        tagged_ptr: format!("{:#x}", object.tagged_pointer()),
        type_id,
        type_name: type_name(type_id).to_string(),
        full_size: object.full_size(),
        fields,
    }
}
