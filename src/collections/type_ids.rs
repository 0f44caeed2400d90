//! Type ID constants for objects allocated by this crate.
//!
//! Stored in byte 7 of every object header. The collector dispatches on them
//! to decide which fields are traced strongly, weakly, or with a packed bit.

/// Plain array of managed references (hash map bucket arrays).
pub const TYPE_ID_RAW_ARRAY: u8 = 1;

/// Small record of managed references owned by callers (payloads in tests
/// and the stress driver).
pub const TYPE_ID_BOX: u8 = 2;

/// Red-black tree node (3 fields: value with colour bit, left, right)
pub const TYPE_ID_TREE_NODE: u8 = 10;

/// Strong hash map (2 fields: array, size)
pub const TYPE_ID_HASH_MAP: u8 = 20;

/// Weak-keyed hash map (2 fields: array, size)
pub const TYPE_ID_WEAK_HASH_MAP: u8 = 21;

/// Bucket chain entry (3 fields: key, value, next)
pub const TYPE_ID_TRIPLE: u8 = 22;

/// Weak reference (2 fields: target, vm_next). Neither field is traced.
pub const TYPE_ID_WEAK_REFERENCE: u8 = 30;

pub fn type_name(type_id: u8) -> &'static str {
    match type_id {
        TYPE_ID_RAW_ARRAY => "array",
        TYPE_ID_BOX => "box",
        TYPE_ID_TREE_NODE => "tree-node",
        TYPE_ID_HASH_MAP => "hash-map",
        TYPE_ID_WEAK_HASH_MAP => "weak-hash-map",
        TYPE_ID_TRIPLE => "triple",
        TYPE_ID_WEAK_REFERENCE => "weak-reference",
        _ => "unknown",
    }
}
