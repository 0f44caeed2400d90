//! Collector-aware collections.
//!
//! Everything here lives on the heap in [`crate::heap::Heap`] and has to
//! stay correct while any allocation may run a full, moving collection.
//! The rooting pieces ([`RootSet`], [`HandleScope`], [`GcHandle`]) are what
//! the structures use to get through those collections; [`Tree`] and
//! [`GcHashMap`] are the structures themselves.

mod gc_box;
mod gc_handle;
mod handle_arena;
pub mod hash_map;
pub mod path_list;
pub mod root_set;
pub mod tree;
pub mod type_ids;
pub mod weak_reference;

pub use gc_box::GcBox;
pub use gc_handle::GcHandle;
pub use handle_arena::{Handle, HandleScope};
pub use hash_map::GcHashMap;
pub use path_list::{PathList, Zone};
pub use root_set::{RootIdx, RootSet};
pub use tree::Tree;
pub use type_ids::*;
pub use weak_reference::WeakReference;
