pub mod collections;
pub mod gc;
pub mod heap;
pub mod types;

pub use heap::Heap;
