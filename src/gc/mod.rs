use mmap_rs::MmapOptions;
use nanoserde::{DeJson, SerJson};

pub mod compacting;
pub mod debug_trace;
pub mod heap_dump;

#[derive(Debug, Clone, Copy)]
pub struct AllocatorOptions {
    /// When false the heap only ever grows; nothing is collected or moved.
    pub gc: bool,
    pub print_stats: bool,
    /// Run a full collection before every allocation.
    pub gc_always: bool,
    /// Size of each mmap'd segment of a semispace.
    pub segment_bytes: usize,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            gc: true,
            print_stats: false,
            gc_always: false,
            segment_bytes: MmapOptions::page_size() * 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SerJson, DeJson)]
pub struct GcStats {
    pub allocations: usize,
    pub collections: usize,
    pub bytes_copied: usize,
    pub weak_references_cleared: usize,
    pub barrier_hits: usize,
    pub heap_grows: usize,
}
