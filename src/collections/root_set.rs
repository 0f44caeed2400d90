//! RootSet - the slots the collector treats as roots.
//!
//! Every slot holds a managed reference. When the collector relocates an
//! object it rewrites the slot in place, so anything that remembers a slot
//! index (a [`RootIdx`] or a scope [`Handle`](super::Handle)) always reads
//! the current address. Released slots are recycled through a free list.

use crate::types::BuiltInTypes;

pub struct RootSet {
    roots: Vec<usize>,
    free: Vec<usize>,
}

/// Handle to a protected root - just an index into the RootSet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootIdx(pub(crate) usize);

impl RootSet {
    pub fn new() -> Self {
        RootSet {
            roots: Vec::with_capacity(16),
            free: Vec::new(),
        }
    }

    /// Protect a value from GC. Returns an index to retrieve it later.
    pub fn protect(&mut self, value: usize) -> RootIdx {
        match self.free.pop() {
            Some(idx) => {
                self.roots[idx] = value;
                RootIdx(idx)
            }
            None => {
                let idx = self.roots.len();
                self.roots.push(value);
                RootIdx(idx)
            }
        }
    }

    /// Release a slot. The slot is cleared so the collector stops
    /// retaining whatever it pointed to.
    pub fn release(&mut self, idx: RootIdx) {
        debug_assert!(!self.free.contains(&idx.0), "Root slot released twice");
        self.roots[idx.0] = BuiltInTypes::null_value() as usize;
        self.free.push(idx.0);
    }

    /// Get the current value at the given index.
    ///
    /// This may return a different pointer than was originally protected
    /// if GC has moved the object.
    pub fn get(&self, idx: RootIdx) -> usize {
        self.roots[idx.0]
    }

    pub fn set(&mut self, idx: RootIdx, value: usize) {
        self.roots[idx.0] = value;
    }

    /// Get a mutable slice of all roots for GC to update.
    pub fn roots_mut(&mut self) -> &mut [usize] {
        &mut self.roots
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Number of slots currently in use.
    pub fn len(&self) -> usize {
        self.roots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RootSet {
    fn default() -> Self {
        Self::new()
    }
}
