//! Ancestor chains for tree operations.
//!
//! A [`PathList`] is a cons-list of root handles, most recent first, living
//! in a caller-supplied [`Zone`]. The zone is ordinary Rust memory; the
//! collector never sees it. What keeps the recorded nodes alive and up to
//! date is that every item is a [`Handle`] in the operation's scope.
//!
//! Nodes are only ever prepended. Popping is just moving to `next`, and the
//! whole chain is thrown away by rolling the zone back once the operation
//! returns.

use safe_bump::{Checkpoint, Idx, SharedArena};

use super::handle_arena::Handle;

pub struct PathNode {
    item: Handle,
    next: Option<Idx<PathNode>>,
}

/// Arena that owns the path nodes of one or more tree operations.
pub struct Zone {
    nodes: SharedArena<PathNode>,
}

impl Zone {
    pub fn new() -> Self {
        Self {
            nodes: SharedArena::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn checkpoint(&self) -> Checkpoint<PathNode> {
        self.nodes.checkpoint()
    }

    /// Discard every node allocated since `checkpoint`. Any path list
    /// built after it must not be used again.
    pub fn rollback(&mut self, checkpoint: Checkpoint<PathNode>) {
        self.nodes.rollback(checkpoint);
    }
}

impl Default for Zone {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
pub struct PathList {
    head: Option<Idx<PathNode>>,
}

impl PathList {
    pub fn empty() -> Self {
        Self { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push(self, zone: &mut Zone, item: Handle) -> Self {
        let node = zone.nodes.alloc(PathNode {
            item,
            next: self.head,
        });
        Self { head: Some(node) }
    }

    /// The most recently pushed item.
    ///
    /// # Panics
    /// Panics on an empty list; a tree operation only asks for ancestors
    /// that the red-black rules guarantee exist.
    pub fn item(&self, zone: &Zone) -> Handle {
        match self.head {
            Some(idx) => zone.nodes.get(idx).item,
            None => panic!("Ancestor list exhausted"),
        }
    }

    /// Everything but the head. The tail of an empty list is empty.
    pub fn next(&self, zone: &Zone) -> Self {
        Self {
            head: self.head.and_then(|idx| zone.nodes.get(idx).next),
        }
    }

    pub fn len(&self, zone: &Zone) -> usize {
        let mut count = 0;
        let mut current = *self;
        while !current.is_empty() {
            count += 1;
            current = current.next(zone);
        }
        count
    }
}
