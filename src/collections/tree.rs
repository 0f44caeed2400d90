//! Persistent red-black tree on the collected heap.
//!
//! Insertion never touches a node reachable from the tree it was given.
//! It clones the root-to-leaf spine, grafts the new node onto the clone and
//! rebalances only cloned nodes, so every older root keeps describing the
//! same tree.
//!
//! # Structure
//!
//! ```text
//! TreeNode (3 fields):
//!   [0] value - caller's value; bit 0 is the colour (1 = red)
//!   [1] left  - child node or the sentinel
//!   [2] right - child node or the sentinel
//! ```
//!
//! Every tag leaves bit 0 clear, so the colour can live in the value word.
//! Readers mask it off and writers put it back after each store. The
//! collector does the same when it relocates the value.
//!
//! "No child" is a caller-supplied sentinel node: black, null value, both
//! children pointing at itself. An empty tree is just the sentinel.
//!
//! # GC Safety
//!
//! Each clone allocates, so every node an insertion still needs is held in
//! a scope handle, and the ancestor chain is a [`PathList`] of handles.
//! Raw addresses are only compared or stored between two allocations.

use std::cmp::Ordering;
use std::error::Error;

use crate::gc::debug_trace::{self, TraceEventKind};
use crate::heap::Heap;
use crate::types::BuiltInTypes;

use super::gc_handle::GcHandle;
use super::handle_arena::{Handle, HandleScope};
use super::path_list::{PathList, Zone};
use super::type_ids::TYPE_ID_TREE_NODE;

pub const FIELD_VALUE: usize = 0;
pub const FIELD_LEFT: usize = 1;
pub const FIELD_RIGHT: usize = 2;

pub const RED_BIT: usize = 1;

/// Deepest descent tolerated before the tree is declared corrupt. A
/// balanced tree of any size that fits in memory stays far below this.
pub const MAX_PROBE_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn field(self) -> usize {
        match self {
            Side::Left => FIELD_LEFT,
            Side::Right => FIELD_RIGHT,
        }
    }

    fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// State of one insertion between descent and rebalancing.
struct TreeContext {
    /// Clone of the old root.
    root: Handle,
    /// Clone standing where the key belongs.
    node: Handle,
    /// Cloned ancestors of `node`, parent first.
    ancestors: PathList,
    fresh: bool,
}

pub struct Tree;

impl Tree {
    /// Allocate a sentinel for a family of trees.
    pub fn make_sentinel(heap: &mut Heap) -> Result<usize, Box<dyn Error>> {
        let sentinel = heap.allocate(3, TYPE_ID_TREE_NODE)?;
        heap.set_field_with_barrier(sentinel, FIELD_LEFT, sentinel);
        heap.set_field_with_barrier(sentinel, FIELD_RIGHT, sentinel);
        Ok(sentinel)
    }

    pub fn value(node: usize) -> usize {
        GcHandle::from_tagged(node).get_field(FIELD_VALUE) & !RED_BIT
    }

    pub fn left(node: usize) -> usize {
        GcHandle::from_tagged(node).get_field(FIELD_LEFT)
    }

    pub fn right(node: usize) -> usize {
        GcHandle::from_tagged(node).get_field(FIELD_RIGHT)
    }

    fn child(node: usize, side: Side) -> usize {
        GcHandle::from_tagged(node).get_field(side.field())
    }

    pub fn is_red(node: usize) -> bool {
        GcHandle::from_tagged(node).get_field(FIELD_VALUE) & RED_BIT != 0
    }

    /// The colour is not a reference, so it bypasses the barrier.
    fn set_red(node: usize, red: bool) {
        let node = GcHandle::from_tagged(node);
        let raw = node.get_field(FIELD_VALUE);
        if red {
            node.set_field(FIELD_VALUE, raw | RED_BIT);
        } else {
            node.set_field(FIELD_VALUE, raw & !RED_BIT);
        }
    }

    fn set_value(heap: &mut Heap, node: usize, value: usize) {
        let colour = GcHandle::from_tagged(node).get_field(FIELD_VALUE) & RED_BIT;
        heap.set_field_with_barrier(node, FIELD_VALUE, value);
        Self::set_red(node, colour != 0);
    }

    fn set_child(heap: &mut Heap, node: usize, side: Side, child: usize) {
        heap.set_field_with_barrier(node, side.field(), child);
    }

    fn side_of(parent: usize, child: usize) -> Side {
        if Self::left(parent) == child {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Fresh copy of `node`, colour included.
    fn clone_node(scope: &mut HandleScope<'_>, node: Handle) -> Result<Handle, Box<dyn Error>> {
        let copy = scope.allocate(3, TYPE_ID_TREE_NODE)?;
        let source = GcHandle::from_tagged(scope.get(node));
        let dest = GcHandle::from_tagged(scope.get(copy));
        source.copy_fields_to(&dest, 3);
        Ok(copy)
    }

    /// Rotate a cloned `node` so that a clone of its child on side `lift`
    /// takes its place. Returns the lifted clone; the caller relinks it.
    fn rotate(
        scope: &mut HandleScope<'_>,
        node: Handle,
        lift: Side,
    ) -> Result<Handle, Box<dyn Error>> {
        let child = scope.alloc(Self::child(scope.get(node), lift));
        let lifted = Self::clone_node(scope, child)?;
        let node_ptr = scope.get(node);
        let lifted_ptr = scope.get(lifted);
        Self::set_child(
            scope.heap(),
            node_ptr,
            lift,
            Self::child(lifted_ptr, lift.opposite()),
        );
        Self::set_child(scope.heap(), lifted_ptr, lift.opposite(), node_ptr);
        Ok(lifted)
    }

    fn find_node<K, F>(heap: &Heap, tree: usize, key: K, sentinel: usize, compare: &F) -> Option<usize>
    where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        let mut node = tree;
        while node != sentinel {
            match compare(heap, key, Self::value(node)) {
                Ordering::Less => node = Self::left(node),
                Ordering::Greater => node = Self::right(node),
                Ordering::Equal => return Some(node),
            }
        }
        None
    }

    /// Look `key` up. Allocation free, so nothing needs rooting.
    pub fn query<K, F>(heap: &Heap, tree: usize, key: K, sentinel: usize, compare: F) -> Option<usize>
    where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        Self::find_node(heap, tree, key, sentinel, &compare).map(Self::value)
    }

    /// Return a new root holding everything in `tree` plus `value` under
    /// `key`. `tree` itself is left exactly as it was.
    ///
    /// `key` is handed to `compare` as is and is never rooted, so it must
    /// not be a heap reference. `tree`, `value` and `sentinel` are rooted
    /// for the duration of the call.
    ///
    /// # Panics
    /// Panics if `key` is already present, or if the descent goes deeper
    /// than [`MAX_PROBE_DEPTH`].
    pub fn insert<K, F>(
        heap: &mut Heap,
        zone: &mut Zone,
        tree: usize,
        key: K,
        value: usize,
        sentinel: usize,
        compare: F,
    ) -> Result<usize, Box<dyn Error>>
    where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        let checkpoint = zone.checkpoint();
        let result = Self::insert_in_zone(heap, zone, tree, key, value, sentinel, &compare);
        zone.rollback(checkpoint);
        result
    }

    fn insert_in_zone<K, F>(
        heap: &mut Heap,
        zone: &mut Zone,
        tree: usize,
        key: K,
        value: usize,
        sentinel: usize,
        compare: &F,
    ) -> Result<usize, Box<dyn Error>>
    where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        let allocations_before = heap.stats().allocations;
        let mut scope = HandleScope::new(heap);
        let tree_h = scope.alloc(tree);
        let value_h = scope.alloc(value);
        let sentinel_h = scope.alloc(sentinel);

        let context = Self::descend(&mut scope, zone, tree_h, key, sentinel_h, compare)?;
        assert!(context.fresh, "Key already present in tree; use update");

        let node = scope.get(context.node);
        let value = scope.get(value_h);
        Self::set_value(scope.heap(), node, value);

        let root = Self::rebalance(&mut scope, zone, context)?;
        debug_trace::record(TraceEventKind::TreeInsert {
            fresh_nodes: scope.heap_ref().stats().allocations - allocations_before,
        });
        Ok(scope.get(root))
    }

    /// Walk from the root towards `key`, cloning every node visited and
    /// linking each clone under the previous one. Reaching the sentinel
    /// leaves a clone of the sentinel (black, self-linked children) where
    /// the key belongs.
    fn descend<K, F>(
        scope: &mut HandleScope<'_>,
        zone: &mut Zone,
        tree: Handle,
        key: K,
        sentinel: Handle,
        compare: &F,
    ) -> Result<TreeContext, Box<dyn Error>>
    where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        let root = Self::clone_node(scope, tree)?;
        let old = scope.alloc(scope.get(tree));
        let mut new = root;
        let mut ancestors = PathList::empty();
        let mut depth = 0;

        while scope.get(old) != scope.get(sentinel) {
            ancestors = ancestors.push(zone, new);

            let side = match compare(scope.heap_ref(), key, Self::value(scope.get(old))) {
                Ordering::Less => Side::Left,
                Ordering::Greater => Side::Right,
                Ordering::Equal => {
                    return Ok(TreeContext {
                        root,
                        node: new,
                        ancestors: ancestors.next(zone),
                        fresh: false,
                    });
                }
            };

            let next = Self::child(scope.get(old), side);
            scope.set(old, next);
            let copy = Self::clone_node(scope, old)?;
            let parent = scope.get(new);
            let child = scope.get(copy);
            Self::set_child(scope.heap(), parent, side, child);
            new = copy;

            depth += 1;
            if depth > MAX_PROBE_DEPTH {
                panic!(
                    "Tree descent passed {} levels; the tree is corrupt",
                    MAX_PROBE_DEPTH
                );
            }
        }

        Ok(TreeContext {
            root,
            node: new,
            ancestors,
            fresh: true,
        })
    }

    /// Bottom-up red-black repair over the cloned spine.
    fn rebalance(
        scope: &mut HandleScope<'_>,
        zone: &mut Zone,
        context: TreeContext,
    ) -> Result<Handle, Box<dyn Error>> {
        let TreeContext {
            mut root,
            node,
            mut ancestors,
            ..
        } = context;
        let mut current = node;
        Self::set_red(scope.get(current), true);

        while !ancestors.is_empty() && Self::is_red(scope.get(ancestors.item(zone))) {
            // A red parent is never the root, so the grandparent exists.
            let parent = ancestors.item(zone);
            let grandparent = ancestors.next(zone).item(zone);
            let side = Self::side_of(scope.get(grandparent), scope.get(parent));
            let uncle = Self::child(scope.get(grandparent), side.opposite());

            if Self::is_red(uncle) {
                // Recolour. The uncle is shared with the old tree, so it is
                // cloned before its colour changes.
                Self::set_red(scope.get(parent), false);
                let uncle = scope.alloc(uncle);
                let uncle = Self::clone_node(scope, uncle)?;
                let grandparent_ptr = scope.get(grandparent);
                let uncle_ptr = scope.get(uncle);
                Self::set_child(scope.heap(), grandparent_ptr, side.opposite(), uncle_ptr);
                Self::set_red(uncle_ptr, false);
                Self::set_red(grandparent_ptr, true);

                current = grandparent;
                ancestors = ancestors.next(zone).next(zone);
                continue;
            }

            if scope.get(current) == Self::child(scope.get(parent), side.opposite()) {
                // Inner grandchild: turn it into an outer one first.
                current = parent;
                ancestors = ancestors.next(zone);
                let lifted = Self::rotate(scope, current, side.opposite())?;
                let holder = scope.get(ancestors.item(zone));
                let current_side = Self::side_of(holder, scope.get(current));
                let lifted_ptr = scope.get(lifted);
                Self::set_child(scope.heap(), holder, current_side, lifted_ptr);
                ancestors = ancestors.push(zone, lifted);
            }

            let parent = ancestors.item(zone);
            let grandparent = ancestors.next(zone).item(zone);
            Self::set_red(scope.get(parent), false);
            Self::set_red(scope.get(grandparent), true);

            let lifted = Self::rotate(scope, grandparent, side)?;
            let above = ancestors.next(zone).next(zone);
            if above.is_empty() {
                root = lifted;
            } else {
                let holder = scope.get(above.item(zone));
                let grandparent_side = Self::side_of(holder, scope.get(grandparent));
                let lifted_ptr = scope.get(lifted);
                Self::set_child(scope.heap(), holder, grandparent_side, lifted_ptr);
            }
            // The parent's slot is now black, which ends the loop.
        }

        Self::set_red(scope.get(root), false);
        Ok(root)
    }

    /// Overwrite the value stored under `key` in place. The node keeps its
    /// colour. Nodes are shared between versions, so every tree that
    /// reaches this node sees the new value.
    ///
    /// # Panics
    /// Panics if `key` is absent.
    pub fn update<K, F>(
        heap: &mut Heap,
        tree: usize,
        key: K,
        value: usize,
        sentinel: usize,
        compare: F,
    ) where
        K: Copy,
        F: Fn(&Heap, K, usize) -> Ordering,
    {
        let node = Self::find_node(heap, tree, key, sentinel, &compare)
            .unwrap_or_else(|| panic!("Key not present in tree; use insert"));
        Self::set_value(heap, node, value);
    }

    /// Visit every value in key order. Does not allocate.
    pub fn for_each_in_order(tree: usize, sentinel: usize, mut f: impl FnMut(usize)) {
        let mut stack = Vec::new();
        let mut node = tree;
        loop {
            while node != sentinel {
                stack.push(node);
                node = Self::left(node);
            }
            match stack.pop() {
                Some(top) => {
                    f(Self::value(top));
                    node = Self::right(top);
                }
                None => break,
            }
        }
    }

    pub fn len(tree: usize, sentinel: usize) -> usize {
        let mut count = 0;
        Self::for_each_in_order(tree, sentinel, |_| count += 1);
        count
    }

    /// Check the red-black rules. Returns the black height, counting the
    /// sentinel, or a description of the first violation found.
    pub fn check_invariants(tree: usize, sentinel: usize) -> Result<usize, String> {
        if Self::is_red(sentinel) {
            return Err("sentinel is red".to_string());
        }
        if Self::is_red(tree) {
            return Err("root is red".to_string());
        }
        Self::black_height(tree, sentinel, 0)
    }

    fn black_height(node: usize, sentinel: usize, depth: usize) -> Result<usize, String> {
        if node == sentinel {
            return Ok(1);
        }
        if depth > MAX_PROBE_DEPTH {
            return Err(format!("deeper than {} levels", MAX_PROBE_DEPTH));
        }
        if !BuiltInTypes::is_heap_pointer(node) {
            return Err(format!("child {:#x} is not a node", node));
        }
        let left = Self::left(node);
        let right = Self::right(node);
        if Self::is_red(node) && (Self::is_red(left) || Self::is_red(right)) {
            return Err(format!("red node {:#x} has a red child", node));
        }
        let left_height = Self::black_height(left, sentinel, depth + 1)?;
        let right_height = Self::black_height(right, sentinel, depth + 1)?;
        if left_height != right_height {
            return Err(format!(
                "black heights differ under {:#x}: {} vs {}",
                node, left_height, right_height
            ));
        }
        Ok(left_height + usize::from(!Self::is_red(node)))
    }
}
