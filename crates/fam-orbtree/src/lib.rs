//! Order-statistics red-black tree with two orderings per node
//!
//! Every entry lives in two balanced trees at once:
//! - the **ord** ordering, sorted by the caller's key, and
//! - the **seq** ordering, sorted by a sequence number assigned at insertion.
//!
//! Each ordering keeps left/right subtree sizes and weight sums per node, which
//! gives O(log n) rank queries (`get_index`, `nth`), weighted selection
//! (`pick_weighted`) and range counting alongside ordinary key lookup.
//!
//! Nodes live in an index arena and link to each other by `u32` index. The
//! tree never drops caller data on its own: removed or replaced entries are
//! always handed back.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod arena;
mod iter;
mod node;
mod rebalance;
mod validate;

pub use iter::Iter;
pub use node::{NodeId, Order};
pub use validate::Violation;

use arena::NodeArena;
use node::{Node, NIL};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Bound, RangeBounds};

/// Dual-ordering order-statistics tree.
pub struct OrbTree<K, V> {
    pub(crate) arena: NodeArena<K, V>,
    /// Root per ordering, indexed by `Order::idx`.
    pub(crate) roots: [u32; 2],
    next_seq: u64,
}

impl<K, V> OrbTree<K, V> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty tree with room for `capacity` nodes before the arena grows
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: NodeArena::with_capacity(capacity),
            roots: [NIL; 2],
            next_seq: 0,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if the tree holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all entry weights
    pub fn total_weight(&self) -> u64 {
        self.weight_sum(Order::Seq, self.roots[Order::Seq.idx()])
    }

    /// Largest weight one more entry may carry
    pub fn weight_headroom(&self) -> u64 {
        u64::MAX - self.total_weight()
    }

    /// Drop every entry and reset sequence numbering
    pub fn clear(&mut self) {
        self.arena.clear();
        self.roots = [NIL; 2];
        self.next_seq = 0;
    }

    /// Entry at position `index` of the seq ordering (insertion order).
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.entry(self.select(Order::Seq, index))
    }

    /// Remove the entry at position `index` of the seq ordering.
    pub fn remove_index(&mut self, index: usize) -> Option<(K, V)> {
        let id = self.select(Order::Seq, index);
        if id == NIL {
            return None;
        }
        Some(self.unlink(id))
    }

    /// Entry at position `index` of the ord ordering (key order).
    pub fn nth(&self, index: usize) -> Option<(&K, &V)> {
        self.entry(self.select(Order::Ord, index))
    }

    /// Smallest key
    pub fn first(&self) -> Option<(&K, &V)> {
        self.entry(self.minimum(Order::Ord, self.roots[Order::Ord.idx()]))
    }

    /// Largest key
    pub fn last(&self) -> Option<(&K, &V)> {
        self.entry(self.maximum(Order::Ord, self.roots[Order::Ord.idx()]))
    }

    /// Weighted selection over the seq ordering.
    ///
    /// Entries occupy consecutive intervals of width `weight` in insertion
    /// order; the entry whose interval contains `draw` is returned. Draws at
    /// or beyond [`total_weight`](Self::total_weight) select nothing.
    pub fn pick_weighted(&self, draw: u64) -> Option<(&K, &V)> {
        self.entry(self.pick_weighted_node(draw))
    }

    /// Like [`pick_weighted`](Self::pick_weighted), returning the node id.
    pub fn pick_weighted_id(&self, draw: u64) -> Option<NodeId> {
        let id = self.pick_weighted_node(draw);
        (id != NIL).then_some(NodeId(id))
    }

    fn pick_weighted_node(&self, mut draw: u64) -> u32 {
        let o = Order::Seq;
        let mut id = self.roots[o.idx()];
        while id != NIL {
            let node = self.arena.node(id);
            let l = node.link(o);
            if draw < l.left_weight {
                id = l.left;
                continue;
            }
            draw -= l.left_weight;
            if draw < node.weight {
                return id;
            }
            draw -= node.weight;
            id = l.right;
        }
        NIL
    }

    /// Key and value stored under `id`
    pub fn get_id(&self, id: NodeId) -> Option<(&K, &V)> {
        self.arena.get(id.0).map(|n| (&n.key, &n.value))
    }

    /// Mutable value stored under `id`. Keys cannot be changed in place.
    pub fn value_mut_id(&mut self, id: NodeId) -> Option<&mut V> {
        self.arena.get_mut(id.0).map(|n| &mut n.value)
    }

    /// Sequence number assigned to `id` when it was inserted
    pub fn seq_of_id(&self, id: NodeId) -> Option<u64> {
        self.arena.get(id.0).map(|n| n.seq)
    }

    /// Detach the entry stored under `id`.
    pub fn remove_id(&mut self, id: NodeId) -> Option<(K, V)> {
        self.arena.get(id.0)?;
        Some(self.unlink(id.0))
    }

    /// Iterate in key order
    pub fn iter(&self) -> Iter<'_, K, V> {
        let first = self.minimum(Order::Ord, self.roots[Order::Ord.idx()]);
        Iter::new(self, Order::Ord, first, self.len())
    }

    /// Iterate in insertion order
    pub fn iter_seq(&self) -> Iter<'_, K, V> {
        let first = self.minimum(Order::Seq, self.roots[Order::Seq.idx()]);
        Iter::new(self, Order::Seq, first, self.len())
    }

    fn entry(&self, id: u32) -> Option<(&K, &V)> {
        if id == NIL {
            return None;
        }
        let node = self.arena.node(id);
        Some((&node.key, &node.value))
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Remove `id` from both orderings and release its slot.
    fn unlink(&mut self, id: u32) -> (K, V) {
        self.detach(Order::Ord, id);
        self.detach(Order::Seq, id);
        let node = self.arena.free(id);
        (node.key, node.value)
    }

    fn append_seq(&mut self, id: u32) {
        let last = self.maximum(Order::Seq, self.roots[Order::Seq.idx()]);
        self.attach(Order::Seq, id, last, true);
    }
}

impl<K: Ord, V> OrbTree<K, V> {
    /// Look up `key` in the ord ordering
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_by(|k| k.cmp(key)).map(|(_, v)| v)
    }

    /// Mutable lookup by key
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let id = self.find(|k| k.cmp(key));
        self.arena.get_mut(id).map(|n| &mut n.value)
    }

    /// True if an entry with `key` exists
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(|k| k.cmp(key)) != NIL
    }

    /// Binary search with a caller comparator.
    ///
    /// `cmp` receives a stored key and reports how it orders relative to the
    /// target, like `slice::binary_search_by`.
    pub fn get_by<F>(&self, cmp: F) -> Option<(&K, &V)>
    where
        F: FnMut(&K) -> Ordering,
    {
        self.entry(self.find(cmp))
    }

    /// Node id of the entry stored under `key`
    pub fn entry_id(&self, key: &K) -> Option<NodeId> {
        let id = self.find(|k| k.cmp(key));
        (id != NIL).then_some(NodeId(id))
    }

    fn find<F>(&self, mut cmp: F) -> u32
    where
        F: FnMut(&K) -> Ordering,
    {
        let o = Order::Ord;
        let mut id = self.roots[o.idx()];
        while id != NIL {
            let node = self.arena.node(id);
            id = match cmp(&node.key) {
                Ordering::Less => node.link(o).right,
                Ordering::Greater => node.link(o).left,
                Ordering::Equal => return id,
            };
        }
        NIL
    }

    /// Insert with weight 1. An entry with an equal key is replaced and
    /// handed back.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        self.insert_entry(key, value, 1).1
    }

    /// Insert with an explicit lottery weight.
    ///
    /// # Panics
    /// If the total weight of the tree would exceed `u64::MAX`.
    /// [`weight_headroom`](Self::weight_headroom) tells how much fits.
    pub fn put_weighted(&mut self, key: K, value: V, weight: u64) -> Option<(K, V)> {
        self.insert_entry(key, value, weight).1
    }

    /// Insert and report the id the entry now lives under.
    ///
    /// A replaced entry keeps its ord position and slot, takes a fresh
    /// sequence number, and moves to the end of the seq ordering.
    pub fn insert_entry(&mut self, key: K, value: V, weight: u64) -> (NodeId, Option<(K, V)>) {
        let o = Order::Ord;
        let mut parent = NIL;
        let mut as_right = false;
        let mut id = self.roots[o.idx()];
        while id != NIL {
            let node = self.arena.node(id);
            match key.cmp(&node.key) {
                Ordering::Less => {
                    parent = id;
                    as_right = false;
                    id = node.link(o).left;
                }
                Ordering::Greater => {
                    parent = id;
                    as_right = true;
                    id = node.link(o).right;
                }
                Ordering::Equal => {
                    self.check_weight(node.weight, weight);
                    let replaced = self.replace(id, key, value, weight);
                    return (NodeId(id), Some(replaced));
                }
            }
        }

        self.check_weight(0, weight);
        let seq = self.bump_seq();
        let id = self.arena.alloc(Node::new(key, value, seq, weight));
        self.attach(o, id, parent, as_right);
        self.append_seq(id);
        (NodeId(id), None)
    }

    fn check_weight(&self, removed: u64, added: u64) {
        if added - removed.min(added) > self.weight_headroom() {
            panic!(
                "tree weight overflow: adding {} to a total of {}",
                added,
                self.total_weight()
            );
        }
    }

    fn replace(&mut self, id: u32, key: K, value: V, weight: u64) -> (K, V) {
        self.detach(Order::Seq, id);
        let seq = self.bump_seq();
        let node = self.arena.node_mut(id);
        let old_key = std::mem::replace(&mut node.key, key);
        let old_value = std::mem::replace(&mut node.value, value);
        node.weight = weight;
        node.seq = seq;
        // weight may have changed: refresh ancestor sums in the ord ordering
        self.pull_to_root(Order::Ord, id);
        self.append_seq(id);
        (old_key, old_value)
    }

    /// Remove by key
    pub fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let id = self.find(|k| k.cmp(key));
        if id == NIL {
            return None;
        }
        Some(self.unlink(id))
    }

    /// Position of `key` in the ord ordering
    pub fn rank(&self, key: &K) -> Option<usize> {
        let id = self.find(|k| k.cmp(key));
        (id != NIL).then(|| self.rank_of(Order::Ord, id))
    }

    /// Entry `offset` positions after `key` in key order.
    pub fn get_offset(&self, key: &K, offset: usize) -> Option<(&K, &V)> {
        let rank = self.rank(key)?;
        self.nth(rank.checked_add(offset)?)
    }

    /// Number of keys strictly below `key`, or at-or-below with `inclusive`.
    fn count_below(&self, key: &K, inclusive: bool) -> usize {
        let o = Order::Ord;
        let mut count = 0;
        let mut id = self.roots[o.idx()];
        while id != NIL {
            let node = self.arena.node(id);
            let l = node.link(o);
            let go_right = match node.key.cmp(key) {
                Ordering::Less => true,
                Ordering::Equal => inclusive,
                Ordering::Greater => false,
            };
            if go_right {
                count += l.left_size as usize + 1;
                id = l.right;
            } else {
                id = l.left;
            }
        }
        count
    }

    fn bound_ranks<R: RangeBounds<K>>(&self, range: &R) -> (usize, usize) {
        let start = match range.start_bound() {
            Bound::Unbounded => 0,
            Bound::Included(k) => self.count_below(k, false),
            Bound::Excluded(k) => self.count_below(k, true),
        };
        let end = match range.end_bound() {
            Bound::Unbounded => self.len(),
            Bound::Included(k) => self.count_below(k, true),
            Bound::Excluded(k) => self.count_below(k, false),
        };
        (start, end.max(start))
    }

    /// Number of keys inside `range`, in O(log n).
    pub fn count_range<R: RangeBounds<K>>(&self, range: R) -> usize {
        let (start, end) = self.bound_ranks(&range);
        end - start
    }

    /// Iterate the keys inside `range` in key order.
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Iter<'_, K, V> {
        let (start, end) = self.bound_ranks(&range);
        let first = self.select(Order::Ord, start);
        Iter::new(self, Order::Ord, first, end - start)
    }
}

impl<K, V> Default for OrbTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for OrbTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V> IntoIterator for &'a OrbTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
