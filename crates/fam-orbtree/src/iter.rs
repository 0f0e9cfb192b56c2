//! In-order iteration over either ordering.

use crate::node::{Order, NIL};
use crate::OrbTree;

/// Iterator over `(key, value)` pairs in one ordering.
///
/// Walks successor links, so a full pass is O(n) and each step is amortised
/// O(1).
pub struct Iter<'a, K, V> {
    tree: &'a OrbTree<K, V>,
    order: Order,
    next: u32,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(tree: &'a OrbTree<K, V>, order: Order, first: u32, remaining: usize) -> Self {
        Self {
            tree,
            order,
            next: first,
            remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.next == NIL {
            return None;
        }
        let tree = self.tree;
        let id = self.next;
        let node = tree.arena.node(id);
        self.next = tree.successor(self.order, id);
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
