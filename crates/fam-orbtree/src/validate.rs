//! Exhaustive structural validation.
//!
//! Walks every node of both orderings and checks links, colors, subtree
//! sizes, weight sums and in-order monotonicity. Used by tests after every
//! mutation.

use crate::node::{Order, NIL};
use crate::OrbTree;

/// A broken tree invariant found by [`OrbTree::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// A link points at a vacant arena slot
    #[error("{order} link reaches vacant node slot {node}")]
    Dangling {
        /// Ordering the link belongs to
        order: Order,
        /// Vacant slot index
        node: u32,
    },

    /// The root has a parent link
    #[error("{order} root {node} has a parent")]
    RootHasParent {
        /// Ordering
        order: Order,
        /// Root slot
        node: u32,
    },

    /// The root is red
    #[error("{order} root {node} is red")]
    RedRoot {
        /// Ordering
        order: Order,
        /// Root slot
        node: u32,
    },

    /// A child's parent link does not point back
    #[error("{order} node {node} has parent {found}, expected {expected}")]
    ParentLink {
        /// Ordering
        order: Order,
        /// Child slot
        node: u32,
        /// Actual parent
        expected: u32,
        /// Stored parent link
        found: u32,
    },

    /// A red node has a red child
    #[error("{order} node {node} is red under a red parent")]
    RedRed {
        /// Ordering
        order: Order,
        /// Red child
        node: u32,
    },

    /// Left and right black heights differ
    #[error("{order} node {node} has black heights {left} (left) and {right} (right)")]
    BlackHeight {
        /// Ordering
        order: Order,
        /// Node whose subtrees disagree
        node: u32,
        /// Left black height
        left: usize,
        /// Right black height
        right: usize,
    },

    /// Stored subtree sizes disagree with the actual subtrees
    #[error("{order} node {node} stores size {stored} but its subtree holds {actual}")]
    Size {
        /// Ordering
        order: Order,
        /// Node with stale sizes
        node: u32,
        /// `1 + left_size + right_size` as stored
        stored: usize,
        /// Counted subtree size
        actual: usize,
    },

    /// Stored subtree weight sums disagree with the actual subtrees
    #[error("{order} node {node} stores weight {stored} but its subtree sums to {actual}")]
    Weight {
        /// Ordering
        order: Order,
        /// Node with stale sums
        node: u32,
        /// Stored weight sum
        stored: u64,
        /// Counted weight sum
        actual: u64,
    },

    /// In-order traversal is not strictly increasing
    #[error("{order} in-order walk is not strictly increasing at node {node}")]
    OutOfOrder {
        /// Ordering
        order: Order,
        /// First node out of place
        node: u32,
    },

    /// The ordering does not reach every live node exactly once
    #[error("{order} ordering reaches {reached} nodes, tree holds {len}")]
    Count {
        /// Ordering
        order: Order,
        /// Nodes reached from the root
        reached: usize,
        /// Live arena nodes
        len: usize,
    },
}

struct Subtree {
    size: usize,
    weight: u64,
    black_height: usize,
}

impl<K: Ord, V> OrbTree<K, V> {
    /// Check every invariant of both orderings.
    pub fn validate(&self) -> Result<(), Violation> {
        for order in Order::ALL {
            let root = self.roots[order.idx()];
            if root != NIL {
                let node = self
                    .arena
                    .get(root)
                    .ok_or(Violation::Dangling { order, node: root })?;
                if node.link(order).parent != NIL {
                    return Err(Violation::RootHasParent { order, node: root });
                }
                if node.link(order).red {
                    return Err(Violation::RedRoot { order, node: root });
                }
            }
            let whole = self.check_subtree(order, root)?;
            if whole.size != self.len() {
                return Err(Violation::Count {
                    order,
                    reached: whole.size,
                    len: self.len(),
                });
            }
            self.check_in_order(order)?;
        }
        Ok(())
    }

    fn check_subtree(&self, order: Order, id: u32) -> Result<Subtree, Violation> {
        if id == NIL {
            return Ok(Subtree {
                size: 0,
                weight: 0,
                black_height: 1,
            });
        }
        let node = self
            .arena
            .get(id)
            .ok_or(Violation::Dangling { order, node: id })?;
        let l = *node.link(order);

        for child in [l.left, l.right] {
            if child == NIL {
                continue;
            }
            let c = self
                .arena
                .get(child)
                .ok_or(Violation::Dangling { order, node: child })?;
            let cl = c.link(order);
            if cl.parent != id {
                return Err(Violation::ParentLink {
                    order,
                    node: child,
                    expected: id,
                    found: cl.parent,
                });
            }
            if l.red && cl.red {
                return Err(Violation::RedRed { order, node: child });
            }
        }

        let left = self.check_subtree(order, l.left)?;
        let right = self.check_subtree(order, l.right)?;

        if left.size != l.left_size as usize || right.size != l.right_size as usize {
            return Err(Violation::Size {
                order,
                node: id,
                stored: 1 + l.left_size as usize + l.right_size as usize,
                actual: 1 + left.size + right.size,
            });
        }
        if left.weight != l.left_weight || right.weight != l.right_weight {
            return Err(Violation::Weight {
                order,
                node: id,
                stored: node
                    .weight
                    .saturating_add(l.left_weight)
                    .saturating_add(l.right_weight),
                actual: node
                    .weight
                    .saturating_add(left.weight)
                    .saturating_add(right.weight),
            });
        }
        if left.black_height != right.black_height {
            return Err(Violation::BlackHeight {
                order,
                node: id,
                left: left.black_height,
                right: right.black_height,
            });
        }

        Ok(Subtree {
            size: 1 + left.size + right.size,
            weight: node.weight + left.weight + right.weight,
            black_height: left.black_height + usize::from(!l.red),
        })
    }

    fn check_in_order(&self, order: Order) -> Result<(), Violation> {
        let mut prev = NIL;
        let mut id = self.minimum(order, self.roots[order.idx()]);
        let mut reached = 0usize;
        while id != NIL {
            if prev != NIL {
                let a = self.arena.node(prev);
                let b = self.arena.node(id);
                let increasing = match order {
                    Order::Ord => a.key < b.key,
                    Order::Seq => a.seq < b.seq,
                };
                if !increasing {
                    return Err(Violation::OutOfOrder { order, node: id });
                }
            }
            reached += 1;
            if reached > self.len() {
                break;
            }
            prev = id;
            id = self.successor(order, id);
        }
        if reached != self.len() {
            return Err(Violation::Count {
                order,
                reached,
                len: self.len(),
            });
        }
        Ok(())
    }
}
