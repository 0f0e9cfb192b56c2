//! Tree node layout
//!
//! A node sits in two red-black trees at once. Each ordering gets its own
//! [`Links`] record so rotations in one tree never disturb the other.

use std::fmt;

/// Sentinel index for an absent link.
pub(crate) const NIL: u32 = u32::MAX;

/// Which of the two orderings an operation applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Order {
    /// Ordered by the caller's key.
    Ord,
    /// Ordered by insertion sequence number.
    Seq,
}

impl Order {
    /// Both orderings, in link-array order.
    pub const ALL: [Order; 2] = [Order::Ord, Order::Seq];

    #[inline]
    pub(crate) fn idx(self) -> usize {
        match self {
            Order::Ord => 0,
            Order::Seq => 1,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Ord => f.write_str("ord"),
            Order::Seq => f.write_str("seq"),
        }
    }
}

/// Stable identifier of a node slot in the tree's arena.
///
/// Ids stay valid until the entry is removed; afterwards the slot may be
/// handed to a later insertion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-ordering links and subtree bookkeeping.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Links {
    pub parent: u32,
    pub left: u32,
    pub right: u32,
    pub left_size: u32,
    pub right_size: u32,
    pub left_weight: u64,
    pub right_weight: u64,
    pub red: bool,
}

impl Links {
    pub const DETACHED: Links = Links {
        parent: NIL,
        left: NIL,
        right: NIL,
        left_size: 0,
        right_size: 0,
        left_weight: 0,
        right_weight: 0,
        red: false,
    };

    /// Fresh leaf under `parent`. New leaves are red.
    pub fn leaf(parent: u32) -> Links {
        Links {
            parent,
            red: true,
            ..Links::DETACHED
        }
    }
}

pub(crate) struct Node<K, V> {
    pub links: [Links; 2],
    pub key: K,
    pub value: V,
    pub seq: u64,
    pub weight: u64,
}

impl<K, V> Node<K, V> {
    pub fn new(key: K, value: V, seq: u64, weight: u64) -> Self {
        Self {
            links: [Links::DETACHED; 2],
            key,
            value,
            seq,
            weight,
        }
    }

    #[inline]
    pub fn link(&self, order: Order) -> &Links {
        &self.links[order.idx()]
    }

    #[inline]
    pub fn link_mut(&mut self, order: Order) -> &mut Links {
        &mut self.links[order.idx()]
    }
}
