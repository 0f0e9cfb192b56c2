//! Node arena with free list for slot reuse.
//!
//! Nodes are addressed by `u32` index. Freed slots go on a free list and are
//! handed out again before the arena grows, so ids stay compact.

use crate::node::{Node, NIL};

pub(crate) struct NodeArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<K, V> NodeArena<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub fn alloc(&mut self, node: Node<K, V>) -> u32 {
        self.live += 1;
        if let Some(id) = self.free_list.pop() {
            self.slots[id as usize] = Some(node);
            return id;
        }
        let id = self.slots.len();
        if id >= NIL as usize {
            panic!("node arena exhausted: {} slots in use", id);
        }
        self.slots.push(Some(node));
        id as u32
    }

    /// Release a slot and hand its node back.
    ///
    /// Releasing a vacant slot is a double release and aborts.
    pub fn free(&mut self, id: u32) -> Node<K, V> {
        let Some(node) = self.slots.get_mut(id as usize).and_then(Option::take) else {
            panic!("double release of node slot {}", id);
        };
        self.free_list.push(id);
        self.live -= 1;
        node
    }

    pub fn get(&self, id: u32) -> Option<&Node<K, V>> {
        self.slots.get(id as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(id as usize).and_then(|s| s.as_mut())
    }

    /// Node behind a link that the tree structure says is live.
    #[inline]
    pub fn node(&self, id: u32) -> &Node<K, V> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("dangling tree link to node slot {}", id),
        }
    }

    #[inline]
    pub fn node_mut(&mut self, id: u32) -> &mut Node<K, V> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("dangling tree link to node slot {}", id),
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_reuses_freed_slots() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::new(1u32, "a", 0, 1));
        let b = arena.alloc(Node::new(2u32, "b", 1, 1));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);

        let freed = arena.free(a);
        assert_eq!(freed.value, "a");
        assert_eq!(arena.len(), 1);
        assert!(arena.get(a).is_none());

        let c = arena.alloc(Node::new(3u32, "c", 2, 1));
        assert_eq!(c, a);
        assert_eq!(arena.node(c).key, 3);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_arena_double_free_panics() {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::new(1u32, (), 0, 1));
        arena.free(a);
        arena.free(a);
    }

    #[test]
    #[should_panic(expected = "dangling tree link")]
    fn test_arena_dangling_link_panics() {
        let arena: NodeArena<u32, ()> = NodeArena::new();
        arena.node(7);
    }
}
