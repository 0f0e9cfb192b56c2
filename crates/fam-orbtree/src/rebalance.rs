//! Red-black structure maintenance shared by both orderings.
//!
//! Every routine takes the [`Order`] it operates on and touches only that
//! ordering's links. Subtree sizes and weight sums are recomputed for exactly
//! the nodes whose children changed.

use crate::node::{Links, Order, NIL};
use crate::OrbTree;

impl<K, V> OrbTree<K, V> {
    #[inline]
    pub(crate) fn links(&self, o: Order, id: u32) -> &Links {
        self.arena.node(id).link(o)
    }

    #[inline]
    pub(crate) fn links_mut(&mut self, o: Order, id: u32) -> &mut Links {
        self.arena.node_mut(id).link_mut(o)
    }

    #[inline]
    pub(crate) fn parent(&self, o: Order, id: u32) -> u32 {
        self.links(o, id).parent
    }

    #[inline]
    pub(crate) fn left(&self, o: Order, id: u32) -> u32 {
        self.links(o, id).left
    }

    #[inline]
    pub(crate) fn right(&self, o: Order, id: u32) -> u32 {
        self.links(o, id).right
    }

    #[inline]
    pub(crate) fn is_red(&self, o: Order, id: u32) -> bool {
        id != NIL && self.links(o, id).red
    }

    #[inline]
    fn set_red(&mut self, o: Order, id: u32, red: bool) {
        if id != NIL {
            self.links_mut(o, id).red = red;
        }
    }

    /// Number of nodes in the subtree rooted at `id`.
    #[inline]
    pub(crate) fn size(&self, o: Order, id: u32) -> u32 {
        if id == NIL {
            return 0;
        }
        let l = self.links(o, id);
        1 + l.left_size + l.right_size
    }

    /// Sum of weights in the subtree rooted at `id`.
    #[inline]
    pub(crate) fn weight_sum(&self, o: Order, id: u32) -> u64 {
        if id == NIL {
            return 0;
        }
        let node = self.arena.node(id);
        let l = node.link(o);
        match node
            .weight
            .checked_add(l.left_weight)
            .and_then(|w| w.checked_add(l.right_weight))
        {
            Some(sum) => sum,
            None => panic!("subtree weight overflows u64"),
        }
    }

    /// Recompute `id`'s stored child sizes from its children.
    fn pull(&mut self, o: Order, id: u32) {
        let (left, right) = {
            let l = self.links(o, id);
            (l.left, l.right)
        };
        let left_size = self.size(o, left);
        let right_size = self.size(o, right);
        let left_weight = self.weight_sum(o, left);
        let right_weight = self.weight_sum(o, right);
        let l = self.links_mut(o, id);
        l.left_size = left_size;
        l.right_size = right_size;
        l.left_weight = left_weight;
        l.right_weight = right_weight;
    }

    pub(crate) fn pull_to_root(&mut self, o: Order, mut id: u32) {
        while id != NIL {
            self.pull(o, id);
            id = self.parent(o, id);
        }
    }

    /// Point `parent`'s link that used to reach `old` at `new`.
    fn replace_child(&mut self, o: Order, parent: u32, old: u32, new: u32) {
        if parent == NIL {
            self.roots[o.idx()] = new;
        } else if self.left(o, parent) == old {
            self.links_mut(o, parent).left = new;
        } else {
            self.links_mut(o, parent).right = new;
        }
    }

    fn rotate_left(&mut self, o: Order, x: u32) {
        let y = self.right(o, x);
        let beta = self.left(o, y);
        self.links_mut(o, x).right = beta;
        if beta != NIL {
            self.links_mut(o, beta).parent = x;
        }
        let p = self.parent(o, x);
        self.links_mut(o, y).parent = p;
        self.replace_child(o, p, x, y);
        self.links_mut(o, y).left = x;
        self.links_mut(o, x).parent = y;
        self.pull(o, x);
        self.pull(o, y);
    }

    fn rotate_right(&mut self, o: Order, x: u32) {
        let y = self.left(o, x);
        let beta = self.right(o, y);
        self.links_mut(o, x).left = beta;
        if beta != NIL {
            self.links_mut(o, beta).parent = x;
        }
        let p = self.parent(o, x);
        self.links_mut(o, y).parent = p;
        self.replace_child(o, p, x, y);
        self.links_mut(o, y).right = x;
        self.links_mut(o, x).parent = y;
        self.pull(o, x);
        self.pull(o, y);
    }

    /// Hang detached node `z` under `parent` and restore balance.
    pub(crate) fn attach(&mut self, o: Order, z: u32, parent: u32, as_right: bool) {
        *self.links_mut(o, z) = Links::leaf(parent);
        if parent == NIL {
            self.roots[o.idx()] = z;
        } else if as_right {
            self.links_mut(o, parent).right = z;
        } else {
            self.links_mut(o, parent).left = z;
        }
        self.pull_to_root(o, parent);
        self.insert_fixup(o, z);
    }

    fn insert_fixup(&mut self, o: Order, mut z: u32) {
        while self.is_red(o, self.parent(o, z)) {
            let p = self.parent(o, z);
            // p is red, so it is not the root and has a parent
            let g = self.parent(o, p);
            if p == self.left(o, g) {
                let uncle = self.right(o, g);
                if self.is_red(o, uncle) {
                    self.set_red(o, p, false);
                    self.set_red(o, uncle, false);
                    self.set_red(o, g, true);
                    z = g;
                } else {
                    if z == self.right(o, p) {
                        z = p;
                        self.rotate_left(o, z);
                    }
                    let p = self.parent(o, z);
                    let g = self.parent(o, p);
                    self.set_red(o, p, false);
                    self.set_red(o, g, true);
                    self.rotate_right(o, g);
                }
            } else {
                let uncle = self.left(o, g);
                if self.is_red(o, uncle) {
                    self.set_red(o, p, false);
                    self.set_red(o, uncle, false);
                    self.set_red(o, g, true);
                    z = g;
                } else {
                    if z == self.left(o, p) {
                        z = p;
                        self.rotate_right(o, z);
                    }
                    let p = self.parent(o, z);
                    let g = self.parent(o, p);
                    self.set_red(o, p, false);
                    self.set_red(o, g, true);
                    self.rotate_left(o, g);
                }
            }
        }
        let root = self.roots[o.idx()];
        self.set_red(o, root, false);
    }

    fn transplant(&mut self, o: Order, u: u32, v: u32) {
        let p = self.parent(o, u);
        self.replace_child(o, p, u, v);
        if v != NIL {
            self.links_mut(o, v).parent = p;
        }
    }

    pub(crate) fn minimum(&self, o: Order, mut id: u32) -> u32 {
        while id != NIL {
            let left = self.left(o, id);
            if left == NIL {
                break;
            }
            id = left;
        }
        id
    }

    pub(crate) fn maximum(&self, o: Order, mut id: u32) -> u32 {
        while id != NIL {
            let right = self.right(o, id);
            if right == NIL {
                break;
            }
            id = right;
        }
        id
    }

    /// Unlink `z` from ordering `o` and restore balance. `z`'s links for
    /// this ordering are reset to detached.
    pub(crate) fn detach(&mut self, o: Order, z: u32) {
        let z_left = self.left(o, z);
        let z_right = self.right(o, z);
        let mut removed_red = self.is_red(o, z);
        let x;
        let x_parent;

        if z_left == NIL {
            x = z_right;
            x_parent = self.parent(o, z);
            self.transplant(o, z, z_right);
        } else if z_right == NIL {
            x = z_left;
            x_parent = self.parent(o, z);
            self.transplant(o, z, z_left);
        } else {
            let y = self.minimum(o, z_right);
            removed_red = self.is_red(o, y);
            x = self.right(o, y);
            if self.parent(o, y) == z {
                x_parent = y;
            } else {
                x_parent = self.parent(o, y);
                self.transplant(o, y, x);
                self.links_mut(o, y).right = z_right;
                self.links_mut(o, z_right).parent = y;
            }
            self.transplant(o, z, y);
            self.links_mut(o, y).left = z_left;
            self.links_mut(o, z_left).parent = y;
            let z_red = self.is_red(o, z);
            self.set_red(o, y, z_red);
        }

        self.pull_to_root(o, x_parent);
        if !removed_red {
            self.remove_fixup(o, x, x_parent);
        }
        *self.links_mut(o, z) = Links::DETACHED;
    }

    fn remove_fixup(&mut self, o: Order, mut x: u32, mut parent: u32) {
        while x != self.roots[o.idx()] && !self.is_red(o, x) {
            if parent == NIL {
                break;
            }
            if x == self.left(o, parent) {
                let mut w = self.right(o, parent);
                if self.is_red(o, w) {
                    self.set_red(o, w, false);
                    self.set_red(o, parent, true);
                    self.rotate_left(o, parent);
                    w = self.right(o, parent);
                }
                if !self.is_red(o, self.left(o, w)) && !self.is_red(o, self.right(o, w)) {
                    self.set_red(o, w, true);
                    x = parent;
                    parent = self.parent(o, x);
                } else {
                    if !self.is_red(o, self.right(o, w)) {
                        let wl = self.left(o, w);
                        self.set_red(o, wl, false);
                        self.set_red(o, w, true);
                        self.rotate_right(o, w);
                        w = self.right(o, parent);
                    }
                    let parent_red = self.is_red(o, parent);
                    self.set_red(o, w, parent_red);
                    self.set_red(o, parent, false);
                    let wr = self.right(o, w);
                    self.set_red(o, wr, false);
                    self.rotate_left(o, parent);
                    x = self.roots[o.idx()];
                    parent = NIL;
                }
            } else {
                let mut w = self.left(o, parent);
                if self.is_red(o, w) {
                    self.set_red(o, w, false);
                    self.set_red(o, parent, true);
                    self.rotate_right(o, parent);
                    w = self.left(o, parent);
                }
                if !self.is_red(o, self.right(o, w)) && !self.is_red(o, self.left(o, w)) {
                    self.set_red(o, w, true);
                    x = parent;
                    parent = self.parent(o, x);
                } else {
                    if !self.is_red(o, self.left(o, w)) {
                        let wr = self.right(o, w);
                        self.set_red(o, wr, false);
                        self.set_red(o, w, true);
                        self.rotate_left(o, w);
                        w = self.left(o, parent);
                    }
                    let parent_red = self.is_red(o, parent);
                    self.set_red(o, w, parent_red);
                    self.set_red(o, parent, false);
                    let wl = self.left(o, w);
                    self.set_red(o, wl, false);
                    self.rotate_right(o, parent);
                    x = self.roots[o.idx()];
                    parent = NIL;
                }
            }
        }
        self.set_red(o, x, false);
    }

    /// Node at in-order position `rank` in ordering `o`, or `NIL`.
    pub(crate) fn select(&self, o: Order, mut rank: usize) -> u32 {
        let mut id = self.roots[o.idx()];
        while id != NIL {
            let l = self.links(o, id);
            let left_size = l.left_size as usize;
            if rank < left_size {
                id = l.left;
            } else if rank == left_size {
                return id;
            } else {
                rank -= left_size + 1;
                id = l.right;
            }
        }
        NIL
    }

    /// In-order position of `id` in ordering `o`.
    pub(crate) fn rank_of(&self, o: Order, id: u32) -> usize {
        let mut rank = self.links(o, id).left_size as usize;
        let mut cur = id;
        loop {
            let p = self.parent(o, cur);
            if p == NIL {
                break;
            }
            if self.right(o, p) == cur {
                rank += self.links(o, p).left_size as usize + 1;
            }
            cur = p;
        }
        rank
    }

    /// In-order successor of `id` in ordering `o`, or `NIL`.
    pub(crate) fn successor(&self, o: Order, id: u32) -> u32 {
        let right = self.right(o, id);
        if right != NIL {
            return self.minimum(o, right);
        }
        let mut cur = id;
        let mut p = self.parent(o, cur);
        while p != NIL && self.right(o, p) == cur {
            cur = p;
            p = self.parent(o, cur);
        }
        p
    }
}
