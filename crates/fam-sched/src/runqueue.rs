//! Runnable-set indexes
//!
//! A [`RunQueue`] holds exactly the Runnable tasks of a registry, each entry
//! pointing at the registry slot of its record. The record in turn stores the
//! [`RunRef`] it was given, so either side can find the other in O(1) or
//! O(log n).

use crate::config::SchedulePolicy;
use crate::rng::CsRng;
use crate::task::{RunKey, RunRef, SlotId};
use fam_orbtree::OrbTree;

/// Index over the runnable tasks of a registry
pub trait RunQueue: Send {
    /// Policy this queue implements
    fn policy(&self) -> SchedulePolicy;

    /// Add the task in `slot`. The returned reference must be stored on the
    /// record and handed back on removal.
    fn insert(&mut self, slot: SlotId, key: RunKey) -> RunRef;

    /// Remove the entry at `at`, which must belong to `expected`.
    ///
    /// If removal moved another entry, returns that entry's slot and its new
    /// reference so the caller can update the record.
    ///
    /// # Panics
    /// If `at` does not name an entry for `expected` (stale back-reference).
    fn remove(&mut self, at: RunRef, expected: SlotId) -> Option<(SlotId, RunRef)>;

    /// Point the entry at `at` from slot `from` to slot `to` after its record
    /// moved inside the registry.
    ///
    /// # Panics
    /// If `at` does not name an entry for `from`.
    fn retarget(&mut self, at: RunRef, from: SlotId, to: SlotId);

    /// Choose the next task to run without removing it
    fn pick(&mut self, rng: &mut CsRng) -> Option<SlotId>;

    /// Number of runnable entries
    fn len(&self) -> usize;

    /// True if nothing is runnable
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry
    fn clear(&mut self);
}

impl SchedulePolicy {
    /// Empty run queue implementing this policy
    pub fn run_queue(self) -> Box<dyn RunQueue> {
        match self {
            SchedulePolicy::Uniform => Box::new(UniformQueue::default()),
            SchedulePolicy::Fair => Box::new(FairQueue::default()),
            SchedulePolicy::Lottery => Box::new(LotteryQueue::default()),
        }
    }
}

fn stale(at: RunRef, slot: SlotId) -> ! {
    panic!(
        "stale run queue back-reference {:?} for slot {}",
        at,
        slot.index()
    )
}

/// Flat array with uniform random selection
#[derive(Debug, Default)]
pub struct UniformQueue {
    slots: Vec<SlotId>,
}

impl UniformQueue {
    fn position(&self, at: RunRef, slot: SlotId) -> usize {
        match at {
            RunRef::Index(i) if self.slots.get(i as usize) == Some(&slot) => i as usize,
            _ => stale(at, slot),
        }
    }
}

impl RunQueue for UniformQueue {
    fn policy(&self) -> SchedulePolicy {
        SchedulePolicy::Uniform
    }

    fn insert(&mut self, slot: SlotId, _key: RunKey) -> RunRef {
        self.slots.push(slot);
        RunRef::Index((self.slots.len() - 1) as u32)
    }

    fn remove(&mut self, at: RunRef, expected: SlotId) -> Option<(SlotId, RunRef)> {
        let i = self.position(at, expected);
        self.slots.swap_remove(i);
        self.slots.get(i).map(|&moved| (moved, RunRef::Index(i as u32)))
    }

    fn retarget(&mut self, at: RunRef, from: SlotId, to: SlotId) {
        let i = self.position(at, from);
        self.slots[i] = to;
    }

    fn pick(&mut self, rng: &mut CsRng) -> Option<SlotId> {
        if self.slots.is_empty() {
            return None;
        }
        let i = rng.below(self.slots.len() as u64);
        Some(self.slots[i as usize])
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Tree keyed by `(run time, link seq)`; the minimum runs next
#[derive(Debug, Default)]
pub struct FairQueue {
    tree: OrbTree<(u64, u64), SlotId>,
}

impl RunQueue for FairQueue {
    fn policy(&self) -> SchedulePolicy {
        SchedulePolicy::Fair
    }

    fn insert(&mut self, slot: SlotId, key: RunKey) -> RunRef {
        let (id, replaced) = self
            .tree
            .insert_entry((key.runtime_ns, key.seq), slot, key.weight);
        if let Some((_, other)) = replaced {
            panic!(
                "run queue key collision between slots {} and {}",
                other.index(),
                slot.index()
            );
        }
        RunRef::Node(id)
    }

    fn remove(&mut self, at: RunRef, expected: SlotId) -> Option<(SlotId, RunRef)> {
        remove_node(&mut self.tree, at, expected);
        None
    }

    fn retarget(&mut self, at: RunRef, from: SlotId, to: SlotId) {
        retarget_node(&mut self.tree, at, from, to);
    }

    fn pick(&mut self, _rng: &mut CsRng) -> Option<SlotId> {
        self.tree.first().map(|(_, &slot)| slot)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn clear(&mut self) {
        self.tree.clear();
    }
}

/// Tree keyed by link seq, picked by weighted draw
#[derive(Debug, Default)]
pub struct LotteryQueue {
    tree: OrbTree<u64, SlotId>,
}

impl LotteryQueue {
    /// Sum of runnable weights
    pub fn total_weight(&self) -> u64 {
        self.tree.total_weight()
    }
}

impl RunQueue for LotteryQueue {
    fn policy(&self) -> SchedulePolicy {
        SchedulePolicy::Lottery
    }

    fn insert(&mut self, slot: SlotId, key: RunKey) -> RunRef {
        let (id, replaced) = self.tree.insert_entry(key.seq, slot, key.weight);
        if let Some((_, other)) = replaced {
            panic!(
                "run queue key collision between slots {} and {}",
                other.index(),
                slot.index()
            );
        }
        RunRef::Node(id)
    }

    fn remove(&mut self, at: RunRef, expected: SlotId) -> Option<(SlotId, RunRef)> {
        remove_node(&mut self.tree, at, expected);
        None
    }

    fn retarget(&mut self, at: RunRef, from: SlotId, to: SlotId) {
        retarget_node(&mut self.tree, at, from, to);
    }

    fn pick(&mut self, rng: &mut CsRng) -> Option<SlotId> {
        let total = self.tree.total_weight();
        if total == 0 {
            return None;
        }
        let draw = rng.below(total);
        self.tree.pick_weighted(draw).map(|(_, &slot)| slot)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn clear(&mut self) {
        self.tree.clear();
    }
}

fn remove_node<K>(tree: &mut OrbTree<K, SlotId>, at: RunRef, expected: SlotId) {
    let id = match at {
        RunRef::Node(id) if tree.get_id(id).map(|(_, s)| *s) == Some(expected) => id,
        _ => stale(at, expected),
    };
    tree.remove_id(id);
}

fn retarget_node<K>(tree: &mut OrbTree<K, SlotId>, at: RunRef, from: SlotId, to: SlotId) {
    let slot = match at {
        RunRef::Node(id) => tree.value_mut_id(id),
        RunRef::Index(_) => None,
    };
    match slot {
        Some(slot) if *slot == from => *slot = to,
        _ => stale(at, from),
    }
}
