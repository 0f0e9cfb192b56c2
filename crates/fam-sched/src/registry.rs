//! Hash-chained task registry
//!
//! The table starts with one head slot per bucket. Records whose bucket head
//! is taken live in overflow slots appended after the heads and are chained
//! from the head through `next` links. Freed overflow slots are reused.
//!
//! Every Runnable record is also linked into a [`RunQueue`]; the record keeps
//! the queue's [`RunRef`] and the queue entry keeps the record's [`SlotId`].
//! Whenever a record moves between slots the queue entry is retargeted.

use crate::config::SchedulePolicy;
use crate::error::SchedError;
use crate::handle::Handle;
use crate::rng::CsRng;
use crate::runqueue::RunQueue;
use crate::task::{RunRef, SlotId, TaskRecord, TaskState};
use std::time::Duration;

/// Handle → task record index plus the runnable set
pub struct Registry {
    slots: Vec<Option<TaskRecord>>,
    capacity: usize,
    max_tasks: usize,
    free: Vec<u32>,
    live: usize,
    /// Sum of live weights; bounds every run queue's total
    total_weight: u64,
    next_seq: u64,
    run_queue: Box<dyn RunQueue>,
}

impl Registry {
    /// Empty registry with `capacity` buckets, holding at most `max_tasks`
    /// records, using the run queue for `policy`
    pub fn new(capacity: usize, max_tasks: usize, policy: SchedulePolicy) -> Self {
        Self::with_run_queue(capacity, max_tasks, policy.run_queue())
    }

    /// Empty registry over a caller-supplied run queue
    pub fn with_run_queue(capacity: usize, max_tasks: usize, run_queue: Box<dyn RunQueue>) -> Self {
        assert!(capacity > 0, "registry needs at least one bucket");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            capacity,
            max_tasks,
            free: Vec::new(),
            live: 0,
            total_weight: 0,
            next_seq: 0,
            run_queue,
        }
    }

    /// Number of buckets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live record limit
    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Policy of the run queue
    pub fn policy(&self) -> SchedulePolicy {
        self.run_queue.policy()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no record is live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of Runnable records
    pub fn runnable_len(&self) -> usize {
        self.run_queue.len()
    }

    /// Sum of the weights of every live record
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Bucket `handle` hashes to
    pub fn bucket_of(&self, handle: &Handle) -> usize {
        handle.bucket(self.capacity)
    }

    /// Link `record` into its bucket chain and the runnable set.
    ///
    /// The record becomes Runnable and is stamped with the next sequence
    /// number, which orders it among equal run times.
    pub fn add(&mut self, mut record: TaskRecord) -> Result<(), SchedError> {
        if self.live >= self.max_tasks {
            return Err(SchedError::RegistryFull {
                max_tasks: self.max_tasks,
            });
        }
        let handle = record.handle();
        let bucket = self.bucket_of(&handle);

        let tail = if self.slots[bucket].is_none() {
            None
        } else {
            let mut tail = SlotId(bucket as u32);
            loop {
                let rec = self.record(tail);
                if rec.handle() == handle {
                    return Err(SchedError::DuplicateHandle(handle));
                }
                match rec.next {
                    Some(next) => tail = next,
                    None => break,
                }
            }
            Some(tail)
        };
        let Some(total_weight) = self.total_weight.checked_add(record.weight()) else {
            return Err(SchedError::WeightOverflow {
                weight: record.weight(),
                total: self.total_weight,
            });
        };

        let slot = match tail {
            None => SlotId(bucket as u32),
            Some(tail) => {
                let slot = self.alloc_overflow();
                self.record_mut(tail).next = Some(slot);
                slot
            }
        };

        record.set_seq(self.next_seq);
        self.next_seq += 1;
        self.total_weight = total_weight;
        record.next = None;
        record.end_wait();
        record.set_state(TaskState::Runnable);
        record.run_ref = Some(self.run_queue.insert(slot, record.run_key()));
        self.slots[slot.index()] = Some(record);
        self.live += 1;
        Ok(())
    }

    /// Look up a live record
    pub fn get(&self, handle: &Handle) -> Option<&TaskRecord> {
        let (_, at) = self.locate(handle)?;
        self.slots[at.index()].as_ref()
    }

    /// Look up a live record for mutation
    pub fn get_mut(&mut self, handle: &Handle) -> Option<&mut TaskRecord> {
        let (_, at) = self.locate(handle)?;
        self.slots[at.index()].as_mut()
    }

    /// Slot currently holding `handle`
    pub fn slot_of(&self, handle: &Handle) -> Option<SlotId> {
        self.locate(handle).map(|(_, at)| at)
    }

    /// True if `handle` is live
    pub fn contains(&self, handle: &Handle) -> bool {
        self.locate(handle).is_some()
    }

    /// Unlink and return a record.
    ///
    /// Removing a chain head that has a successor moves the successor into
    /// the head slot and releases the successor's overflow slot.
    pub fn remove(&mut self, handle: &Handle) -> Option<TaskRecord> {
        let (prev, at) = self.locate(handle)?;
        let mut record = self.slots[at.index()].take()?;
        if let Some(run_ref) = record.run_ref.take() {
            self.unqueue(run_ref, at);
        }

        match (prev, record.next.take()) {
            (Some(prev), next) => {
                self.record_mut(prev).next = next;
                self.release_overflow(at);
            }
            (None, None) => {}
            (None, Some(succ)) => {
                let moved = self.slots[succ.index()].take();
                let Some(moved) = moved else {
                    panic!("bucket chain links vacant slot {}", succ.index());
                };
                self.release_overflow(succ);
                if let Some(run_ref) = moved.run_ref {
                    self.run_queue.retarget(run_ref, succ, at);
                }
                self.slots[at.index()] = Some(moved);
            }
        }

        self.live -= 1;
        self.total_weight -= record.weight();
        Some(record)
    }

    /// Choose the next task to run. Selection only: the task stays Runnable.
    pub fn pick_next(&mut self, rng: &mut CsRng) -> Option<Handle> {
        let slot = self.run_queue.pick(rng)?;
        Some(self.record(slot).handle())
    }

    /// Runnable → Running. Returns false if the task is absent or not
    /// Runnable.
    pub fn mark_running(&mut self, handle: &Handle) -> bool {
        let Some((_, at)) = self.locate(handle) else {
            return false;
        };
        let rec = self.record_mut(at);
        if rec.state() != TaskState::Runnable {
            return false;
        }
        let run_ref = rec.run_ref.take();
        rec.set_state(TaskState::Running);
        if let Some(run_ref) = run_ref {
            self.unqueue(run_ref, at);
        }
        true
    }

    /// Running or Sleeping → Runnable. Returns false if the task is absent
    /// or already Runnable.
    pub fn mark_runnable(&mut self, handle: &Handle) -> bool {
        let Some((_, at)) = self.locate(handle) else {
            return false;
        };
        let rec = self.record(at);
        if !matches!(rec.state(), TaskState::Running | TaskState::Sleeping) {
            return false;
        }
        let key = rec.run_key();
        let run_ref = self.run_queue.insert(at, key);
        let rec = self.record_mut(at);
        rec.end_wait();
        rec.set_state(TaskState::Runnable);
        rec.run_ref = Some(run_ref);
        true
    }

    /// Running → Sleeping, blocked on `wait` (None for a plain timer sleep)
    pub fn mark_sleeping(&mut self, handle: &Handle, wait: Option<Handle>) -> bool {
        match self.get_mut(handle) {
            Some(rec) if rec.state() == TaskState::Running => {
                rec.begin_wait(wait);
                true
            }
            _ => false,
        }
    }

    /// Add run time to a Running task
    pub fn charge(&mut self, handle: &Handle, elapsed: Duration) -> bool {
        match self.get_mut(handle) {
            Some(rec) if rec.state() == TaskState::Running => {
                rec.charge(elapsed);
                true
            }
            _ => false,
        }
    }

    /// Handles of every live record, in slot order
    pub fn handles(&self) -> Vec<Handle> {
        self.records().map(TaskRecord::handle).collect()
    }

    /// Iterate live records in slot order
    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> + '_ {
        self.slots.iter().flatten()
    }

    /// Unlink every record and hand them all back
    pub fn drain(&mut self) -> Vec<TaskRecord> {
        self.run_queue.clear();
        self.free.clear();
        let mut records: Vec<TaskRecord> = self.slots.drain(..).flatten().collect();
        self.slots.resize_with(self.capacity, || None);
        self.live = 0;
        self.total_weight = 0;
        for rec in &mut records {
            rec.next = None;
            rec.run_ref = None;
        }
        records
    }

    /// Chain walk: `(predecessor, slot)` of the record for `handle`
    fn locate(&self, handle: &Handle) -> Option<(Option<SlotId>, SlotId)> {
        let mut prev = None;
        let mut at = SlotId(self.bucket_of(handle) as u32);
        loop {
            let rec = self.slots[at.index()].as_ref()?;
            if rec.handle() == *handle {
                return Some((prev, at));
            }
            prev = Some(at);
            at = rec.next?;
        }
    }

    fn record(&self, slot: SlotId) -> &TaskRecord {
        match self.slots.get(slot.index()) {
            Some(Some(rec)) => rec,
            _ => panic!("registry link to vacant slot {}", slot.index()),
        }
    }

    fn record_mut(&mut self, slot: SlotId) -> &mut TaskRecord {
        match self.slots.get_mut(slot.index()) {
            Some(Some(rec)) => rec,
            _ => panic!("registry link to vacant slot {}", slot.index()),
        }
    }

    fn unqueue(&mut self, run_ref: RunRef, at: SlotId) {
        if let Some((moved, new_ref)) = self.run_queue.remove(run_ref, at) {
            self.record_mut(moved).run_ref = Some(new_ref);
        }
    }

    fn alloc_overflow(&mut self) -> SlotId {
        match self.free.pop() {
            Some(i) => SlotId(i),
            None => {
                self.slots.push(None);
                SlotId((self.slots.len() - 1) as u32)
            }
        }
    }

    fn release_overflow(&mut self, slot: SlotId) {
        assert!(
            slot.index() >= self.capacity,
            "release of head slot {} as overflow",
            slot.index()
        );
        self.free.push(slot.0);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &self.capacity)
            .field("live", &self.live)
            .field("runnable", &self.runnable_len())
            .field("policy", &self.policy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(fill: u8, bucket_word: u32) -> Handle {
        let mut bytes = [fill; Handle::LEN];
        bytes[28..].copy_from_slice(&bucket_word.to_le_bytes());
        Handle::from_bytes(bytes)
    }

    fn registry(policy: SchedulePolicy) -> Registry {
        Registry::new(16, 64, policy)
    }

    fn add(reg: &mut Registry, h: Handle) {
        reg.add(TaskRecord::new(h, 1)).unwrap();
    }

    #[test]
    fn test_add_get_remove() {
        let mut reg = registry(SchedulePolicy::Fair);
        let h = handle(1, 3);
        add(&mut reg, h);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.runnable_len(), 1);
        assert_eq!(reg.get(&h).map(|r| r.state()), Some(TaskState::Runnable));
        assert_eq!(reg.slot_of(&h), Some(SlotId(3)));

        let rec = reg.remove(&h).unwrap();
        assert_eq!(rec.handle(), h);
        assert!(!rec.is_queued());
        assert!(reg.get(&h).is_none());
        assert!(reg.remove(&h).is_none());
        assert!(reg.is_empty());
        assert_eq!(reg.runnable_len(), 0);
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let mut reg = registry(SchedulePolicy::Fair);
        let h = handle(1, 3);
        add(&mut reg, h);
        add(&mut reg, handle(2, 3));
        assert!(matches!(
            reg.add(TaskRecord::new(h, 1)),
            Err(SchedError::DuplicateHandle(d)) if d == h
        ));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_registry_full() {
        let mut reg = Registry::new(4, 2, SchedulePolicy::Uniform);
        add(&mut reg, handle(1, 0));
        add(&mut reg, handle(2, 1));
        assert!(matches!(
            reg.add(TaskRecord::new(handle(3, 2), 1)),
            Err(SchedError::RegistryFull { max_tasks: 2 })
        ));
    }

    #[test]
    fn test_weight_sum_overflow_rejected() {
        let mut reg = registry(SchedulePolicy::Lottery);
        let (a, b) = (handle(1, 0), handle(2, 1));
        reg.add(TaskRecord::new(a, 1 << 63)).unwrap();
        assert!(matches!(
            reg.add(TaskRecord::new(b, 1 << 63)),
            Err(SchedError::WeightOverflow { total, .. }) if total == 1 << 63
        ));
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&b).is_none());

        // removal returns the headroom
        reg.remove(&a).unwrap();
        assert_eq!(reg.total_weight(), 0);
        reg.add(TaskRecord::new(b, 1 << 63)).unwrap();
        assert_eq!(reg.total_weight(), 1 << 63);
    }

    #[test]
    fn test_sequence_numbers_are_stamped_on_add() {
        for policy in [SchedulePolicy::Fair, SchedulePolicy::Lottery] {
            let mut reg = registry(policy);
            let hs: Vec<Handle> = (0..4u8).map(|i| handle(i, u32::from(i))).collect();
            for h in &hs {
                add(&mut reg, *h);
            }
            let seqs: Vec<u64> = hs.iter().map(|h| reg.get(h).unwrap().seq()).collect();
            assert_eq!(seqs, vec![0, 1, 2, 3]);

            // re-adding a removed record gets a fresh number
            let rec = reg.remove(&hs[1]).unwrap();
            reg.add(rec).unwrap();
            assert_eq!(reg.get(&hs[1]).unwrap().seq(), 4);
            assert_eq!(reg.runnable_len(), 4);
        }
    }

    #[test]
    fn test_mid_chain_removal_splices() {
        let mut reg = registry(SchedulePolicy::Fair);
        let (a, b, c) = (handle(1, 5), handle(2, 5), handle(3, 5));
        add(&mut reg, a);
        add(&mut reg, b);
        add(&mut reg, c);
        let c_slot = reg.slot_of(&c).unwrap();
        assert_eq!(reg.slot_of(&a), Some(SlotId(5)));
        assert_eq!(reg.slot_of(&c), Some(c_slot));
        assert!(reg.get(&b).is_none());

        // the freed overflow slot is reused
        let d = handle(4, 5);
        add(&mut reg, d);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_head_removal_moves_successor_and_retargets() {
        for policy in [
            SchedulePolicy::Uniform,
            SchedulePolicy::Fair,
            SchedulePolicy::Lottery,
        ] {
            let mut reg = registry(policy);
            let (a, b) = (handle(1, 7), handle(2, 7));
            add(&mut reg, a);
            add(&mut reg, b);
            assert_eq!(reg.slot_of(&b), Some(SlotId(7)));

            let mut rng = CsRng::from_seed([0; 32]);
            assert_eq!(reg.pick_next(&mut rng), Some(b));
            assert!(reg.mark_running(&b));
            assert!(reg.remove(&b).is_some());
            assert!(reg.is_empty());
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut reg = registry(SchedulePolicy::Fair);
        let h = handle(1, 0);
        let target = handle(9, 9);
        add(&mut reg, h);

        assert!(!reg.mark_sleeping(&h, Some(target)));
        assert!(reg.mark_running(&h));
        assert!(!reg.mark_running(&h));
        assert_eq!(reg.runnable_len(), 0);

        assert!(reg.charge(&h, Duration::from_millis(2)));
        assert!(reg.mark_sleeping(&h, Some(target)));
        assert_eq!(reg.get(&h).unwrap().wait(), Some(target));
        assert!(!reg.charge(&h, Duration::from_millis(2)));

        assert!(reg.mark_runnable(&h));
        assert!(!reg.mark_runnable(&h));
        let rec = reg.get(&h).unwrap();
        assert_eq!(rec.state(), TaskState::Runnable);
        assert_eq!(rec.wait(), None);
        assert_eq!(rec.runtime(), Duration::from_millis(2));
    }

    #[test]
    fn test_fair_pick_follows_runtime() {
        let mut reg = registry(SchedulePolicy::Fair);
        let mut rng = CsRng::from_seed([0; 32]);
        let (a, b) = (handle(1, 0), handle(2, 1));
        add(&mut reg, a);
        add(&mut reg, b);
        assert_eq!(reg.pick_next(&mut rng), Some(a));

        reg.mark_running(&a);
        reg.charge(&a, Duration::from_micros(10));
        reg.mark_runnable(&a);
        assert_eq!(reg.pick_next(&mut rng), Some(b));
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut reg = registry(SchedulePolicy::Uniform);
        for i in 0..10u8 {
            add(&mut reg, handle(i, u32::from(i % 3)));
        }
        let records = reg.drain();
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| !r.is_queued()));
        assert!(reg.is_empty());
        assert_eq!(reg.runnable_len(), 0);
        assert!(reg.handles().is_empty());

        add(&mut reg, handle(1, 0));
        assert_eq!(reg.len(), 1);
    }
}
