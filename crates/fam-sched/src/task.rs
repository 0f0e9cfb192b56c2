//! Task control blocks

use crate::fiber::{Fiber, Resume};
use crate::handle::Handle;
use fam_orbtree::NodeId;
use std::fmt;
use std::time::Duration;

/// Scheduling state of a task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet linked into a registry
    Initializable,
    /// Currently switched in
    Running,
    /// Linked into the runnable index, waiting to be picked
    Runnable,
    /// Blocked on a handle or a timer
    Sleeping,
}

/// Index of a registry slot
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub(crate) u32);

impl SlotId {
    /// Slot position in the registry table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position of a task inside a run queue
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunRef {
    /// Index into a flat runnable array
    Index(u32),
    /// Node of a run queue tree
    Node(NodeId),
}

/// Ordering and weight a run queue needs to place a task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunKey {
    /// Accumulated run time in nanoseconds
    pub runtime_ns: u64,
    /// Link sequence number, unique per registry
    pub seq: u64,
    /// Lottery weight
    pub weight: u64,
}

/// Control block of one task
pub struct TaskRecord {
    handle: Handle,
    state: TaskState,
    /// Handle this task is blocked on
    wait: Option<Handle>,
    /// Bumped on every sleep so stale timers can be told apart
    wait_epoch: u64,
    /// Next record in the same bucket chain
    pub(crate) next: Option<SlotId>,
    /// Back-reference into the run queue while Runnable
    pub(crate) run_ref: Option<RunRef>,
    runtime: Duration,
    weight: u64,
    seq: u64,
    /// Delivered on the next switch in
    resume: Option<Resume>,
    fiber: Option<Fiber>,
}

impl TaskRecord {
    /// Create an unlinked record. Its sequence number is assigned when a
    /// registry links it.
    pub fn new(handle: Handle, weight: u64) -> Self {
        Self {
            handle,
            state: TaskState::Initializable,
            wait: None,
            wait_epoch: 0,
            next: None,
            run_ref: None,
            runtime: Duration::ZERO,
            weight,
            seq: 0,
            resume: None,
            fiber: None,
        }
    }

    pub(crate) fn with_fiber(mut self, fiber: Fiber) -> Self {
        self.resume = Some(Resume::Start);
        self.fiber = Some(fiber);
        self
    }

    /// Capability handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Handle the task is blocked on, if sleeping on one
    pub fn wait(&self) -> Option<Handle> {
        self.wait
    }

    /// Run time charged so far
    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    /// Lottery weight
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Sequence number stamped by the registry on `add`
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True while linked into a run queue
    pub fn is_queued(&self) -> bool {
        self.run_ref.is_some()
    }

    pub(crate) fn wait_epoch(&self) -> u64 {
        self.wait_epoch
    }

    pub(crate) fn run_key(&self) -> RunKey {
        RunKey {
            runtime_ns: u64::try_from(self.runtime.as_nanos()).unwrap_or(u64::MAX),
            seq: self.seq,
            weight: self.weight,
        }
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn begin_wait(&mut self, wait: Option<Handle>) {
        self.state = TaskState::Sleeping;
        self.wait = wait;
        self.wait_epoch += 1;
    }

    pub(crate) fn end_wait(&mut self) {
        self.wait = None;
    }

    pub(crate) fn charge(&mut self, elapsed: Duration) {
        self.runtime = self.runtime.saturating_add(elapsed);
    }

    pub(crate) fn set_resume(&mut self, resume: Resume) {
        self.resume = Some(resume);
    }

    pub(crate) fn take_resume(&mut self) -> Resume {
        self.resume.take().unwrap_or(Resume::Continue)
    }

    pub(crate) fn fiber(&self) -> Option<&Fiber> {
        self.fiber.as_ref()
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("wait", &self.wait)
            .field("runtime", &self.runtime)
            .field("weight", &self.weight)
            .field("seq", &self.seq)
            .finish()
    }
}
