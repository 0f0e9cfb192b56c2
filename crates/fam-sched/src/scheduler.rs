//! Cooperative scheduler loop
//!
//! The thread calling [`Scheduler::run`] drives every task. Each iteration
//! expires due timers, asks the registry for the next runnable task, passes
//! the baton to its fiber, and on return charges the elapsed time and relinks
//! the task according to why it switched out.
//!
//! Shared state (registry, channels, timers) sits behind one
//! [`GuardedLock`]. The lock is held for one structural update at a time and
//! never while a task runs, so tasks and other threads holding a
//! [`Spawner`] can spawn and send freely.

use crate::config::{SchedulePolicy, SchedulerConfig};
use crate::error::SchedError;
use crate::fiber::{Fiber, FiberPort, Resume, Suspender, Switch};
use crate::handle::Handle;
use crate::lock::GuardedLock;
use crate::message::Message;
use crate::registry::Registry;
use crate::rng::CsRng;
use crate::task::{TaskRecord, TaskState};
use crate::timer::{TimerEntry, Timers};
use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Waits longer than this are treated as unbounded
const FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Tasks spawned
    pub spawned: u64,

    /// Tasks whose entry function returned
    pub finished: u64,

    /// Tasks whose entry function panicked
    pub panicked: u64,

    /// Times control was passed into a task
    pub switches: u64,

    /// Waits and sleeps ended by their deadline
    pub timeouts: u64,
}

/// Message queue and waiters of one handle
#[derive(Default)]
struct Channel {
    queue: VecDeque<Message>,
    waiters: VecDeque<Handle>,
    /// Lives and dies with the task of the same handle
    task_bound: bool,
}

/// State shared between the loop, tasks and spawners
struct Core {
    registry: Registry,
    channels: FxHashMap<Handle, Channel>,
    timers: Timers,
    rng: CsRng,
    stats: RunStats,
    closed: bool,
}

fn waits_on(registry: &Registry, waiter: &Handle, target: &Handle) -> bool {
    registry
        .get(waiter)
        .map_or(false, |r| r.state() == TaskState::Sleeping && r.wait() == Some(*target))
}

impl Core {
    /// Draw a handle no live task or channel uses
    fn fresh_handle(&mut self) -> Handle {
        loop {
            let handle = Handle::generate(&mut self.rng);
            if !self.registry.contains(&handle) && !self.channels.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Make a Sleeping task Runnable, delivering `resume` on its next switch in
    fn wake(&mut self, handle: &Handle, resume: Resume) -> bool {
        match self.registry.get_mut(handle) {
            Some(rec) if rec.state() == TaskState::Sleeping => rec.set_resume(resume),
            _ => return false,
        }
        self.registry.mark_runnable(handle)
    }

    /// Hand `message` to the first task waiting on `target`, or queue it.
    /// Returns true if a task woke.
    fn deliver(&mut self, target: Handle, message: Message) -> Result<bool, SchedError> {
        let channel = self
            .channels
            .get_mut(&target)
            .ok_or(SchedError::UnknownChannel(target))?;
        let mut waiter = None;
        while let Some(w) = channel.waiters.pop_front() {
            if waits_on(&self.registry, &w, &target) {
                waiter = Some(w);
                break;
            }
        }
        let Some(waiter) = waiter else {
            channel.queue.push_back(message);
            return Ok(false);
        };
        Ok(self.wake(&waiter, Resume::Message(message)))
    }

    /// Drop the channel of `target`, waking everything waiting on it.
    /// Returns the number of tasks woken.
    fn close(&mut self, target: &Handle) -> usize {
        let Some(channel) = self.channels.remove(target) else {
            return 0;
        };
        let mut woken = 0;
        for waiter in channel.waiters {
            if waits_on(&self.registry, &waiter, target) && self.wake(&waiter, Resume::Closed) {
                woken += 1;
            }
        }
        woken
    }

    fn timer_is_live(&self, entry: &TimerEntry) -> bool {
        self.registry.get(&entry.handle).map_or(false, |r| {
            r.state() == TaskState::Sleeping && r.wait_epoch() == entry.epoch
        })
    }

    fn arm(&mut self, handle: Handle, deadline: Option<Instant>) {
        let Some(deadline) = deadline else {
            return;
        };
        if let Some(rec) = self.registry.get(&handle) {
            let epoch = rec.wait_epoch();
            self.timers.arm(deadline, handle, epoch);
        }
    }

    /// Wake every task whose deadline has passed
    fn expire_timers(&mut self, now: Instant) {
        while let Some(entry) = self.timers.pop_expired(now) {
            if !self.timer_is_live(&entry) {
                continue;
            }
            let target = self.registry.get(&entry.handle).and_then(TaskRecord::wait);
            if let Some(channel) = target.and_then(|t| self.channels.get_mut(&t)) {
                channel.waiters.retain(|w| *w != entry.handle);
            }
            if self.wake(&entry.handle, Resume::TimedOut) {
                self.stats.timeouts += 1;
            }
        }
    }

    /// Earliest deadline of a timer that can still fire. Stale entries on
    /// top of the heap are discarded.
    fn next_live_deadline(&mut self) -> Option<Instant> {
        while let Some(entry) = self.timers.peek() {
            if self.timer_is_live(entry) {
                return Some(entry.deadline);
            }
            self.timers.pop();
        }
        None
    }

    /// Relink a task that just switched out. A finished task is unlinked and
    /// handed back so its fiber can be joined outside the lock.
    fn settle(&mut self, handle: Handle, switch: Switch, elapsed: Duration) -> Option<TaskRecord> {
        self.registry.charge(&handle, elapsed);
        match switch {
            Switch::Yield => {
                self.registry.mark_runnable(&handle);
                None
            }
            Switch::Wait { target, deadline } => {
                // a message may have arrived between the task's check and
                // its switch
                let ready = match self.channels.get_mut(&target) {
                    None => Some(Resume::Closed),
                    Some(channel) => channel.queue.pop_front().map(Resume::Message),
                };
                match ready {
                    Some(resume) => {
                        if let Some(rec) = self.registry.get_mut(&handle) {
                            rec.set_resume(resume);
                        }
                        self.registry.mark_runnable(&handle);
                    }
                    None => {
                        self.registry.mark_sleeping(&handle, Some(target));
                        if let Some(channel) = self.channels.get_mut(&target) {
                            channel.waiters.push_back(handle);
                        }
                        self.arm(handle, deadline);
                    }
                }
                None
            }
            Switch::Sleep { deadline } => {
                self.registry.mark_sleeping(&handle, None);
                self.arm(handle, Some(deadline));
                None
            }
            Switch::Finished => {
                self.stats.finished += 1;
                self.retire(handle)
            }
            Switch::Panicked(msg) => {
                error!("task {} panicked: {}", handle, msg);
                self.stats.panicked += 1;
                self.retire(handle)
            }
        }
    }

    fn retire(&mut self, handle: Handle) -> Option<TaskRecord> {
        let record = self.registry.remove(&handle);
        let joiners = self.close(&handle);
        debug!(
            "task {} finished after {:?}, woke {} waiters",
            handle,
            record.as_ref().map(TaskRecord::runtime).unwrap_or_default(),
            joiners
        );
        if let Some(fiber) = record.as_ref().and_then(TaskRecord::fiber) {
            if !fiber.is_finished() {
                panic!("task {} retired while its fiber is still live", handle);
            }
        }
        record
    }
}

struct Shared {
    core: GuardedLock<Core>,
    stack_size: usize,
    /// Set by spawns and wakeups from outside the loop
    pending: Mutex<bool>,
    wakeup: Condvar,
}

impl Shared {
    fn notify(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.wakeup.notify_one();
    }

    fn idle_until(&self, deadline: Instant) {
        let mut pending = self.pending.lock();
        if !*pending {
            self.wakeup.wait_until(&mut pending, deadline);
        }
        *pending = false;
    }

    fn spawn<F>(self: &Arc<Self>, weight: u64, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        if weight == 0 {
            return Err(SchedError::ZeroWeight);
        }
        let handle = {
            let mut core = self.core.lock();
            if core.closed {
                return Err(SchedError::Shutdown);
            }
            if core.registry.len() >= core.registry.max_tasks() {
                return Err(SchedError::RegistryFull {
                    max_tasks: core.registry.max_tasks(),
                });
            }
            core.fresh_handle()
        };

        let shared = Arc::clone(self);
        let fiber = Fiber::spawn(
            format!("fam-task-{}", handle),
            self.stack_size,
            move |suspender| {
                let cx = TaskContext {
                    handle,
                    suspender,
                    shared,
                };
                entry(&cx);
            },
        )
        .map_err(SchedError::StackAllocation)?;
        let record = TaskRecord::new(handle, weight).with_fiber(fiber);

        {
            let mut core = self.core.lock();
            if core.closed {
                return Err(SchedError::Shutdown);
            }
            core.registry.add(record)?;
            core.channels.insert(
                handle,
                Channel {
                    task_bound: true,
                    ..Channel::default()
                },
            );
            core.stats.spawned += 1;
        }
        debug!("spawned task {} (weight {})", handle, weight);
        self.notify();
        Ok(handle)
    }

    fn send(&self, target: Handle, message: Message) -> Result<(), SchedError> {
        let woke = self.core.lock().deliver(target, message)?;
        if woke {
            self.notify();
        }
        Ok(())
    }

    fn create_channel(&self) -> Handle {
        let mut core = self.core.lock();
        let handle = core.fresh_handle();
        core.channels.insert(handle, Channel::default());
        debug!("created channel {}", handle);
        handle
    }

    fn close_channel(&self, handle: Handle) -> Result<(), SchedError> {
        let woken = {
            let mut core = self.core.lock();
            match core.channels.get(&handle) {
                Some(channel) if !channel.task_bound => {}
                _ => return Err(SchedError::UnknownChannel(handle)),
            }
            core.close(&handle)
        };
        debug!("closed channel {}, woke {} waiters", handle, woken);
        if woken > 0 {
            self.notify();
        }
        Ok(())
    }
}

/// What the loop does next
enum Step {
    Run {
        handle: Handle,
        port: FiberPort,
        resume: Resume,
    },
    Idle(Instant),
}

/// Single-threaded cooperative scheduler
pub struct Scheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler. Fails if `config` does not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => CsRng::from_seed(seed),
            None => CsRng::from_entropy(),
        };
        let core = Core {
            registry: Registry::new(config.capacity, config.max_tasks, config.policy),
            channels: FxHashMap::default(),
            timers: Timers::default(),
            rng,
            stats: RunStats::default(),
            closed: false,
        };
        debug!(
            "scheduler created: {} buckets, {} max tasks, {} policy",
            config.capacity, config.max_tasks, config.policy
        );
        Ok(Self {
            shared: Arc::new(Shared {
                core: GuardedLock::new("scheduler", core),
                stack_size: config.stack_size,
                pending: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
            config,
        })
    }

    /// Configuration the scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run queue policy
    pub fn policy(&self) -> SchedulePolicy {
        self.config.policy
    }

    /// Spawn a task with weight 1
    pub fn spawn<F>(&self, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(1, entry)
    }

    /// Spawn a task with a lottery weight
    pub fn spawn_weighted<F>(&self, weight: u64, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(weight, entry)
    }

    /// Send a message to a task or channel
    pub fn send(&self, target: Handle, message: Message) -> Result<(), SchedError> {
        self.shared.send(target, message)
    }

    /// Create a channel that is not bound to any task
    pub fn create_channel(&self) -> Handle {
        self.shared.create_channel()
    }

    /// Close a channel made by [`create_channel`](Self::create_channel).
    /// Its waiters wake with no message.
    pub fn close_channel(&self, handle: Handle) -> Result<(), SchedError> {
        self.shared.close_channel(handle)
    }

    /// Cloneable handle for spawning and sending from other threads
    pub fn spawner(&self) -> Spawner {
        Spawner {
            shared: Arc::clone(&self.shared),
        }
    }

    /// State of a live task
    pub fn state_of(&self, handle: &Handle) -> Option<TaskState> {
        self.shared.core.lock().registry.get(handle).map(TaskRecord::state)
    }

    /// Number of live tasks
    pub fn task_count(&self) -> usize {
        self.shared.core.lock().registry.len()
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> RunStats {
        self.shared.core.lock().stats.clone()
    }

    /// Mix fresh OS entropy into the handle and draw stream
    pub fn reseed(&self) {
        self.shared.core.lock().rng.reseed();
    }

    /// Drive tasks until none is runnable and no timer is pending.
    ///
    /// Tasks still blocked on a handle nobody will notify are left sleeping;
    /// they are cancelled when the scheduler is dropped.
    pub fn run(&mut self) -> RunStats {
        loop {
            let step = {
                let mut guard = self.shared.core.lock();
                let core = &mut *guard;
                core.expire_timers(Instant::now());
                if let Some(handle) = core.registry.pick_next(&mut core.rng) {
                    core.registry.mark_running(&handle);
                    core.stats.switches += 1;
                    let Some(rec) = core.registry.get_mut(&handle) else {
                        panic!("picked task {} is not registered", handle);
                    };
                    let resume = rec.take_resume();
                    let Some(port) = rec.fiber().map(Fiber::port) else {
                        panic!("task {} has no fiber", handle);
                    };
                    Step::Run {
                        handle,
                        port,
                        resume,
                    }
                } else if let Some(deadline) = core.next_live_deadline() {
                    trace!("nothing runnable, {} timers pending", core.timers.len());
                    Step::Idle(deadline)
                } else {
                    let sleeping = core.registry.len();
                    if sleeping > 0 {
                        warn!(
                            "scheduler stopped with {} tasks still sleeping and no pending timers",
                            sleeping
                        );
                    }
                    break core.stats.clone();
                }
            };

            match step {
                Step::Run {
                    handle,
                    port,
                    resume,
                } => {
                    trace!("switch in {}", handle);
                    let started = Instant::now();
                    let switch = port.resume(resume);
                    let elapsed = started.elapsed();
                    trace!("switch out {} ({:?}) after {:?}", handle, switch, elapsed);
                    let retired = self.shared.core.lock().settle(handle, switch, elapsed);
                    drop(retired);
                }
                Step::Idle(deadline) => {
                    trace!("idle until {:?}", deadline.saturating_duration_since(Instant::now()));
                    self.shared.idle_until(deadline);
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.shared.core.is_poisoned() {
            warn!("scheduler lock poisoned, cancelling tasks from inconsistent state");
        }
        let (records, channels) = {
            let mut core = self.shared.core.lock_for_teardown();
            core.closed = true;
            if !core.timers.is_empty() {
                trace!("discarding {} pending timers", core.timers.len());
                core.timers.clear();
            }
            let channels = std::mem::take(&mut core.channels);
            (core.registry.drain(), channels)
        };
        if !records.is_empty() {
            debug!("cancelling {} unfinished tasks", records.len());
        }
        // fibers unwind here, outside the lock
        drop(records);
        drop(channels);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cloneable spawning and messaging access to a scheduler
#[derive(Clone)]
pub struct Spawner {
    shared: Arc<Shared>,
}

impl Spawner {
    /// Spawn a task with weight 1
    pub fn spawn<F>(&self, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(1, entry)
    }

    /// Spawn a task with a lottery weight
    pub fn spawn_weighted<F>(&self, weight: u64, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(weight, entry)
    }

    /// Send a message to a task or channel
    pub fn send(&self, target: Handle, message: Message) -> Result<(), SchedError> {
        self.shared.send(target, message)
    }

    /// Create an unbound channel
    pub fn create_channel(&self) -> Handle {
        self.shared.create_channel()
    }

    /// Close an unbound channel
    pub fn close_channel(&self, handle: Handle) -> Result<(), SchedError> {
        self.shared.close_channel(handle)
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner").finish_non_exhaustive()
    }
}

/// A running task's view of its scheduler
///
/// Every method that suspends (`yield_now`, `wait_on`, `recv`, `sleep`)
/// returns only after the scheduler switches back into this task.
pub struct TaskContext {
    handle: Handle,
    suspender: Suspender,
    shared: Arc<Shared>,
}

impl TaskContext {
    /// Handle of this task
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Let other runnable tasks run
    pub fn yield_now(&self) {
        self.suspender.suspend(Switch::Yield);
    }

    /// Block until a message is sent to `target`, `target` finishes or
    /// closes, or `timeout` elapses. `Duration::ZERO` waits without a
    /// deadline.
    ///
    /// Returns the message, or `None` on timeout, closure, or if `target`
    /// is not a live task or channel. Waiting on a task handle doubles as a
    /// join. A message already queued on `target` is returned at once.
    pub fn wait_on(&self, target: Handle, timeout: Duration) -> Option<Message> {
        {
            let mut core = self.shared.core.lock();
            let channel = core.channels.get_mut(&target)?;
            if let Some(message) = channel.queue.pop_front() {
                return Some(message);
            }
        }
        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout.min(FOREVER))
        };
        match self.suspender.suspend(Switch::Wait { target, deadline }) {
            Resume::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Wait for a message sent to this task
    pub fn recv(&self, timeout: Duration) -> Option<Message> {
        self.wait_on(self.handle, timeout)
    }

    /// Suspend for at least `duration`. Messages stay queued.
    pub fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            self.yield_now();
            return;
        }
        let deadline = Instant::now() + duration.min(FOREVER);
        self.suspender.suspend(Switch::Sleep { deadline });
    }

    /// Spawn a sibling task with weight 1
    pub fn spawn<F>(&self, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(1, entry)
    }

    /// Spawn a sibling task with a lottery weight
    pub fn spawn_weighted<F>(&self, weight: u64, entry: F) -> Result<Handle, SchedError>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.spawn(weight, entry)
    }

    /// Send a message to a task or channel
    pub fn send(&self, target: Handle, message: Message) -> Result<(), SchedError> {
        self.shared.send(target, message)
    }

    /// Spawner sharing this task's scheduler
    pub fn spawner(&self) -> Spawner {
        Spawner {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Build a scheduler, spawn `main`, and run until nothing is left to do
pub fn run_to_completion<F>(config: SchedulerConfig, main: F) -> Result<RunStats, SchedError>
where
    F: FnOnce(&TaskContext) + Send + 'static,
{
    let mut scheduler = Scheduler::new(config)?;
    scheduler.spawn(main)?;
    Ok(scheduler.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_capacity(16)
            .with_max_tasks(8)
            .with_stack_size(64 * 1024)
            .with_seed([4; 32])
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Scheduler::new(config().with_stack_size(1000)).unwrap_err();
        assert!(matches!(err, SchedError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_run_returns_immediately() {
        let mut sched = Scheduler::new(config()).unwrap();
        assert_eq!(sched.run(), RunStats::default());
    }

    #[test]
    fn test_spawned_task_is_runnable_until_run() {
        let mut sched = Scheduler::new(config()).unwrap();
        let h = sched.spawn(|_| {}).unwrap();
        assert_eq!(sched.state_of(&h), Some(TaskState::Runnable));
        assert_eq!(sched.task_count(), 1);

        let stats = sched.run();
        assert_eq!(stats.spawned, 1);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.switches, 1);
        assert_eq!(sched.state_of(&h), None);
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn test_zero_weight_rejected() {
        let sched = Scheduler::new(config()).unwrap();
        assert!(matches!(
            sched.spawn_weighted(0, |_| {}),
            Err(SchedError::ZeroWeight)
        ));
    }

    #[test]
    fn test_spawn_fails_when_full() {
        let sched = Scheduler::new(config().with_max_tasks(2)).unwrap();
        sched.spawn(|_| {}).unwrap();
        sched.spawn(|_| {}).unwrap();
        assert!(matches!(
            sched.spawn(|_| {}),
            Err(SchedError::RegistryFull { max_tasks: 2 })
        ));
    }

    #[test]
    fn test_send_to_unknown_handle() {
        let sched = Scheduler::new(config()).unwrap();
        let nobody = Handle::from_bytes([0; 32]);
        assert!(matches!(
            sched.send(nobody, Message::new(())),
            Err(SchedError::UnknownChannel(h)) if h == nobody
        ));
    }

    #[test]
    fn test_close_channel_only_closes_unbound_channels() {
        let sched = Scheduler::new(config()).unwrap();
        let task = sched.spawn(|_| {}).unwrap();
        assert!(sched.close_channel(task).is_err());

        let ch = sched.create_channel();
        sched.send(ch, Message::new(1u8)).unwrap();
        sched.close_channel(ch).unwrap();
        assert!(sched.close_channel(ch).is_err());
        assert!(sched.send(ch, Message::new(2u8)).is_err());
    }

    #[test]
    fn test_spawner_after_drop_reports_shutdown() {
        let sched = Scheduler::new(config()).unwrap();
        let spawner = sched.spawner();
        drop(sched);
        assert!(matches!(spawner.spawn(|_| {}), Err(SchedError::Shutdown)));
    }

    #[test]
    fn test_drop_cancels_tasks_even_with_poisoned_lock() {
        use std::panic::{self, AssertUnwindSafe};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Tracker(Arc<AtomicUsize>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(config()).unwrap();
        let ch = sched.create_channel();
        let tracker = Tracker(Arc::clone(&dropped));
        sched
            .spawn(move |cx| {
                let _tracker = tracker;
                cx.wait_on(ch, Duration::ZERO);
            })
            .unwrap();
        sched.run();

        let shared = Arc::clone(&sched.shared);
        let poisoned = panic::catch_unwind(AssertUnwindSafe(|| {
            let _core = shared.core.lock();
            panic!("loop failure");
        }));
        assert!(poisoned.is_err());
        assert!(shared.core.is_poisoned());

        drop(sched);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_to_completion() {
        let stats = run_to_completion(config(), |cx| {
            cx.spawn(|cx| cx.yield_now()).unwrap();
            cx.yield_now();
        })
        .unwrap();
        assert_eq!(stats.spawned, 2);
        assert_eq!(stats.finished, 2);
    }
}
