//! Cooperative task scheduler with capability handles
//!
//! Tasks are identified by unguessable 256-bit [`Handle`]s drawn from a
//! per-scheduler CSPRNG. A fixed-capacity, hash-chained [`Registry`] maps
//! handles to task records and keeps the Runnable ones in a [`RunQueue`]:
//!
//! - [`SchedulePolicy::Uniform`]: flat array, uniform random pick
//! - [`SchedulePolicy::Fair`]: order-statistics tree keyed by run time
//! - [`SchedulePolicy::Lottery`]: order-statistics tree, weighted pick
//!
//! The [`Scheduler`] loop switches into one task at a time. Each task runs on
//! its own stack and suspends only at [`TaskContext::yield_now`],
//! [`TaskContext::wait_on`], [`TaskContext::recv`] and
//! [`TaskContext::sleep`].
//!
//! ```ignore
//! let stats = fam_sched::run_to_completion(SchedulerConfig::default(), |cx| {
//!     let child = cx.spawn(|cx| {
//!         let msg = cx.recv(Duration::ZERO).unwrap();
//!         assert_eq!(msg.downcast::<u32>().unwrap(), 7);
//!     }).unwrap();
//!     cx.send(child, Message::new(7u32)).unwrap();
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod config;
mod error;
mod fiber;
mod handle;
mod lock;
mod message;
mod registry;
mod rng;
mod runqueue;
mod scheduler;
mod task;
mod timer;

pub use config::{SchedulePolicy, SchedulerConfig, PAGE_SIZE};
pub use error::SchedError;
pub use handle::Handle;
pub use lock::{GuardedLock, LockGuard};
pub use message::Message;
pub use registry::Registry;
pub use rng::CsRng;
pub use runqueue::{FairQueue, LotteryQueue, RunQueue, UniformQueue};
pub use scheduler::{run_to_completion, RunStats, Scheduler, Spawner, TaskContext};
pub use task::{RunKey, RunRef, SlotId, TaskRecord, TaskState};
