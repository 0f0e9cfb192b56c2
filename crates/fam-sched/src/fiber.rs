//! Stackful fibers on parked OS threads
//!
//! Every task runs on a dedicated thread whose stack is sized by the
//! scheduler config. The thread only executes while it holds the baton: the
//! scheduler passes it in with [`FiberPort::resume`] and the task passes it
//! back with [`Suspender::suspend`], so exactly one side runs at a time and a
//! task can suspend from any call depth.

use crate::handle::Handle;
use crate::message::Message;
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Why the scheduler passes the baton to a fiber
#[derive(Debug)]
pub(crate) enum Resume {
    /// First run of the entry function
    Start,
    /// Picked again after a yield
    Continue,
    /// A message was delivered to the handle the task waits on
    Message(Message),
    /// The awaited task finished or the awaited channel closed
    Closed,
    /// The wait deadline passed
    TimedOut,
    /// Unwind the task; the scheduler is shutting down
    Cancel,
}

/// Why a fiber passes the baton back
#[derive(Debug)]
pub(crate) enum Switch {
    /// Still runnable
    Yield,
    /// Block until `target` is notified or `deadline` passes
    Wait {
        target: Handle,
        deadline: Option<Instant>,
    },
    /// Block until `deadline`
    Sleep { deadline: Instant },
    /// Entry function returned (or was cancelled)
    Finished,
    /// Entry function panicked with this message
    Panicked(String),
}

impl Switch {
    fn is_terminal(&self) -> bool {
        matches!(self, Switch::Finished | Switch::Panicked(_))
    }
}

/// Unwind payload of a cancelled fiber
struct Cancelled;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Turn {
    Scheduler,
    Fiber,
    Done,
}

struct BatonState {
    turn: Turn,
    resume: Option<Resume>,
    switch: Option<Switch>,
}

struct Baton {
    state: Mutex<BatonState>,
    turn_changed: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            state: Mutex::new(BatonState {
                turn: Turn::Scheduler,
                resume: None,
                switch: None,
            }),
            turn_changed: Condvar::new(),
        }
    }

    fn resume(&self, resume: Resume) -> Switch {
        let mut state = self.state.lock();
        match state.turn {
            Turn::Scheduler => {}
            Turn::Fiber => panic!("fiber resumed while it is already running"),
            Turn::Done => panic!("fiber resumed after it finished"),
        }
        state.resume = Some(resume);
        state.turn = Turn::Fiber;
        self.turn_changed.notify_all();
        while state.turn == Turn::Fiber {
            self.turn_changed.wait(&mut state);
        }
        match state.switch.take() {
            Some(switch) => switch,
            None => panic!("fiber returned control without a switch reason"),
        }
    }

    fn await_turn(&self) -> Resume {
        let mut state = self.state.lock();
        while state.turn != Turn::Fiber {
            self.turn_changed.wait(&mut state);
        }
        match state.resume.take() {
            Some(resume) => resume,
            None => panic!("fiber woke without a resume reason"),
        }
    }

    fn hand_back(&self, switch: Switch) {
        let mut state = self.state.lock();
        state.turn = if switch.is_terminal() {
            Turn::Done
        } else {
            Turn::Scheduler
        };
        state.switch = Some(switch);
        self.turn_changed.notify_all();
    }

    fn is_done(&self) -> bool {
        self.state.lock().turn == Turn::Done
    }
}

/// Task-side end of the baton
pub(crate) struct Suspender {
    baton: Arc<Baton>,
}

impl Suspender {
    /// Hand control to the scheduler and block until resumed.
    ///
    /// A cancel request unwinds the calling stack instead of returning,
    /// unless the thread is already unwinding, in which case `Cancel` is
    /// returned as a value.
    pub(crate) fn suspend(&self, switch: Switch) -> Resume {
        self.baton.hand_back(switch);
        match self.baton.await_turn() {
            Resume::Cancel if !thread::panicking() => panic::resume_unwind(Box::new(Cancelled)),
            other => other,
        }
    }
}

/// Scheduler-side end of the baton, detached from the owning [`Fiber`]
pub(crate) struct FiberPort(Arc<Baton>);

impl FiberPort {
    /// Run the fiber until it yields, waits or finishes
    pub(crate) fn resume(&self, resume: Resume) -> Switch {
        self.0.resume(resume)
    }
}

/// A parked task thread
pub(crate) struct Fiber {
    baton: Arc<Baton>,
    thread: Option<JoinHandle<()>>,
}

impl Fiber {
    /// Create the thread and park it until the first resume.
    ///
    /// Panics in `body` are caught here and reported as
    /// [`Switch::Panicked`]; they never reach the scheduler thread.
    pub(crate) fn spawn<F>(name: String, stack_size: usize, body: F) -> io::Result<Self>
    where
        F: FnOnce(Suspender) + Send + 'static,
    {
        let baton = Arc::new(Baton::new());
        let theirs = Arc::clone(&baton);
        let thread = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || {
                let outcome = match theirs.await_turn() {
                    Resume::Cancel => Switch::Finished,
                    _ => {
                        let suspender = Suspender {
                            baton: Arc::clone(&theirs),
                        };
                        match panic::catch_unwind(AssertUnwindSafe(|| body(suspender))) {
                            Ok(()) => Switch::Finished,
                            Err(payload) if payload.is::<Cancelled>() => Switch::Finished,
                            Err(payload) => Switch::Panicked(panic_message(payload.as_ref())),
                        }
                    }
                };
                theirs.hand_back(outcome);
            })?;
        Ok(Self {
            baton,
            thread: Some(thread),
        })
    }

    pub(crate) fn port(&self) -> FiberPort {
        FiberPort(Arc::clone(&self.baton))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.baton.is_done()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        while !self.baton.is_done() {
            trace!("cancelling suspended fiber");
            self.baton.resume(Resume::Cancel);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STACK: usize = 64 * 1024;

    #[test]
    fn test_fiber_runs_only_when_resumed() {
        let steps = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&steps);
        let fiber = Fiber::spawn("t".into(), STACK, move |s| {
            seen.fetch_add(1, Ordering::SeqCst);
            s.suspend(Switch::Yield);
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(steps.load(Ordering::SeqCst), 0);
        let port = fiber.port();
        assert!(matches!(port.resume(Resume::Start), Switch::Yield));
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(matches!(port.resume(Resume::Continue), Switch::Finished));
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert!(fiber.is_finished());
    }

    #[test]
    fn test_resume_value_reaches_fiber() {
        let fiber = Fiber::spawn("t".into(), STACK, |s| {
            let target = Handle::from_bytes([1; 32]);
            match s.suspend(Switch::Wait {
                target,
                deadline: None,
            }) {
                Resume::Message(m) => assert_eq!(m.downcast::<u8>().unwrap(), 9),
                other => panic!("unexpected resume {:?}", other),
            }
        })
        .unwrap();
        let port = fiber.port();
        assert!(matches!(port.resume(Resume::Start), Switch::Wait { .. }));
        assert!(matches!(
            port.resume(Resume::Message(Message::new(9u8))),
            Switch::Finished
        ));
    }

    #[test]
    fn test_panic_is_contained() {
        let fiber = Fiber::spawn("t".into(), STACK, |_| panic!("task blew up")).unwrap();
        match fiber.port().resume(Resume::Start) {
            Switch::Panicked(msg) => assert_eq!(msg, "task blew up"),
            other => panic!("unexpected switch {:?}", other),
        }
    }

    #[test]
    fn test_drop_cancels_suspended_fiber() {
        struct Flag(Arc<AtomicUsize>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let resumed_after_cancel = Arc::new(AtomicUsize::new(0));
        let (d, r) = (Arc::clone(&dropped), Arc::clone(&resumed_after_cancel));
        let fiber = Fiber::spawn("t".into(), STACK, move |s| {
            let _flag = Flag(d);
            s.suspend(Switch::Yield);
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(matches!(fiber.port().resume(Resume::Start), Switch::Yield));
        drop(fiber);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(resumed_after_cancel.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_before_start_never_runs_body() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let fiber = Fiber::spawn("t".into(), STACK, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(fiber);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
