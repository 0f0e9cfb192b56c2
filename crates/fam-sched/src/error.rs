//! Scheduler error type

use crate::handle::Handle;

/// Recoverable scheduler failures
///
/// Lookup misses are reported as `None` by the individual operations;
/// broken internal invariants panic instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// The registry already holds its maximum number of live tasks
    #[error("Registry is full: {max_tasks} tasks are live")]
    RegistryFull {
        /// Configured task limit
        max_tasks: usize,
    },

    /// A record with this handle is already registered
    #[error("Handle {0} is already registered")]
    DuplicateHandle(Handle),

    /// The dedicated stack for a task could not be created
    #[error("Failed to allocate task stack: {0}")]
    StackAllocation(#[source] std::io::Error),

    /// No channel or live task is registered under the handle
    #[error("No channel registered under {0}")]
    UnknownChannel(Handle),

    /// Lottery weights must be at least 1
    #[error("Task weight must be non-zero")]
    ZeroWeight,

    /// Adding the task would push the summed lottery weights past `u64::MAX`
    #[error("Task weight {weight} does not fit: live weights already sum to {total}")]
    WeightOverflow {
        /// Weight of the rejected task
        weight: u64,
        /// Sum of live weights
        total: u64,
    },

    /// A configuration value is out of range or unparsable
    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    /// The scheduler owning this spawner has been dropped
    #[error("Scheduler has shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SchedError::RegistryFull { max_tasks: 8 };
        assert_eq!(err.to_string(), "Registry is full: 8 tasks are live");

        let err = SchedError::WeightOverflow { weight: 5, total: 7 };
        assert_eq!(
            err.to_string(),
            "Task weight 5 does not fit: live weights already sum to 7"
        );

        let err = SchedError::InvalidConfig("capacity must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "Invalid scheduler config: capacity must be non-zero"
        );
    }

    #[test]
    fn test_stack_allocation_keeps_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no stack");
        let err = SchedError::StackAllocation(io);
        assert!(err.source().is_some());
    }
}
