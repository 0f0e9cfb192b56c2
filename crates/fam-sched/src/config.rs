//! Scheduler configuration

use crate::error::SchedError;
use std::fmt;
use std::str::FromStr;

/// Page granularity that task stack sizes are rounded to
pub const PAGE_SIZE: usize = 4096;

/// How the next runnable task is chosen
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SchedulePolicy {
    /// Uniform random pick among runnable tasks
    Uniform,
    /// Least accumulated run time first, ties broken by spawn order
    #[default]
    Fair,
    /// Random pick proportional to task weight
    Lottery,
}

impl fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulePolicy::Uniform => "uniform",
            SchedulePolicy::Fair => "fair",
            SchedulePolicy::Lottery => "lottery",
        })
    }
}

impl FromStr for SchedulePolicy {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(SchedulePolicy::Uniform),
            "fair" => Ok(SchedulePolicy::Fair),
            "lottery" => Ok(SchedulePolicy::Lottery),
            other => Err(SchedError::InvalidConfig(format!(
                "unknown schedule policy '{}'",
                other
            ))),
        }
    }
}

/// Scheduler limits and policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of hash buckets in the registry
    pub capacity: usize,

    /// Maximum number of live tasks
    pub max_tasks: usize,

    /// Stack size of each task in bytes (non-zero multiple of [`PAGE_SIZE`])
    pub stack_size: usize,

    /// Run queue policy
    pub policy: SchedulePolicy,

    /// Fixed CSPRNG seed (None = OS entropy)
    pub seed: Option<[u8; 32]>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            max_tasks: 4096,
            stack_size: 256 * 1024,
            policy: SchedulePolicy::Fair,
            seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Environment variable overriding `capacity`
    pub const ENV_CAPACITY: &'static str = "FAM_SCHED_CAPACITY";
    /// Environment variable overriding `max_tasks`
    pub const ENV_MAX_TASKS: &'static str = "FAM_SCHED_MAX_TASKS";
    /// Environment variable overriding `stack_size`
    pub const ENV_STACK_SIZE: &'static str = "FAM_SCHED_STACK_SIZE";
    /// Environment variable overriding `policy`
    pub const ENV_POLICY: &'static str = "FAM_SCHED_POLICY";

    /// Set the bucket count
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the live task limit
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Set the per-task stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Set the run queue policy
    pub fn with_policy(mut self, policy: SchedulePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a deterministic CSPRNG seed
    pub fn with_seed(mut self, seed: [u8; 32]) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Defaults overlaid with any `FAM_SCHED_*` environment variables
    pub fn from_env() -> Result<Self, SchedError> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name
    fn overlay<F>(mut self, lookup: F) -> Result<Self, SchedError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(Self::ENV_CAPACITY) {
            self.capacity = parse_size(Self::ENV_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_MAX_TASKS) {
            self.max_tasks = parse_size(Self::ENV_MAX_TASKS, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_STACK_SIZE) {
            self.stack_size = parse_size(Self::ENV_STACK_SIZE, &v)?;
        }
        if let Some(v) = lookup(Self::ENV_POLICY) {
            self.policy = v.parse()?;
        }
        Ok(self)
    }

    /// Reject values the registry and fiber layer cannot honour
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.capacity == 0 {
            return Err(SchedError::InvalidConfig(
                "capacity must be non-zero".to_string(),
            ));
        }
        if self.max_tasks == 0 {
            return Err(SchedError::InvalidConfig(
                "max_tasks must be non-zero".to_string(),
            ));
        }
        // slot indices are u32
        if self.capacity.saturating_add(self.max_tasks) > u32::MAX as usize {
            return Err(SchedError::InvalidConfig(format!(
                "capacity + max_tasks exceeds {}",
                u32::MAX
            )));
        }
        if self.stack_size == 0 || self.stack_size % PAGE_SIZE != 0 {
            return Err(SchedError::InvalidConfig(format!(
                "stack_size {} is not a non-zero multiple of {}",
                self.stack_size, PAGE_SIZE
            )));
        }
        Ok(())
    }
}

fn parse_size(var: &str, value: &str) -> Result<usize, SchedError> {
    value
        .trim()
        .parse()
        .map_err(|_| SchedError::InvalidConfig(format!("{}={} is not a size", var, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.policy, SchedulePolicy::Fair);
        assert_eq!(config.stack_size % PAGE_SIZE, 0);
    }

    #[test]
    fn test_builder_setters() {
        let config = SchedulerConfig::default()
            .with_capacity(16)
            .with_max_tasks(32)
            .with_stack_size(64 * 1024)
            .with_policy(SchedulePolicy::Lottery)
            .with_seed([1; 32]);
        config.validate().unwrap();
        assert_eq!(config.capacity, 16);
        assert_eq!(config.max_tasks, 32);
        assert_eq!(config.seed, Some([1; 32]));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            SchedulerConfig::default().with_capacity(0),
            SchedulerConfig::default().with_max_tasks(0),
            SchedulerConfig::default().with_stack_size(0),
            SchedulerConfig::default().with_stack_size(5000),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(SchedError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("FAIR".parse::<SchedulePolicy>().unwrap(), SchedulePolicy::Fair);
        assert_eq!(
            " lottery ".parse::<SchedulePolicy>().unwrap(),
            SchedulePolicy::Lottery
        );
        assert_eq!(
            SchedulePolicy::Uniform.to_string().parse::<SchedulePolicy>().unwrap(),
            SchedulePolicy::Uniform
        );
        assert!("round-robin".parse::<SchedulePolicy>().is_err());
    }

    #[test]
    fn test_env_overlay() {
        let config = SchedulerConfig::default()
            .overlay(env(&[
                ("FAM_SCHED_CAPACITY", "64"),
                ("FAM_SCHED_POLICY", "uniform"),
            ]))
            .unwrap();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.policy, SchedulePolicy::Uniform);
        assert_eq!(config.max_tasks, 4096);

        let err = SchedulerConfig::default()
            .overlay(env(&[("FAM_SCHED_STACK_SIZE", "big")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid scheduler config: FAM_SCHED_STACK_SIZE=big is not a size"
        );
    }
}
