//! Prefetch pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of pooled batches.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Minimum pool size; one batch in use plus one being prefetched.
pub const MIN_POOL_SIZE: usize = 2;

/// Default time to wait for the worker to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Where compute steps read batch contents from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Host memory only
    #[default]
    Host,
    /// Batches are staged to accelerator memory before publication
    Accelerator,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Configuration for a prefetching pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Pipeline name, used for logging and the worker thread name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of preallocated batches (default: 4).
    ///
    /// The worker can run at most `pool_size - 1` batches ahead of the
    /// consumer. Larger pools absorb more producer jitter at the cost of
    /// memory.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Host-only or host plus accelerator staging (default: host).
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Maximum time to wait for the worker to stop, in seconds (default: 10).
    #[serde(
        default = "default_shutdown_timeout",
        with = "duration_secs",
        rename = "shutdown_timeout_secs"
    )]
    pub shutdown_timeout: Duration,

    /// Maximum time the consumer waits for a ready batch, in milliseconds.
    ///
    /// Unset by default: the consumer waits for as long as it takes.
    #[serde(default, with = "optional_duration_ms", rename = "wait_timeout_ms")]
    pub wait_timeout: Option<Duration>,
}

fn default_name() -> String {
    "data".to_string()
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            pool_size: default_pool_size(),
            execution_mode: ExecutionMode::default(),
            shutdown_timeout: default_shutdown_timeout(),
            wait_timeout: None,
        }
    }
}

impl PrefetchConfig {
    /// Create a new prefetch configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pipeline name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of pooled batches.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the execution mode.
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the consumer wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size < MIN_POOL_SIZE {
            return Err(format!(
                "pool_size must be at least {}, got {}",
                MIN_POOL_SIZE, self.pool_size
            ));
        }
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than zero".to_string());
        }
        if self.wait_timeout.is_some_and(|t| t.is_zero()) {
            return Err("wait_timeout must be greater than zero when set".to_string());
        }
        Ok(())
    }
}

/// Serde helper for whole-second durations.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for optional millisecond durations.
mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
