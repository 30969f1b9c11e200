use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

pub const DEFAULT_INITIAL_LINK_LATENCY: Duration = Duration::from_secs(65);
pub const DEFAULT_PENDING_LINK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_ROUTER_COST: u16 = 10;
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_VALIDATION_BATCH_SIZE: usize = 50;

/// Serde helper to serialize/deserialize `std::time::Duration` as milliseconds (u64).
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Tunables for topology tracking, path selection and terminator validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    /// Latency assumed for each side of a freshly reported link until real
    /// measurements arrive.
    #[serde(with = "duration_millis")]
    pub initial_link_latency: Duration,
    /// How long a dialed link may stay pending before it is dropped and
    /// becomes eligible to be dialed again.
    #[serde(with = "duration_millis")]
    pub pending_link_timeout: Duration,
    /// Floor applied to every router's cost when costing a path.
    pub min_router_cost: u16,
    /// Interval between maintenance sweeps.
    #[serde(with = "duration_millis")]
    pub cycle_interval: Duration,
    /// Deadline for a router to answer a terminator validation request.
    #[serde(with = "duration_millis")]
    pub validation_timeout: Duration,
    /// Maximum terminators sent to one router in a single validation request.
    pub validation_batch_size: usize,
    /// Round-trip locally dispatched commands through their binary envelope.
    pub encode_decode_commands: bool,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            initial_link_latency: DEFAULT_INITIAL_LINK_LATENCY,
            pending_link_timeout: DEFAULT_PENDING_LINK_TIMEOUT,
            min_router_cost: DEFAULT_MIN_ROUTER_COST,
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            validation_batch_size: DEFAULT_VALIDATION_BATCH_SIZE,
            encode_decode_commands: false,
        }
    }
}

impl NetworkOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.validation_batch_size == 0 {
            return Err(CoreError::validation(
                "validation_batch_size",
                "must be at least 1",
            ));
        }
        if self.cycle_interval.is_zero() {
            return Err(CoreError::InvalidDuration(
                "cycle_interval must be non-zero".into(),
            ));
        }
        if self.validation_timeout.is_zero() {
            return Err(CoreError::InvalidDuration(
                "validation_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
