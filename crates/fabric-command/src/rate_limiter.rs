use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

pub const DEFAULT_LIMITER_SIZE: usize = 100;
pub const MIN_LIMITER_SIZE: usize = 10;

fn default_enabled() -> bool {
    true
}

fn default_queue_size() -> usize {
    DEFAULT_LIMITER_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Operations allowed to wait at once. Raised to [`MIN_LIMITER_SIZE`]
    /// if configured lower.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            queue_size: default_queue_size(),
        }
    }
}

/// Runs operations one at a time, rejecting new work once `queue_size`
/// operations are already waiting or running.
pub struct RateLimiter {
    enabled: bool,
    queue_size: usize,
    queued: AtomicUsize,
    worker: Mutex<()>,
}

struct Slot<'a>(&'a AtomicUsize);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RateLimiter {
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            enabled: config.enabled,
            queue_size: config.queue_size.max(MIN_LIMITER_SIZE),
            queued: AtomicUsize::new(0),
            worker: Mutex::new(()),
        }
    }

    /// A limiter that runs everything immediately.
    pub fn disabled() -> Self {
        Self::new(&RateLimiterConfig {
            enabled: false,
            queue_size: MIN_LIMITER_SIZE,
        })
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn run<T>(&self, f: impl FnOnce() -> Result<T, CommandError>) -> Result<T, CommandError> {
        if !self.enabled {
            return f();
        }

        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.queue_size).then_some(n + 1)
            })
            .map_err(|_| CommandError::TooManyUpdates)?;
        let _slot = Slot(&self.queued);

        let _worker = self.worker.lock();
        f()
    }
}
