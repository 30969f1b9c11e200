use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::Command;
use crate::decoder::Decoders;
use crate::error::CommandError;
use crate::rate_limiter::RateLimiter;

/// Entry point for every state mutation.
pub trait Dispatcher: Send + Sync {
    /// Applies `command` everywhere it needs to be applied before returning.
    fn dispatch(&self, command: &dyn Command) -> Result<(), CommandError>;

    /// The decoder registry commands are decoded with.
    fn decoders(&self) -> &Arc<Decoders>;
}

/// Dispatcher for a single controller: commands apply directly.
///
/// With `encode_decode` set, each command is first encoded and decoded again
/// and the decoded copy is applied, so the replication path is exercised even
/// without a cluster.
pub struct LocalDispatcher {
    decoders: Arc<Decoders>,
    encode_decode: bool,
    limiter: RateLimiter,
}

impl LocalDispatcher {
    pub fn new(decoders: Arc<Decoders>, encode_decode: bool, limiter: RateLimiter) -> Self {
        Self {
            decoders,
            encode_decode,
            limiter,
        }
    }
}

impl Dispatcher for LocalDispatcher {
    fn dispatch(&self, command: &dyn Command) -> Result<(), CommandError> {
        debug!(
            command = %command.describe(),
            change_id = command.change_context().change_id().unwrap_or_default(),
            "dispatching command"
        );
        self.limiter.run(|| {
            if self.encode_decode {
                let data = command.encode()?;
                let decoded = self.decoders.decode(&data)?;
                decoded.apply()
            } else {
                command.apply()
            }
        })
    }

    fn decoders(&self) -> &Arc<Decoders> {
        &self.decoders
    }
}

/// An ordered replicated log, such as a consensus group.
///
/// `propose` must not return until the entry is committed and applied on this
/// replica, and must return the result of that local application.
pub trait ReplicatedLog: Send + Sync {
    fn propose(&self, data: Vec<u8>) -> Result<u64, CommandError>;
}

/// Dispatcher for a clustered controller: commands are encoded and handed to
/// the replicated log, and apply on each replica from there.
pub struct ReplicatedDispatcher {
    log: Arc<dyn ReplicatedLog>,
    decoders: Arc<Decoders>,
    limiter: RateLimiter,
}

impl ReplicatedDispatcher {
    pub fn new(log: Arc<dyn ReplicatedLog>, decoders: Arc<Decoders>, limiter: RateLimiter) -> Self {
        Self {
            log,
            decoders,
            limiter,
        }
    }
}

impl Dispatcher for ReplicatedDispatcher {
    fn dispatch(&self, command: &dyn Command) -> Result<(), CommandError> {
        let data = command.encode()?;

        // Undecodable commands never reach the log.
        if let Err(err) = self.decoders.decode(&data) {
            warn!(
                command = %command.describe(),
                error = %err,
                "refusing to replicate undecodable command"
            );
            return Err(err);
        }

        let index = self.limiter.run(|| self.log.propose(data))?;
        debug!(command = %command.describe(), index, "command committed");
        Ok(())
    }

    fn decoders(&self) -> &Arc<Decoders> {
        &self.decoders
    }
}
