//! Fabric Command: replicated state-machine plumbing for the controller.
//!
//! This crate provides:
//! - [`Command`]: a mutation that applies itself locally and encodes itself for replication.
//! - Generic [`CreateEntityCommand`], [`UpdateEntityCommand`] and [`DeleteEntityCommand`].
//! - [`Decoders`]: the registry turning envelopes back into commands, keyed by entity type
//!   and operation.
//! - [`LocalDispatcher`] and [`ReplicatedDispatcher`]: the two ways a command reaches state.
//! - [`CommandStateMachine`]: per-replica application of committed log entries.
//! - [`MemoryLog`]: an in-process replicated log, with a [`MemoryLogMember`] handle per replica.
//! - [`RateLimiter`]: bounded, sequential execution of dispatched commands.

pub mod command;
pub mod decoder;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod memory_log;
pub mod rate_limiter;
pub mod state_machine;

#[cfg(test)]
mod test_support;

// Re-exports for convenience.
pub use command::{encode_envelope, Command, OP_CREATE, OP_DELETE, OP_UPDATE};
pub use decoder::{upgrade, DecoderKey, Decoders};
pub use dispatcher::{Dispatcher, LocalDispatcher, ReplicatedDispatcher, ReplicatedLog};
pub use entity::{
    CreateEntityCommand, DeleteEntityCommand, Entity, EntityCreator, EntityDeleter,
    EntityManager, EntityMarshaller, EntityTyped, EntityUpdater, UpdateEntityCommand,
    UpdatedFields,
};
pub use error::CommandError;
pub use memory_log::{MemoryLog, MemoryLogMember};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use state_machine::CommandStateMachine;
