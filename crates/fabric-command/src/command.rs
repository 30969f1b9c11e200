//! The command contract.
//!
//! A command is a self-describing mutation: it can apply itself to local
//! state and encode itself into an envelope that any replica can decode back
//! into an equivalent command.

use fabric_core::proto::CommandEnvelope;
use fabric_core::ChangeContext;
use prost::Message;

use crate::error::CommandError;

pub const OP_CREATE: &str = "create";
pub const OP_UPDATE: &str = "update";
pub const OP_DELETE: &str = "delete";

pub trait Command: Send + Sync {
    /// Applies the mutation to this replica's state.
    fn apply(&self) -> Result<(), CommandError>;

    /// Encodes the command into a [`CommandEnvelope`].
    fn encode(&self) -> Result<Vec<u8>, CommandError>;

    fn change_context(&self) -> &ChangeContext;

    /// Short description for logs, e.g. `terminators/update`.
    fn describe(&self) -> String;
}

/// Wraps an operation payload in the outer envelope.
pub fn encode_envelope(
    entity_type: &str,
    operation: &str,
    payload: &impl Message,
) -> Vec<u8> {
    CommandEnvelope {
        entity_type: entity_type.to_string(),
        operation: operation.to_string(),
        payload: payload.encode_to_vec(),
    }
    .encode_to_vec()
}
