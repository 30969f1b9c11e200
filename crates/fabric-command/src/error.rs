use fabric_core::CoreError;

/// Errors raised while encoding, decoding, dispatching or applying commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("no decoder registered for {entity_type}/{operation}")]
    UnknownCommand {
        entity_type: String,
        operation: String,
    },

    #[error("manager for {0} is no longer available")]
    ManagerUnavailable(String),

    #[error("too many updates queued, try again later")]
    TooManyUpdates,

    #[error("replication failed: {0}")]
    Replication(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failure reported by the manager applying the command.
    #[error(transparent)]
    Apply(Box<dyn std::error::Error + Send + Sync>),
}

impl CommandError {
    pub fn apply(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Apply(err.into())
    }

    /// True when the command could not be decoded into something appliable.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::UnknownCommand { .. } | Self::Core(_)
        )
    }
}
