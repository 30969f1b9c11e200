use std::fmt;

use fabric_command::CommandError;
use fabric_core::CoreError;
use fabric_routing::{ChannelError, RoutingError};

/// Errors raised by the in-memory transactional store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{bucket}/{key} already exists")]
    AlreadyExists { bucket: String, key: String },

    #[error("corrupt record {bucket}/{key}: {reason}")]
    Corrupt {
        bucket: String,
        key: String,
        reason: String,
    },
}

/// Errors surfaced by model managers.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{entity_type} with id {id} not found")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("service {0} has no usable terminators")]
    NoTerminators(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("control channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("command error: {0}")]
    Command(CommandError),

    #[error("no async runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("{}", MultipleDisplay(.0))]
    Multiple(Vec<ModelError>),
}

impl ModelError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Collapses collected failures: none is `Ok`, one is itself, more is
    /// [`ModelError::Multiple`].
    pub fn from_list(mut errors: Vec<ModelError>) -> Result<(), ModelError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

struct MultipleDisplay<'a>(&'a [ModelError]);

impl fmt::Display for MultipleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

/// Errors raised while applying a command travel through the dispatcher
/// boxed; unwrap them back into the model error they started as.
impl From<CommandError> for ModelError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Apply(inner) => match inner.downcast::<ModelError>() {
                Ok(model) => *model,
                Err(other) => Self::Command(CommandError::Apply(other)),
            },
            other => Self::Command(other),
        }
    }
}

impl From<ModelError> for CommandError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Command(inner) => inner,
            other => CommandError::apply(other),
        }
    }
}
