use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::decoder::Decoders;
use crate::error::CommandError;

/// Applies committed log entries to this replica, in index order.
pub struct CommandStateMachine {
    decoders: Arc<Decoders>,
    last_applied: Mutex<u64>,
}

impl CommandStateMachine {
    pub fn new(decoders: Arc<Decoders>) -> Self {
        Self::with_start_index(decoders, 0)
    }

    /// Resumes from a persisted index; entries at or below it are replays.
    pub fn with_start_index(decoders: Arc<Decoders>, index: u64) -> Self {
        Self {
            decoders,
            last_applied: Mutex::new(index),
        }
    }

    pub fn last_applied(&self) -> u64 {
        *self.last_applied.lock()
    }

    pub fn decoders(&self) -> &Arc<Decoders> {
        &self.decoders
    }

    /// Applies the entry at `index`.
    ///
    /// Replays of already applied entries are skipped. The index advances
    /// even when decoding or applying fails: the entry is committed and will
    /// not be delivered again, so the error is logged and returned to the
    /// caller rather than stalling the log.
    pub fn apply(&self, index: u64, data: &[u8]) -> Result<(), CommandError> {
        let mut last_applied = self.last_applied.lock();
        if index <= *last_applied {
            debug!(index, "skipping replay of command");
            return Ok(());
        }
        *last_applied = index;

        let command = match self.decoders.decode(data) {
            Ok(command) => command,
            Err(err) => {
                error!(index, error = %err, "failed to decode command");
                return Err(err);
            }
        };

        let ctx = command.change_context();
        info!(
            index,
            command = %command.describe(),
            change_id = ctx.change_id().unwrap_or_default(),
            source = ctx.source_type().unwrap_or("unattributed"),
            "applying command"
        );

        command.apply().map_err(|err| {
            error!(index, error = %err, "applying command resulted in error");
            err
        })
    }
}
