use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::dispatcher::ReplicatedLog;
use crate::error::CommandError;
use crate::state_machine::CommandStateMachine;

struct LogState {
    entries: Vec<Vec<u8>>,
    replicas: Vec<Arc<CommandStateMachine>>,
}

/// A replicated log that lives in one process.
///
/// Entries are committed in proposal order and applied synchronously to every
/// attached replica. Proposing on the log itself proposes as replica 0, the
/// one passed to [`MemoryLog::new`]; [`MemoryLog::member`] proposes as any
/// other replica. Used for single-process clusters and tests.
pub struct MemoryLog {
    state: Mutex<LogState>,
}

impl MemoryLog {
    pub fn new(local: Arc<CommandStateMachine>) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                replicas: vec![local],
            }),
        }
    }

    /// Attaches another replica and replays every committed entry into it.
    /// Returns the replica's position, for [`MemoryLog::member`].
    pub fn add_replica(&self, replica: Arc<CommandStateMachine>) -> usize {
        let mut state = self.state.lock();
        for (i, data) in state.entries.iter().enumerate() {
            let index = i as u64 + 1;
            if let Err(err) = replica.apply(index, data) {
                warn!(index, error = %err, "replica failed to apply entry during catch-up");
            }
        }
        state.replicas.push(replica);
        state.replicas.len() - 1
    }

    /// The log as seen from the replica at `replica`: proposals return that
    /// replica's apply result.
    pub fn member(self: &Arc<Self>, replica: usize) -> MemoryLogMember {
        MemoryLogMember {
            log: Arc::clone(self),
            replica,
        }
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Committed entry at `index` (1-based).
    pub fn entry(&self, index: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let i = usize::try_from(index).ok()?.checked_sub(1)?;
        state.entries.get(i).cloned()
    }

    fn propose_as(&self, proposer: usize, data: Vec<u8>) -> Result<u64, CommandError> {
        let mut state = self.state.lock();
        if proposer >= state.replicas.len() {
            return Err(CommandError::Replication(format!(
                "replica {proposer} is not attached to the log"
            )));
        }
        state.entries.push(data);
        let index = state.entries.len() as u64;
        let state = &*state;
        let Some(data) = state.entries.last() else {
            return Err(CommandError::Replication("log entry vanished".into()));
        };

        let mut local_result = Ok(());
        for (i, replica) in state.replicas.iter().enumerate() {
            let result = replica.apply(index, data);
            if i == proposer {
                local_result = result;
            } else if let Err(err) = result {
                warn!(index, replica = i, error = %err, "replica failed to apply entry");
            }
        }

        local_result.map(|_| index)
    }
}

impl ReplicatedLog for MemoryLog {
    fn propose(&self, data: Vec<u8>) -> Result<u64, CommandError> {
        self.propose_as(0, data)
    }
}

/// One replica's handle on a shared [`MemoryLog`].
pub struct MemoryLogMember {
    log: Arc<MemoryLog>,
    replica: usize,
}

impl MemoryLogMember {
    pub fn replica(&self) -> usize {
        self.replica
    }
}

impl ReplicatedLog for MemoryLogMember {
    fn propose(&self, data: Vec<u8>) -> Result<u64, CommandError> {
        self.log.propose_as(self.replica, data)
    }
}
