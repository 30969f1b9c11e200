use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use fabric_core::proto::CommandEnvelope;
use prost::Message;
use tracing::debug;

use crate::command::{Command, OP_CREATE, OP_DELETE, OP_UPDATE};
use crate::entity::{
    CreateEntityCommand, DeleteEntityCommand, Entity, EntityCreator, EntityDeleter,
    EntityUpdater, UpdateEntityCommand,
};
use crate::error::CommandError;

/// Registry key: entity type plus operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderKey {
    pub entity_type: String,
    pub operation: String,
}

impl DecoderKey {
    pub fn new(entity_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for DecoderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.operation)
    }
}

/// Turns an envelope payload back into a command.
pub type DecoderFn = dyn Fn(&[u8]) -> Result<Box<dyn Command>, CommandError> + Send + Sync;

/// Decoders for every command type this replica understands.
///
/// Managers register their decoders when they are constructed. Decoders hold
/// weak references to their managers so the registry never keeps a manager
/// alive on its own.
#[derive(Default)]
pub struct Decoders {
    decoders: DashMap<DecoderKey, Arc<DecoderFn>>,
}

impl Decoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder, replacing any previous one for the same key.
    pub fn register<F>(&self, entity_type: &str, operation: &str, decoder: F)
    where
        F: Fn(&[u8]) -> Result<Box<dyn Command>, CommandError> + Send + Sync + 'static,
    {
        let key = DecoderKey::new(entity_type, operation);
        debug!(key = %key, "registered command decoder");
        self.decoders.insert(key, Arc::new(decoder));
    }

    pub fn contains(&self, entity_type: &str, operation: &str) -> bool {
        self.decoders
            .contains_key(&DecoderKey::new(entity_type, operation))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<DecoderKey> {
        let mut keys: Vec<_> = self.decoders.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Decodes an encoded envelope into a command.
    pub fn decode(&self, data: &[u8]) -> Result<Box<dyn Command>, CommandError> {
        let envelope = CommandEnvelope::decode(data)?;
        let key = DecoderKey::new(envelope.entity_type, envelope.operation);
        // Release the map guard before running the decoder.
        let decoder = self
            .decoders
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CommandError::UnknownCommand {
                entity_type: key.entity_type.clone(),
                operation: key.operation.clone(),
            })?;
        decoder(&envelope.payload)
    }

    /// Registers create, update and delete decoders for `manager`.
    pub fn register_entity_decoders<E, M>(&self, manager: &Arc<M>)
    where
        E: Entity,
        M: EntityCreator<E> + EntityUpdater<E> + EntityDeleter + 'static,
    {
        self.register_create_decoder::<E, M>(manager);
        self.register_update_decoder::<E, M>(manager);
        self.register_delete_decoder(manager);
    }

    pub fn register_create_decoder<E, M>(&self, manager: &Arc<M>)
    where
        E: Entity,
        M: EntityCreator<E> + 'static,
    {
        let entity_type = manager.entity_type();
        let weak = Arc::downgrade(manager);
        self.register(entity_type, OP_CREATE, move |payload| {
            let creator: Arc<dyn EntityCreator<E>> = upgrade(&weak, entity_type)?;
            let cmd: Box<dyn Command> = Box::new(CreateEntityCommand::decode(creator, payload)?);
            Ok(cmd)
        });
    }

    pub fn register_update_decoder<E, M>(&self, manager: &Arc<M>)
    where
        E: Entity,
        M: EntityUpdater<E> + 'static,
    {
        let entity_type = manager.entity_type();
        let weak = Arc::downgrade(manager);
        self.register(entity_type, OP_UPDATE, move |payload| {
            let updater: Arc<dyn EntityUpdater<E>> = upgrade(&weak, entity_type)?;
            let cmd: Box<dyn Command> = Box::new(UpdateEntityCommand::decode(updater, payload)?);
            Ok(cmd)
        });
    }

    pub fn register_delete_decoder<M>(&self, manager: &Arc<M>)
    where
        M: EntityDeleter + 'static,
    {
        let entity_type = manager.entity_type();
        let weak = Arc::downgrade(manager);
        self.register(entity_type, OP_DELETE, move |payload| {
            let deleter: Arc<dyn EntityDeleter> = upgrade(&weak, entity_type)?;
            let cmd: Box<dyn Command> = Box::new(DeleteEntityCommand::decode(deleter, payload)?);
            Ok(cmd)
        });
    }
}

/// Upgrades a manager handle captured by a decoder.
pub fn upgrade<M>(weak: &Weak<M>, entity_type: &str) -> Result<Arc<M>, CommandError> {
    weak.upgrade()
        .ok_or_else(|| CommandError::ManagerUnavailable(entity_type.to_string()))
}

impl fmt::Debug for Decoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoders")
            .field("keys", &self.keys())
            .finish()
    }
}
