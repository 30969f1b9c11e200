use std::sync::Arc;

use dashmap::DashMap;
use fabric_core::ChangeContext;
use parking_lot::Mutex;
use prost::Message;

use crate::entity::{
    CreateEntityCommand, DeleteEntityCommand, Entity, EntityCreator, EntityDeleter,
    EntityMarshaller, EntityTyped, EntityUpdater, UpdateEntityCommand,
};
use crate::error::CommandError;
use crate::Decoders;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
}

impl Note {
    pub fn new(id: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
        }
    }
}

impl Entity for Note {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, PartialEq, prost::Message)]
struct NoteMessage {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, tag = "2")]
    title: String,
    #[prost(string, tag = "3")]
    body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("note {0} not found")]
pub struct NoteNotFound(pub String);

/// Minimal manager over an in-memory note table.
#[derive(Default)]
pub struct NoteManager {
    pub notes: DashMap<String, Note>,
    pub last_ctx: Mutex<Option<ChangeContext>>,
}

impl NoteManager {
    pub fn new(decoders: &Decoders) -> Arc<Self> {
        let manager = Arc::new(Self::default());
        decoders.register_entity_decoders::<Note, _>(&manager);
        manager
    }
}

impl EntityTyped for NoteManager {
    fn entity_type(&self) -> &'static str {
        "notes"
    }
}

impl EntityMarshaller<Note> for NoteManager {
    fn marshal(&self, entity: &Note) -> Result<Vec<u8>, CommandError> {
        Ok(NoteMessage {
            id: entity.id.clone(),
            title: entity.title.clone(),
            body: entity.body.clone(),
        }
        .encode_to_vec())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Note, CommandError> {
        let msg = NoteMessage::decode(data)?;
        Ok(Note {
            id: msg.id,
            title: msg.title,
            body: msg.body,
        })
    }
}

impl EntityCreator<Note> for NoteManager {
    fn apply_create(&self, cmd: &CreateEntityCommand<Note>) -> Result<(), CommandError> {
        self.notes.insert(cmd.entity.id.clone(), cmd.entity.clone());
        *self.last_ctx.lock() = Some(cmd.ctx.clone());
        Ok(())
    }
}

impl EntityUpdater<Note> for NoteManager {
    fn apply_update(&self, cmd: &UpdateEntityCommand<Note>) -> Result<(), CommandError> {
        let mut current = self
            .notes
            .get_mut(&cmd.entity.id)
            .ok_or_else(|| CommandError::apply(NoteNotFound(cmd.entity.id.clone())))?;
        if cmd.updated_fields.is_updated("title") {
            current.title = cmd.entity.title.clone();
        }
        if cmd.updated_fields.is_updated("body") {
            current.body = cmd.entity.body.clone();
        }
        Ok(())
    }
}

impl EntityDeleter for NoteManager {
    fn apply_delete(&self, cmd: &DeleteEntityCommand) -> Result<(), CommandError> {
        self.notes
            .remove(&cmd.id)
            .map(|_| ())
            .ok_or_else(|| CommandError::apply(NoteNotFound(cmd.id.clone())))
    }
}

pub fn create(manager: &Arc<NoteManager>, note: Note) -> CreateEntityCommand<Note> {
    let creator: Arc<dyn EntityCreator<Note>> = Arc::clone(manager) as _;
    CreateEntityCommand::new(creator, note, ChangeContext::new())
}
