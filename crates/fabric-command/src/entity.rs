//! Generic create/update/delete commands over any entity whose manager can
//! marshal it.

use std::collections::BTreeSet;
use std::sync::Arc;

use fabric_core::{proto, ChangeContext};
use prost::Message;

use crate::command::{encode_envelope, Command, OP_CREATE, OP_DELETE, OP_UPDATE};
use crate::error::CommandError;

/// An entity persisted through the command pipeline.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// Names the entity type a manager owns. The name is part of the envelope
/// and must stay stable across releases.
pub trait EntityTyped: Send + Sync {
    fn entity_type(&self) -> &'static str;
}

pub trait EntityMarshaller<E>: EntityTyped {
    fn marshal(&self, entity: &E) -> Result<Vec<u8>, CommandError>;
    fn unmarshal(&self, data: &[u8]) -> Result<E, CommandError>;
}

pub trait EntityCreator<E>: EntityMarshaller<E> {
    fn apply_create(&self, cmd: &CreateEntityCommand<E>) -> Result<(), CommandError>;
}

pub trait EntityUpdater<E>: EntityMarshaller<E> {
    fn apply_update(&self, cmd: &UpdateEntityCommand<E>) -> Result<(), CommandError>;
}

pub trait EntityDeleter: EntityTyped {
    fn apply_delete(&self, cmd: &DeleteEntityCommand) -> Result<(), CommandError>;
}

/// A manager supporting the full generic command set.
pub trait EntityManager<E>: EntityCreator<E> + EntityUpdater<E> + EntityDeleter {}

impl<E, T> EntityManager<E> for T where T: EntityCreator<E> + EntityUpdater<E> + EntityDeleter {}

/// Which fields an update writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdatedFields {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl UpdatedFields {
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(fields.into_iter().map(Into::into).collect())
    }

    pub fn is_updated(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(fields) => fields.contains(field),
        }
    }

    fn to_wire(&self) -> (bool, Vec<String>) {
        match self {
            Self::All => (true, Vec::new()),
            Self::Only(fields) => (false, fields.iter().cloned().collect()),
        }
    }

    fn from_wire(all_fields: bool, fields: Vec<String>) -> Self {
        if all_fields {
            Self::All
        } else {
            Self::Only(fields.into_iter().collect())
        }
    }
}

pub struct CreateEntityCommand<E> {
    pub creator: Arc<dyn EntityCreator<E>>,
    pub entity: E,
    pub ctx: ChangeContext,
    pub flags: u32,
}

impl<E: Entity> CreateEntityCommand<E> {
    pub fn new(creator: Arc<dyn EntityCreator<E>>, entity: E, ctx: ChangeContext) -> Self {
        Self {
            creator,
            entity,
            ctx,
            flags: 0,
        }
    }

    pub fn decode(
        creator: Arc<dyn EntityCreator<E>>,
        payload: &[u8],
    ) -> Result<Self, CommandError> {
        let msg = proto::CreateEntityCommand::decode(payload)?;
        let entity = creator.unmarshal(&msg.entity_data)?;
        Ok(Self {
            creator,
            entity,
            ctx: ChangeContext::from_proto(msg.ctx.as_ref()),
            flags: msg.flags,
        })
    }
}

impl<E: Entity> Command for CreateEntityCommand<E> {
    fn apply(&self) -> Result<(), CommandError> {
        self.creator.apply_create(self)
    }

    fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let msg = proto::CreateEntityCommand {
            ctx: Some(self.ctx.to_proto()),
            entity_data: self.creator.marshal(&self.entity)?,
            flags: self.flags,
        };
        Ok(encode_envelope(self.creator.entity_type(), OP_CREATE, &msg))
    }

    fn change_context(&self) -> &ChangeContext {
        &self.ctx
    }

    fn describe(&self) -> String {
        format!(
            "{}/{} id={}",
            self.creator.entity_type(),
            OP_CREATE,
            self.entity.id()
        )
    }
}

pub struct UpdateEntityCommand<E> {
    pub updater: Arc<dyn EntityUpdater<E>>,
    pub entity: E,
    pub updated_fields: UpdatedFields,
    pub ctx: ChangeContext,
    pub flags: u32,
}

impl<E: Entity> UpdateEntityCommand<E> {
    pub fn new(
        updater: Arc<dyn EntityUpdater<E>>,
        entity: E,
        updated_fields: UpdatedFields,
        ctx: ChangeContext,
    ) -> Self {
        Self {
            updater,
            entity,
            updated_fields,
            ctx,
            flags: 0,
        }
    }

    pub fn decode(
        updater: Arc<dyn EntityUpdater<E>>,
        payload: &[u8],
    ) -> Result<Self, CommandError> {
        let msg = proto::UpdateEntityCommand::decode(payload)?;
        let entity = updater.unmarshal(&msg.entity_data)?;
        Ok(Self {
            updater,
            entity,
            updated_fields: UpdatedFields::from_wire(msg.all_fields, msg.updated_fields),
            ctx: ChangeContext::from_proto(msg.ctx.as_ref()),
            flags: msg.flags,
        })
    }
}

impl<E: Entity> Command for UpdateEntityCommand<E> {
    fn apply(&self) -> Result<(), CommandError> {
        self.updater.apply_update(self)
    }

    fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let (all_fields, updated_fields) = self.updated_fields.to_wire();
        let msg = proto::UpdateEntityCommand {
            ctx: Some(self.ctx.to_proto()),
            entity_data: self.updater.marshal(&self.entity)?,
            updated_fields,
            all_fields,
            flags: self.flags,
        };
        Ok(encode_envelope(self.updater.entity_type(), OP_UPDATE, &msg))
    }

    fn change_context(&self) -> &ChangeContext {
        &self.ctx
    }

    fn describe(&self) -> String {
        format!(
            "{}/{} id={}",
            self.updater.entity_type(),
            OP_UPDATE,
            self.entity.id()
        )
    }
}

pub struct DeleteEntityCommand {
    pub deleter: Arc<dyn EntityDeleter>,
    pub id: String,
    pub ctx: ChangeContext,
}

impl DeleteEntityCommand {
    pub fn new(deleter: Arc<dyn EntityDeleter>, id: impl Into<String>, ctx: ChangeContext) -> Self {
        Self {
            deleter,
            id: id.into(),
            ctx,
        }
    }

    pub fn decode(deleter: Arc<dyn EntityDeleter>, payload: &[u8]) -> Result<Self, CommandError> {
        let msg = proto::DeleteEntityCommand::decode(payload)?;
        Ok(Self {
            deleter,
            id: msg.entity_id,
            ctx: ChangeContext::from_proto(msg.ctx.as_ref()),
        })
    }
}

impl Command for DeleteEntityCommand {
    fn apply(&self) -> Result<(), CommandError> {
        self.deleter.apply_delete(self)
    }

    fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let msg = proto::DeleteEntityCommand {
            ctx: Some(self.ctx.to_proto()),
            entity_id: self.id.clone(),
        };
        Ok(encode_envelope(self.deleter.entity_type(), OP_DELETE, &msg))
    }

    fn change_context(&self) -> &ChangeContext {
        &self.ctx
    }

    fn describe(&self) -> String {
        format!("{}/{} id={}", self.deleter.entity_type(), OP_DELETE, self.id)
    }
}
