use std::sync::Arc;

use fabric_command::{
    CommandError, CreateEntityCommand, DeleteEntityCommand, Dispatcher, Entity, EntityCreator,
    EntityDeleter, EntityMarshaller, EntityTyped, EntityUpdater, UpdateEntityCommand,
    UpdatedFields,
};
use fabric_core::{now_millis, proto, ChangeContext, Tags};
use prost::Message;
use serde::Serialize;
use tracing::debug;

use crate::db::{Db, ReadTx, UpdateTx, BUCKET_SERVICES, BUCKET_TERMINATORS};
use crate::error::{ModelError, StoreError};
use crate::terminator::Terminator;

pub const ENTITY_TYPE_SERVICES: &str = "services";

pub const FIELD_SERVICE_NAME: &str = "name";
pub const FIELD_SERVICE_TERMINATOR_STRATEGY: &str = "terminatorStrategy";
pub const FIELD_SERVICE_TAGS: &str = "tags";

/// A named destination that terminators attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Name of the strategy choosing between this service's terminators.
    pub terminator_strategy: String,
    pub tags: Tags,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Service {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            terminator_strategy: String::new(),
            tags: Tags::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.terminator_strategy = strategy.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn to_proto(&self) -> proto::Service {
        proto::Service {
            id: self.id.clone(),
            name: self.name.clone(),
            terminator_strategy: self.terminator_strategy.clone(),
            tags: self
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn from_proto(msg: proto::Service) -> Self {
        Self {
            id: msg.id,
            name: msg.name,
            terminator_strategy: msg.terminator_strategy,
            tags: msg.tags.into_iter().collect(),
            created_at: msg.created_at,
            updated_at: msg.updated_at,
        }
    }
}

impl Entity for Service {
    fn id(&self) -> &str {
        &self.id
    }
}

fn decode_service(id: &str, data: &[u8]) -> Result<Service, StoreError> {
    proto::Service::decode(data)
        .map(Service::from_proto)
        .map_err(|err| StoreError::Corrupt {
            bucket: BUCKET_SERVICES.into(),
            key: id.into(),
            reason: err.to_string(),
        })
}

pub(crate) fn load_service(tx: &impl ReadTx, id: &str) -> Result<Option<Service>, StoreError> {
    tx.get(BUCKET_SERVICES, id)
        .map(|data| decode_service(id, &data))
        .transpose()
}

fn name_in_use(tx: &impl ReadTx, name: &str, except_id: &str) -> Result<bool, StoreError> {
    for id in tx.keys(BUCKET_SERVICES) {
        if id == except_id {
            continue;
        }
        if let Some(existing) = load_service(tx, &id)? {
            if existing.name == name {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Services persisted through the command pipeline.
pub struct ServiceManager {
    db: Arc<Db>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ServiceManager {
    pub fn new(db: Arc<Db>, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        let manager = Arc::new(Self { db, dispatcher });
        manager
            .dispatcher
            .decoders()
            .register_entity_decoders::<Service, _>(&manager);
        manager
    }

    /// Creates a service, assigning an id and timestamps when missing.
    pub fn create(
        self: &Arc<Self>,
        mut service: Service,
        ctx: ChangeContext,
    ) -> Result<Service, ModelError> {
        if service.id.is_empty() {
            service.id = uuid::Uuid::now_v7().to_string();
        }
        if service.name.is_empty() {
            return Err(ModelError::validation(FIELD_SERVICE_NAME, "must not be empty"));
        }
        let now = now_millis();
        service.created_at = now;
        service.updated_at = now;

        let creator: Arc<dyn EntityCreator<Service>> = Arc::clone(self) as _;
        let cmd = CreateEntityCommand::new(creator, service.clone(), ctx);
        self.dispatcher.dispatch(&cmd)?;
        Ok(service)
    }

    pub fn update(
        self: &Arc<Self>,
        mut service: Service,
        updated_fields: UpdatedFields,
        ctx: ChangeContext,
    ) -> Result<(), ModelError> {
        if updated_fields.is_updated(FIELD_SERVICE_NAME) && service.name.is_empty() {
            return Err(ModelError::validation(FIELD_SERVICE_NAME, "must not be empty"));
        }
        service.updated_at = now_millis();

        let updater: Arc<dyn EntityUpdater<Service>> = Arc::clone(self) as _;
        let cmd = UpdateEntityCommand::new(updater, service, updated_fields, ctx);
        Ok(self.dispatcher.dispatch(&cmd)?)
    }

    /// Deletes a service together with its terminators.
    pub fn delete(self: &Arc<Self>, id: &str, ctx: ChangeContext) -> Result<(), ModelError> {
        let deleter: Arc<dyn EntityDeleter> = Arc::clone(self) as _;
        let cmd = DeleteEntityCommand::new(deleter, id, ctx);
        Ok(self.dispatcher.dispatch(&cmd)?)
    }

    pub fn read(&self, id: &str) -> Result<Service, ModelError> {
        self.db
            .view(|tx| load_service(tx, id))?
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_SERVICES, id))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Service>, ModelError> {
        Ok(self
            .all()?
            .into_iter()
            .find(|service| service.name == name))
    }

    /// Every service, ordered by id.
    pub fn all(&self) -> Result<Vec<Service>, ModelError> {
        let services = self.db.view(|tx| {
            tx.keys(BUCKET_SERVICES)
                .iter()
                .filter_map(|id| load_service(tx, id).transpose())
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(services)
    }

    fn store(tx: &mut UpdateTx<'_>, service: &Service) {
        tx.put(BUCKET_SERVICES, &service.id, service.to_proto().encode_to_vec());
    }

    fn create_in_tx(tx: &mut UpdateTx<'_>, service: &Service) -> Result<(), ModelError> {
        if name_in_use(&*tx, &service.name, &service.id)? {
            return Err(ModelError::validation(
                FIELD_SERVICE_NAME,
                format!("name {} already in use", service.name),
            ));
        }
        tx.insert(
            BUCKET_SERVICES,
            &service.id,
            service.to_proto().encode_to_vec(),
        )?;
        Ok(())
    }

    fn update_in_tx(
        tx: &mut UpdateTx<'_>,
        patch: &Service,
        fields: &UpdatedFields,
    ) -> Result<(), ModelError> {
        let mut current = load_service(&*tx, &patch.id)?
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_SERVICES, &patch.id))?;

        if fields.is_updated(FIELD_SERVICE_NAME) {
            if name_in_use(&*tx, &patch.name, &patch.id)? {
                return Err(ModelError::validation(
                    FIELD_SERVICE_NAME,
                    format!("name {} already in use", patch.name),
                ));
            }
            current.name = patch.name.clone();
        }
        if fields.is_updated(FIELD_SERVICE_TERMINATOR_STRATEGY) {
            current.terminator_strategy = patch.terminator_strategy.clone();
        }
        if fields.is_updated(FIELD_SERVICE_TAGS) {
            current.tags = patch.tags.clone();
        }
        current.updated_at = patch.updated_at;
        Self::store(tx, &current);
        Ok(())
    }

    fn delete_in_tx(tx: &mut UpdateTx<'_>, id: &str) -> Result<(), ModelError> {
        if !tx.delete(BUCKET_SERVICES, id) {
            return Err(ModelError::not_found(ENTITY_TYPE_SERVICES, id));
        }
        for terminator_id in tx.keys(BUCKET_TERMINATORS) {
            let belongs = Terminator::load(&*tx, &terminator_id)?
                .is_some_and(|t| t.service_id == id);
            if belongs {
                tx.delete(BUCKET_TERMINATORS, &terminator_id);
                debug!(service_id = id, terminator_id, "deleted terminator of deleted service");
            }
        }
        Ok(())
    }
}

impl EntityTyped for ServiceManager {
    fn entity_type(&self) -> &'static str {
        ENTITY_TYPE_SERVICES
    }
}

impl EntityMarshaller<Service> for ServiceManager {
    fn marshal(&self, entity: &Service) -> Result<Vec<u8>, CommandError> {
        Ok(entity.to_proto().encode_to_vec())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Service, CommandError> {
        Ok(Service::from_proto(proto::Service::decode(data)?))
    }
}

impl EntityCreator<Service> for ServiceManager {
    fn apply_create(&self, cmd: &CreateEntityCommand<Service>) -> Result<(), CommandError> {
        Ok(self.db.update(|tx| Self::create_in_tx(tx, &cmd.entity))?)
    }
}

impl EntityUpdater<Service> for ServiceManager {
    fn apply_update(&self, cmd: &UpdateEntityCommand<Service>) -> Result<(), CommandError> {
        Ok(self
            .db
            .update(|tx| Self::update_in_tx(tx, &cmd.entity, &cmd.updated_fields))?)
    }
}

impl EntityDeleter for ServiceManager {
    fn apply_delete(&self, cmd: &DeleteEntityCommand) -> Result<(), CommandError> {
        Ok(self.db.update(|tx| Self::delete_in_tx(tx, &cmd.id))?)
    }
}
