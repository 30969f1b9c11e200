use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use fabric_command::{
    encode_envelope, upgrade, Command, CommandError, CreateEntityCommand, DeleteEntityCommand,
    Dispatcher, EntityCreator, EntityDeleter, EntityMarshaller, EntityTyped, EntityUpdater,
    UpdateEntityCommand, UpdatedFields,
};
use fabric_core::proto::{self, TerminatorInvalidReason};
use fabric_core::{now_millis, AuthorType, ChangeContext, NetworkOptions, Precedence, SourceType};
use fabric_routing::{ChannelError, ControlMessage, Router, RouterRegistry};
use prost::Message;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::db::{Db, ReadTx, UpdateTx, BUCKET_TERMINATORS};
use crate::error::ModelError;
use crate::service::load_service;
use crate::terminator::*;
use crate::xt::PrecedenceChangeHandler;

pub const ENTITY_TYPE_TERMINATORS: &str = "terminators";
pub const OP_DELETE_BATCH: &str = "deleteBatch";

/// Receives one report per validated terminator.
pub type ValidationCallback = Arc<dyn Fn(TerminatorDetail) + Send + Sync>;

/// Deletes several terminators in one replicated command.
pub struct DeleteTerminatorsBatchCommand {
    pub manager: Arc<TerminatorManager>,
    pub ids: Vec<String>,
    pub ctx: ChangeContext,
}

impl DeleteTerminatorsBatchCommand {
    pub fn decode(manager: Arc<TerminatorManager>, payload: &[u8]) -> Result<Self, CommandError> {
        let msg = proto::DeleteTerminatorsBatchCommand::decode(payload)?;
        Ok(Self {
            manager,
            ids: msg.entity_ids,
            ctx: ChangeContext::from_proto(msg.ctx.as_ref()),
        })
    }
}

impl Command for DeleteTerminatorsBatchCommand {
    fn apply(&self) -> Result<(), CommandError> {
        Ok(self.manager.apply_delete_batch(self)?)
    }

    fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let msg = proto::DeleteTerminatorsBatchCommand {
            ctx: Some(self.ctx.to_proto()),
            entity_ids: self.ids.clone(),
        };
        Ok(encode_envelope(ENTITY_TYPE_TERMINATORS, OP_DELETE_BATCH, &msg))
    }

    fn change_context(&self) -> &ChangeContext {
        &self.ctx
    }

    fn describe(&self) -> String {
        format!(
            "{}/{} count={}",
            ENTITY_TYPE_TERMINATORS,
            OP_DELETE_BATCH,
            self.ids.len()
        )
    }
}

/// Terminators persisted through the command pipeline, plus validation
/// against the routers hosting them.
pub struct TerminatorManager {
    this: Weak<TerminatorManager>,
    db: Arc<Db>,
    dispatcher: Arc<dyn Dispatcher>,
    routers: Arc<RouterRegistry>,
    validation_timeout: Duration,
    validation_batch_size: usize,
}

impl TerminatorManager {
    pub fn new(
        db: Arc<Db>,
        dispatcher: Arc<dyn Dispatcher>,
        routers: Arc<RouterRegistry>,
        options: &NetworkOptions,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            db,
            dispatcher,
            routers,
            validation_timeout: options.validation_timeout,
            validation_batch_size: options.validation_batch_size.max(1),
        });

        let decoders = manager.dispatcher.decoders();
        decoders.register_entity_decoders::<Terminator, _>(&manager);
        let weak = Arc::downgrade(&manager);
        decoders.register(ENTITY_TYPE_TERMINATORS, OP_DELETE_BATCH, move |payload| {
            let manager = upgrade(&weak, ENTITY_TYPE_TERMINATORS)?;
            let cmd: Box<dyn Command> =
                Box::new(DeleteTerminatorsBatchCommand::decode(manager, payload)?);
            Ok(cmd)
        });
        manager
    }

    fn handle(&self) -> Result<Arc<Self>, ModelError> {
        self.this
            .upgrade()
            .ok_or_else(|| CommandError::ManagerUnavailable(ENTITY_TYPE_TERMINATORS.into()).into())
    }

    // ---- Dispatched operations -------------------------------------------

    /// Creates a terminator. Returns it as stored, with id, binding and
    /// timestamps filled in.
    pub fn create(
        &self,
        mut terminator: Terminator,
        ctx: ChangeContext,
    ) -> Result<Terminator, ModelError> {
        if terminator.id.is_empty() {
            terminator.id = uuid::Uuid::now_v7().to_string();
        }
        if terminator.service_id.is_empty() {
            return Err(ModelError::validation(FIELD_TERMINATOR_SERVICE, "must not be empty"));
        }
        if terminator.router_id.is_empty() {
            return Err(ModelError::validation(FIELD_TERMINATOR_ROUTER, "must not be empty"));
        }
        terminator.check_binding();
        let now = now_millis();
        terminator.created_at = now;
        terminator.updated_at = now;

        let creator: Arc<dyn EntityCreator<Terminator>> = self.handle()?;
        let cmd = CreateEntityCommand::new(creator, terminator.clone(), ctx);
        self.dispatcher.dispatch(&cmd)?;
        Ok(terminator)
    }

    pub fn update(
        &self,
        mut terminator: Terminator,
        updated_fields: UpdatedFields,
        ctx: ChangeContext,
    ) -> Result<(), ModelError> {
        terminator.updated_at = now_millis();
        let updater: Arc<dyn EntityUpdater<Terminator>> = self.handle()?;
        let cmd = UpdateEntityCommand::new(updater, terminator, updated_fields, ctx);
        Ok(self.dispatcher.dispatch(&cmd)?)
    }

    pub fn delete(&self, id: &str, ctx: ChangeContext) -> Result<(), ModelError> {
        let deleter: Arc<dyn EntityDeleter> = self.handle()?;
        let cmd = DeleteEntityCommand::new(deleter, id, ctx);
        Ok(self.dispatcher.dispatch(&cmd)?)
    }

    /// Deletes every listed terminator that exists. Ids that are already
    /// gone are ignored.
    pub fn delete_batch(&self, ids: Vec<String>, ctx: ChangeContext) -> Result<(), ModelError> {
        let cmd = DeleteTerminatorsBatchCommand {
            manager: self.handle()?,
            ids,
            ctx,
        };
        Ok(self.dispatcher.dispatch(&cmd)?)
    }

    // ---- Queries ----------------------------------------------------------

    pub fn read(&self, id: &str) -> Result<Terminator, ModelError> {
        self.db
            .view(|tx| Terminator::load(tx, id))?
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_TERMINATORS, id))
    }

    /// Terminators matching `filter`, ordered by id.
    pub fn query(&self, filter: &TerminatorFilter) -> Result<Vec<Terminator>, ModelError> {
        let matching = self.db.view(|tx| {
            let mut matching = Vec::new();
            for id in tx.keys(BUCKET_TERMINATORS) {
                if let Some(terminator) = Terminator::load(tx, &id)? {
                    if filter.matches(&terminator) {
                        matching.push(terminator);
                    }
                }
            }
            Ok::<_, ModelError>(matching)
        })?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching.into_iter().skip(filter.skip).take(limit).collect())
    }

    pub fn all(&self) -> Result<Vec<Terminator>, ModelError> {
        self.query(&TerminatorFilter::all())
    }

    pub fn for_service(&self, service_id: &str) -> Result<Vec<Terminator>, ModelError> {
        self.query(&TerminatorFilter::for_service(service_id))
    }

    pub fn count(&self) -> usize {
        self.db.count(BUCKET_TERMINATORS)
    }

    // ---- Application on each replica --------------------------------------

    fn create_in_tx(tx: &mut UpdateTx<'_>, terminator: &Terminator) -> Result<(), ModelError> {
        if load_service(&*tx, &terminator.service_id)?.is_none() {
            return Err(ModelError::validation(
                FIELD_TERMINATOR_SERVICE,
                format!("service {} not found", terminator.service_id),
            ));
        }
        if terminator.router_id.is_empty() {
            return Err(ModelError::validation(FIELD_TERMINATOR_ROUTER, "must not be empty"));
        }
        let mut terminator = terminator.clone();
        terminator.check_binding();
        tx.insert(BUCKET_TERMINATORS, &terminator.id, terminator.marshal())?;
        Ok(())
    }

    fn update_in_tx(
        tx: &mut UpdateTx<'_>,
        patch: &Terminator,
        fields: &UpdatedFields,
    ) -> Result<(), ModelError> {
        let mut current = Terminator::load(&*tx, &patch.id)?
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_TERMINATORS, &patch.id))?;

        if fields.is_updated(FIELD_TERMINATOR_SERVICE) {
            if load_service(&*tx, &patch.service_id)?.is_none() {
                return Err(ModelError::validation(
                    FIELD_TERMINATOR_SERVICE,
                    format!("service {} not found", patch.service_id),
                ));
            }
            current.service_id = patch.service_id.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_ROUTER) {
            if patch.router_id.is_empty() {
                return Err(ModelError::validation(FIELD_TERMINATOR_ROUTER, "must not be empty"));
            }
            current.router_id = patch.router_id.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_BINDING) {
            current.binding = patch.binding.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_ADDRESS) {
            current.address = patch.address.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_INSTANCE_ID) {
            current.instance_id = patch.instance_id.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_INSTANCE_SECRET) {
            current.instance_secret = patch.instance_secret.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_COST) {
            current.cost = patch.cost;
        }
        if fields.is_updated(FIELD_TERMINATOR_PRECEDENCE) {
            apply_precedence(&mut current, patch.precedence);
        }
        if fields.is_updated(FIELD_TERMINATOR_PEER_DATA) {
            current.peer_data = patch.peer_data.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_TAGS) {
            current.tags = patch.tags.clone();
        }
        if fields.is_updated(FIELD_TERMINATOR_HOST_ID) {
            current.host_id = patch.host_id.clone();
        }
        current.check_binding();
        current.updated_at = patch.updated_at;
        tx.put(BUCKET_TERMINATORS, &current.id, current.marshal());
        Ok(())
    }

    /// Only the controller itself may remove system terminators.
    fn check_deletable(terminator: &Terminator, ctx: &ChangeContext) -> Result<(), ModelError> {
        if terminator.is_system && ctx.author_type() != Some(AuthorType::Controller.as_str()) {
            return Err(ModelError::validation(
                "isSystem",
                format!("terminator {} is a system entity and cannot be deleted", terminator.id),
            ));
        }
        Ok(())
    }

    fn delete_in_tx(
        tx: &mut UpdateTx<'_>,
        id: &str,
        ctx: &ChangeContext,
    ) -> Result<(), ModelError> {
        let terminator = Terminator::load(&*tx, id)?
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_TERMINATORS, id))?;
        Self::check_deletable(&terminator, ctx)?;
        tx.delete(BUCKET_TERMINATORS, id);
        Ok(())
    }

    /// Deletes the present ids in one transaction. Failures don't stop the
    /// batch; they are collected and returned together.
    pub fn apply_delete_batch(
        &self,
        cmd: &DeleteTerminatorsBatchCommand,
    ) -> Result<(), ModelError> {
        let mut errors = Vec::new();
        let result = self.db.update(|tx| {
            for id in &cmd.ids {
                match Terminator::load(&*tx, id) {
                    Ok(Some(terminator)) => match Self::check_deletable(&terminator, &cmd.ctx) {
                        Ok(()) => {
                            tx.delete(BUCKET_TERMINATORS, id);
                        }
                        Err(err) => errors.push(err),
                    },
                    Ok(None) => {
                        debug!(terminator_id = %id, "batch delete skipping missing terminator")
                    }
                    Err(err) => errors.push(err.into()),
                }
            }
            Ok::<_, ModelError>(())
        });
        if let Err(err) = result {
            errors.push(err);
        }
        ModelError::from_list(errors)
    }

    // ---- Validation -------------------------------------------------------

    /// Validates the terminators matching `filter` against their routers.
    ///
    /// Returns the number of terminators that will be reported on, and the
    /// handle of the background task doing the work. `callback` receives one
    /// [`TerminatorDetail`] per terminator. With `fix_invalid` set, invalid
    /// terminators are deleted and reported as fixed. Fails without starting
    /// anything when called outside a tokio runtime.
    pub fn validate_terminators(
        &self,
        filter: &TerminatorFilter,
        fix_invalid: bool,
        callback: ValidationCallback,
    ) -> Result<(usize, JoinHandle<()>), ModelError> {
        let runtime = Handle::try_current()?;
        let terminators = self.query(filter)?;
        let count = terminators.len();
        let manager = self.handle()?;

        let handle = runtime.spawn(async move {
            let mut batches: BTreeMap<String, Vec<Terminator>> = BTreeMap::new();
            let mut tasks = JoinSet::new();

            for terminator in terminators {
                let router_id = terminator.router_id.clone();
                let batch = batches.entry(router_id.clone()).or_default();
                batch.push(terminator);
                if batch.len() >= manager.validation_batch_size {
                    let batch = batches.remove(&router_id).unwrap_or_default();
                    tasks.spawn(Arc::clone(&manager).validate_batch(
                        fix_invalid,
                        router_id,
                        batch,
                        Arc::clone(&callback),
                    ));
                }
            }
            for (router_id, batch) in batches {
                tasks.spawn(Arc::clone(&manager).validate_batch(
                    fix_invalid,
                    router_id,
                    batch,
                    Arc::clone(&callback),
                ));
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    error!(error = %err, "terminator validation task failed");
                }
            }
            info!(terminators = count, "terminator validation complete");
        });

        Ok((count, handle))
    }

    async fn validate_batch(
        self: Arc<Self>,
        fix_invalid: bool,
        router_id: String,
        batch: Vec<Terminator>,
        callback: ValidationCallback,
    ) {
        let router = self.routers.get_connected(&router_id);
        let Some(control) = router.as_ref().and_then(|r| r.control()) else {
            self.report_error(router.as_deref(), &batch, &callback, "router off-line");
            return;
        };

        let request = proto::ValidateTerminatorsRequest {
            terminators: batch
                .iter()
                .map(|t| proto::TerminatorRef {
                    id: t.id.clone(),
                    binding: t.binding.clone(),
                    address: t.address.clone(),
                })
                .collect(),
            fix_invalid,
        };
        let msg =
            ControlMessage::encode(proto::CONTENT_TYPE_VALIDATE_TERMINATORS_REQUEST, &request);
        debug!(
            router_id = %router_id,
            terminators = batch.len(),
            "sending terminator validation request"
        );

        let timeout = self.validation_timeout;
        let reply = match tokio::time::timeout(timeout, control.request(msg)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                let reason = format!("failed to send validation request: {err}");
                self.report_error(router.as_deref(), &batch, &callback, &reason);
                return;
            }
            Err(_) => {
                let reason = ChannelError::Timeout(self.validation_timeout).to_string();
                warn!(router_id = %router_id, "terminator validation timed out");
                self.report_error(router.as_deref(), &batch, &callback, &reason);
                return;
            }
        };

        let response: proto::ValidateTerminatorsResponse =
            match reply.decode(proto::CONTENT_TYPE_VALIDATE_TERMINATORS_RESPONSE) {
                Ok(response) => response,
                Err(err) => {
                    error!(
                        router_id = %router_id,
                        error = %err,
                        "unable to decode terminator validation response"
                    );
                    let reason = format!("invalid validation response: {err}");
                    self.report_error(router.as_deref(), &batch, &callback, &reason);
                    return;
                }
            };

        let invalid_ids: Vec<String> = batch
            .iter()
            .filter(|t| response.states.get(&t.id).is_some_and(|s| !s.valid))
            .map(|t| t.id.clone())
            .collect();
        let fixed =
            fix_invalid && !invalid_ids.is_empty() && self.delete_invalid(invalid_ids).await;

        self.report_states(router.as_deref(), fixed, &batch, &response, &callback);
    }

    /// Deletes the terminators a router reported invalid. The dispatch waits
    /// on the command log, so it runs on the blocking pool.
    async fn delete_invalid(self: &Arc<Self>, ids: Vec<String>) -> bool {
        let manager = Arc::clone(self);
        let ctx = ChangeContext::new()
            .with_source_type(SourceType::WebSocket)
            .with_author_type(AuthorType::Unattributed);
        match tokio::task::spawn_blocking(move || manager.delete_batch(ids, ctx)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(error = %err, "unable to batch delete invalid terminators");
                false
            }
            Err(err) => {
                error!(error = %err, "invalid terminator delete task failed");
                false
            }
        }
    }

    fn report_states(
        &self,
        router: Option<&Router>,
        fixed: bool,
        batch: &[Terminator],
        response: &proto::ValidateTerminatorsResponse,
        callback: &ValidationCallback,
    ) {
        for terminator in batch {
            let mut detail = self.new_detail(router, terminator);
            if let Some(status) = response.states.get(&terminator.id) {
                detail.state = if status.valid {
                    TerminatorState::Valid
                } else {
                    TerminatorInvalidReason::try_from(status.reason)
                        .map(TerminatorState::from_reason)
                        .unwrap_or(TerminatorState::Unknown)
                };
                if !status.valid {
                    detail.fixed = fixed;
                }
                detail.detail = status.detail.clone();
            }
            callback(detail);
        }
    }

    fn report_error(
        &self,
        router: Option<&Router>,
        batch: &[Terminator],
        callback: &ValidationCallback,
        reason: &str,
    ) {
        for terminator in batch {
            let mut detail = self.new_detail(router, terminator);
            detail.state = TerminatorState::Unknown;
            detail.detail = reason.to_string();
            callback(detail);
        }
    }

    fn new_detail(&self, router: Option<&Router>, terminator: &Terminator) -> TerminatorDetail {
        let mut detail = TerminatorDetail::new(terminator);
        if let Ok(Some(service)) = self.db.view(|tx| load_service(tx, &terminator.service_id)) {
            detail.service_name = service.name;
        }
        let router = router
            .map(|r| r.name.clone())
            .or_else(|| self.routers.known_name(&terminator.router_id));
        if let Some(name) = router {
            detail.router_name = name;
        }
        detail
    }
}

/// Runs a dispatch that can wait on the command log. On a multi-threaded
/// runtime the worker hands its other tasks off for the duration.
fn blocking_dispatch<T>(dispatch: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(dispatch)
        }
        _ => dispatch(),
    }
}

/// Entering the failed state remembers the prior precedence; leaving it
/// forgets it.
fn apply_precedence(terminator: &mut Terminator, precedence: Precedence) {
    if precedence.is_failed() {
        if !terminator.precedence.is_failed() {
            terminator.saved_precedence = Some(terminator.precedence);
        }
    } else {
        terminator.saved_precedence = None;
    }
    terminator.precedence = precedence;
}

impl PrecedenceChangeHandler for TerminatorManager {
    fn handle_precedence_change(&self, terminator_id: &str, precedence: Precedence) {
        let mut terminator = match self.read(terminator_id) {
            Ok(terminator) => terminator,
            Err(err) => {
                error!(
                    terminator_id,
                    %precedence,
                    error = %err,
                    "unable to update precedence for terminator"
                );
                return;
            }
        };
        terminator.precedence = precedence;

        let ctx = ChangeContext::new()
            .with_source_type(SourceType::Xt)
            .with_author_type(AuthorType::Controller);
        let fields = UpdatedFields::only([FIELD_TERMINATOR_PRECEDENCE]);
        if let Err(err) = blocking_dispatch(|| self.update(terminator, fields, ctx)) {
            error!(
                terminator_id,
                %precedence,
                error = %err,
                "unable to update precedence for terminator"
            );
        }
    }
}

impl EntityTyped for TerminatorManager {
    fn entity_type(&self) -> &'static str {
        ENTITY_TYPE_TERMINATORS
    }
}

impl EntityMarshaller<Terminator> for TerminatorManager {
    fn marshal(&self, entity: &Terminator) -> Result<Vec<u8>, CommandError> {
        Ok(entity.marshal())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Terminator, CommandError> {
        Ok(Terminator::unmarshal(data)?)
    }
}

impl EntityCreator<Terminator> for TerminatorManager {
    fn apply_create(&self, cmd: &CreateEntityCommand<Terminator>) -> Result<(), CommandError> {
        self.db.update(|tx| Self::create_in_tx(tx, &cmd.entity))?;
        debug!(
            terminator_id = %cmd.entity.id,
            service_id = %cmd.entity.service_id,
            "terminator created"
        );
        Ok(())
    }
}

impl EntityUpdater<Terminator> for TerminatorManager {
    fn apply_update(&self, cmd: &UpdateEntityCommand<Terminator>) -> Result<(), CommandError> {
        Ok(self
            .db
            .update(|tx| Self::update_in_tx(tx, &cmd.entity, &cmd.updated_fields))?)
    }
}

impl EntityDeleter for TerminatorManager {
    fn apply_delete(&self, cmd: &DeleteEntityCommand) -> Result<(), CommandError> {
        Ok(self.db.update(|tx| Self::delete_in_tx(tx, &cmd.id, &cmd.ctx))?)
    }
}
