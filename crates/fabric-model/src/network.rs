//! The network: owner of every manager, and the glue between topology,
//! terminators and circuits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fabric_command::{Decoders, Dispatcher, LocalDispatcher, RateLimiter};
use fabric_core::{NetworkOptions, Tags};
use fabric_routing::{
    ControlChannel, Link, LinkManager, LinkMode, Path, PathFinder, PathFinderConfig, Router,
    RouterRegistry, RoutingError,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::circuit::{Circuit, CircuitManager};
use crate::db::Db;
use crate::error::ModelError;
use crate::service::{Service, ServiceManager};
use crate::terminator_manager::TerminatorManager;
use crate::xt::{CostedTerminator, LowestCostStrategy, PrecedenceChangeHandler, StrategyRegistry};

pub const ENTITY_TYPE_CIRCUITS: &str = "circuits";

/// Parameters for a new circuit.
#[derive(Debug, Clone, Default)]
pub struct CircuitRequest {
    pub client_id: String,
    /// Service id or name.
    pub service: String,
    /// Router the client is attached to.
    pub ingress_router_id: String,
    pub tags: Tags,
    pub peer_data: BTreeMap<u32, Vec<u8>>,
}

/// Outcome of one maintenance sweep.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub dead_links: usize,
    pub expired_pending: usize,
    /// Links that should be dialed; they are tracked as pending until they
    /// connect or expire.
    pub dial: Vec<Arc<Link>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RerouteOutcome {
    Rerouted,
    /// Another caller holds the circuit's reroute guard.
    InProgress,
    Removed,
}

#[derive(Debug, Default)]
struct RerouteCounts {
    rerouted: usize,
    in_progress: usize,
    removed: usize,
}

impl RerouteCounts {
    fn record(&mut self, outcome: RerouteOutcome) {
        match outcome {
            RerouteOutcome::Rerouted => self.rerouted += 1,
            RerouteOutcome::InProgress => self.in_progress += 1,
            RerouteOutcome::Removed => self.removed += 1,
        }
    }
}

pub struct Network {
    options: NetworkOptions,
    db: Arc<Db>,
    dispatcher: Arc<dyn Dispatcher>,
    routers: Arc<RouterRegistry>,
    links: LinkManager,
    path_finder: PathFinder,
    services: Arc<ServiceManager>,
    terminators: Arc<TerminatorManager>,
    circuits: CircuitManager,
    strategies: StrategyRegistry,
}

impl Network {
    /// Builds a network whose managers register their command decoders with
    /// `dispatcher`.
    pub fn new(
        options: NetworkOptions,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ModelError> {
        options.validate()?;

        let db = Arc::new(Db::new());
        let routers = Arc::new(RouterRegistry::new());
        let services = ServiceManager::new(Arc::clone(&db), Arc::clone(&dispatcher));
        let terminators = TerminatorManager::new(
            Arc::clone(&db),
            Arc::clone(&dispatcher),
            Arc::clone(&routers),
            &options,
        );
        let handler: Arc<dyn PrecedenceChangeHandler> = Arc::clone(&terminators) as _;
        let strategies = StrategyRegistry::new(Arc::new(LowestCostStrategy::new(handler)));

        info!(
            min_router_cost = options.min_router_cost,
            cycle_interval = ?options.cycle_interval,
            "network initialized"
        );

        Ok(Self {
            links: LinkManager::new(&options),
            path_finder: PathFinder::new(PathFinderConfig::from(&options)),
            options,
            db,
            dispatcher,
            routers,
            services,
            terminators,
            circuits: CircuitManager::new(),
            strategies,
        })
    }

    /// A single-controller network applying commands locally.
    pub fn local(options: NetworkOptions, limiter: RateLimiter) -> Result<Self, ModelError> {
        let dispatcher = LocalDispatcher::new(
            Arc::new(Decoders::new()),
            options.encode_decode_commands,
            limiter,
        );
        Self::new(options, Arc::new(dispatcher))
    }

    pub fn options(&self) -> &NetworkOptions {
        &self.options
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn routers(&self) -> &Arc<RouterRegistry> {
        &self.routers
    }

    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    pub fn path_finder(&self) -> &PathFinder {
        &self.path_finder
    }

    pub fn services(&self) -> &Arc<ServiceManager> {
        &self.services
    }

    pub fn terminators(&self) -> &Arc<TerminatorManager> {
        &self.terminators
    }

    pub fn circuits(&self) -> &CircuitManager {
        &self.circuits
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    // ---- Topology ---------------------------------------------------------

    pub fn connect_router(&self, router: Arc<Router>, control: Option<Arc<dyn ControlChannel>>) {
        self.routers.mark_connected(Arc::clone(&router), control);
        self.links.build_router_links(&router);
    }

    /// Marks `router` disconnected, drops its links and fixes up the circuits
    /// that crossed it. Circuits starting or ending at the router are removed.
    pub fn disconnect_router(&self, router: &Arc<Router>) {
        if !self.routers.mark_disconnected(router) {
            debug!(router_id = %router.id, "disconnect of stale router instance ignored");
            return;
        }
        let dead = self.links.scan_for_dead_links();

        let mut outcomes = RerouteCounts::default();
        for circuit in self.circuits.using_router(router) {
            if circuit.is_endpoint(&router.id) {
                self.circuits.remove(&circuit.id);
                outcomes.removed += 1;
            } else {
                outcomes.record(self.reroute_or_remove(&circuit));
            }
        }
        info!(
            router_id = %router.id,
            dead_links = dead,
            circuits_rerouted = outcomes.rerouted,
            circuits_in_progress = outcomes.in_progress,
            circuits_removed = outcomes.removed,
            "router disconnected"
        );
    }

    /// Records a link reported by its source router.
    pub fn link_reported(
        &self,
        link_id: &str,
        iteration: u32,
        protocol: &str,
        dial_address: &str,
        src_router_id: &str,
        dst_router_id: &str,
    ) -> Result<(Arc<Link>, bool), ModelError> {
        let src = self
            .routers
            .get_connected(src_router_id)
            .ok_or_else(|| RoutingError::RouterNotConnected(src_router_id.to_string()))?;
        let dst = self.routers.get_connected(dst_router_id);
        Ok(self.links.router_reported_link(
            link_id,
            iteration,
            protocol,
            dial_address,
            src,
            dst,
            dst_router_id,
        ))
    }

    /// Handles a link failure reported by a router. Reports for another
    /// iteration of the link are ignored. Returns whether a link was removed.
    pub fn link_faulted(&self, link_id: &str, iteration: u32) -> bool {
        let Some(link) = self.links.get(link_id) else {
            return false;
        };
        if link.iteration != iteration {
            debug!(
                link_id,
                iteration,
                current = link.iteration,
                "ignoring fault for stale link iteration"
            );
            return false;
        }
        link.set_state(LinkMode::Failed);
        if !self.links.remove(&link) {
            return false;
        }

        let affected = self.circuits.using_link(&link);
        let mut outcomes = RerouteCounts::default();
        for circuit in &affected {
            outcomes.record(self.reroute_or_remove(circuit));
        }
        info!(
            link_id,
            iteration,
            circuits = affected.len(),
            circuits_rerouted = outcomes.rerouted,
            circuits_in_progress = outcomes.in_progress,
            circuits_removed = outcomes.removed,
            "link faulted"
        );
        true
    }

    // ---- Circuits ---------------------------------------------------------

    fn resolve_service(&self, service: &str) -> Result<Service, ModelError> {
        match self.services.read(service) {
            Ok(found) => Ok(found),
            Err(err) if err.is_not_found() => self
                .services
                .find_by_name(service)?
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    /// Routes a new circuit from the client's router to the best terminator
    /// of the requested service.
    pub fn create_circuit(&self, request: CircuitRequest) -> Result<Arc<Circuit>, ModelError> {
        let service = self.resolve_service(&request.service)?;
        let ingress = self
            .routers
            .get_connected(&request.ingress_router_id)
            .ok_or_else(|| RoutingError::RouterNotConnected(request.ingress_router_id.clone()))?;

        let strategy = self
            .strategies
            .resolve(&service.terminator_strategy)
            .ok_or_else(|| {
                ModelError::validation(
                    "terminatorStrategy",
                    format!("unknown strategy {}", service.terminator_strategy),
                )
            })?;

        let mut paths: HashMap<String, Path> = HashMap::new();
        let mut candidates = Vec::new();
        for terminator in self.terminators.for_service(&service.id)? {
            let Some(egress) = self.routers.get_connected(&terminator.router_id) else {
                continue;
            };
            match self.path_finder.shortest_path(&self.links, &ingress, &egress) {
                Ok(path) => {
                    let cost = path.cost(self.options.min_router_cost);
                    paths.insert(terminator.id.clone(), path);
                    candidates.push(CostedTerminator::new(terminator, cost));
                }
                Err(err) => {
                    debug!(terminator_id = %terminator.id, error = %err, "terminator unreachable");
                }
            }
        }

        let selected = strategy
            .select(&candidates)
            .ok_or_else(|| ModelError::NoTerminators(service.id.clone()))?;
        let path = paths
            .remove(&selected.terminator.id)
            .ok_or_else(|| ModelError::NoTerminators(service.id.clone()))?;

        let circuit = Arc::new(
            Circuit::new(
                uuid::Uuid::now_v7().to_string(),
                request.client_id,
                service.id.clone(),
                selected.terminator.clone(),
                path,
            )
            .with_tags(request.tags)
            .with_peer_data(request.peer_data),
        );
        self.circuits.add(Arc::clone(&circuit));
        info!(
            circuit_id = %circuit.id,
            service_id = %service.id,
            terminator_id = %circuit.terminator.id,
            strategy = strategy.name(),
            path = %circuit.path(),
            "circuit created"
        );
        Ok(circuit)
    }

    pub fn remove_circuit(&self, id: &str) -> Result<Arc<Circuit>, ModelError> {
        self.circuits
            .remove(id)
            .ok_or_else(|| ModelError::not_found(ENTITY_TYPE_CIRCUITS, id))
    }

    /// Recomputes the circuit's path between its current endpoints. Returns
    /// false if another reroute of the circuit is already in progress.
    pub fn reroute_circuit(&self, circuit: &Circuit) -> Result<bool, ModelError> {
        if !circuit.start_reroute() {
            return Ok(false);
        }
        let result = self.recompute_path(circuit);
        circuit.end_reroute();
        result.map(|()| true)
    }

    fn recompute_path(&self, circuit: &Circuit) -> Result<(), ModelError> {
        let current = circuit.path();
        let endpoint = |router: Option<&Arc<Router>>| -> Result<Arc<Router>, ModelError> {
            let id = router
                .map(|r| r.id.clone())
                .ok_or_else(|| RoutingError::InvalidPath("circuit path has no nodes".into()))?;
            Ok(self
                .routers
                .get_connected(&id)
                .ok_or(RoutingError::RouterNotConnected(id))?)
        };
        let ingress = endpoint(current.ingress_router())?;
        let egress = endpoint(current.egress_router())?;

        let found = self.path_finder.shortest_path(&self.links, &ingress, &egress)?;
        if found.equal_path(&current) {
            return Ok(());
        }
        let path = found.with_forwarding_ids(&current.ingress_id, &current.egress_id);
        debug!(circuit_id = %circuit.id, old = %current, new = %path, "circuit rerouted");
        circuit.update_path(path);
        Ok(())
    }

    fn reroute_or_remove(&self, circuit: &Arc<Circuit>) -> RerouteOutcome {
        match self.reroute_circuit(circuit) {
            Ok(true) => RerouteOutcome::Rerouted,
            Ok(false) => {
                debug!(circuit_id = %circuit.id, "circuit reroute already in progress");
                RerouteOutcome::InProgress
            }
            Err(err) => {
                warn!(
                    circuit_id = %circuit.id,
                    error = %err,
                    "unable to reroute circuit, removing it"
                );
                self.circuits.remove(&circuit.id);
                RerouteOutcome::Removed
            }
        }
    }

    /// Feeds the result of dialing a terminator back into its service's
    /// strategy.
    pub fn report_dial_outcome(
        &self,
        terminator_id: &str,
        success: bool,
    ) -> Result<(), ModelError> {
        let terminator = self.terminators.read(terminator_id)?;
        let service = self.services.read(&terminator.service_id)?;
        let Some(strategy) = self.strategies.resolve(&service.terminator_strategy) else {
            return Ok(());
        };
        if success {
            strategy.report_dial_success(&terminator);
        } else {
            strategy.report_dial_failure(&terminator);
        }
        Ok(())
    }

    // ---- Maintenance ------------------------------------------------------

    /// One maintenance sweep: drop dead and expired links, and queue the
    /// links that should exist but don't.
    pub fn run_cycle(&self) -> CycleReport {
        let dead_links = self.links.scan_for_dead_links();
        let expired_pending = self
            .links
            .clear_expired_pending(self.options.pending_link_timeout);

        let connected = self.routers.all_connected();
        let dial: Vec<Arc<Link>> = self
            .links
            .missing_links(&connected, self.options.pending_link_timeout)
            .into_iter()
            .map(Arc::new)
            .collect();
        for link in &dial {
            self.links.add(Arc::clone(link));
        }

        if dead_links > 0 || expired_pending > 0 || !dial.is_empty() {
            info!(
                dead_links,
                expired_pending,
                dial = dial.len(),
                "network maintenance cycle"
            );
        }
        CycleReport {
            dead_links,
            expired_pending,
            dial,
        }
    }

    /// Runs [`Network::run_cycle`] every cycle interval until `shutdown`
    /// turns true or its sender is dropped.
    pub async fn run_maintenance(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.options.cycle_interval, "network maintenance started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("network maintenance stopped");
    }
}
