//! Live circuits and the in-memory table tracking them.
//!
//! Circuits are never replicated or persisted: each controller only knows the
//! circuits it created.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use fabric_core::{now_millis, Tags};
use fabric_routing::{Link, Path, Router};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::terminator::Terminator;

/// A client session routed across the fabric to one terminator.
pub struct Circuit {
    pub id: String,
    pub client_id: String,
    pub service_id: String,
    pub terminator: Terminator,
    path: RwLock<Path>,
    pub tags: Tags,
    rerouting: AtomicBool,
    pub peer_data: BTreeMap<u32, Vec<u8>>,
    pub created_at: i64,
    updated_at: AtomicI64,
}

impl Circuit {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        service_id: impl Into<String>,
        terminator: Terminator,
        path: Path,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            client_id: client_id.into(),
            service_id: service_id.into(),
            terminator,
            path: RwLock::new(path),
            tags: Tags::new(),
            rerouting: AtomicBool::new(false),
            peer_data: BTreeMap::new(),
            created_at: now,
            updated_at: AtomicI64::new(now),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_peer_data(mut self, peer_data: BTreeMap<u32, Vec<u8>>) -> Self {
        self.peer_data = peer_data;
        self
    }

    /// Snapshot of the current path.
    pub fn path(&self) -> Path {
        self.path.read().clone()
    }

    pub fn update_path(&self, path: Path) {
        *self.path.write() = path;
        self.updated_at.store(now_millis(), Ordering::Release);
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at.load(Ordering::Acquire)
    }

    /// Claims the circuit for rerouting. Returns false if a reroute is
    /// already in progress.
    pub fn start_reroute(&self) -> bool {
        self.rerouting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_reroute(&self) {
        self.rerouting.store(false, Ordering::Release);
    }

    pub fn is_rerouting(&self) -> bool {
        self.rerouting.load(Ordering::Acquire)
    }

    pub fn uses_link(&self, link: &Link) -> bool {
        self.path.read().uses_link(link)
    }

    pub fn uses_router(&self, router: &Router) -> bool {
        self.path.read().uses_router(router)
    }

    /// Whether `router_id` is where the circuit enters or leaves the fabric.
    pub fn is_endpoint(&self, router_id: &str) -> bool {
        let path = self.path.read();
        path.ingress_router().is_some_and(|r| r.id == router_id)
            || path.egress_router().is_some_and(|r| r.id == router_id)
    }

    pub fn summary(&self) -> CircuitSummary {
        CircuitSummary {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            service_id: self.service_id.clone(),
            terminator_id: self.terminator.id.clone(),
            path: self.path.read().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at(),
        }
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("service_id", &self.service_id)
            .field("terminator_id", &self.terminator.id)
            .field("path", &self.path.read().to_string())
            .field("rerouting", &self.is_rerouting())
            .finish()
    }
}

/// Serializable view of a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSummary {
    pub id: String,
    pub client_id: String,
    pub service_id: String,
    pub terminator_id: String,
    pub path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitSort {
    #[default]
    Id,
    CreatedAt,
    UpdatedAt,
}

/// Selects circuits. Unset criteria match everything; time bounds are
/// inclusive.
#[derive(Debug, Clone, Default)]
pub struct CircuitQuery {
    pub client_id: Option<String>,
    pub service_id: Option<String>,
    pub terminator_id: Option<String>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub sort: CircuitSort,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Default)]
struct CircuitIndex {
    by_client: BTreeMap<String, BTreeSet<String>>,
    by_service: BTreeMap<String, BTreeSet<String>>,
    by_terminator: BTreeMap<String, BTreeSet<String>>,
    by_created: BTreeSet<(i64, String)>,
}

fn index_insert(index: &mut BTreeMap<String, BTreeSet<String>>, key: &str, id: &str) {
    index.entry(key.to_string()).or_default().insert(id.to_string());
}

fn index_remove(index: &mut BTreeMap<String, BTreeSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

impl CircuitIndex {
    fn insert(&mut self, circuit: &Circuit) {
        index_insert(&mut self.by_client, &circuit.client_id, &circuit.id);
        index_insert(&mut self.by_service, &circuit.service_id, &circuit.id);
        index_insert(&mut self.by_terminator, &circuit.terminator.id, &circuit.id);
        self.by_created
            .insert((circuit.created_at, circuit.id.clone()));
    }

    fn remove(&mut self, circuit: &Circuit) {
        index_remove(&mut self.by_client, &circuit.client_id, &circuit.id);
        index_remove(&mut self.by_service, &circuit.service_id, &circuit.id);
        index_remove(&mut self.by_terminator, &circuit.terminator.id, &circuit.id);
        self.by_created
            .remove(&(circuit.created_at, circuit.id.clone()));
    }

    /// Ids satisfying the equality and creation-time criteria of `query`.
    fn candidates(&self, query: &CircuitQuery) -> BTreeSet<String> {
        let lookups = [
            (&self.by_client, &query.client_id),
            (&self.by_service, &query.service_id),
            (&self.by_terminator, &query.terminator_id),
        ];

        let mut result: Option<BTreeSet<String>> = None;
        for (index, key) in lookups {
            let Some(key) = key else { continue };
            let ids = index.get(key).cloned().unwrap_or_default();
            result = Some(match result {
                Some(current) => current.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }

        let lo = query.created_after.unwrap_or(i64::MIN);
        let hi = query.created_before.unwrap_or(i64::MAX);
        let in_range = |id: &String, created: i64| {
            created >= lo && created <= hi && result.as_ref().map_or(true, |r| r.contains(id))
        };
        self.by_created
            .iter()
            .filter(|(created, id)| in_range(id, *created))
            .map(|(_, id)| id.clone())
            .collect()
    }
}

/// Circuits created by this controller.
///
/// Reads are lock-free; adds and removes serialize on the index so the table
/// and its indexes always agree.
#[derive(Default)]
pub struct CircuitManager {
    circuits: DashMap<String, Arc<Circuit>>,
    index: RwLock<CircuitIndex>,
}

impl CircuitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a circuit, replacing any other with the same id.
    pub fn add(&self, circuit: Arc<Circuit>) {
        let mut index = self.index.write();
        if let Some(previous) = self.circuits.insert(circuit.id.clone(), Arc::clone(&circuit)) {
            index.remove(&previous);
        }
        index.insert(&circuit);
        debug!(circuit_id = %circuit.id, service_id = %circuit.service_id, "circuit added");
    }

    pub fn get(&self, id: &str) -> Option<Arc<Circuit>> {
        self.circuits.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn has(&self, id: &str) -> bool {
        self.circuits.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<Circuit>> {
        self.circuits.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Circuit>> {
        let mut index = self.index.write();
        let (_, circuit) = self.circuits.remove(id)?;
        index.remove(&circuit);
        debug!(circuit_id = %id, "circuit removed");
        Some(circuit)
    }

    pub fn query(&self, query: &CircuitQuery) -> Vec<Arc<Circuit>> {
        let ids = self.index.read().candidates(query);
        let mut circuits: Vec<_> = ids
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|c| query.updated_after.map_or(true, |after| c.updated_at() >= after))
            .collect();

        match query.sort {
            CircuitSort::Id => circuits.sort_by(|a, b| a.id.cmp(&b.id)),
            CircuitSort::CreatedAt => circuits.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            CircuitSort::UpdatedAt => circuits.sort_by(|a, b| {
                a.updated_at()
                    .cmp(&b.updated_at())
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
        if query.descending {
            circuits.reverse();
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        circuits.into_iter().skip(query.skip).take(limit).collect()
    }

    pub fn for_terminator(&self, terminator_id: &str) -> Vec<Arc<Circuit>> {
        self.query(&CircuitQuery {
            terminator_id: Some(terminator_id.to_string()),
            ..CircuitQuery::default()
        })
    }

    pub fn using_link(&self, link: &Link) -> Vec<Arc<Circuit>> {
        self.matching(|c| c.uses_link(link))
    }

    pub fn using_router(&self, router: &Router) -> Vec<Arc<Circuit>> {
        self.matching(|c| c.uses_router(router))
    }

    fn matching(&self, predicate: impl Fn(&Circuit) -> bool) -> Vec<Arc<Circuit>> {
        let mut circuits: Vec<_> = self
            .circuits
            .iter()
            .filter(|c| predicate(c.value().as_ref()))
            .map(|c| Arc::clone(c.value()))
            .collect();
        circuits.sort_by(|a, b| a.id.cmp(&b.id));
        circuits
    }
}
