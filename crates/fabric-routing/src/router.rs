use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fabric_core::Listener;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::channel::ControlChannel;
use crate::link::Link;

/// Optional features a router advertises when it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// The router dials and manages its own links; the controller must not
    /// ask it to dial missing links.
    LinkManagement,
    /// The router answers terminator validation requests.
    TerminatorValidation,
}

/// Build and capability information reported by a router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterMetadata {
    pub version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub capabilities: BTreeSet<Capability>,
}

/// Index of the links attached to a router, keyed by the id of the router on
/// the other end.
#[derive(Default)]
pub struct RouterLinks {
    by_router: RwLock<HashMap<String, Vec<Arc<Link>>>>,
}

impl RouterLinks {
    pub fn add(&self, link: Arc<Link>, other_router_id: &str) {
        let mut by_router = self.by_router.write();
        let links = by_router.entry(other_router_id.to_string()).or_default();
        if !links.iter().any(|l| Arc::ptr_eq(l, &link)) {
            links.push(link);
        }
    }

    pub fn remove(&self, link: &Arc<Link>, other_router_id: &str) {
        let mut by_router = self.by_router.write();
        if let Some(links) = by_router.get_mut(other_router_id) {
            links.retain(|l| !Arc::ptr_eq(l, link));
            if links.is_empty() {
                by_router.remove(other_router_id);
            }
        }
    }

    /// All attached links.
    pub fn links(&self) -> Vec<Arc<Link>> {
        self.by_router.read().values().flatten().cloned().collect()
    }

    /// Links between this router and `other_router_id`, in either direction.
    pub fn links_to(&self, other_router_id: &str) -> Vec<Arc<Link>> {
        self.by_router
            .read()
            .get(other_router_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_router.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_router.read().is_empty()
    }

    pub fn clear(&self) {
        self.by_router.write().clear();
    }
}

/// A transit router known to the controller.
///
/// Identity and configuration are fixed for the lifetime of the value; the
/// connection handle, connected flag and link index change as the router
/// connects and disconnects.
pub struct Router {
    pub id: String,
    pub name: String,
    pub fingerprint: Option<String>,
    pub listeners: Vec<Listener>,
    pub cost: u16,
    pub no_traversal: bool,
    pub disabled: bool,
    pub metadata: RouterMetadata,
    connected: AtomicBool,
    control: RwLock<Option<Arc<dyn ControlChannel>>>,
    links: RouterLinks,
}

impl Router {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            fingerprint: None,
            listeners: Vec::new(),
            cost: 0,
            no_traversal: false,
            disabled: false,
            metadata: RouterMetadata::default(),
            connected: AtomicBool::new(false),
            control: RwLock::new(None),
            links: RouterLinks::default(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_listeners(mut self, listeners: Vec<Listener>) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_cost(mut self, cost: u16) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_no_traversal(mut self, no_traversal: bool) -> Self {
        self.no_traversal = no_traversal;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_metadata(mut self, metadata: RouterMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn control(&self) -> Option<Arc<dyn ControlChannel>> {
        self.control.read().clone()
    }

    pub fn set_control(&self, control: Option<Arc<dyn ControlChannel>>) {
        *self.control.write() = control;
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.metadata.capabilities.contains(&capability)
    }

    pub fn supports_link_management(&self) -> bool {
        self.has_capability(Capability::LinkManagement)
    }

    pub fn links(&self) -> &RouterLinks {
        &self.links
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cost", &self.cost)
            .field("no_traversal", &self.no_traversal)
            .field("disabled", &self.disabled)
            .field("connected", &self.is_connected())
            .field("links", &self.links.len())
            .finish()
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r/{}", self.id)
    }
}
