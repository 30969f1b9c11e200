use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::channel::ControlChannel;
use crate::router::Router;

/// Routers that currently hold a control connection to this controller.
///
/// The name of every router that has connected is remembered after it
/// disconnects, for reporting.
pub struct RouterRegistry {
    connected: DashMap<String, Arc<Router>>,
    names: DashMap<String, String>,
}

impl RouterRegistry {
    pub fn new() -> Self {
        Self {
            connected: DashMap::new(),
            names: DashMap::new(),
        }
    }

    /// Records `router` as connected over `control`. A previous entry with
    /// the same id is replaced and returned.
    pub fn mark_connected(
        &self,
        router: Arc<Router>,
        control: Option<Arc<dyn ControlChannel>>,
    ) -> Option<Arc<Router>> {
        router.set_control(control);
        router.set_connected(true);
        info!(router_id = %router.id, name = %router.name, "router connected");
        self.names.insert(router.id.clone(), router.name.clone());
        let previous = self
            .connected
            .insert(router.id.clone(), Arc::clone(&router));
        if let Some(previous) = &previous {
            if !Arc::ptr_eq(previous, &router) {
                previous.set_connected(false);
            }
        }
        previous
    }

    /// Removes the router if `router` is still the registered instance.
    pub fn mark_disconnected(&self, router: &Arc<Router>) -> bool {
        let removed = self
            .connected
            .remove_if(&router.id, |_, current| Arc::ptr_eq(current, router))
            .is_some();
        router.set_connected(false);
        router.set_control(None);
        if removed {
            info!(router_id = %router.id, "router disconnected");
        }
        removed
    }

    pub fn get_connected(&self, router_id: &str) -> Option<Arc<Router>> {
        self.connected
            .get(router_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Name of the router, connected or not, if it has ever connected.
    pub fn known_name(&self, router_id: &str) -> Option<String> {
        if let Some(router) = self.connected.get(router_id) {
            return Some(router.name.clone());
        }
        self.names.get(router_id).map(|name| name.value().clone())
    }

    pub fn is_connected(&self, router_id: &str) -> bool {
        self.connected.contains_key(router_id)
    }

    /// All connected routers, ordered by id.
    pub fn all_connected(&self) -> Vec<Arc<Router>> {
        let mut routers: Vec<_> = self
            .connected
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        routers.sort_by(|a, b| a.id.cmp(&b.id));
        routers
    }

    pub fn count(&self) -> usize {
        self.connected.len()
    }
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
