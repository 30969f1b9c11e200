use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fabric_core::{now_millis, NetworkOptions};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::link::{Link, LinkMode};
use crate::router::Router;

/// The controller's table of every known link.
///
/// Lookups and iteration go straight to the concurrent map. Router reports
/// are additionally serialized by `report_lock` so two routers reporting the
/// same link at once cannot both insert it.
pub struct LinkManager {
    links: DashMap<String, Arc<Link>>,
    report_lock: Mutex<()>,
    initial_latency: Duration,
}

impl LinkManager {
    pub fn new(options: &NetworkOptions) -> Self {
        Self::with_initial_latency(options.initial_link_latency)
    }

    pub fn with_initial_latency(initial_latency: Duration) -> Self {
        Self {
            links: DashMap::new(),
            report_lock: Mutex::new(()),
            initial_latency,
        }
    }

    /// Reconciles a link reported by `src`.
    ///
    /// A report whose iteration does not exceed the stored one is stale and
    /// returns the stored link with `false`. Otherwise any older link with the
    /// same id is replaced by a new connected link and `true` is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn router_reported_link(
        &self,
        link_id: &str,
        iteration: u32,
        protocol: &str,
        dial_address: &str,
        src: Arc<Router>,
        dst: Option<Arc<Router>>,
        dst_id: &str,
    ) -> (Arc<Link>, bool) {
        let _guard = self.report_lock.lock();

        let existing = self.get(link_id);
        if let Some(existing) = &existing {
            if existing.iteration >= iteration {
                return (Arc::clone(existing), false);
            }
        }

        if let Some(existing) = existing {
            self.remove(&existing);
            info!(
                router_id = %src.id,
                link_id = %link_id,
                dest_router_id = %dst_id,
                iteration,
                "replaced link with newer iteration {} => {}",
                existing.iteration,
                iteration
            );
        }

        let link = Arc::new(
            Link::new(
                link_id,
                src,
                dst_id,
                protocol,
                dial_address,
                self.initial_latency,
            )
            .with_iteration(iteration)
            .with_dst(dst)
            .with_state(LinkMode::Connected),
        );
        self.add(Arc::clone(&link));
        (link, true)
    }

    /// Inserts a link and indexes it on both endpoints.
    pub fn add(&self, link: Arc<Link>) {
        self.links.insert(link.id.clone(), Arc::clone(&link));
        link.src.links().add(Arc::clone(&link), &link.dst_id);
        if let Some(dst) = link.dst() {
            dst.links().add(Arc::clone(&link), &link.src.id);
        }
    }

    pub fn get(&self, link_id: &str) -> Option<Arc<Link>> {
        self.links.get(link_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has(&self, link_id: &str) -> bool {
        self.links.contains_key(link_id)
    }

    pub fn all(&self) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Snapshot of the table keyed by link id.
    pub fn link_map(&self) -> BTreeMap<String, Arc<Link>> {
        self.links
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn links_in_mode(&self, mode: LinkMode) -> Vec<Arc<Link>> {
        self.matching(|link| link.current_state().mode == mode)
    }

    /// Removes `link` if the table still holds the same iteration of it, then
    /// drops it from both endpoints' indexes. A stale handle cannot evict a
    /// newer link with the same id. Returns whether anything was removed.
    pub fn remove(&self, link: &Arc<Link>) -> bool {
        let removed = self
            .links
            .remove_if(&link.id, |_, current| current.iteration == link.iteration)
            .is_some();

        if removed {
            link.src.links().remove(link, &link.dst_id);
            if let Some(dst) = link.dst() {
                dst.links().remove(link, &link.src.id);
            }
            debug!(link_id = %link.id, iteration = link.iteration, "removed link");
        }
        removed
    }

    /// Removes every link whose source router has disconnected.
    pub fn scan_for_dead_links(&self) -> usize {
        let dead = self.matching(|link| !link.src.is_connected());
        let mut removed = 0;
        for link in &dead {
            if self.remove(link) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "removed links from disconnected routers");
        }
        removed
    }

    /// Attaches links that name `router` as destination to it. Used when a
    /// router (re)connects after its peers already reported links to it.
    pub fn build_router_links(&self, router: &Arc<Router>) {
        for entry in self.links.iter() {
            let link = entry.value();
            if link.dst_id == router.id {
                router.links().add(Arc::clone(link), &link.src.id);
                link.set_dst(Some(Arc::clone(router)));
            }
        }
    }

    /// Distinct connected routers one usable link away from `router`.
    pub fn connected_neighbors_of_router(&self, router: &Router) -> Vec<Arc<Router>> {
        let mut neighbors: BTreeMap<String, Arc<Router>> = BTreeMap::new();

        for link in router.links().links() {
            let Some(dst) = link.dst() else {
                continue;
            };
            if !dst.is_connected() || !link.is_usable() {
                continue;
            }
            if link.src.id != router.id {
                neighbors.insert(link.src.id.clone(), Arc::clone(&link.src));
            }
            if link.dst_id != router.id {
                neighbors.insert(link.dst_id.clone(), dst);
            }
        }

        neighbors.into_values().collect()
    }

    /// Cheapest usable link between `a` and `b` in either direction. Equal
    /// costs resolve to the lexicographically smallest link id so repeated
    /// queries over the same topology pick the same link.
    pub fn least_expensive_link(&self, a: &Router, b: &Router) -> Option<Arc<Link>> {
        a.links()
            .links_to(&b.id)
            .into_iter()
            .filter(|link| link.is_usable() && link.joins(&a.id, &b.id))
            .min_by(|x, y| x.cost().cmp(&y.cost()).then_with(|| x.id.cmp(&y.id)))
    }

    /// Candidate links the controller should ask routers to dial.
    ///
    /// For every ordered pair of distinct routers, each destination listener
    /// whose protocol has neither a connected link nor a link pending for less
    /// than `pending_timeout` (in either direction) yields a new pending link.
    /// Routers that manage their own links are never used as sources. The
    /// candidates are not added to the table.
    pub fn missing_links(&self, routers: &[Arc<Router>], pending_timeout: Duration) -> Vec<Link> {
        let pending_limit = now_millis() - duration_millis(pending_timeout);
        let mut missing = Vec::new();

        for src in routers {
            if src.supports_link_management() {
                continue;
            }
            for dst in routers {
                if src.id == dst.id {
                    continue;
                }
                for listener in &dst.listeners {
                    if self.has_link(src, dst, &listener.protocol, pending_limit) {
                        continue;
                    }
                    let link = Link::new(
                        uuid::Uuid::now_v7().to_string(),
                        Arc::clone(src),
                        dst.id.clone(),
                        listener.protocol.clone(),
                        listener.address.clone(),
                        self.initial_latency,
                    )
                    .with_dst(Some(Arc::clone(dst)));
                    debug!(
                        link_id = %link.id,
                        src_router_id = %src.id,
                        dst_router_id = %dst.id,
                        protocol = %listener.protocol,
                        "missing link"
                    );
                    missing.push(link);
                }
            }
        }

        missing
    }

    /// Drops links that have been pending for longer than `pending_timeout`.
    pub fn clear_expired_pending(&self, pending_timeout: Duration) -> usize {
        let pending_limit = now_millis() - duration_millis(pending_timeout);
        let expired = self.matching(|link| {
            let state = link.current_state();
            state.mode == LinkMode::Pending && state.timestamp < pending_limit
        });

        let mut removed = 0;
        for link in &expired {
            if self.remove(link) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(count = removed, "cleared expired pending links");
        }
        removed
    }

    /// Counts links per router id, both directions.
    pub fn link_counts(&self) -> HashMap<String, usize> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in self.links.iter() {
            let (src, dst) = entry.value().endpoints();
            *counts.entry(src.to_string()).or_default() += 1;
            *counts.entry(dst.to_string()).or_default() += 1;
        }
        counts
    }

    fn matching(&self, predicate: impl Fn(&Link) -> bool) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn has_link(&self, a: &Router, b: &Router, protocol: &str, pending_limit: i64) -> bool {
        Self::has_directed_link(a, b, protocol, pending_limit)
            || Self::has_directed_link(b, a, protocol, pending_limit)
    }

    fn has_directed_link(a: &Router, b: &Router, protocol: &str, pending_limit: i64) -> bool {
        a.links().links_to(&b.id).iter().any(|link| {
            if link.src.id != a.id || link.dst_id != b.id || link.protocol != protocol {
                return false;
            }
            let state = link.current_state();
            state.mode == LinkMode::Connected
                || (state.mode == LinkMode::Pending && state.timestamp > pending_limit)
        })
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
