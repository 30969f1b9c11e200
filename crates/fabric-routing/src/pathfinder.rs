use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use fabric_core::NetworkOptions;
use tracing::debug;

use crate::error::RoutingError;
use crate::link::Link;
use crate::link_manager::LinkManager;
use crate::path::Path;
use crate::router::Router;

/// Configuration for the PathFinder.
#[derive(Debug, Clone)]
pub struct PathFinderConfig {
    /// Floor applied to each router's cost.
    pub min_router_cost: u16,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self {
            min_router_cost: fabric_core::config::DEFAULT_MIN_ROUTER_COST,
        }
    }
}

impl From<&NetworkOptions> for PathFinderConfig {
    fn from(options: &NetworkOptions) -> Self {
        Self {
            min_router_cost: options.min_router_cost,
        }
    }
}

/// Least-cost path search over the live topology.
///
/// Plain Dijkstra where stepping to a neighbour costs the least expensive
/// usable link to it plus the neighbour's (floored) router cost. Routers
/// flagged no-traversal may start or end a path but are never expanded as
/// intermediate hops; disabled routers are never entered.
pub struct PathFinder {
    config: PathFinderConfig,
}

/// Priority queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchNode {
    router_id: String,
    cost: i64,
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: cheaper must compare greater.
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.router_id.cmp(&self.router_id))
    }
}

struct Visit {
    router: Arc<Router>,
    cost: i64,
    via: Option<(String, Arc<Link>)>,
}

impl PathFinder {
    pub fn new(config: PathFinderConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PathFinderConfig::default())
    }

    pub fn config(&self) -> &PathFinderConfig {
        &self.config
    }

    fn router_cost(&self, router: &Router) -> i64 {
        i64::from(router.cost.max(self.config.min_router_cost))
    }

    /// Finds the cheapest path from `src` to `dst`.
    pub fn shortest_path(
        &self,
        links: &LinkManager,
        src: &Arc<Router>,
        dst: &Arc<Router>,
    ) -> Result<Path, RoutingError> {
        for router in [src, dst] {
            if router.disabled {
                return Err(RoutingError::RouterDisabled(router.id.clone()));
            }
            if !router.is_connected() {
                return Err(RoutingError::RouterNotConnected(router.id.clone()));
            }
        }

        if src.id == dst.id {
            return Path::new(vec![Arc::clone(src)], Vec::new());
        }

        let mut visits: HashMap<String, Visit> = HashMap::new();
        let mut heap = BinaryHeap::new();

        let start_cost = self.router_cost(src);
        visits.insert(
            src.id.clone(),
            Visit {
                router: Arc::clone(src),
                cost: start_cost,
                via: None,
            },
        );
        heap.push(SearchNode {
            router_id: src.id.clone(),
            cost: start_cost,
        });

        while let Some(current) = heap.pop() {
            let Some(visit) = visits.get(&current.router_id) else {
                continue;
            };
            if current.cost > visit.cost {
                continue;
            }
            if current.router_id == dst.id {
                break;
            }

            let router = Arc::clone(&visit.router);
            if router.no_traversal && router.id != src.id {
                continue;
            }

            for neighbor in links.connected_neighbors_of_router(&router) {
                if neighbor.disabled {
                    continue;
                }
                let Some(link) = links.least_expensive_link(&router, &neighbor) else {
                    continue;
                };
                let cost = current.cost + link.cost() + self.router_cost(&neighbor);
                let better = visits
                    .get(&neighbor.id)
                    .map_or(true, |existing| cost < existing.cost);
                if better {
                    heap.push(SearchNode {
                        router_id: neighbor.id.clone(),
                        cost,
                    });
                    visits.insert(
                        neighbor.id.clone(),
                        Visit {
                            router: neighbor,
                            cost,
                            via: Some((router.id.clone(), link)),
                        },
                    );
                }
            }
        }

        let no_path = || RoutingError::NoPath {
            src: src.id.clone(),
            dst: dst.id.clone(),
        };

        let mut nodes = Vec::new();
        let mut path_links = Vec::new();
        let mut cursor = dst.id.clone();
        loop {
            let visit = visits.get(&cursor).ok_or_else(no_path)?;
            nodes.push(Arc::clone(&visit.router));
            match &visit.via {
                Some((prev, link)) => {
                    path_links.push(Arc::clone(link));
                    cursor = prev.clone();
                }
                None => break,
            }
        }
        nodes.reverse();
        path_links.reverse();

        let path = Path::new(nodes, path_links)?;
        debug!(
            src_router_id = %src.id,
            dst_router_id = %dst.id,
            cost = path.cost(self.config.min_router_cost),
            path = %path,
            "computed path"
        );
        Ok(path)
    }

    /// Alias used by circuit creation.
    pub fn create_path(
        &self,
        links: &LinkManager,
        src: &Arc<Router>,
        dst: &Arc<Router>,
    ) -> Result<Path, RoutingError> {
        self.shortest_path(links, src, dst)
    }
}
