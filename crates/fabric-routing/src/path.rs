use std::fmt;
use std::sync::Arc;

use crate::error::RoutingError;
use crate::link::Link;
use crate::router::Router;

/// An ordered sequence of routers and the links joining them.
///
/// `links[i]` joins `nodes[i]` and `nodes[i + 1]`, so a path always has one
/// fewer link than it has nodes. A single-node path has no links: the circuit
/// enters and leaves the fabric at the same router.
#[derive(Clone)]
pub struct Path {
    nodes: Vec<Arc<Router>>,
    links: Vec<Arc<Link>>,
    /// Forwarding address of the circuit at the ingress router.
    pub ingress_id: String,
    /// Forwarding address of the circuit at the egress router.
    pub egress_id: String,
}

impl Path {
    /// Builds a path, checking the node/link shape.
    pub fn new(nodes: Vec<Arc<Router>>, links: Vec<Arc<Link>>) -> Result<Self, RoutingError> {
        if nodes.is_empty() {
            return Err(RoutingError::InvalidPath("path has no nodes".into()));
        }
        if links.len() + 1 != nodes.len() {
            return Err(RoutingError::InvalidPath(format!(
                "{} nodes require {} links, got {}",
                nodes.len(),
                nodes.len() - 1,
                links.len()
            )));
        }
        for (i, link) in links.iter().enumerate() {
            if !link.joins(&nodes[i].id, &nodes[i + 1].id) {
                return Err(RoutingError::InvalidPath(format!(
                    "link {} does not join {} and {}",
                    link.id,
                    nodes[i].id,
                    nodes[i + 1].id
                )));
            }
        }

        Ok(Self {
            nodes,
            links,
            ingress_id: uuid::Uuid::now_v7().to_string(),
            egress_id: uuid::Uuid::now_v7().to_string(),
        })
    }

    /// Keeps the routers and links, taking over an existing circuit's
    /// forwarding addresses.
    pub fn with_forwarding_ids(
        mut self,
        ingress_id: impl Into<String>,
        egress_id: impl Into<String>,
    ) -> Self {
        self.ingress_id = ingress_id.into();
        self.egress_id = egress_id.into();
        self
    }

    pub fn nodes(&self) -> &[Arc<Router>] {
        &self.nodes
    }

    pub fn links(&self) -> &[Arc<Link>] {
        &self.links
    }

    /// Total cost: every link's cost plus every router's cost, with router
    /// costs floored at `min_router_cost`.
    pub fn cost(&self, min_router_cost: u16) -> i64 {
        let link_cost: i64 = self.links.iter().map(|link| link.cost()).sum();
        let router_cost: i64 = self
            .nodes
            .iter()
            .map(|node| i64::from(node.cost.max(min_router_cost)))
            .sum();
        link_cost + router_cost
    }

    /// True when both paths are made of the same router and link instances.
    /// Routers and links are compared by identity, not by field values.
    pub fn equal_path(&self, other: &Path) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.links.len() == other.links.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| Arc::ptr_eq(a, b))
            && self
                .links
                .iter()
                .zip(&other.links)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    pub fn ingress_router(&self) -> Option<&Arc<Router>> {
        self.nodes.first()
    }

    pub fn egress_router(&self) -> Option<&Arc<Router>> {
        self.nodes.last()
    }

    pub fn uses_link(&self, link: &Link) -> bool {
        self.links.iter().any(|l| std::ptr::eq(l.as_ref(), link))
    }

    pub fn uses_router(&self, router: &Router) -> bool {
        self.nodes.iter().any(|n| std::ptr::eq(n.as_ref(), router))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                match self.links.get(i - 1) {
                    Some(link) => write!(f, "->[{link}]->")?,
                    None => f.write_str("->[l/?]->")?,
                }
            }
            write!(f, "[{node}]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn router(id: &str, cost: u16) -> Arc<Router> {
        Arc::new(Router::new(id, id).with_cost(cost))
    }

    fn link(id: &str, src: &Arc<Router>, dst: &Arc<Router>, static_cost: i32) -> Arc<Link> {
        let link = Link::new(
            id,
            Arc::clone(src),
            dst.id.clone(),
            "tls",
            "tls:x:1",
            Duration::ZERO,
        )
        .with_dst(Some(Arc::clone(dst)));
        link.set_static_cost(static_cost);
        Arc::new(link)
    }

    #[test]
    fn test_single_node_cost_applies_floor() {
        let path = Path::new(vec![router("r0", 5)], Vec::new()).unwrap();
        assert_eq!(path.cost(10), 10);
        assert_eq!(path.cost(2), 5);
    }

    #[test]
    fn test_multi_hop_cost() {
        let r0 = router("r0", 0);
        let r1 = router("r1", 20);
        let r2 = router("r2", 3);
        let l0 = link("l0", &r0, &r1, 4);
        let l1 = link("l1", &r2, &r1, 6);

        let path = Path::new(
            vec![Arc::clone(&r0), Arc::clone(&r1), Arc::clone(&r2)],
            vec![l0, l1],
        )
        .unwrap();
        // links 4 + 6, routers max(0,10) + 20 + max(3,10)
        assert_eq!(path.cost(10), 50);
        assert_eq!(path.to_string(), "[r/r0]->[l/l0]->[r/r1]->[l/l1]->[r/r2]");
        assert!(Arc::ptr_eq(path.ingress_router().unwrap(), &r0));
        assert!(Arc::ptr_eq(path.egress_router().unwrap(), &r2));
    }

    #[test]
    fn test_new_rejects_malformed_paths() {
        let r0 = router("r0", 0);
        let r1 = router("r1", 0);
        let r2 = router("r2", 0);
        let l02 = link("l02", &r0, &r2, 1);

        assert!(Path::new(Vec::new(), Vec::new()).is_err());
        assert!(Path::new(vec![Arc::clone(&r0), Arc::clone(&r1)], Vec::new()).is_err());
        assert!(matches!(
            Path::new(vec![r0, r1], vec![l02]),
            Err(RoutingError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_equal_path_uses_identity() {
        let r0 = router("r0", 0);
        let r1 = router("r1", 0);
        let l0 = link("l0", &r0, &r1, 1);

        let a = Path::new(vec![Arc::clone(&r0), Arc::clone(&r1)], vec![Arc::clone(&l0)])
            .unwrap();
        let b = Path::new(vec![Arc::clone(&r0), Arc::clone(&r1)], vec![Arc::clone(&l0)])
            .unwrap();
        assert!(a.equal_path(&b));

        // Same ids and fields, different instances.
        let r1_copy = router("r1", 0);
        let l0_copy = link("l0", &r0, &r1_copy, 1);
        let c = Path::new(vec![Arc::clone(&r0), r1_copy], vec![l0_copy]).unwrap();
        assert!(!a.equal_path(&c));

        assert!(a.uses_link(&l0));
        assert!(!c.uses_link(&l0));
        assert!(a.uses_router(&r1));
        assert!(!c.uses_router(&r1));
    }

    #[test]
    fn test_forwarding_ids_carry_over_and_display_tolerates_missing_links() {
        let r0 = router("r0", 0);
        let r1 = router("r1", 0);
        let l0 = link("l0", &r0, &r1, 1);

        let path = Path::new(vec![Arc::clone(&r0), Arc::clone(&r1)], vec![l0])
            .unwrap()
            .with_forwarding_ids("in-1", "out-1");
        assert_eq!(path.ingress_id, "in-1");
        assert_eq!(path.egress_id, "out-1");
        assert_eq!(path.nodes().len(), 2);
        assert_eq!(path.links().len(), 1);

        let broken = Path {
            nodes: vec![r0, r1],
            links: Vec::new(),
            ingress_id: String::new(),
            egress_id: String::new(),
        };
        assert_eq!(broken.to_string(), "[r/r0]->[l/?]->[r/r1]");
        assert_eq!(format!("{broken:?}"), "Path([r/r0]->[l/?]->[r/r1])");
    }
}
