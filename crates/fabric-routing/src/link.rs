use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fabric_core::now_millis;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::router::Router;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Lifecycle mode of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkMode {
    /// Dial requested, not yet confirmed by the router.
    Pending,
    Connected,
    Failed,
    /// Superseded by another link between the same routers.
    Duplicate,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Mode plus the time it was entered (milliseconds since the epoch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkState {
    pub mode: LinkMode,
    pub timestamp: i64,
}

impl LinkState {
    pub fn new(mode: LinkMode) -> Self {
        Self {
            mode,
            timestamp: now_millis(),
        }
    }

    /// Milliseconds spent in this state as of `now`.
    pub fn age_millis(&self, now: i64) -> i64 {
        now - self.timestamp
    }
}

/// Every mutable field of a link lives here, behind one lock, so readers
/// always see a cost and usable flag derived from the same inputs.
#[derive(Debug, Clone)]
struct LinkStatus {
    static_cost: i32,
    src_latency: i64,
    dst_latency: i64,
    cost: i64,
    down: bool,
    state: LinkState,
    usable: bool,
}

impl LinkStatus {
    fn recompute(&mut self) {
        self.cost = i64::from(self.static_cost)
            + self.src_latency / NANOS_PER_MILLI
            + self.dst_latency / NANOS_PER_MILLI;
        self.usable = !self.down && self.state.mode == LinkMode::Connected;
    }
}

/// A measured, directed connection between two routers.
pub struct Link {
    pub id: String,
    pub iteration: u32,
    pub src: Arc<Router>,
    pub dst_id: String,
    pub protocol: String,
    pub dial_address: String,
    dst: RwLock<Option<Arc<Router>>>,
    status: RwLock<LinkStatus>,
}

impl Link {
    /// Creates a pending link of iteration 0. Both latencies start at
    /// `initial_latency` until the routers report measurements.
    pub fn new(
        id: impl Into<String>,
        src: Arc<Router>,
        dst_id: impl Into<String>,
        protocol: impl Into<String>,
        dial_address: impl Into<String>,
        initial_latency: Duration,
    ) -> Self {
        let latency = i64::try_from(initial_latency.as_nanos()).unwrap_or(i64::MAX);
        let mut status = LinkStatus {
            static_cost: 1,
            src_latency: latency,
            dst_latency: latency,
            cost: 0,
            down: false,
            state: LinkState::new(LinkMode::Pending),
            usable: false,
        };
        status.recompute();

        Self {
            id: id.into(),
            iteration: 0,
            src,
            dst_id: dst_id.into(),
            protocol: protocol.into(),
            dial_address: dial_address.into(),
            dst: RwLock::new(None),
            status: RwLock::new(status),
        }
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_dst(self, dst: Option<Arc<Router>>) -> Self {
        *self.dst.write() = dst;
        self
    }

    pub fn with_state(self, mode: LinkMode) -> Self {
        self.set_state(mode);
        self
    }

    /// The destination router, once it has connected.
    pub fn dst(&self) -> Option<Arc<Router>> {
        self.dst.read().clone()
    }

    pub fn set_dst(&self, dst: Option<Arc<Router>>) {
        *self.dst.write() = dst;
    }

    /// Ids of the routers on either end.
    pub fn endpoints(&self) -> (&str, &str) {
        (&self.src.id, &self.dst_id)
    }

    /// The opposite end of the link from `router_id`.
    pub fn other_end(&self, router_id: &str) -> Option<&str> {
        if self.src.id == router_id {
            Some(&self.dst_id)
        } else if self.dst_id == router_id {
            Some(&self.src.id)
        } else {
            None
        }
    }

    /// Whether this link joins `a` and `b`, in either direction.
    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.src.id == a && self.dst_id == b) || (self.src.id == b && self.dst_id == a)
    }

    pub fn cost(&self) -> i64 {
        self.status.read().cost
    }

    pub fn static_cost(&self) -> i32 {
        self.status.read().static_cost
    }

    pub fn set_static_cost(&self, cost: i32) {
        let mut status = self.status.write();
        status.static_cost = cost;
        status.recompute();
    }

    /// Source side latency in nanoseconds.
    pub fn src_latency(&self) -> i64 {
        self.status.read().src_latency
    }

    pub fn set_src_latency(&self, latency: i64) {
        let mut status = self.status.write();
        status.src_latency = latency;
        status.recompute();
    }

    /// Destination side latency in nanoseconds.
    pub fn dst_latency(&self) -> i64 {
        self.status.read().dst_latency
    }

    pub fn set_dst_latency(&self, latency: i64) {
        let mut status = self.status.write();
        status.dst_latency = latency;
        status.recompute();
    }

    pub fn is_down(&self) -> bool {
        self.status.read().down
    }

    pub fn set_down(&self, down: bool) {
        let mut status = self.status.write();
        status.down = down;
        status.recompute();
    }

    pub fn current_state(&self) -> LinkState {
        self.status.read().state
    }

    /// Moves the link into `mode`. Every transition is accepted.
    pub fn set_state(&self, mode: LinkMode) {
        let mut status = self.status.write();
        status.state = LinkState::new(mode);
        status.recompute();
    }

    pub fn is_usable(&self) -> bool {
        self.status.read().usable
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.read();
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("iteration", &self.iteration)
            .field("src", &self.src.id)
            .field("dst", &self.dst_id)
            .field("protocol", &self.protocol)
            .field("cost", &status.cost)
            .field("mode", &status.state.mode)
            .field("down", &status.down)
            .finish()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l/{}", self.id)
    }
}
