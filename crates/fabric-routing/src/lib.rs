//! Fabric Routing: live topology tracking and path selection for the controller.
//!
//! This crate provides:
//! - [`Router`] and [`RouterRegistry`]: the live view of connected routers and their link index.
//! - [`Link`]: a measured, directed connection between two routers.
//! - [`LinkManager`]: the concurrent link table, reconciling router-reported links by iteration.
//! - [`Path`]: an ordered router/link sequence with cost aggregation.
//! - [`PathFinder`]: Dijkstra over connected routers using least-expensive links.
//! - [`ControlChannel`]: the per-router control channel contract.

pub mod channel;
pub mod error;
pub mod link;
pub mod link_manager;
pub mod path;
pub mod pathfinder;
pub mod registry;
pub mod router;

// Re-exports for convenience.
pub use channel::{ControlChannel, ControlMessage};
pub use error::{ChannelError, RoutingError};
pub use link::{Link, LinkMode, LinkState};
pub use link_manager::LinkManager;
pub use path::Path;
pub use pathfinder::{PathFinder, PathFinderConfig};
pub use registry::RouterRegistry;
pub use router::{Capability, Router, RouterLinks, RouterMetadata};
