//! Fabric Core: shared types for the controller crates.
//!
//! This crate provides:
//! - [`NetworkOptions`]: topology, routing and validation tunables.
//! - [`ChangeContext`]: who made a change and through which channel.
//! - [`Precedence`], [`Listener`] and [`Tags`]: common model types.
//! - [`proto`]: the prost messages used for replication and router requests.

pub mod change;
pub mod config;
pub mod error;
pub mod proto;
pub mod types;

// Re-exports for convenience.
pub use change::{AuthorType, ChangeContext, SourceType};
pub use config::NetworkOptions;
pub use error::CoreError;
pub use types::{now_millis, Listener, Precedence, Tags};
