//! Fabric Model: the controller's view of services, terminators and circuits.
//!
//! This crate provides:
//! - [`Db`]: the bucketed store that every replica applies commands to.
//! - [`ServiceManager`] and [`TerminatorManager`]: replicated entity managers dispatching
//!   through the command layer.
//! - [`Strategy`] and [`LowestCostStrategy`]: terminator selection for new circuits.
//! - [`CircuitManager`]: the live, indexed circuit table.
//! - [`Network`]: the owner of every manager, tying topology to circuits.

pub mod circuit;
pub mod db;
pub mod error;
pub mod network;
pub mod service;
pub mod terminator;
pub mod terminator_manager;
pub mod xt;

#[cfg(test)]
mod test_support;

// Re-exports for convenience.
pub use circuit::{Circuit, CircuitManager, CircuitQuery, CircuitSort, CircuitSummary};
pub use db::{Db, ReadTx, UpdateTx, ViewTx};
pub use error::{ModelError, StoreError};
pub use network::{CircuitRequest, CycleReport, Network};
pub use service::{Service, ServiceManager};
pub use terminator::{Terminator, TerminatorDetail, TerminatorFilter, TerminatorState};
pub use terminator_manager::{DeleteTerminatorsBatchCommand, TerminatorManager, ValidationCallback};
pub use xt::{
    CostedTerminator, LowestCostStrategy, PrecedenceChangeHandler, Strategy, StrategyRegistry,
    STRATEGY_LOWEST_COST,
};
