//! Terminator selection strategies.
//!
//! A strategy picks one terminator out of the costed candidates for a new
//! circuit, and may demote or restore terminators by asking a
//! [`PrecedenceChangeHandler`] to change their precedence.

use std::sync::Arc;

use dashmap::DashMap;
use fabric_core::Precedence;
use tracing::{debug, info};

use crate::terminator::Terminator;

/// Name of the built-in strategy, used when a service names none.
pub const STRATEGY_LOWEST_COST: &str = "lowestcost";

/// Consecutive dial failures after which a terminator is marked failed.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Receives precedence changes requested by strategies.
pub trait PrecedenceChangeHandler: Send + Sync {
    fn handle_precedence_change(&self, terminator_id: &str, precedence: Precedence);
}

/// A candidate terminator with the cost of the path reaching its router.
#[derive(Debug, Clone)]
pub struct CostedTerminator {
    pub terminator: Terminator,
    pub route_cost: i64,
}

impl CostedTerminator {
    pub fn new(terminator: Terminator, route_cost: i64) -> Self {
        Self {
            terminator,
            route_cost,
        }
    }

    /// Path cost plus the terminator's own cost.
    pub fn total_cost(&self) -> i64 {
        self.route_cost + i64::from(self.terminator.cost)
    }

    pub fn precedence(&self) -> Precedence {
        self.terminator.precedence
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn select<'a>(&self, candidates: &'a [CostedTerminator]) -> Option<&'a CostedTerminator>;

    fn report_dial_failure(&self, _terminator: &Terminator) {}

    fn report_dial_success(&self, _terminator: &Terminator) {}
}

/// Prefers the best precedence class, then the lowest total cost. Ties go to
/// the lowest terminator id.
///
/// Repeated dial failures mark a terminator failed; the next successful dial
/// restores its saved precedence.
pub struct LowestCostStrategy {
    handler: Arc<dyn PrecedenceChangeHandler>,
    failure_threshold: u32,
    failures: DashMap<String, u32>,
}

impl LowestCostStrategy {
    pub fn new(handler: Arc<dyn PrecedenceChangeHandler>) -> Self {
        Self::with_failure_threshold(handler, DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(
        handler: Arc<dyn PrecedenceChangeHandler>,
        threshold: u32,
    ) -> Self {
        Self {
            handler,
            failure_threshold: threshold.max(1),
            failures: DashMap::new(),
        }
    }

    pub fn failure_count(&self, terminator_id: &str) -> u32 {
        self.failures.get(terminator_id).map_or(0, |count| *count)
    }
}

impl Strategy for LowestCostStrategy {
    fn name(&self) -> &str {
        STRATEGY_LOWEST_COST
    }

    fn select<'a>(&self, candidates: &'a [CostedTerminator]) -> Option<&'a CostedTerminator> {
        candidates.iter().min_by(|a, b| {
            a.precedence()
                .rank()
                .cmp(&b.precedence().rank())
                .then_with(|| a.total_cost().cmp(&b.total_cost()))
                .then_with(|| a.terminator.id.cmp(&b.terminator.id))
        })
    }

    fn report_dial_failure(&self, terminator: &Terminator) {
        let count = {
            let mut entry = self.failures.entry(terminator.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!(terminator_id = %terminator.id, failures = count, "dial failure reported");
        if count >= self.failure_threshold && !terminator.precedence.is_failed() {
            info!(terminator_id = %terminator.id, failures = count, "marking terminator failed");
            self.handler
                .handle_precedence_change(&terminator.id, Precedence::Failed);
        }
    }

    fn report_dial_success(&self, terminator: &Terminator) {
        self.failures.remove(&terminator.id);
        if terminator.precedence.is_failed() {
            let restored = terminator.saved_precedence.unwrap_or_default();
            info!(
                terminator_id = %terminator.id,
                precedence = %restored,
                "restoring terminator precedence"
            );
            self.handler
                .handle_precedence_change(&terminator.id, restored);
        }
    }
}

/// Strategies by name.
pub struct StrategyRegistry {
    strategies: DashMap<String, Arc<dyn Strategy>>,
    default_name: String,
}

impl StrategyRegistry {
    pub fn new(default_strategy: Arc<dyn Strategy>) -> Self {
        let registry = Self {
            strategies: DashMap::new(),
            default_name: default_strategy.name().to_string(),
        };
        registry.register(default_strategy);
        registry
    }

    pub fn register(&self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).map(|s| Arc::clone(s.value()))
    }

    /// The named strategy, or the default when `name` is empty.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        if name.is_empty() {
            self.get(&self.default_name)
        } else {
            self.get(name)
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.strategies.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
