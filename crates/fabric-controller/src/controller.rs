//! The controller process: owns the network and drives its maintenance loop.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use fabric_command::RateLimiter;
use fabric_model::Network;
use tokio::sync::watch;

use crate::config::ControllerConfig;

pub struct Controller {
    config: ControllerConfig,
    network: Arc<Network>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let limiter = RateLimiter::new(&config.commands.rate_limiter);
        let network = Network::local(config.network.clone(), limiter)?;
        Ok(Self {
            config,
            network: Arc::new(network),
        })
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Runs maintenance until `shutdown` resolves, then waits for the loop to
    /// finish its current cycle.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let maintenance = tokio::spawn(Arc::clone(&self.network).run_maintenance(stop_rx));

        tracing::info!(
            cycle_interval = ?self.config.cycle_interval(),
            rate_limiter = self.config.commands.rate_limiter.enabled,
            "controller running"
        );
        shutdown.await;

        tracing::info!("initiating graceful shutdown");
        // Receiver may already be gone.
        let _ = stop_tx.send(true);
        maintenance.await?;

        tracing::info!(
            routers = self.network.routers().count(),
            links = self.network.links().len(),
            circuits = self.network.circuits().len(),
            "controller stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_applies_config() {
        let mut config = ControllerConfig::default();
        config.network.min_router_cost = 42;
        let controller = Controller::new(config).unwrap();
        assert_eq!(controller.network().options().min_router_cost, 42);
        assert_eq!(controller.network().path_finder().config().min_router_cost, 42);
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let mut config = ControllerConfig::default();
        config.network.cycle_interval = Duration::ZERO;
        assert!(Controller::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let controller = Controller::new(ControllerConfig::default()).unwrap();
        controller
            .run(tokio::time::sleep(Duration::from_secs(300)))
            .await
            .unwrap();
    }
}
