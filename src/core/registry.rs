//! Service registry: owns every backend by URL prefix and runs the
//! periodic health loop.
//!
//! All services live in one prefix tree keyed by `service.prefix`;
//! forwarding lookups use longest-match semantics only. The health loop
//! visits each leaf sequentially, so a single state transition happens at
//! a time per pass.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::models::ServiceConfig,
    core::{
        service::{Service, ServiceError},
        tree::{PrefixTree, TreeError},
    },
};

pub const DEFAULT_HEALTH_CHECK_FREQUENCY: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("service already registered for this prefix")]
    ServiceExists,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

pub struct ServiceRegistry {
    tree: PrefixTree<Arc<Service>>,
    health_check_frequency: Duration,
}

impl ServiceRegistry {
    pub fn new(health_check_frequency: Duration) -> Self {
        Self {
            tree: PrefixTree::new(),
            health_check_frequency,
        }
    }

    pub fn health_check_frequency(&self) -> Duration {
        self.health_check_frequency
    }

    /// Validate, construct and insert a service. A prefix already covered
    /// by a registered service is rejected before the tree insert.
    pub fn add(&self, config: &ServiceConfig) -> Result<Arc<Service>, RegistryError> {
        let service = Service::new(config)?;
        self.insert(service)
    }

    /// Insert a pre-built service; the seam used by tests that inject
    /// mock client pools.
    pub fn insert(&self, service: Arc<Service>) -> Result<Arc<Service>, RegistryError> {
        if self
            .tree
            .find_longest_match(service.prefix())
            .is_some()
        {
            return Err(RegistryError::ServiceExists);
        }

        self.tree.insert(service.prefix(), service.clone())?;
        Ok(service)
    }

    /// Longest-prefix match against a query-stripped URL.
    pub fn find(&self, url: &str) -> Option<Arc<Service>> {
        self.tree.find_longest_match(url)
    }

    /// Depth-first search by unique service name.
    pub fn by_name(&self, name: &str) -> Option<Arc<Service>> {
        self.tree.find_by(|s| s.name() == name)
    }

    /// Force the named service into the `Available` state. Returns whether
    /// the service exists.
    pub fn mark_available(&self, name: &str) -> bool {
        match self.by_name(name) {
            Some(service) => {
                service.mark_available();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registered service.
    pub fn all(&self) -> Vec<Arc<Service>> {
        self.tree.leaves()
    }

    /// Probe every service, then sleep `health_check_frequency`; repeat
    /// until the token fires. Probe failures are logged, never fatal.
    pub async fn run_health_loop(&self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.health_check_frequency.as_secs(),
            "health loop started"
        );

        loop {
            for service in self.all() {
                let state = service.check_status().await;
                tracing::debug!(
                    service = service.name(),
                    state = state.as_str(),
                    "health probe finished"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.health_check_frequency) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("health loop stopped");
                    return;
                }
            }
        }
    }
}
