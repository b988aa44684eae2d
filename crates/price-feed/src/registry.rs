//! Active exchange set with health tracking
//!
//! Startup fails only when no configured exchange passes its health check.
//! Unhealthy clients are kept so a later `refresh_health` can bring them back
//! without a restart.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use pricehub_core::{AggregatorSettings, Clock, ExchangeId, ExchangeStatus, RegistryError, TradingPair};

use crate::exchanges::{ClientConfig, Exchange, ExchangeClient};
use crate::http::RequestExecutor;

/// Health budget when the caller has no deadline of its own
pub const DEFAULT_HEALTH_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct ExchangeRegistry<C = Exchange> {
    clients: BTreeMap<ExchangeId, Arc<C>>,
    statuses: DashMap<ExchangeId, ExchangeStatus>,
    clock: Arc<dyn Clock>,
}

/// Build one client per configured exchange name. Unknown names are logged
/// and dropped; duplicates collapse.
pub fn build_exchanges(
    settings: &AggregatorSettings,
    pairs: &[TradingPair],
    executor: Arc<RequestExecutor>,
) -> Vec<Exchange> {
    let (ids, unknown) = ExchangeId::parse_list(&settings.exchanges);
    for name in unknown {
        warn!(exchange = %name, "ignoring unknown exchange");
    }

    ids.into_iter()
        .map(|id| {
            let config = ClientConfig::for_exchange(id, &settings.endpoint_for(id), pairs);
            Exchange::build(id, config, Arc::clone(&executor))
        })
        .collect()
}

impl<C: ExchangeClient> ExchangeRegistry<C> {
    /// Health-check every client concurrently and keep the set if at least
    /// one is reachable.
    pub async fn initialize(clients: Vec<C>, clock: Arc<dyn Clock>) -> Result<Self, RegistryError> {
        let configured: Vec<String> = clients.iter().map(|c| c.id().to_string()).collect();

        let registry = Self {
            statuses: clients.iter().map(|c| (c.id(), ExchangeStatus::new(c.id()))).collect(),
            clients: clients.into_iter().map(|c| (c.id(), Arc::new(c))).collect(),
            clock,
        };

        let healthy = registry.refresh_health().await;
        if healthy.is_empty() {
            error!(?configured, "no exchange passed its health check");
            return Err(RegistryError::Exhausted { configured });
        }

        info!(
            healthy = ?healthy,
            configured = registry.clients.len(),
            "exchange registry initialized"
        );
        Ok(registry)
    }

    /// Re-run health checks and return the exchanges usable this cycle
    pub async fn refresh_health(&self) -> Vec<ExchangeId> {
        self.refresh_health_within(DEFAULT_HEALTH_BUDGET).await
    }

    /// Re-run health checks concurrently; a check still pending after
    /// `budget` counts as unhealthy
    pub async fn refresh_health_within(&self, budget: Duration) -> Vec<ExchangeId> {
        let checks = self
            .clients
            .values()
            .map(|client| async move { (client.id(), bounded_check(&**client, budget).await) });

        let mut healthy = Vec::new();
        for (id, ok) in join_all(checks).await {
            self.set_health(id, ok);
            if ok {
                healthy.push(id);
            }
        }
        healthy
    }

    /// Re-check a single exchange, leaving the others untouched
    pub async fn refresh_client_health(&self, id: ExchangeId, budget: Duration) -> bool {
        let Some(client) = self.clients.get(&id) else {
            return false;
        };
        let ok = bounded_check(&**client, budget).await;
        self.set_health(id, ok);
        ok
    }

    fn set_health(&self, id: ExchangeId, ok: bool) {
        if let Some(mut status) = self.statuses.get_mut(&id) {
            let was_healthy = status.is_healthy();
            status.set_health(ok);

            match (was_healthy, ok) {
                (true, false) => warn!(exchange = %id, "exchange became unhealthy, excluding"),
                (false, true) => info!(exchange = %id, "exchange healthy"),
                (false, false) => warn!(exchange = %id, "exchange unhealthy, excluding"),
                (true, true) => {}
            }
        }
    }

    /// Clients that passed their most recent health check
    pub fn healthy_clients(&self) -> Vec<Arc<C>> {
        self.clients
            .iter()
            .filter(|(id, _)| self.statuses.get(id).map_or(false, |s| s.is_healthy()))
            .map(|(_, client)| Arc::clone(client))
            .collect()
    }

    pub fn client(&self, id: ExchangeId) -> Option<Arc<C>> {
        self.clients.get(&id).cloned()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<C>> {
        self.clients.values()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Stamp fetch bookkeeping after an attempt against `id`
    pub fn record_attempt(&self, id: ExchangeId, success: bool) {
        let now = self.clock.now();
        if let Some(mut status) = self.statuses.get_mut(&id) {
            status.record_attempt(success, now);
        }
    }

    pub fn status(&self, id: ExchangeId) -> Option<ExchangeStatus> {
        self.statuses.get(&id).map(|s| s.value().clone())
    }

    /// Snapshot of every configured exchange, ordered by id
    pub fn statuses(&self) -> Vec<ExchangeStatus> {
        let mut all: Vec<ExchangeStatus> = self.statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by_key(|s| s.exchange);
        all
    }
}

async fn bounded_check<C: ExchangeClient>(client: &C, budget: Duration) -> bool {
    match tokio::time::timeout(budget, client.is_healthy()).await {
        Ok(ok) => ok,
        Err(_) => {
            warn!(exchange = %client.id(), ?budget, "health check timed out");
            false
        }
    }
}
