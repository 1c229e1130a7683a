use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use skein_common::{ProviderInfo, Transport};

use super::all_connect::AllConnectRegistry;
use super::fan_out::BatchOutcome;
use super::health::HealthSnapshot;
use crate::listener::AvailabilityEvent;
use super::{ConnectionRegistry, DestroyHook, RegistryContext};

/// Registry that connects a share of each batch up front.
///
/// `elastic_initial_percent` of a batch (at least one provider) is connected
/// before `add_providers` returns; the rest is connected by a detached
/// background batch. Everything else behaves like [`AllConnectRegistry`].
#[derive(Clone)]
pub struct ElasticConnectRegistry {
    all: AllConnectRegistry,
    initial_percent: u32,
    lazy: bool,
}

impl ElasticConnectRegistry {
    pub fn new(context: RegistryContext) -> Self {
        let initial_percent = context.config.elastic_initial_percent.min(100);
        let lazy = context.config.lazy;
        Self {
            all: AllConnectRegistry::new(context),
            initial_percent,
            lazy,
        }
    }

    /// How many of `total` providers are connected synchronously.
    pub fn initial_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        let share = (total * self.initial_percent as usize).div_ceil(100);
        share.clamp(1, total)
    }
}

#[async_trait]
impl ConnectionRegistry for ElasticConnectRegistry {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn start(&self) {
        self.all.start();
    }

    async fn add_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome {
        if self.lazy {
            return self.all.add_providers(providers).await;
        }

        let mut fresh = self.all.untracked(providers);
        if fresh.is_empty() {
            return BatchOutcome::Completed;
        }

        self.all.retire_on_demand(&fresh).await;

        let initial = self.initial_count(fresh.len());
        let deferred = fresh.split_off(initial);
        let outcome = self.all.connect_batch(fresh).await;

        if !deferred.is_empty() {
            info!(
                initial,
                deferred = deferred.len(),
                "Connecting remaining providers in background"
            );
            let all = self.all.clone();
            tokio::spawn(async move {
                all.connect_batch(deferred).await;
            });
        }
        outcome
    }

    async fn remove_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome {
        self.all.remove_providers(providers).await
    }

    async fn get_transport(&self, provider: &ProviderInfo, on_demand: bool) -> Option<Arc<dyn Transport>> {
        self.all.get_transport(provider, on_demand).await
    }

    fn set_unavailable(&self, provider: &ProviderInfo) {
        self.all.set_unavailable(provider)
    }

    fn mark_sub_healthy(&self, provider: &ProviderInfo) -> bool {
        self.all.mark_sub_healthy(provider)
    }

    fn recover(&self, provider: &ProviderInfo) -> bool {
        self.all.recover(provider)
    }

    fn list_available_providers(&self) -> Vec<ProviderInfo> {
        self.all.list_available_providers()
    }

    fn is_available_empty(&self) -> bool {
        self.all.is_available_empty()
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        self.all.health_snapshot()
    }

    fn reconnect_coefficient(&self, provider: &ProviderInfo) -> u32 {
        self.all.reconnect_coefficient(provider)
    }

    async fn reconnect_tick(&self) {
        self.all.reconnect_tick().await
    }

    fn publish_availability(&self) -> Option<AvailabilityEvent> {
        self.all.publish_availability()
    }

    async fn destroy(&self, hook: Option<&dyn DestroyHook>) {
        self.all.destroy(hook).await
    }
}
