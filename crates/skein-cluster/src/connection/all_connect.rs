// Copyright 2025 Skein Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use skein_common::{ProviderInfo, Result, SkeinError, Transport, TransportConfig, TransportFactory};

use super::fan_out::{batch_budget, fan_out, BatchOutcome};
use super::health::{HealthSnapshot, HealthState, HealthTable};
use super::{ConnectionRegistry, DestroyHook, RegistryContext};
use crate::config::ConsumerConfig;
use crate::listener::{AvailabilityEvent, ListenerSet};

/// Registry that connects every provider as soon as it is added.
///
/// Cloning is cheap; clones share the same buckets and reconnect loop.
#[derive(Clone)]
pub struct AllConnectRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConsumerConfig,
    transport_config: TransportConfig,
    factory: Arc<dyn TransportFactory>,
    listeners: Arc<ListenerSet>,
    table: HealthTable,
    /// Reconnect backoff coefficient per provider; absent means 1.
    coefficients: DashMap<ProviderInfo, u32>,
    /// Serializes lazy connects per provider.
    lazy_locks: DashMap<ProviderInfo, Arc<tokio::sync::Mutex<()>>>,
    /// Transports opened for pinpointed providers the address book does not
    /// list. Kept out of the health buckets and never reconnected.
    on_demand: DashMap<ProviderInfo, Arc<dyn Transport>>,
    ticks: AtomicU64,
    reconnector: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl AllConnectRegistry {
    pub fn new(context: RegistryContext) -> Self {
        let transport_config = context.config.transport_config();
        Self {
            inner: Arc::new(Inner {
                config: context.config,
                transport_config,
                factory: context.transports,
                listeners: context.listeners,
                table: HealthTable::new(),
                coefficients: DashMap::new(),
                lazy_locks: DashMap::new(),
                on_demand: DashMap::new(),
                ticks: AtomicU64::new(0),
                reconnector: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    fn service(&self) -> &str {
        self.inner.listeners.service()
    }

    /// Providers in `providers` the registry does not track yet.
    pub(crate) fn untracked(&self, providers: &[ProviderInfo]) -> Vec<ProviderInfo> {
        let mut fresh: Vec<ProviderInfo> = Vec::with_capacity(providers.len());
        for provider in providers {
            if !self.inner.table.contains(provider) && !fresh.contains(provider) {
                fresh.push(provider.clone());
            }
        }
        fresh
    }

    /// Tracks `providers` as uninitialized without connecting.
    pub(crate) fn track_lazily(&self, providers: &[ProviderInfo]) {
        for provider in providers {
            let transport = self.inner.factory.create(provider, &self.inner.transport_config);
            if self.inner.table.track(HealthState::Uninitialized, provider, transport) {
                debug!(service = %self.service(), provider = %provider.address(), "Tracking provider lazily");
            }
        }
    }

    /// Connects `providers` through the bounded fan-out and waits on its barrier.
    pub(crate) async fn connect_batch(&self, providers: Vec<ProviderInfo>) -> BatchOutcome {
        let inner = &self.inner;
        if inner.destroyed.load(Ordering::SeqCst) {
            return BatchOutcome::Completed;
        }

        let claimed: Vec<(ProviderInfo, Arc<dyn Transport>)> = providers
            .into_iter()
            .filter_map(|provider| {
                let transport = inner.factory.create(&provider, &inner.transport_config);
                inner
                    .table
                    .begin_connect(&provider, transport.clone())
                    .then_some((provider, transport))
            })
            .collect();
        if claimed.is_empty() {
            return BatchOutcome::Completed;
        }

        let total = claimed.len();
        let keys: Vec<ProviderInfo> = claimed.iter().map(|(p, _)| p.clone()).collect();
        let workers = inner.config.connect_workers;
        let budget = inner.config.connect_batch_budget(total);
        let started = Instant::now();

        let worker = self.inner.clone();
        let outcome = fan_out(claimed, workers, budget, move |(provider, transport)| {
            let inner = worker.clone();
            async move { inner.connect_one(provider, transport).await }
        })
        .await;

        match outcome {
            BatchOutcome::Completed => {
                let alive = keys
                    .iter()
                    .filter(|p| inner.table.lookup(p).map(|(s, _)| s) == Some(HealthState::Alive))
                    .count();
                info!(
                    service = %self.service(),
                    providers = total,
                    alive,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Connected providers"
                );
            }
            BatchOutcome::TimedOut { pending } => {
                for provider in &keys {
                    inner.table.park_pending(provider);
                }
                warn!(
                    service = %self.service(),
                    providers = total,
                    pending,
                    budget_ms = budget.as_millis() as u64,
                    "Connect batch exceeded its wait budget, continuing in background"
                );
            }
        }
        outcome
    }

    async fn release_batch(&self, transports: Vec<Arc<dyn Transport>>) -> BatchOutcome {
        let workers = self.inner.config.connect_workers;
        let budget = batch_budget(self.inner.config.disconnect_timeout(), transports.len(), workers);
        let outcome = fan_out(transports, workers, budget, |transport| async move {
            transport.disconnect().await;
        })
        .await;

        if let BatchOutcome::TimedOut { pending } = outcome {
            warn!(
                service = %self.service(),
                pending,
                "Disconnect batch exceeded its wait budget, continuing in background"
            );
        }
        outcome
    }

    /// Closes on-demand transports for providers that are about to be tracked.
    pub(crate) async fn retire_on_demand(&self, providers: &[ProviderInfo]) {
        let retired: Vec<Arc<dyn Transport>> = providers
            .iter()
            .filter_map(|provider| self.inner.on_demand.remove(provider).map(|(_, t)| t))
            .collect();
        for transport in retired {
            transport.disconnect().await;
        }
    }

    /// Spawns the periodic reconnect task.
    fn spawn_reconnector(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.reconnect_period();
        tokio::spawn(async move {
            Inner::run(weak, period).await;
        })
    }
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Inner {
    /// Main reconnect loop; ends once the registry is dropped or destroyed.
    async fn run(weak: Weak<Inner>, period: std::time::Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.destroyed.load(Ordering::SeqCst) {
                break;
            }
            inner.sweep().await;
        }
    }

    fn service(&self) -> &str {
        self.listeners.service()
    }

    async fn connect_with_timeout(&self, transport: &Arc<dyn Transport>) -> Result<()> {
        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, transport.connect())
            .await
            .map_err(|_| {
                SkeinError::Connection(format!("connect timed out after {}ms", timeout.as_millis()))
            })?
    }

    async fn connect_one(&self, provider: ProviderInfo, transport: Arc<dyn Transport>) {
        let outcome = self.connect_with_timeout(&transport).await;
        let connected = outcome.is_ok() && transport.is_available();

        match self.table.settle(&provider, connected) {
            Some(HealthState::Alive) => {
                debug!(service = %self.service(), provider = %provider.address(), "Provider connected");
            }
            Some(state) => {
                warn!(
                    service = %self.service(),
                    provider = %provider.address(),
                    %state,
                    error = %outcome.err().map(|e| e.to_string()).unwrap_or_else(|| "unavailable after connect".to_string()),
                    "Failed to connect provider"
                );
            }
            None => {
                debug!(service = %self.service(), provider = %provider.address(), "Provider removed while connecting");
                transport.disconnect().await;
                return;
            }
        }

        if self.destroyed.load(Ordering::SeqCst) {
            if let Some(transport) = self.table.untrack(&provider) {
                transport.disconnect().await;
            }
        }
    }

    fn coefficient(&self, provider: &ProviderInfo) -> u32 {
        self.coefficients.get(provider).map(|c| *c).unwrap_or(1)
    }

    fn increase_coefficient(&self, provider: &ProviderInfo) -> u32 {
        let max = self.config.max_reconnect_coefficient.max(1);
        let mut entry = self.coefficients.entry(provider.clone()).or_insert(1);
        *entry = (*entry + 1).min(max);
        *entry
    }

    /// Publishes the bucket view of availability under the transition lock.
    fn publish_availability(&self) -> Option<AvailabilityEvent> {
        let _guard = self.table.lock();
        let event = self.listeners.publish(!self.table.is_available_empty())?;
        match event {
            AvailabilityEvent::Available => info!(service = %self.service(), "Providers became available"),
            AvailabilityEvent::Unavailable => warn!(service = %self.service(), "No provider available"),
        }
        Some(event)
    }

    /// Disconnects `transport` unless the table still tracks it for `provider`.
    ///
    /// Covers connects that finish after their provider was removed.
    async fn release_if_orphaned(&self, provider: &ProviderInfo, transport: &Arc<dyn Transport>) -> bool {
        let tracked = matches!(self.table.lookup(provider), Some((_, t)) if same_transport(&t, transport));
        if !tracked {
            debug!(service = %self.service(), provider = %provider.address(), "Provider removed while connecting");
            transport.disconnect().await;
        }
        !tracked
    }

    /// One reconnect pass: demote dead connections, retry due providers, then
    /// notify listeners if availability flipped.
    async fn sweep(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.prune_on_demand().await;

        for state in [HealthState::Alive, HealthState::SubHealthy] {
            for (provider, transport) in self.table.entries(state) {
                if !transport.is_available() && self.table.transition(&provider, state, HealthState::RetryPending) {
                    warn!(
                        service = %self.service(),
                        provider = %provider.address(),
                        from = %state,
                        "Connection lost, provider moved to retry"
                    );
                }
            }
        }

        let due: Vec<_> = self
            .table
            .entries(HealthState::RetryPending)
            .into_iter()
            .filter(|(provider, _)| tick % u64::from(self.coefficient(provider)) == 0)
            .collect();

        let attempts: Vec<_> = due
            .into_iter()
            .map(|(provider, transport)| async move { self.reconnect(provider, transport).await })
            .collect();
        futures::future::join_all(attempts).await;

        self.publish_availability();
    }

    /// Tries one reconnect and double-checks the connection before promoting.
    async fn reconnect(&self, provider: ProviderInfo, transport: Arc<dyn Transport>) {
        if let Err(e) = self.connect_with_timeout(&transport).await {
            if self.release_if_orphaned(&provider, &transport).await {
                return;
            }
            let coefficient = self.increase_coefficient(&provider);
            debug!(
                service = %self.service(),
                provider = %provider.address(),
                coefficient,
                error = %e,
                "Reconnect failed"
            );
            return;
        }

        // Peers may accept and then drop us right away.
        tokio::time::sleep(self.config.double_check_delay()).await;
        if self.release_if_orphaned(&provider, &transport).await {
            return;
        }
        if !transport.is_available() {
            let coefficient = self.increase_coefficient(&provider);
            warn!(
                service = %self.service(),
                provider = %provider.address(),
                coefficient,
                "Provider dropped the connection right after reconnect"
            );
            return;
        }

        if self.table.transition(&provider, HealthState::RetryPending, HealthState::Alive) {
            self.coefficients.remove(&provider);
            info!(service = %self.service(), provider = %provider.address(), "Provider reconnected");
        } else {
            self.release_if_orphaned(&provider, &transport).await;
        }
    }

    async fn lazy_connect(&self, provider: &ProviderInfo) -> Option<Arc<dyn Transport>> {
        let lock = self
            .lazy_locks
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        match self.table.lookup(provider) {
            Some((HealthState::Uninitialized, transport)) => {
                let outcome = self.connect_with_timeout(&transport).await;
                let connected = outcome.is_ok() && transport.is_available();
                let target = if connected {
                    HealthState::Alive
                } else {
                    HealthState::RetryPending
                };
                if !self.table.transition(provider, HealthState::Uninitialized, target) {
                    self.release_if_orphaned(provider, &transport).await;
                    return None;
                }

                if connected {
                    info!(service = %self.service(), provider = %provider.address(), "Lazily connected provider");
                    Some(transport)
                } else {
                    warn!(
                        service = %self.service(),
                        provider = %provider.address(),
                        error = %outcome.err().map(|e| e.to_string()).unwrap_or_else(|| "unavailable after connect".to_string()),
                        "Lazy connect failed"
                    );
                    None
                }
            }
            Some((HealthState::Alive | HealthState::SubHealthy, transport)) => Some(transport),
            _ => None,
        }
    }

    /// Opens, or reuses, a transient transport to an untracked provider.
    async fn connect_on_demand(&self, provider: &ProviderInfo) -> Option<Arc<dyn Transport>> {
        let existing = self.on_demand.get(provider).map(|t| t.value().clone());
        if let Some(transport) = existing {
            if transport.is_available() {
                return Some(transport);
            }
            self.release_on_demand(provider, &transport).await;
        }

        info!(service = %self.service(), provider = %provider.address(), "Connecting untracked provider on demand");
        let transport = self.factory.create(provider, &self.transport_config);
        let outcome = self.connect_with_timeout(&transport).await;
        if outcome.is_err() || !transport.is_available() {
            warn!(
                service = %self.service(),
                provider = %provider.address(),
                error = %outcome.err().map(|e| e.to_string()).unwrap_or_else(|| "unavailable after connect".to_string()),
                "On-demand connect failed"
            );
            transport.disconnect().await;
            return None;
        }

        // A concurrent call may have connected the same provider first.
        let (kept, discarded) = match self.on_demand.entry(provider.clone()) {
            Entry::Occupied(entry) if entry.get().is_available() => (entry.get().clone(), Some(transport)),
            Entry::Occupied(mut entry) => {
                let stale = entry.insert(transport.clone());
                (transport, Some(stale))
            }
            Entry::Vacant(entry) => {
                entry.insert(transport.clone());
                (transport, None)
            }
        };
        if let Some(discarded) = discarded {
            discarded.disconnect().await;
        }

        if self.destroyed.load(Ordering::SeqCst) {
            self.release_on_demand(provider, &kept).await;
            return None;
        }
        Some(kept)
    }

    async fn release_on_demand(&self, provider: &ProviderInfo, transport: &Arc<dyn Transport>) {
        self.on_demand.remove_if(provider, |_, t| same_transport(t, transport));
        transport.disconnect().await;
    }

    /// Drops on-demand transports whose connection is gone.
    async fn prune_on_demand(&self) {
        let dead: Vec<(ProviderInfo, Arc<dyn Transport>)> = self
            .on_demand
            .iter()
            .filter(|e| !e.value().is_available())
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (provider, transport) in dead {
            debug!(service = %self.service(), provider = %provider.address(), "Dropping dead on-demand transport");
            self.release_on_demand(&provider, &transport).await;
        }
    }
}

#[async_trait]
impl ConnectionRegistry for AllConnectRegistry {
    fn name(&self) -> &'static str {
        "all"
    }

    fn start(&self) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.inner.reconnector.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(self.spawn_reconnector());
            debug!(
                service = %self.service(),
                period_ms = self.inner.config.reconnect_period().as_millis() as u64,
                "Reconnect loop started"
            );
        }
    }

    async fn add_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return BatchOutcome::Completed;
        }
        let fresh = self.untracked(providers);
        if fresh.is_empty() {
            return BatchOutcome::Completed;
        }
        self.retire_on_demand(&fresh).await;

        if self.inner.config.lazy {
            self.track_lazily(&fresh);
            return BatchOutcome::Completed;
        }
        self.connect_batch(fresh).await
    }

    async fn remove_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome {
        self.retire_on_demand(providers).await;
        let released: Vec<Arc<dyn Transport>> = providers
            .iter()
            .filter_map(|provider| {
                self.inner.coefficients.remove(provider);
                self.inner.lazy_locks.remove(provider);
                self.inner.table.untrack(provider)
            })
            .collect();
        if released.is_empty() {
            return BatchOutcome::Completed;
        }

        info!(service = %self.service(), providers = released.len(), "Releasing removed providers");
        self.release_batch(released).await
    }

    async fn get_transport(&self, provider: &ProviderInfo, on_demand: bool) -> Option<Arc<dyn Transport>> {
        match self.inner.table.lookup(provider) {
            Some((HealthState::Alive | HealthState::SubHealthy, transport)) => Some(transport),
            Some((HealthState::Uninitialized, _)) => self.inner.lazy_connect(provider).await,
            Some((HealthState::RetryPending, _)) => None,
            None if on_demand
                && self.inner.config.create_on_demand
                && !self.inner.destroyed.load(Ordering::SeqCst) =>
            {
                self.inner.connect_on_demand(provider).await
            }
            None => None,
        }
    }

    fn set_unavailable(&self, provider: &ProviderInfo) {
        let table = &self.inner.table;
        if table.transition(provider, HealthState::Alive, HealthState::RetryPending)
            || table.transition(provider, HealthState::SubHealthy, HealthState::RetryPending)
        {
            warn!(service = %self.service(), provider = %provider.address(), "Provider marked unavailable");
        }
    }

    fn mark_sub_healthy(&self, provider: &ProviderInfo) -> bool {
        let moved = self
            .inner
            .table
            .transition(provider, HealthState::Alive, HealthState::SubHealthy);
        if moved {
            warn!(service = %self.service(), provider = %provider.address(), "Provider is sub-healthy");
        }
        moved
    }

    fn recover(&self, provider: &ProviderInfo) -> bool {
        let moved = self
            .inner
            .table
            .transition(provider, HealthState::SubHealthy, HealthState::Alive);
        if moved {
            info!(service = %self.service(), provider = %provider.address(), "Provider recovered");
        }
        moved
    }

    fn list_available_providers(&self) -> Vec<ProviderInfo> {
        let alive = self.inner.table.keys(HealthState::Alive);
        if alive.is_empty() {
            self.inner.table.keys(HealthState::SubHealthy)
        } else {
            alive
        }
    }

    fn is_available_empty(&self) -> bool {
        self.inner.table.is_available_empty()
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        self.inner.table.snapshot()
    }

    fn reconnect_coefficient(&self, provider: &ProviderInfo) -> u32 {
        self.inner.coefficient(provider)
    }

    async fn reconnect_tick(&self) {
        self.inner.sweep().await;
    }

    fn publish_availability(&self) -> Option<AvailabilityEvent> {
        self.inner.publish_availability()
    }

    async fn destroy(&self, hook: Option<&dyn DestroyHook>) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let reconnector = self
            .inner
            .reconnector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reconnector {
            handle.abort();
        }

        if let Some(hook) = hook {
            hook.pre_destroy().await;
        }

        let mut transports: Vec<Arc<dyn Transport>> = self
            .inner
            .table
            .drain()
            .into_iter()
            .map(|(_, transport)| transport)
            .collect();
        let on_demand: Vec<ProviderInfo> = self.inner.on_demand.iter().map(|e| e.key().clone()).collect();
        transports.extend(
            on_demand
                .iter()
                .filter_map(|provider| self.inner.on_demand.remove(provider).map(|(_, t)| t)),
        );
        self.inner.coefficients.clear();
        self.inner.lazy_locks.clear();

        let count = transports.len();
        self.release_batch(transports).await;
        info!(service = %self.service(), transports = count, "Connection registry destroyed");

        if let Some(hook) = hook {
            hook.post_destroy().await;
        }
    }
}
