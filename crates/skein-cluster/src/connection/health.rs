//! Health buckets.
//!
//! Each tracked provider sits in exactly one bucket. Reads go straight to the
//! concurrent maps; every mutation goes through the single transition lock,
//! and a transition whose source bucket no longer holds the provider is a
//! no-op.

use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use skein_common::{ProviderInfo, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    /// Tracked but never connected (lazy mode).
    Uninitialized,
    /// Connected and serving traffic.
    Alive,
    /// Connected but degraded; only used when nothing is alive.
    SubHealthy,
    /// Connect failed or dropped; the reconnect loop retries it.
    RetryPending,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Uninitialized => "uninitialized",
            HealthState::Alive => "alive",
            HealthState::SubHealthy => "sub-healthy",
            HealthState::RetryPending => "retry-pending",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of the bucket keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub uninitialized: Vec<ProviderInfo>,
    pub alive: Vec<ProviderInfo>,
    pub sub_healthy: Vec<ProviderInfo>,
    pub retry_pending: Vec<ProviderInfo>,
}

impl HealthSnapshot {
    pub fn total(&self) -> usize {
        self.uninitialized.len() + self.alive.len() + self.sub_healthy.len() + self.retry_pending.len()
    }

    /// Number of buckets listing `provider`.
    pub fn occurrences(&self, provider: &ProviderInfo) -> usize {
        [&self.uninitialized, &self.alive, &self.sub_healthy, &self.retry_pending]
            .iter()
            .filter(|bucket| bucket.contains(provider))
            .count()
    }

    pub fn state_of(&self, provider: &ProviderInfo) -> Option<HealthState> {
        if self.alive.contains(provider) {
            Some(HealthState::Alive)
        } else if self.sub_healthy.contains(provider) {
            Some(HealthState::SubHealthy)
        } else if self.retry_pending.contains(provider) {
            Some(HealthState::RetryPending)
        } else if self.uninitialized.contains(provider) {
            Some(HealthState::Uninitialized)
        } else {
            None
        }
    }
}

type Entry = Arc<dyn Transport>;

pub(crate) struct HealthTable {
    uninitialized: DashMap<ProviderInfo, Entry>,
    alive: DashMap<ProviderInfo, Entry>,
    sub_healthy: DashMap<ProviderInfo, Entry>,
    retry_pending: DashMap<ProviderInfo, Entry>,
    /// Claimed by an eager connect that has not settled yet.
    connecting: DashMap<ProviderInfo, Entry>,
    transitions: Mutex<()>,
}

impl HealthTable {
    pub fn new() -> Self {
        Self {
            uninitialized: DashMap::new(),
            alive: DashMap::new(),
            sub_healthy: DashMap::new(),
            retry_pending: DashMap::new(),
            connecting: DashMap::new(),
            transitions: Mutex::new(()),
        }
    }

    /// Holds the transition lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bucket(&self, state: HealthState) -> &DashMap<ProviderInfo, Entry> {
        match state {
            HealthState::Uninitialized => &self.uninitialized,
            HealthState::Alive => &self.alive,
            HealthState::SubHealthy => &self.sub_healthy,
            HealthState::RetryPending => &self.retry_pending,
        }
    }

    fn is_tracked(&self, provider: &ProviderInfo) -> bool {
        self.connecting.contains_key(provider)
            || self.uninitialized.contains_key(provider)
            || self.alive.contains_key(provider)
            || self.sub_healthy.contains_key(provider)
            || self.retry_pending.contains_key(provider)
    }

    fn find(&self, provider: &ProviderInfo) -> Option<(HealthState, Entry)> {
        [
            HealthState::Alive,
            HealthState::SubHealthy,
            HealthState::Uninitialized,
            HealthState::RetryPending,
        ]
        .into_iter()
        .find_map(|state| self.bucket(state).get(provider).map(|t| (state, t.value().clone())))
    }

    /// Current bucket and transport of `provider`.
    ///
    /// Tries a lock-free read first and falls back to a locked read, so a
    /// provider caught mid-transition is still found.
    pub fn lookup(&self, provider: &ProviderInfo) -> Option<(HealthState, Entry)> {
        self.find(provider).or_else(|| {
            let _guard = self.lock();
            self.find(provider)
        })
    }

    pub fn contains(&self, provider: &ProviderInfo) -> bool {
        let _guard = self.lock();
        self.is_tracked(provider)
    }

    /// Starts tracking `provider` in `state`. Returns `false` if already tracked.
    pub fn track(&self, state: HealthState, provider: &ProviderInfo, transport: Entry) -> bool {
        let _guard = self.lock();
        if self.is_tracked(provider) {
            return false;
        }
        self.bucket(state).insert(provider.clone(), transport);
        true
    }

    /// Claims `provider` for an eager connect. Returns `false` if already tracked.
    pub fn begin_connect(&self, provider: &ProviderInfo, transport: Entry) -> bool {
        let _guard = self.lock();
        if self.is_tracked(provider) {
            return false;
        }
        self.connecting.insert(provider.clone(), transport);
        true
    }

    /// Records the result of an eager connect.
    ///
    /// # Returns
    ///
    /// The bucket the provider is in afterwards, or `None` if it was removed
    /// while connecting.
    pub fn settle(&self, provider: &ProviderInfo, connected: bool) -> Option<HealthState> {
        let _guard = self.lock();
        if let Some((key, transport)) = self.connecting.remove(provider) {
            let state = if connected {
                HealthState::Alive
            } else {
                HealthState::RetryPending
            };
            self.bucket(state).insert(key, transport);
            return Some(state);
        }
        if connected {
            if let Some((key, transport)) = self.retry_pending.remove(provider) {
                self.alive.insert(key, transport);
                return Some(HealthState::Alive);
            }
        }
        self.find(provider).map(|(state, _)| state)
    }

    /// Moves a still-connecting provider to `RetryPending`.
    pub fn park_pending(&self, provider: &ProviderInfo) -> bool {
        let _guard = self.lock();
        match self.connecting.remove(provider) {
            Some((key, transport)) => {
                self.retry_pending.insert(key, transport);
                true
            }
            None => false,
        }
    }

    /// Moves `provider` from `from` to `to`; a no-op if `from` does not hold it.
    pub fn transition(&self, provider: &ProviderInfo, from: HealthState, to: HealthState) -> bool {
        let _guard = self.lock();
        match self.bucket(from).remove(provider) {
            Some((key, transport)) => {
                self.bucket(to).insert(key, transport);
                true
            }
            None => false,
        }
    }

    /// Stops tracking `provider`, returning its transport.
    pub fn untrack(&self, provider: &ProviderInfo) -> Option<Entry> {
        let _guard = self.lock();
        [
            &self.connecting,
            &self.uninitialized,
            &self.alive,
            &self.sub_healthy,
            &self.retry_pending,
        ]
        .into_iter()
        .find_map(|bucket| bucket.remove(provider).map(|(_, t)| t))
    }

    /// Stops tracking everything, returning every transport.
    pub fn drain(&self) -> Vec<(ProviderInfo, Entry)> {
        let _guard = self.lock();
        let mut drained = Vec::new();
        for bucket in [
            &self.connecting,
            &self.uninitialized,
            &self.alive,
            &self.sub_healthy,
            &self.retry_pending,
        ] {
            let keys: Vec<ProviderInfo> = bucket.iter().map(|e| e.key().clone()).collect();
            drained.extend(keys.into_iter().filter_map(|k| bucket.remove(&k)));
        }
        drained
    }

    pub fn entries(&self, state: HealthState) -> Vec<(ProviderInfo, Entry)> {
        self.bucket(state)
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn keys(&self, state: HealthState) -> Vec<ProviderInfo> {
        self.bucket(state).iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_available_empty(&self) -> bool {
        self.alive.is_empty() && self.sub_healthy.is_empty()
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let _guard = self.lock();
        HealthSnapshot {
            uninitialized: self.keys(HealthState::Uninitialized),
            alive: self.keys(HealthState::Alive),
            sub_healthy: self.keys(HealthState::SubHealthy),
            retry_pending: self.keys(HealthState::RetryPending),
        }
    }
}
