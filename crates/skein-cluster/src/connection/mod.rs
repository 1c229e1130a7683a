//! Connection registry.
//!
//! The registry owns the transport of every provider the address book knows
//! about and moves providers between health buckets as connections come and
//! go. A background loop demotes dead connections and retries failed ones.
//!
//! Two strategies ship with the crate:
//!
//! - [`AllConnectRegistry`] (`"all"`) connects every provider when it is added
//! - [`ElasticConnectRegistry`] (`"elastic"`) connects a share of a batch up
//!   front and the rest in the background

pub mod all_connect;
pub mod elastic;
pub mod fan_out;
pub mod health;

pub use all_connect::AllConnectRegistry;
pub use elastic::ElasticConnectRegistry;
pub use fan_out::{batch_budget, fan_out, BatchOutcome, BATCH_WAIT_SLACK};
pub use health::{HealthSnapshot, HealthState};

use async_trait::async_trait;
use std::sync::Arc;

use skein_common::{ProviderInfo, Transport, TransportFactory};

use crate::config::ConsumerConfig;
use crate::listener::{AvailabilityEvent, ListenerSet};

/// Runs around registry shutdown.
#[async_trait]
pub trait DestroyHook: Send + Sync {
    /// Runs after the reconnect loop stops and before any transport closes.
    async fn pre_destroy(&self) {}

    /// Runs after every transport has been released.
    async fn post_destroy(&self) {}
}

/// Everything a registry is built from.
#[derive(Clone)]
pub struct RegistryContext {
    pub config: ConsumerConfig,
    pub transports: Arc<dyn TransportFactory>,
    pub listeners: Arc<ListenerSet>,
}

/// Maps providers to transports and tracks their health.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts the background reconnect loop. Idempotent.
    fn start(&self);

    /// Starts tracking `providers`, connecting them unless lazy.
    ///
    /// Connect failures land the provider in `RetryPending`; they are never
    /// returned to the caller.
    async fn add_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome;

    /// Stops tracking `providers` and releases their transports.
    async fn remove_providers(&self, providers: &[ProviderInfo]) -> BatchOutcome;

    /// A usable transport for `provider`, if there is one.
    ///
    /// `on_demand` marks a call that explicitly targets `provider`; when the
    /// consumer allows it, an untracked provider is then connected on the spot.
    async fn get_transport(&self, provider: &ProviderInfo, on_demand: bool) -> Option<Arc<dyn Transport>>;

    /// Demotes `provider` to `RetryPending` after a failed send.
    fn set_unavailable(&self, provider: &ProviderInfo);

    /// Demotes an alive provider to `SubHealthy`.
    fn mark_sub_healthy(&self, provider: &ProviderInfo) -> bool;

    /// Promotes a sub-healthy provider back to `Alive`.
    fn recover(&self, provider: &ProviderInfo) -> bool;

    /// Alive providers, or the sub-healthy ones when nothing is alive.
    fn list_available_providers(&self) -> Vec<ProviderInfo>;

    fn is_available_empty(&self) -> bool;

    fn health_snapshot(&self) -> HealthSnapshot;

    /// Current reconnect backoff coefficient of `provider` (1 when untouched).
    fn reconnect_coefficient(&self, provider: &ProviderInfo) -> u32;

    /// Runs one sweep of the reconnect loop.
    async fn reconnect_tick(&self);

    /// Notifies listeners if bucket availability differs from what they last
    /// heard. The cluster and the reconnect loop share this one edge tracker.
    fn publish_availability(&self) -> Option<AvailabilityEvent>;

    /// Stops the reconnect loop and releases every transport. Idempotent.
    async fn destroy(&self, hook: Option<&dyn DestroyHook>);
}
