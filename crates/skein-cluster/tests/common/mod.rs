#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use skein_cluster::load_balancer::RoundRobinLoadBalancer;
use skein_cluster::testing::MockTransportFactory;
use skein_cluster::{
    AvailabilityEvent, ClusterInvoker, ConsumerConfig, ConsumerStateListener, ExtensionRegistry, LoadBalancer,
};
use skein_common::provider::DISCOVERED_GROUP;
use skein_common::{ProviderGroup, ProviderInfo, Request};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

pub fn provider(port: u16) -> ProviderInfo {
    ProviderInfo::new("127.0.0.1", port)
}

pub fn discovered(ports: impl IntoIterator<Item = u16>) -> ProviderGroup {
    ProviderGroup::with_providers(DISCOVERED_GROUP, ports.into_iter().map(provider))
}

/// Builds a consumer over mock transports, publishes `ports` as discovered
/// providers and initializes it.
pub async fn start_cluster(
    config: ConsumerConfig,
    ports: impl IntoIterator<Item = u16>,
) -> (ClusterInvoker, Arc<MockTransportFactory>) {
    start_cluster_with(config, &ExtensionRegistry::with_defaults(), ports).await
}

pub async fn start_cluster_with(
    config: ConsumerConfig,
    extensions: &ExtensionRegistry,
    ports: impl IntoIterator<Item = u16>,
) -> (ClusterInvoker, Arc<MockTransportFactory>) {
    init_tracing();
    let factory = Arc::new(MockTransportFactory::new());
    let cluster = ClusterInvoker::new(config, extensions, factory.clone()).unwrap();
    cluster.update_providers(&discovered(ports)).await;
    cluster.init().await.unwrap();
    (cluster, factory)
}

/// Round robin that counts how often it is consulted.
pub struct CountingLoadBalancer {
    inner: RoundRobinLoadBalancer,
    selections: Arc<AtomicUsize>,
}

impl CountingLoadBalancer {
    pub fn new(selections: Arc<AtomicUsize>) -> Self {
        Self {
            inner: RoundRobinLoadBalancer::new(),
            selections,
        }
    }
}

impl LoadBalancer for CountingLoadBalancer {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn select(&self, request: &Request, candidates: &[ProviderInfo]) -> skein_common::Result<ProviderInfo> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        self.inner.select(request, candidates)
    }

    fn do_select(&self, request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        self.inner.do_select(request, candidates)
    }
}

/// Records availability events in arrival order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<AvailabilityEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<AvailabilityEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ConsumerStateListener for RecordingListener {
    fn on_available(&self, _service: &str) {
        self.events.lock().unwrap().push(AvailabilityEvent::Available);
    }

    fn on_unavailable(&self, _service: &str) {
        self.events.lock().unwrap().push(AvailabilityEvent::Unavailable);
    }
}
