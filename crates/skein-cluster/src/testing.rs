//! Scriptable in-memory transport for tests.
//!
//! [`MockTransportFactory`] hands out [`MockTransport`]s whose behaviour is
//! driven by a shared [`MockEndpoint`] per provider address. Tests flip the
//! endpoint's switches (refuse connections, drop availability, fail calls)
//! and read its counters back.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use skein_common::{
    ProviderInfo, Request, Response, ResponseFuture, Result, SkeinError, Transport, TransportConfig,
    TransportFactory,
};

/// How a scripted endpoint fails its calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Busy,
    Timeout,
    Connection,
    Empty,
    Application(String),
}

/// Shared behaviour and counters of one provider address.
#[derive(Debug)]
pub struct MockEndpoint {
    address: String,
    accept: AtomicBool,
    healthy: AtomicBool,
    delay_ms: AtomicU64,
    connect_delay_ms: AtomicU64,
    failure: Mutex<Option<MockFailure>>,
    calls: AtomicUsize,
    one_way_calls: AtomicUsize,
    connect_attempts: AtomicUsize,
    disconnects: AtomicUsize,
    timeouts: Mutex<Vec<u64>>,
}

impl MockEndpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            accept: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            connect_delay_ms: AtomicU64::new(0),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            one_way_calls: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether `connect` succeeds.
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// Whether a connected transport reports itself available.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Delay applied before every reply.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay applied before every connect attempt resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_with(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Calls received, one-way included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn one_way_calls(&self) -> usize {
        self.one_way_calls.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Timeouts (milliseconds) passed with each call, in arrival order.
    pub fn timeouts(&self) -> Vec<u64> {
        self.timeouts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, timeout: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timeouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(timeout.as_millis() as u64);
    }

    async fn respond(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let delay = Duration::from_millis(self.delay_ms.load(Ordering::SeqCst));
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(SkeinError::ClientTimeout(timeout.as_millis() as u64));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match failure {
            None => Ok(Response::success(
                request.id,
                json!({ "provider": self.address, "method": request.method }),
            )),
            Some(MockFailure::Busy) => Err(SkeinError::ServerBusy(self.address.clone())),
            Some(MockFailure::Timeout) => Err(SkeinError::ClientTimeout(timeout.as_millis() as u64)),
            Some(MockFailure::Connection) => {
                Err(SkeinError::Connection(format!("{}: Connection lost", self.address)))
            }
            Some(MockFailure::Empty) => Err(SkeinError::EmptyResponse(self.address.clone())),
            Some(MockFailure::Application(message)) => Ok(Response::error(request.id, message)),
        }
    }
}

pub struct MockTransport {
    provider: ProviderInfo,
    endpoint: Arc<MockEndpoint>,
    connected: AtomicBool,
}

impl MockTransport {
    pub fn endpoint(&self) -> &Arc<MockEndpoint> {
        &self.endpoint
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SkeinError::Connection(format!("Not connected to {}", self.endpoint.address)))
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn provider(&self) -> &ProviderInfo {
        &self.provider
    }

    async fn connect(&self) -> Result<()> {
        self.endpoint.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.endpoint.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.endpoint.accept.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(SkeinError::Connection(format!("{}: Connection refused", self.endpoint.address)))
        }
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.endpoint.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.endpoint.healthy.load(Ordering::SeqCst)
    }

    async fn sync_send(&self, request: &Request, timeout: Duration) -> Result<Response> {
        self.ensure_available()?;
        self.endpoint.record(timeout);
        let outcome = self.endpoint.respond(request, timeout).await;
        if matches!(outcome, Err(SkeinError::Connection(_))) {
            self.connected.store(false, Ordering::SeqCst);
        }
        outcome
    }

    async fn one_way_send(&self, _request: &Request, timeout: Duration) -> Result<()> {
        self.ensure_available()?;
        self.endpoint.record(timeout);
        self.endpoint.one_way_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn async_send(&self, request: &Request, timeout: Duration) -> Result<ResponseFuture> {
        self.ensure_available()?;
        self.endpoint.record(timeout);
        let (sender, future) = ResponseFuture::channel();
        let endpoint = self.endpoint.clone();
        let request = request.clone();
        tokio::spawn(async move {
            sender.complete(endpoint.respond(&request, timeout).await);
        });
        Ok(future)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.endpoint.address.parse().ok()
    }
}

/// Creates [`MockTransport`]s sharing one [`MockEndpoint`] per address.
#[derive(Default)]
pub struct MockTransportFactory {
    endpoints: DashMap<String, Arc<MockEndpoint>>,
    created: AtomicUsize,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The endpoint for `address` (`host:port`), created on first use.
    pub fn endpoint(&self, address: &str) -> Arc<MockEndpoint> {
        self.endpoints
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockEndpoint::new(address.to_string())))
            .clone()
    }

    pub fn endpoint_for(&self, provider: &ProviderInfo) -> Arc<MockEndpoint> {
        self.endpoint(&provider.address())
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Total calls across every endpoint.
    pub fn total_calls(&self) -> usize {
        self.endpoints.iter().map(|e| e.value().calls()).sum()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, provider: &ProviderInfo, _config: &TransportConfig) -> Arc<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockTransport {
            provider: provider.clone(),
            endpoint: self.endpoint_for(provider),
            connected: AtomicBool::new(false),
        })
    }
}
