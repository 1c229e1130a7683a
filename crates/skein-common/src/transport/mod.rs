//! Skein Transport Layer
//!
//! This module defines the contract between a cluster invoker and the
//! connection to a single provider, plus a TCP implementation of it.
//!
//! # Components
//!
//! - **[`Transport`]**: one logical connection to one provider
//! - **[`TransportFactory`]**: creates transports for newly tracked providers
//! - **[`ResponseFuture`]**: the pending result of an asynchronous send
//! - **[`JsonCodec`]**: encode/decode protocol messages to JSON
//! - **[`TcpTransport`]**: length-prefixed JSON over TCP
//!
//! # Message Size Limits
//!
//! The TCP transport enforces a maximum message size of 100 MB.

pub mod codec;
pub mod tcp;

pub use codec::JsonCodec;
pub use tcp::{TcpTransport, TcpTransportFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::protocol::{Request, Response, Result, SkeinError};
use crate::provider::ProviderInfo;

/// Settings a transport is created with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum time to establish a connection (milliseconds)
    pub connect_timeout_ms: u64,
    /// Maximum time to wait for in-flight work when closing (milliseconds)
    pub disconnect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            disconnect_timeout_ms: 10000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

/// One logical connection to one provider.
///
/// Implementations must be safe to share between tasks; the connection
/// registry hands the same `Arc<dyn Transport>` to every concurrent call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The provider this transport talks to.
    fn provider(&self) -> &ProviderInfo;

    /// Establishes the connection. Calling it on a connected transport is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Closes the connection, waiting for in-flight work where possible.
    async fn disconnect(&self);

    /// Whether the connection is currently usable.
    fn is_available(&self) -> bool;

    /// Sends a request and waits at most `timeout` for its response.
    async fn sync_send(&self, request: &Request, timeout: Duration) -> Result<Response>;

    /// Sends a request without waiting for any response.
    async fn one_way_send(&self, request: &Request, timeout: Duration) -> Result<()>;

    /// Sends a request and returns a handle resolving to its response.
    async fn async_send(&self, request: &Request, timeout: Duration) -> Result<ResponseFuture>;

    fn local_address(&self) -> Option<SocketAddr>;

    fn remote_address(&self) -> Option<SocketAddr>;
}

/// Creates transports for providers the registry starts tracking.
pub trait TransportFactory: Send + Sync {
    fn create(&self, provider: &ProviderInfo, config: &TransportConfig) -> Arc<dyn Transport>;
}

/// Completes a [`ResponseFuture`].
#[derive(Debug)]
pub struct ResponseSender {
    tx: oneshot::Sender<Result<Response>>,
}

impl ResponseSender {
    /// Delivers the outcome. Does nothing if the future was dropped.
    pub fn complete(self, outcome: Result<Response>) {
        let _ = self.tx.send(outcome);
    }
}

/// The pending outcome of an asynchronous send.
///
/// Await it to get the response, or poll it without blocking via
/// [`ResponseFuture::try_get`].
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<Response>>,
}

impl ResponseFuture {
    pub fn channel() -> (ResponseSender, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        (ResponseSender { tx }, ResponseFuture { rx })
    }

    /// A future that is already resolved.
    pub fn ready(outcome: Result<Response>) -> ResponseFuture {
        let (sender, future) = ResponseFuture::channel();
        sender.complete(outcome);
        future
    }

    /// Returns the outcome if it has arrived.
    pub fn try_get(&mut self) -> Option<Result<Response>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(closed_error())),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(closed_error())))
    }
}

fn closed_error() -> SkeinError {
    SkeinError::Transport("response channel closed before completion".to_string())
}
