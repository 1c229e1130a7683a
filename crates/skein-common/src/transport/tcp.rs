use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{ResponseFuture, Transport, TransportConfig, TransportFactory};
use crate::protocol::error::{Result, SkeinError};
use crate::protocol::{Request, Response, ResponseCode};
use crate::provider::ProviderInfo;
use crate::transport::codec::JsonCodec;

/// Maximum accepted frame size (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Length-prefixed JSON transport over a single TCP connection.
///
/// Requests on one transport are serialized: each call holds the stream for
/// its whole request/response exchange. A call that times out or fails
/// mid-exchange drops the stream and marks the transport unavailable, since
/// the framing can no longer be trusted.
///
/// # Wire Protocol
///
/// ```text
/// [4-byte length] [JSON data]
/// ```
///
/// One-way requests are written without reading a reply; providers do not
/// answer requests whose `invoke_type` is `oneway`.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    provider: ProviderInfo,
    config: TransportConfig,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    addrs: Mutex<Option<(SocketAddr, SocketAddr)>>,
}

impl TcpTransport {
    /// Creates a disconnected transport for `provider`.
    pub fn new(provider: ProviderInfo, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                config,
                stream: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                addrs: Mutex::new(None),
            }),
        }
    }

    /// Sends a message with length prefix.
    ///
    /// Wire format: `[4-byte length as u32 big-endian] + [data]`
    pub async fn send_message(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
        let len = data.len() as u32;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| Self::map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| Self::map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| Self::map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives a message with length prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The peer closes the connection before a full frame arrives
    /// - Message exceeds maximum size (100 MB)
    /// - Reading the data fails
    pub async fn receive_message(stream: &mut TcpStream) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(SkeinError::Transport(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| Self::map_io_error(e, "reading data"))?;

        Ok(buf)
    }

    /// Map IO errors to appropriate SkeinError variants
    ///
    /// - Peer closed the stream -> `EmptyResponse`
    /// - Connection errors -> `Connection`
    /// - Other IO errors -> `Io`
    fn map_io_error(err: std::io::Error, context: &str) -> SkeinError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                SkeinError::EmptyResponse(format!("{}: peer closed the connection", context))
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe => {
                SkeinError::Connection(format!("{}: Connection lost", context))
            }
            _ => SkeinError::Io(err),
        }
    }
}

impl Inner {
    async fn open(&self) -> Result<TcpStream> {
        let addr = self.provider.address();
        let socket_addrs = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(|e| SkeinError::InvalidAddress(format!("'{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(socket_addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(SkeinError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no address resolved".to_string())
        )))
    }

    async fn exchange(&self, request: &Request, timeout: Duration, expect_reply: bool) -> Result<Option<Response>> {
        let timeout_ms = timeout.as_millis() as u64;
        let deadline = Instant::now() + timeout;

        let mut guard = tokio::time::timeout_at(deadline, self.stream.lock())
            .await
            .map_err(|_| SkeinError::ClientTimeout(timeout_ms))?;
        let Some(stream) = guard.as_mut() else {
            return Err(SkeinError::Connection(format!(
                "Not connected to {}",
                self.provider.address()
            )));
        };

        let encoded = JsonCodec::encode_request(request)?;
        let round_trip = async {
            TcpTransport::send_message(stream, &encoded).await?;
            if !expect_reply {
                return Ok(None);
            }
            let data = TcpTransport::receive_message(stream).await?;
            Ok(Some(JsonCodec::decode_response(&data)?))
        };
        let outcome = tokio::time::timeout_at(deadline, round_trip).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(SkeinError::ClientTimeout(timeout_ms))
            }
        }
    }

    async fn request(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let response = self.exchange(request, timeout, true).await?.ok_or_else(|| {
            SkeinError::EmptyResponse(format!("no reply from {}", self.provider.address()))
        })?;

        if response.id != request.id {
            return Err(SkeinError::Transport(format!(
                "Response id {} does not match request id {}",
                response.id, request.id
            )));
        }
        if response.code == ResponseCode::ServerBusy {
            return Err(SkeinError::ServerBusy(
                response.error.unwrap_or_else(|| self.provider.address()),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn provider(&self) -> &ProviderInfo {
        &self.inner.provider
    }

    async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let mut guard = inner.stream.lock().await;
        if guard.is_some() && inner.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let connect_timeout = inner.config.connect_timeout();
        let stream = tokio::time::timeout(connect_timeout, inner.open())
            .await
            .map_err(|_| {
                SkeinError::Connection(format!(
                    "Timed out connecting to {} after {}ms",
                    inner.provider.address(),
                    connect_timeout.as_millis()
                ))
            })??;

        if let (Ok(local), Ok(remote)) = (stream.local_addr(), stream.peer_addr()) {
            *inner.addrs.lock().unwrap_or_else(PoisonError::into_inner) = Some((local, remote));
        }
        *guard = Some(stream);
        inner.connected.store(true, Ordering::SeqCst);

        tracing::debug!(provider = %inner.provider.address(), "Connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let inner = &self.inner;
        inner.connected.store(false, Ordering::SeqCst);

        let stream = match tokio::time::timeout(inner.config.disconnect_timeout(), inner.stream.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::warn!(
                    provider = %inner.provider.address(),
                    "In-flight request still running at disconnect timeout"
                );
                None
            }
        };

        if let Some(mut stream) = stream {
            let _ = stream.shutdown().await;
            tracing::debug!(provider = %inner.provider.address(), "Disconnected");
        }
    }

    fn is_available(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn sync_send(&self, request: &Request, timeout: Duration) -> Result<Response> {
        self.inner.request(request, timeout).await
    }

    async fn one_way_send(&self, request: &Request, timeout: Duration) -> Result<()> {
        self.inner.exchange(request, timeout, false).await.map(|_| ())
    }

    async fn async_send(&self, request: &Request, timeout: Duration) -> Result<ResponseFuture> {
        if !self.is_available() {
            return Err(SkeinError::Connection(format!(
                "Not connected to {}",
                self.inner.provider.address()
            )));
        }

        let (sender, future) = ResponseFuture::channel();
        let inner = self.inner.clone();
        let request = request.clone();
        tokio::spawn(async move {
            sender.complete(inner.request(&request, timeout).await);
        });
        Ok(future)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.inner
            .addrs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(local, _)| local)
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.inner
            .addrs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(_, remote)| remote)
    }
}

/// Creates a [`TcpTransport`] per provider.
#[derive(Debug, Default, Clone)]
pub struct TcpTransportFactory;

impl TcpTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self, provider: &ProviderInfo, config: &TransportConfig) -> Arc<dyn Transport> {
        Arc::new(TcpTransport::new(provider.clone(), config.clone()))
    }
}
