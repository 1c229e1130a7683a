//! In-process provider speaking the length-prefixed JSON protocol.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use skein::common::transport::TcpTransport;
use skein::common::transport::JsonCodec;
use skein::{InvokeType, ProviderInfo, Request, Response};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A provider that answers every call with its own name and the request args.
pub struct ProviderServer {
    name: String,
    addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    one_way_calls: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ProviderServer {
    pub async fn start(name: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Self {
            name: name.to_string(),
            addr,
            calls: Arc::new(AtomicUsize::new(0)),
            one_way_calls: Arc::new(AtomicUsize::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        };

        let accept = tokio::spawn({
            let name = server.name.clone();
            let calls = server.calls.clone();
            let one_way_calls = server.one_way_calls.clone();
            let tasks = server.tasks.clone();
            async move {
                while let Ok((stream, peer)) = listener.accept().await {
                    tracing::debug!(provider = %name, %peer, "Connection established");
                    let connection = tokio::spawn(handle_connection(
                        stream,
                        name.clone(),
                        calls.clone(),
                        one_way_calls.clone(),
                    ));
                    tasks.lock().unwrap().push(connection);
                }
            }
        });
        server.tasks.lock().unwrap().push(accept);
        server
    }

    pub fn provider(&self) -> ProviderInfo {
        ProviderInfo::new("127.0.0.1", self.addr.port())
    }

    pub fn url(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn one_way_calls(&self) -> usize {
        self.one_way_calls.load(Ordering::SeqCst)
    }

    /// Stops accepting and drops every open connection.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ProviderServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    name: String,
    calls: Arc<AtomicUsize>,
    one_way_calls: Arc<AtomicUsize>,
) {
    while let Ok(data) = TcpTransport::receive_message(&mut stream).await {
        let request: Request = match JsonCodec::decode_request(&data) {
            Ok(request) => request,
            Err(e) => {
                let reply = JsonCodec::encode_response(&Response::error(0, e.to_string())).unwrap();
                let _ = TcpTransport::send_message(&mut stream, &reply).await;
                continue;
            }
        };
        calls.fetch_add(1, Ordering::SeqCst);

        if request.invoke_type == Some(InvokeType::OneWay) {
            one_way_calls.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let response = match request.method.as_str() {
            "fail" => Response::error(request.id, format!("{} refused", name)),
            _ => Response::success(
                request.id,
                serde_json::json!({ "provider": name, "args": request.args }),
            ),
        };
        let reply = JsonCodec::encode_response(&response).unwrap();
        if TcpTransport::send_message(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}
