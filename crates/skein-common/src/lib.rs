//! Skein Common Types and Transport
//!
//! This crate provides the shared vocabulary of the Skein consumer runtime:
//! the request/response protocol, provider identity and grouping, and the
//! transport contract a cluster invoker dispatches through.
//!
//! # Components
//!
//! - [`protocol`] - Request/Response types, invocation modes and the error taxonomy
//! - [`provider`] - Provider identity (`ProviderInfo`) and named provider groups
//! - [`transport`] - The `Transport` trait, its factory and a length-prefixed TCP implementation
//!
//! # Wire Format
//!
//! The bundled TCP transport frames JSON messages with a 4-byte big-endian
//! length prefix:
//!
//! ```text
//! [4-byte length as u32 big-endian] [JSON data]
//! ```
//!
//! # Example
//!
//! ```
//! use skein_common::{ProviderInfo, Request};
//! use serde_json::json;
//!
//! let provider: ProviderInfo = "skein://10.0.0.1:12200?weight=50".parse().unwrap();
//! assert_eq!(provider.weight(), 50);
//!
//! let request = Request::new("demo.EchoService", "echo", json!(["hello"]))
//!     .with_timeout(500);
//! assert_eq!(request.timeout_ms, Some(500));
//! ```

pub mod protocol;
pub mod provider;
pub mod transport;

pub use protocol::*;
pub use provider::{ProviderGroup, ProviderInfo, ProviderOrigin};
pub use transport::{ResponseFuture, ResponseSender, Transport, TransportConfig, TransportFactory};
