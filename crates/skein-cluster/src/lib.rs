//! Skein cluster
//!
//! Client-side invocation engine for Skein consumers. A
//! [`ClusterInvoker`] fronts every provider of one service: it keeps the
//! provider address book, holds one transport per provider in a
//! health-tracking [`ConnectionRegistry`], routes and load-balances each
//! call, and applies a fail-fast or fail-over policy when an attempt fails.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use skein_cluster::{ClusterInvoker, ConsumerConfig, ExtensionRegistry};
//! use skein_common::transport::tcp::TcpTransportFactory;
//! use skein_common::Request;
//!
//! # async fn run() -> skein_common::Result<()> {
//! let config = ConsumerConfig::new("calculator")
//!     .with_direct_urls(["127.0.0.1:9000", "127.0.0.1:9001"])
//!     .with_load_balancer("roundrobin")
//!     .with_retries(2);
//! let cluster = ClusterInvoker::new(config, &ExtensionRegistry::with_defaults(), Arc::new(TcpTransportFactory))?;
//!
//! let response = cluster.invoke(Request::new("calculator", "add", json!([1, 2]))).await?;
//! println!("{}", response.into_result()?);
//! cluster.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod address_book;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod context;
pub mod extension;
pub mod filter;
pub mod listener;
pub mod load_balancer;
pub mod router;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use address_book::{AddressBook, MultiGroupAddressBook, SingleGroupAddressBook};
pub use cluster::{ClusterCore, ClusterInvoker, ClusterStrategy, FailFastCluster, FailOverCluster};
pub use config::{ConsumerConfig, MethodConfig};
pub use connection::{
    AllConnectRegistry, BatchOutcome, ConnectionRegistry, DestroyHook, ElasticConnectRegistry, HealthSnapshot,
    HealthState, RegistryContext,
};
pub use context::{InvokeContext, ResponseCallback};
pub use extension::ExtensionRegistry;
pub use filter::{Call, Filter, FilterChain, Next, TracingFilter};
pub use listener::{AvailabilityEvent, ConsumerStateListener, ListenerSet};
pub use load_balancer::LoadBalancer;
pub use router::{Router, RouterChain};
