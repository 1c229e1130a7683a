//! Skein
//!
//! Client-side cluster invocation runtime for RPC consumers. This crate
//! re-exports the two workspace crates:
//!
//! - [`common`]: wire types, provider identity and the transport seam
//! - [`cluster`]: the cluster invoker and everything it composes

pub use skein_cluster as cluster;
pub use skein_common as common;

pub use skein_cluster::{ClusterInvoker, ConsumerConfig, ExtensionRegistry, InvokeContext, MethodConfig};
pub use skein_common::transport::TcpTransportFactory;
pub use skein_common::{InvokeType, ProviderGroup, ProviderInfo, Request, Response, Result, SkeinError};
