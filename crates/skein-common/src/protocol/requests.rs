use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::SkeinError;

pub type RequestId = u64;
pub type ServiceName = String;
pub type MethodName = String;
pub type RpcArgs = serde_json::Value;

/// How a call is dispatched and how its result is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvokeType {
    /// Wait for the response on the calling task.
    #[default]
    Sync,
    /// Fire and forget; an empty response is returned immediately.
    OneWay,
    /// Deliver the response to a callback registered on the invoke context.
    Callback,
    /// Hand a `ResponseFuture` back through the invoke context.
    Future,
}

impl InvokeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvokeType::Sync => "sync",
            InvokeType::OneWay => "oneway",
            InvokeType::Callback => "callback",
            InvokeType::Future => "future",
        }
    }
}

impl fmt::Display for InvokeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvokeType {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(InvokeType::Sync),
            "oneway" => Ok(InvokeType::OneWay),
            "callback" => Ok(InvokeType::Callback),
            "future" => Ok(InvokeType::Future),
            other => Err(SkeinError::Config(format!("Unknown invoke type: {}", other))),
        }
    }
}

/// A single RPC call against a service method.
///
/// The `id` is left at zero by [`Request::new`]; the cluster invoker stamps a
/// per-consumer sequence number before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub service: ServiceName,
    pub method: MethodName,
    pub args: RpcArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_type: Option<InvokeType>,
    /// Explicit key for hash-based load balancing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_key: Option<String>,
}

impl Request {
    pub fn new(service: impl Into<String>, method: impl Into<String>, args: RpcArgs) -> Self {
        Request {
            id: 0,
            service: service.into(),
            method: method.into(),
            args,
            timeout_ms: None,
            invoke_type: None,
            hash_key: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_invoke_type(mut self, invoke_type: InvokeType) -> Self {
        self.invoke_type = Some(invoke_type);
        self
    }

    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = Some(key.into());
        self
    }

    /// `service.method`, the key used for per-method state.
    pub fn method_key(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}
