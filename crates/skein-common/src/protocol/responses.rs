//! Skein Response Types
//!
//! This module defines the RPC response structure.

use serde::{Deserialize, Serialize};

use super::error::{Result, SkeinError};
use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// Outcome class reported by the provider.
///
/// `ServerBusy` is the provider telling the consumer to back off; the
/// transport turns it into [`SkeinError::ServerBusy`] so fail-over can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    #[default]
    Success,
    Application,
    ServerBusy,
    ServerError,
}

/// An RPC response returned from a provider.
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Error message (present on failure)
/// - `success`: Whether the request succeeded
/// - `code`: The provider-side outcome class
///
/// An application error raised by the provider travels inside the response
/// (`success == false`, `code == Application`) and is never retried.
///
/// # Example
///
/// ```
/// use skein_common::protocol::responses::Response;
/// use serde_json::json;
///
/// let success = Response::success(123, json!({"pi": 3.14159}));
/// assert!(success.success);
///
/// let error = Response::error(123, "Division by zero");
/// assert!(error.into_result().is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<RpcResult>,
    /// Error message (present on failure)
    pub error: Option<String>,
    /// Whether the request succeeded
    pub success: bool,
    /// Provider-side outcome class
    #[serde(default)]
    pub code: ResponseCode,
}

impl Response {
    /// Creates a successful response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `result` - The result value (any JSON-serializable data)
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            success: true,
            code: ResponseCode::Success,
        }
    }

    /// Creates an application error response.
    ///
    /// # Arguments
    ///
    /// * `id` - The request identifier (must match the request's ID)
    /// * `error` - The error message (describing what went wrong)
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            success: false,
            code: ResponseCode::Application,
        }
    }

    /// Creates a response signalling the provider is overloaded.
    pub fn busy(id: RequestId, message: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(message.into()),
            success: false,
            code: ResponseCode::ServerBusy,
        }
    }

    /// The placeholder returned for one-way, callback and future calls.
    pub fn empty(id: RequestId) -> Self {
        Response {
            id,
            result: None,
            error: None,
            success: true,
            code: ResponseCode::Success,
        }
    }

    /// Converts the response into its result value.
    ///
    /// # Returns
    ///
    /// The result (or `Value::Null` for an empty response), or
    /// [`SkeinError::Application`] when the provider reported a failure.
    pub fn into_result(self) -> Result<RpcResult> {
        if self.success {
            Ok(self.result.unwrap_or(RpcResult::Null))
        } else {
            Err(SkeinError::Application(
                self.error.unwrap_or_else(|| "unknown application error".to_string()),
            ))
        }
    }
}
