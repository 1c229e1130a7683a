//! Request-scoped invocation context.
//!
//! An [`InvokeContext`] travels alongside a single `invoke` call. Callers put
//! per-call overrides into it (a pinpoint target, a response callback) and
//! read per-call outputs out of it once the call returns (the provider that
//! served it, the pending future of a future-mode call).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use skein_common::{ProviderInfo, Response, ResponseFuture, Result};

/// Receives the outcome of a callback-mode call.
pub type ResponseCallback = Arc<dyn Fn(Result<Response>) + Send + Sync>;

#[derive(Default)]
pub struct InvokeContext {
    pinpoint: Option<ProviderInfo>,
    callback: Option<ResponseCallback>,
    future: Mutex<Option<ResponseFuture>>,
    provider: Mutex<Option<ProviderInfo>>,
}

impl InvokeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the call onto `provider`, bypassing load balancing.
    pub fn with_pinpoint(mut self, provider: ProviderInfo) -> Self {
        self.pinpoint = Some(provider);
        self
    }

    /// Like [`InvokeContext::with_pinpoint`], parsing a provider URL.
    pub fn with_pinpoint_url(self, url: &str) -> Result<Self> {
        Ok(self.with_pinpoint(url.parse()?))
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Result<Response>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn pinpoint(&self) -> Option<&ProviderInfo> {
        self.pinpoint.as_ref()
    }

    pub fn callback(&self) -> Option<ResponseCallback> {
        self.callback.clone()
    }

    /// Takes the pending response of a future-mode call.
    pub fn take_future(&self) -> Option<ResponseFuture> {
        self.future.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// The provider the most recent attempt was dispatched to.
    pub fn provider(&self) -> Option<ProviderInfo> {
        self.provider.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_future(&self, future: ResponseFuture) {
        *self.future.lock().unwrap_or_else(PoisonError::into_inner) = Some(future);
    }

    pub(crate) fn set_provider(&self, provider: &ProviderInfo) {
        *self.provider.lock().unwrap_or_else(PoisonError::into_inner) = Some(provider.clone());
    }
}

impl fmt::Debug for InvokeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeContext")
            .field("pinpoint", &self.pinpoint)
            .field("callback", &self.callback.is_some())
            .field("provider", &self.provider())
            .finish()
    }
}
