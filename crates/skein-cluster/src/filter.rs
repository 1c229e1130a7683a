//! Invocation filters.
//!
//! Filters wrap the final transport dispatch of every attempt. Each filter
//! receives the call and a [`Next`] handle; calling [`Next::run`] passes the
//! call down the chain, and the end of the chain sends it on the transport
//! according to its invoke type.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, Instrument};

use skein_common::{InvokeType, ProviderInfo, Request, Response, Result, SkeinError, Transport};

use crate::context::InvokeContext;

/// One attempt on one provider.
pub struct Call<'a> {
    pub provider: &'a ProviderInfo,
    pub transport: &'a Arc<dyn Transport>,
    pub request: &'a Request,
    pub timeout: Duration,
    pub invoke_type: InvokeType,
    pub context: &'a InvokeContext,
}

#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, call: &Call<'_>, next: Next<'_>) -> Result<Response>;
}

/// The remainder of a filter chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Filter>],
}

impl<'a> Next<'a> {
    pub async fn run(self, call: &Call<'_>) -> Result<Response> {
        match self.rest.split_first() {
            Some((filter, rest)) => filter.invoke(call, Next { rest }).await,
            None => dispatch(call).await,
        }
    }
}

/// Filters applied to every attempt, in order.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub async fn invoke(&self, call: &Call<'_>) -> Result<Response> {
        Next { rest: &self.filters }.run(call).await
    }
}

/// Sends the call on its transport.
///
/// Only synchronous calls return the provider's response; the other modes
/// return an empty response as soon as the request is handed off.
pub async fn dispatch(call: &Call<'_>) -> Result<Response> {
    let request = call.request;
    match call.invoke_type {
        InvokeType::Sync => call.transport.sync_send(request, call.timeout).await,
        InvokeType::OneWay => {
            call.transport.one_way_send(request, call.timeout).await?;
            Ok(Response::empty(request.id))
        }
        InvokeType::Callback => {
            let callback = call.context.callback().ok_or_else(|| {
                SkeinError::Config(format!(
                    "{} uses callback invocation but no callback is registered",
                    request.method_key()
                ))
            })?;
            let pending = call.transport.async_send(request, call.timeout).await?;
            tokio::spawn(async move {
                callback(pending.await);
            });
            Ok(Response::empty(request.id))
        }
        InvokeType::Future => {
            let pending = call.transport.async_send(request, call.timeout).await?;
            call.context.set_future(pending);
            Ok(Response::empty(request.id))
        }
    }
}

/// Wraps each attempt in a debug span and logs its duration.
#[derive(Debug, Default)]
pub struct TracingFilter;

#[async_trait]
impl Filter for TracingFilter {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn invoke(&self, call: &Call<'_>, next: Next<'_>) -> Result<Response> {
        let span = tracing::debug_span!(
            "invoke",
            service = %call.request.service,
            method = %call.request.method,
            provider = %call.provider.address(),
            id = call.request.id,
        );
        let started = Instant::now();
        let outcome = next.run(call).instrument(span.clone()).await;

        span.in_scope(|| {
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "Attempt finished"
            );
        });
        outcome
    }
}
