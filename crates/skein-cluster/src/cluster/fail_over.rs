use async_trait::async_trait;
use tracing::{debug, warn};

use skein_common::{ProviderInfo, Request, Response, Result, SkeinError};

use super::base::ClusterCore;
use super::ClusterStrategy;
use crate::context::InvokeContext;

/// Retries busy, timed-out and empty-response attempts on other providers.
///
/// A call makes at most `retries + 1` attempts, where `retries` comes from
/// the method config or the consumer default. Each attempt avoids the
/// providers already tried while others remain. Any other failure ends the
/// call immediately.
#[derive(Debug, Default)]
pub struct FailOverCluster;

fn should_retry(error: &SkeinError) -> bool {
    error.is_retriable() || matches!(error.root(), SkeinError::EmptyResponse(_))
}

#[async_trait]
impl ClusterStrategy for FailOverCluster {
    fn name(&self) -> &'static str {
        "failover"
    }

    async fn do_invoke(&self, core: &ClusterCore, request: &Request, context: &InvokeContext) -> Result<Response> {
        let retries = core.config().method_retries(&request.method);
        let mut invoked: Vec<ProviderInfo> = Vec::with_capacity(retries as usize + 1);
        let mut last_error = None;

        for attempt in 0..=retries {
            let (provider, transport) = core.select(request, context, &invoked).await?;

            match core.call(&provider, &transport, request, context).await {
                Ok(response) => {
                    if attempt > 0 {
                        warn!(
                            service = %request.service,
                            method = %request.method,
                            provider = %provider.address(),
                            attempt,
                            tried = ?invoked.iter().map(|p| p.address()).collect::<Vec<_>>(),
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(e) if should_retry(&e) => {
                    debug!(
                        service = %request.service,
                        method = %request.method,
                        provider = %provider.address(),
                        attempt,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    last_error = Some(SkeinError::invocation(
                        &request.service,
                        &request.method,
                        provider.address(),
                        e,
                    ));
                    invoked.push(provider);
                }
                Err(e) => {
                    return Err(SkeinError::invocation(
                        &request.service,
                        &request.method,
                        provider.address(),
                        e,
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SkeinError::IllegalState(format!("{} made no attempt", request.method_key()))
        }))
    }
}
