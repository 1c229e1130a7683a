use async_trait::async_trait;

use skein_common::{Request, Response, Result, SkeinError};

use super::base::ClusterCore;
use super::ClusterStrategy;
use crate::context::InvokeContext;

/// Selects once and calls once; every failure goes straight to the caller.
#[derive(Debug, Default)]
pub struct FailFastCluster;

#[async_trait]
impl ClusterStrategy for FailFastCluster {
    fn name(&self) -> &'static str {
        "failfast"
    }

    async fn do_invoke(&self, core: &ClusterCore, request: &Request, context: &InvokeContext) -> Result<Response> {
        let (provider, transport) = core.select(request, context, &[]).await?;
        core.call(&provider, &transport, request, context)
            .await
            .map_err(|e| SkeinError::invocation(&request.service, &request.method, provider.address(), e))
    }
}
