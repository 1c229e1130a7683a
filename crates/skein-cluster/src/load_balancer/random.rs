use skein_common::{ProviderInfo, Request};

use super::{weighted_random, LoadBalancer};

/// Weighted random selection.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn do_select(&self, _request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        weighted_random(&mut rand::thread_rng(), candidates)
    }
}
