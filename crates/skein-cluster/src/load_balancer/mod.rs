//! Load balancers.
//!
//! A load balancer picks one provider out of the routed candidates for a
//! single call. The candidate list is never empty by the time an algorithm
//! sees it: [`LoadBalancer::select`] handles the empty and single-candidate
//! cases before delegating to [`LoadBalancer::do_select`].

pub mod consistent_hash;
pub mod local_pref;
pub mod random;
pub mod round_robin;
pub mod weighted_round_robin;

pub use consistent_hash::ConsistentHashLoadBalancer;
pub use local_pref::LocalPrefLoadBalancer;
pub use random::RandomLoadBalancer;
pub use round_robin::RoundRobinLoadBalancer;
pub use weighted_round_robin::WeightedRoundRobinLoadBalancer;

use rand::Rng;

use skein_common::{ProviderInfo, Request, Result, SkeinError};

/// Picks one provider per call.
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Selects a provider from `candidates`.
    ///
    /// # Errors
    ///
    /// Returns [`SkeinError::Routing`] if `candidates` is empty.
    fn select(&self, request: &Request, candidates: &[ProviderInfo]) -> Result<ProviderInfo> {
        match candidates {
            [] => Err(SkeinError::Routing(format!(
                "No provider to select for {}",
                request.method_key()
            ))),
            [only] => Ok(only.clone()),
            _ => Ok(self.do_select(request, candidates)),
        }
    }

    /// Algorithm-specific selection over at least two candidates.
    fn do_select(&self, request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo;
}

/// Weighted random pick; uniform when every weight is equal or zero.
pub(crate) fn weighted_random<R: Rng + ?Sized>(rng: &mut R, candidates: &[ProviderInfo]) -> ProviderInfo {
    let total: u64 = candidates.iter().map(|p| u64::from(p.weight())).sum();
    let first = candidates[0].weight();
    let uniform = total == 0 || candidates.iter().all(|p| p.weight() == first);

    if uniform {
        return candidates[rng.gen_range(0..candidates.len())].clone();
    }

    let mut offset = rng.gen_range(0..total);
    for provider in candidates {
        let weight = u64::from(provider.weight());
        if offset < weight {
            return provider.clone();
        }
        offset -= weight;
    }
    candidates[candidates.len() - 1].clone()
}
