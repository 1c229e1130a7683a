use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use skein_common::{ProviderInfo, Request};

use super::LoadBalancer;

/// Smooth weighted round robin.
///
/// Every pick adds each candidate's weight to its running score, chooses the
/// highest score and subtracts the total weight from the winner. Over one
/// cycle every provider is picked in proportion to its weight without long
/// runs on the heaviest one. Scores are kept per service method.
#[derive(Debug, Default)]
pub struct WeightedRoundRobinLoadBalancer {
    scores: Mutex<HashMap<String, HashMap<ProviderInfo, i64>>>,
}

impl WeightedRoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for WeightedRoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        "weightroundrobin"
    }

    fn do_select(&self, request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        let mut all = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        let scores = all.entry(request.method_key()).or_default();
        scores.retain(|provider, _| candidates.contains(provider));

        let total: i64 = candidates.iter().map(|p| i64::from(p.weight())).sum();
        // All-zero weights degrade to plain rotation.
        let weight_of = |p: &ProviderInfo| if total == 0 { 1 } else { i64::from(p.weight()) };
        let total = if total == 0 { candidates.len() as i64 } else { total };

        let mut best: Option<(&ProviderInfo, i64)> = None;
        for provider in candidates {
            let score = scores.entry(provider.clone()).or_insert(0);
            *score += weight_of(provider);
            if best.map_or(true, |(_, top)| *score > top) {
                best = Some((provider, *score));
            }
        }

        let winner = best.map(|(p, _)| p.clone()).unwrap_or_else(|| candidates[0].clone());
        if let Some(score) = scores.get_mut(&winner) {
            *score -= total;
        }
        winner
    }
}
