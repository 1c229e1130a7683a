use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use skein_common::{ProviderInfo, Request};

use super::LoadBalancer;

/// Round robin with an independent sequence per service method.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    sequences: DashMap<String, AtomicUsize>,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn do_select(&self, request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        let sequence = self
            .sequences
            .entry(request.method_key())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        candidates[sequence % candidates.len()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair() -> Vec<ProviderInfo> {
        vec![ProviderInfo::new("p1", 1), ProviderInfo::new("p2", 1)]
    }

    #[test]
    fn test_round_robin_alternates() {
        let lb = RoundRobinLoadBalancer::new();
        let request = Request::new("svc", "m", json!(null));
        let candidates = pair();

        let hosts: Vec<_> = (0..4)
            .map(|_| lb.select(&request, &candidates).unwrap().host)
            .collect();
        assert_eq!(hosts, vec!["p1", "p2", "p1", "p2"]);
    }

    #[test]
    fn test_sequences_are_per_method() {
        let lb = RoundRobinLoadBalancer::new();
        let candidates = pair();
        let a = Request::new("svc", "a", json!(null));
        let b = Request::new("svc", "b", json!(null));

        assert_eq!(lb.select(&a, &candidates).unwrap().host, "p1");
        assert_eq!(lb.select(&b, &candidates).unwrap().host, "p1");
        assert_eq!(lb.select(&a, &candidates).unwrap().host, "p2");
    }
}
