use skein_common::{ProviderInfo, Request};

use super::{weighted_random, LoadBalancer};

/// Host treated as local when none is configured.
pub const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";

/// Prefers providers running on the local host.
///
/// Picks by weight among providers whose host matches the local host, and
/// among all candidates when none does.
#[derive(Debug)]
pub struct LocalPrefLoadBalancer {
    local_host: String,
}

impl LocalPrefLoadBalancer {
    pub fn new(local_host: impl Into<String>) -> Self {
        Self {
            local_host: local_host.into(),
        }
    }

    pub fn local_host(&self) -> &str {
        &self.local_host
    }
}

impl Default for LocalPrefLoadBalancer {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_HOST)
    }
}

impl LoadBalancer for LocalPrefLoadBalancer {
    fn name(&self) -> &'static str {
        "localpref"
    }

    fn do_select(&self, _request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        let local: Vec<ProviderInfo> = candidates
            .iter()
            .filter(|p| p.host == self.local_host)
            .cloned()
            .collect();

        let mut rng = rand::thread_rng();
        match local.as_slice() {
            [] => weighted_random(&mut rng, candidates),
            [only] => only.clone(),
            _ => weighted_random(&mut rng, &local),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefers_local_host() {
        let lb = LocalPrefLoadBalancer::new("10.0.0.5");
        let request = Request::new("svc", "m", json!(null));
        let candidates = vec![
            ProviderInfo::new("10.0.0.1", 1),
            ProviderInfo::new("10.0.0.5", 1),
            ProviderInfo::new("10.0.0.9", 1),
        ];
        for _ in 0..50 {
            assert_eq!(lb.select(&request, &candidates).unwrap().host, "10.0.0.5");
        }
    }

    #[test]
    fn test_falls_back_to_all_candidates() {
        let lb = LocalPrefLoadBalancer::default();
        let request = Request::new("svc", "m", json!(null));
        let candidates = vec![ProviderInfo::new("10.0.0.1", 1), ProviderInfo::new("10.0.0.2", 1)];
        let picked = lb.select(&request, &candidates).unwrap();
        assert!(candidates.contains(&picked));
    }
}
