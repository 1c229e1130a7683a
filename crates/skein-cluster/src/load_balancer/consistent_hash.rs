use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::{Mutex, PoisonError};
use twox_hash::XxHash64;

use skein_common::{ProviderInfo, Request};

use super::LoadBalancer;

/// Virtual nodes placed on the ring per provider.
pub const VIRTUAL_NODES: usize = 128;

fn hash_of(key: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    hasher.finish()
}

struct Ring {
    fingerprint: u64,
    points: BTreeMap<u64, ProviderInfo>,
}

impl Ring {
    fn build(candidates: &[ProviderInfo], fingerprint: u64) -> Self {
        let mut points = BTreeMap::new();
        for provider in candidates {
            let address = provider.address();
            for replica in 0..VIRTUAL_NODES {
                points.insert(hash_of(&format!("{}#{}", address, replica)), provider.clone());
            }
        }
        Ring { fingerprint, points }
    }

    fn locate(&self, hash: u64) -> Option<&ProviderInfo> {
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, provider)| provider)
    }
}

/// Consistent hashing over a virtual-node ring.
///
/// The key is the request's explicit hash key, or else its first argument.
/// One ring is kept per service method and rebuilt whenever the candidate
/// set changes.
#[derive(Default)]
pub struct ConsistentHashLoadBalancer {
    rings: Mutex<HashMap<String, Ring>>,
}

impl ConsistentHashLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint(candidates: &[ProviderInfo]) -> u64 {
        let mut addresses: Vec<String> = candidates.iter().map(|p| p.to_string()).collect();
        addresses.sort();
        hash_of(&addresses.join(","))
    }

    fn key_of(request: &Request) -> String {
        if let Some(key) = &request.hash_key {
            return key.clone();
        }
        let first = match &request.args {
            serde_json::Value::Array(items) => items.first().cloned().unwrap_or_default(),
            other => other.clone(),
        };
        match first {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

impl LoadBalancer for ConsistentHashLoadBalancer {
    fn name(&self) -> &'static str {
        "consistenthash"
    }

    fn do_select(&self, request: &Request, candidates: &[ProviderInfo]) -> ProviderInfo {
        let fingerprint = Self::fingerprint(candidates);
        let mut rings = self.rings.lock().unwrap_or_else(PoisonError::into_inner);
        let ring = rings
            .entry(request.method_key())
            .or_insert_with(|| Ring::build(candidates, fingerprint));
        if ring.fingerprint != fingerprint {
            *ring = Ring::build(candidates, fingerprint);
        }

        ring.locate(hash_of(&Self::key_of(request)))
            .cloned()
            .unwrap_or_else(|| candidates[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn candidates(n: u16) -> Vec<ProviderInfo> {
        (0..n).map(|i| ProviderInfo::new("10.0.0.1", 9000 + i)).collect()
    }

    #[test]
    fn test_same_key_same_provider() {
        let lb = ConsistentHashLoadBalancer::new();
        let list = candidates(5);
        let request = Request::new("svc", "get", json!(["user-42", 1]));

        let first = lb.select(&request, &list).unwrap();
        for _ in 0..20 {
            assert_eq!(lb.select(&request, &list).unwrap(), first);
        }
    }

    #[test]
    fn test_hash_key_overrides_args() {
        let lb = ConsistentHashLoadBalancer::new();
        let list = candidates(5);
        let by_key = Request::new("svc", "get", json!(["other"])).with_hash_key("user-42");
        let by_arg = Request::new("svc", "get", json!(["user-42"]));
        assert_eq!(lb.select(&by_key, &list).unwrap(), lb.select(&by_arg, &list).unwrap());
    }

    #[test]
    fn test_keys_spread_over_providers() {
        let lb = ConsistentHashLoadBalancer::new();
        let list = candidates(4);
        let hit: HashSet<_> = (0..200)
            .map(|i| {
                let request = Request::new("svc", "get", json!([format!("key-{}", i)]));
                lb.select(&request, &list).unwrap().port
            })
            .collect();
        assert_eq!(hit.len(), 4);
    }

    #[test]
    fn test_removing_a_provider_only_moves_its_keys() {
        let lb = ConsistentHashLoadBalancer::new();
        let full = candidates(5);
        let reduced: Vec<_> = full[..4].to_vec();
        let removed = &full[4];

        for i in 0..200 {
            let request = Request::new("svc", "get", json!([format!("key-{}", i)]));
            let before = lb.select(&request, &full).unwrap();
            let after = lb.select(&request, &reduced).unwrap();
            if &before != removed {
                assert_eq!(before, after);
            }
        }
    }
}
