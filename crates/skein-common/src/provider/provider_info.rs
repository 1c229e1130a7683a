use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::protocol::error::SkeinError;

/// Protocol assumed when a provider URL has no scheme.
pub const DEFAULT_PROTOCOL: &str = "skein";

/// Weight assumed when a provider URL carries none.
pub const DEFAULT_WEIGHT: i32 = 100;

/// Where a provider entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOrigin {
    /// Configured statically by the consumer.
    #[default]
    Direct,
    /// Pushed by a discovery source.
    Discovered,
}

/// A remote endpoint able to serve a service.
///
/// Two entries are the same provider when protocol, host, port, weight,
/// timeout and static attributes all match; `origin` is informational and
/// does not take part in equality or hashing.
///
/// # URL form
///
/// ```text
/// [protocol://]host:port[?weight=N&timeout=MS&key=value...]
/// ```
///
/// # Example
///
/// ```
/// use skein_common::ProviderInfo;
///
/// let p: ProviderInfo = "skein://10.0.0.7:12200?weight=20&zone=b".parse().unwrap();
/// assert_eq!(p.address(), "10.0.0.7:12200");
/// assert_eq!(p.weight(), 20);
/// assert_eq!(p.attribute("zone"), Some("b"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub origin: ProviderOrigin,
}

impl ProviderInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ProviderInfo {
            protocol: DEFAULT_PROTOCOL.to_string(),
            host: host.into(),
            port,
            weight: DEFAULT_WEIGHT,
            timeout_ms: None,
            attributes: BTreeMap::new(),
            origin: ProviderOrigin::Direct,
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_origin(mut self, origin: ProviderOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// `host:port`, used for connecting and for log output.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Effective weight for load balancing; negative weights count as zero.
    pub fn weight(&self) -> u32 {
        self.weight.max(0) as u32
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Whether `other` points at the same endpoint, ignoring everything but host and port.
    pub fn same_endpoint(&self, other: &ProviderInfo) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl PartialEq for ProviderInfo {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.port == other.port
            && self.weight == other.weight
            && self.timeout_ms == other.timeout_ms
            && self.attributes == other.attributes
    }
}

impl Eq for ProviderInfo {}

impl Hash for ProviderInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.weight.hash(state);
        self.timeout_ms.hash(state);
        self.attributes.hash(state);
    }
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address())?;
        let mut sep = '?';
        if self.weight != DEFAULT_WEIGHT {
            write!(f, "{}weight={}", sep, self.weight)?;
            sep = '&';
        }
        if let Some(timeout) = self.timeout_ms {
            write!(f, "{}timeout={}", sep, timeout)?;
            sep = '&';
        }
        for (key, value) in &self.attributes {
            write!(f, "{}{}={}", sep, key, value)?;
            sep = '&';
        }
        Ok(())
    }
}

impl FromStr for ProviderInfo {
    type Err = SkeinError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let url = url.trim();
        let invalid = |reason: &str| SkeinError::InvalidAddress(format!("'{}': {}", url, reason));

        let (protocol, rest) = match url.split_once("://") {
            Some((protocol, rest)) if !protocol.is_empty() => (protocol, rest),
            Some(_) => return Err(invalid("empty protocol")),
            None => (DEFAULT_PROTOCOL, url),
        };
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;

        let mut provider = ProviderInfo::new(host, port);
        provider.protocol = protocol.to_string();

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "weight" => {
                    provider.weight = value.parse().map_err(|_| invalid("bad weight"))?;
                }
                "timeout" => {
                    provider.timeout_ms = Some(value.parse().map_err(|_| invalid("bad timeout"))?);
                }
                _ => {
                    provider.attributes.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_full_url() {
        let p: ProviderInfo = "bolt://10.0.0.1:12200?weight=50&timeout=800&zone=a"
            .parse()
            .unwrap();
        assert_eq!(p.protocol, "bolt");
        assert_eq!(p.host, "10.0.0.1");
        assert_eq!(p.port, 12200);
        assert_eq!(p.weight, 50);
        assert_eq!(p.timeout_ms, Some(800));
        assert_eq!(p.attribute("zone"), Some("a"));
    }

    #[test]
    fn test_parse_bare_address_uses_defaults() {
        let p: ProviderInfo = "localhost:9000".parse().unwrap();
        assert_eq!(p.protocol, DEFAULT_PROTOCOL);
        assert_eq!(p.weight, DEFAULT_WEIGHT);
        assert!(p.timeout_ms.is_none());
        assert_eq!(p.address(), "localhost:9000");
    }

    #[test]
    fn test_parse_ipv6() {
        let p: ProviderInfo = "skein://[::1]:7000".parse().unwrap();
        assert_eq!(p.host, "::1");
        assert_eq!(p.address(), "[::1]:7000");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("no-port".parse::<ProviderInfo>().is_err());
        assert!("host:notaport".parse::<ProviderInfo>().is_err());
        assert!(":9000".parse::<ProviderInfo>().is_err());
        assert!("h:1?weight=heavy".parse::<ProviderInfo>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let p = ProviderInfo::new("10.1.1.1", 8080)
            .with_weight(7)
            .with_timeout(250)
            .with_attribute("tag", "blue");
        let again: ProviderInfo = p.to_string().parse().unwrap();
        assert_eq!(p, again);
    }

    #[test]
    fn test_origin_does_not_affect_identity() {
        let direct = ProviderInfo::new("h", 1);
        let discovered = ProviderInfo::new("h", 1).with_origin(ProviderOrigin::Discovered);
        assert_eq!(direct, discovered);

        let set: HashSet<_> = [direct, discovered].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_weight_changes_identity() {
        let a = ProviderInfo::new("h", 1);
        let b = ProviderInfo::new("h", 1).with_weight(5);
        assert_ne!(a, b);
        assert!(a.same_endpoint(&b));
    }

    #[test]
    fn test_negative_weight_clamps_to_zero() {
        let p = ProviderInfo::new("h", 1).with_weight(-3);
        assert_eq!(p.weight(), 0);
    }
}
