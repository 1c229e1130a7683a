use serde::{Deserialize, Serialize};

use super::provider_info::ProviderInfo;

/// Group holding providers configured directly on the consumer.
pub const DIRECT_GROUP: &str = "direct";

/// Default group for providers pushed by discovery.
pub const DISCOVERED_GROUP: &str = "discovered";

/// A named, duplicate-free list of providers.
///
/// Insertion order is preserved so that order-sensitive balancers such as
/// round robin see a stable candidate sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderGroup {
    pub name: String,
    providers: Vec<ProviderInfo>,
}

impl ProviderGroup {
    pub fn new(name: impl Into<String>) -> Self {
        ProviderGroup {
            name: name.into(),
            providers: Vec::new(),
        }
    }

    pub fn with_providers(name: impl Into<String>, providers: impl IntoIterator<Item = ProviderInfo>) -> Self {
        let mut group = ProviderGroup::new(name);
        for provider in providers {
            group.add(provider);
        }
        group
    }

    /// Adds a provider, returning `false` if it was already present.
    pub fn add(&mut self, provider: ProviderInfo) -> bool {
        if self.providers.contains(&provider) {
            return false;
        }
        self.providers.push(provider);
        true
    }

    /// Removes a provider, returning `false` if it was not present.
    pub fn remove(&mut self, provider: &ProviderInfo) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| p != provider);
        self.providers.len() != before
    }

    pub fn contains(&self, provider: &ProviderInfo) -> bool {
        self.providers.contains(provider)
    }

    pub fn providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn into_providers(self) -> Vec<ProviderInfo> {
        self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
