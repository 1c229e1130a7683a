//! Routers.
//!
//! Routers run before load balancing and decide which providers a call may
//! go to at all. They are chained: each router receives the list produced by
//! the previous one (empty for the first) along with read access to the
//! address book, and returns the list for the next.

use std::collections::BTreeMap;
use std::sync::Arc;

use skein_common::provider::{DIRECT_GROUP, DISCOVERED_GROUP};
use skein_common::{ProviderInfo, Request};

use crate::address_book::AddressBook;
use crate::config::ConsumerConfig;

/// What a router may read besides the request.
pub struct RouteContext<'a> {
    pub book: &'a dyn AddressBook,
    pub config: &'a ConsumerConfig,
}

pub trait Router: Send + Sync {
    fn name(&self) -> &'static str;

    fn route(&self, request: &Request, context: &RouteContext<'_>, providers: Vec<ProviderInfo>) -> Vec<ProviderInfo>;
}

/// Routers applied in order.
#[derive(Clone, Default)]
pub struct RouterChain {
    routers: Vec<Arc<dyn Router>>,
}

impl RouterChain {
    pub fn new(routers: Vec<Arc<dyn Router>>) -> Self {
        Self { routers }
    }

    /// The chain used when no routers are configured.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(DirectUrlRouter),
            Arc::new(DiscoveryRouter),
            Arc::new(AllGroupsRouter),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.routers.iter().map(|r| r.name()).collect()
    }

    pub fn route(&self, request: &Request, context: &RouteContext<'_>) -> Vec<ProviderInfo> {
        self.routers
            .iter()
            .fold(Vec::new(), |providers, router| router.route(request, context, providers))
    }
}

fn group_providers(book: &dyn AddressBook, name: &str) -> Vec<ProviderInfo> {
    book.get_group(name).map(|g| g.into_providers()).unwrap_or_default()
}

fn append_missing(mut providers: Vec<ProviderInfo>, extra: Vec<ProviderInfo>) -> Vec<ProviderInfo> {
    for provider in extra {
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
    providers
}

/// Routes to the `direct` group when direct URLs are configured.
#[derive(Debug, Default)]
pub struct DirectUrlRouter;

impl Router for DirectUrlRouter {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn route(&self, _request: &Request, context: &RouteContext<'_>, providers: Vec<ProviderInfo>) -> Vec<ProviderInfo> {
        if context.config.direct_urls.is_empty() {
            return providers;
        }
        group_providers(context.book, DIRECT_GROUP)
    }
}

/// Adds the `discovered` group unless direct URLs are configured.
#[derive(Debug, Default)]
pub struct DiscoveryRouter;

impl Router for DiscoveryRouter {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn route(&self, _request: &Request, context: &RouteContext<'_>, providers: Vec<ProviderInfo>) -> Vec<ProviderInfo> {
        if !context.config.direct_urls.is_empty() {
            return providers;
        }
        append_missing(providers, group_providers(context.book, DISCOVERED_GROUP))
    }
}

/// Falls back to every known provider when nothing has been routed yet.
#[derive(Debug, Default)]
pub struct AllGroupsRouter;

impl Router for AllGroupsRouter {
    fn name(&self) -> &'static str {
        "all"
    }

    fn route(&self, _request: &Request, context: &RouteContext<'_>, providers: Vec<ProviderInfo>) -> Vec<ProviderInfo> {
        if providers.is_empty() {
            context.book.list_all_providers()
        } else {
            providers
        }
    }
}

/// Keeps providers carrying every configured attribute.
///
/// When no provider matches, the list passes through unfiltered.
#[derive(Debug, Default)]
pub struct AttributeRouter {
    required: BTreeMap<String, String>,
}

impl AttributeRouter {
    pub fn new(required: BTreeMap<String, String>) -> Self {
        Self { required }
    }
}

impl Router for AttributeRouter {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn route(&self, _request: &Request, _context: &RouteContext<'_>, providers: Vec<ProviderInfo>) -> Vec<ProviderInfo> {
        if self.required.is_empty() {
            return providers;
        }
        let matching: Vec<ProviderInfo> = providers
            .iter()
            .filter(|p| self.required.iter().all(|(k, v)| p.attribute(k) == Some(v.as_str())))
            .cloned()
            .collect();
        if matching.is_empty() {
            providers
        } else {
            matching
        }
    }
}
