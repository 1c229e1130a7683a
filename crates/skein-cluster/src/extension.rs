//! Named extension points.
//!
//! Every pluggable role of a cluster (strategy, load balancer, connection
//! registry, address book, router, filter) is resolved by name from an
//! [`ExtensionRegistry`]. The registry is an ordinary value: build one at
//! startup, register custom implementations on it and hand it to
//! [`ClusterInvoker::new`](crate::cluster::ClusterInvoker::new).

use std::collections::HashMap;
use std::sync::Arc;

use skein_common::{Result, SkeinError};

use crate::address_book::{AddressBook, MultiGroupAddressBook, SingleGroupAddressBook};
use crate::cluster::{ClusterStrategy, FailFastCluster, FailOverCluster};
use crate::config::ConsumerConfig;
use crate::connection::{AllConnectRegistry, ConnectionRegistry, ElasticConnectRegistry, RegistryContext};
use crate::filter::{Filter, TracingFilter};
use crate::load_balancer::{
    ConsistentHashLoadBalancer, LoadBalancer, LocalPrefLoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
    WeightedRoundRobinLoadBalancer,
};
use crate::router::{AllGroupsRouter, AttributeRouter, DirectUrlRouter, DiscoveryRouter, Router};

pub type ClusterFactory = Arc<dyn Fn() -> Arc<dyn ClusterStrategy> + Send + Sync>;
pub type LoadBalancerFactory = Arc<dyn Fn(&ConsumerConfig) -> Arc<dyn LoadBalancer> + Send + Sync>;
pub type RegistryFactory = Arc<dyn Fn(RegistryContext) -> Arc<dyn ConnectionRegistry> + Send + Sync>;
pub type AddressBookFactory = Arc<dyn Fn() -> Arc<dyn AddressBook> + Send + Sync>;
pub type RouterFactory = Arc<dyn Fn(&ConsumerConfig) -> Arc<dyn Router> + Send + Sync>;
pub type FilterFactory = Arc<dyn Fn(&ConsumerConfig) -> Arc<dyn Filter> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    clusters: HashMap<String, ClusterFactory>,
    load_balancers: HashMap<String, LoadBalancerFactory>,
    registries: HashMap<String, RegistryFactory>,
    address_books: HashMap<String, AddressBookFactory>,
    routers: HashMap<String, RouterFactory>,
    filters: HashMap<String, FilterFactory>,
}

fn lookup<'a, T>(kind: &str, table: &'a HashMap<String, T>, name: &str) -> Result<&'a T> {
    table.get(&name.to_ascii_lowercase()).ok_or_else(|| {
        let mut known: Vec<&str> = table.keys().map(String::as_str).collect();
        known.sort_unstable();
        SkeinError::Config(format!("Unknown {} '{}' (known: {})", kind, name, known.join(", ")))
    })
}

impl ExtensionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in extension.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_cluster("failfast", || Arc::new(FailFastCluster));
        registry.register_cluster("failover", || Arc::new(FailOverCluster));

        registry.register_load_balancer("random", |_| Arc::new(RandomLoadBalancer::new()));
        registry.register_load_balancer("roundrobin", |_| Arc::new(RoundRobinLoadBalancer::new()));
        registry.register_load_balancer("weightroundrobin", |_| {
            Arc::new(WeightedRoundRobinLoadBalancer::new())
        });
        registry.register_load_balancer("consistenthash", |_| Arc::new(ConsistentHashLoadBalancer::new()));
        registry.register_load_balancer("localpref", |config| match &config.local_host {
            Some(host) => Arc::new(LocalPrefLoadBalancer::new(host.clone())),
            None => Arc::new(LocalPrefLoadBalancer::default()),
        });

        registry.register_connection_registry("all", |context| Arc::new(AllConnectRegistry::new(context)));
        registry.register_connection_registry("elastic", |context| {
            Arc::new(ElasticConnectRegistry::new(context))
        });

        registry.register_address_book("single", || Arc::new(SingleGroupAddressBook::new()));
        registry.register_address_book("multi", || Arc::new(MultiGroupAddressBook::new()));

        registry.register_router("direct", |_| Arc::new(DirectUrlRouter));
        registry.register_router("discovery", |_| Arc::new(DiscoveryRouter));
        registry.register_router("all", |_| Arc::new(AllGroupsRouter));
        registry.register_router("attribute", |config| {
            Arc::new(AttributeRouter::new(config.route_attributes.clone()))
        });

        registry.register_filter("tracing", |_| Arc::new(TracingFilter));

        registry
    }

    pub fn register_cluster<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ClusterStrategy> + Send + Sync + 'static,
    {
        self.clusters.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_load_balancer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ConsumerConfig) -> Arc<dyn LoadBalancer> + Send + Sync + 'static,
    {
        self.load_balancers.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_connection_registry<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(RegistryContext) -> Arc<dyn ConnectionRegistry> + Send + Sync + 'static,
    {
        self.registries.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_address_book<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn AddressBook> + Send + Sync + 'static,
    {
        self.address_books.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_router<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ConsumerConfig) -> Arc<dyn Router> + Send + Sync + 'static,
    {
        self.routers.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_filter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ConsumerConfig) -> Arc<dyn Filter> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn cluster(&self, name: &str) -> Result<Arc<dyn ClusterStrategy>> {
        lookup("cluster", &self.clusters, name).map(|factory| factory())
    }

    pub fn load_balancer(&self, name: &str, config: &ConsumerConfig) -> Result<Arc<dyn LoadBalancer>> {
        lookup("load balancer", &self.load_balancers, name).map(|factory| factory(config))
    }

    pub fn connection_registry(&self, name: &str, context: RegistryContext) -> Result<Arc<dyn ConnectionRegistry>> {
        lookup("connection registry", &self.registries, name).map(|factory| factory(context))
    }

    pub fn address_book(&self, name: &str) -> Result<Arc<dyn AddressBook>> {
        lookup("address book", &self.address_books, name).map(|factory| factory())
    }

    pub fn router(&self, name: &str, config: &ConsumerConfig) -> Result<Arc<dyn Router>> {
        lookup("router", &self.routers, name).map(|factory| factory(config))
    }

    pub fn filter(&self, name: &str, config: &ConsumerConfig) -> Result<Arc<dyn Filter>> {
        lookup("filter", &self.filters, name).map(|factory| factory(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_every_builtin() {
        let registry = ExtensionRegistry::with_defaults();
        let config = ConsumerConfig::new("svc");

        for name in ["failfast", "failover"] {
            assert_eq!(registry.cluster(name).unwrap().name(), name);
        }
        for name in ["random", "roundrobin", "weightroundrobin", "consistenthash", "localpref"] {
            assert_eq!(registry.load_balancer(name, &config).unwrap().name(), name);
        }
        for name in ["single", "multi"] {
            assert_eq!(registry.address_book(name).unwrap().name(), name);
        }
        for name in ["direct", "discovery", "all", "attribute"] {
            assert_eq!(registry.router(name, &config).unwrap().name(), name);
        }
        assert_eq!(registry.filter("tracing", &config).unwrap().name(), "tracing");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ExtensionRegistry::with_defaults();
        let config = ConsumerConfig::new("svc");
        assert_eq!(registry.load_balancer("RoundRobin", &config).unwrap().name(), "roundrobin");
    }

    #[test]
    fn test_unknown_name_lists_known_ones() {
        let registry = ExtensionRegistry::with_defaults();
        let err = registry.cluster("failsafe").err().unwrap();
        match err {
            SkeinError::Config(message) => {
                assert!(message.contains("failsafe"));
                assert!(message.contains("failfast, failover"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = ExtensionRegistry::new();
        assert!(registry.address_book("single").is_err());
    }

    #[test]
    fn test_custom_registration_overrides_builtin() {
        let mut registry = ExtensionRegistry::with_defaults();
        registry.register_load_balancer("random", |_| Arc::new(RoundRobinLoadBalancer::new()));
        let config = ConsumerConfig::new("svc");
        assert_eq!(registry.load_balancer("random", &config).unwrap().name(), "roundrobin");
    }
}
