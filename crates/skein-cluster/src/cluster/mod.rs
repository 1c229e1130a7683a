//! Cluster invocation.
//!
//! [`ClusterInvoker`] is the single entry point a caller-facing proxy uses to
//! talk to a service. It owns the consumer's address book, connection
//! registry, router chain, load balancer and filter chain (all resolved by
//! name from an [`ExtensionRegistry`]) and hands each call to a
//! [`ClusterStrategy`] that decides how failures are handled:
//!
//! - [`FailFastCluster`] (`"failfast"`) tries once
//! - [`FailOverCluster`] (`"failover"`) retries retriable failures on other providers

pub mod base;
pub mod fail_fast;
pub mod fail_over;

pub use base::ClusterCore;
pub use fail_fast::FailFastCluster;
pub use fail_over::FailOverCluster;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use skein_common::{ProviderGroup, ProviderInfo, Request, Response, Result, TransportFactory};

use crate::config::ConsumerConfig;
use crate::connection::{DestroyHook, RegistryContext};
use crate::context::InvokeContext;
use crate::extension::ExtensionRegistry;
use crate::filter::FilterChain;
use crate::listener::{ConsumerStateListener, ListenerSet};
use crate::router::RouterChain;

/// Failure-handling policy of a cluster.
#[async_trait]
pub trait ClusterStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one invocation using the shared selection and dispatch steps.
    async fn do_invoke(&self, core: &ClusterCore, request: &Request, context: &InvokeContext) -> Result<Response>;
}

/// Client-side handle to one service.
pub struct ClusterInvoker {
    core: ClusterCore,
    strategy: Arc<dyn ClusterStrategy>,
}

impl ClusterInvoker {
    /// Builds a consumer from `config`, resolving every named component in
    /// `extensions`.
    ///
    /// Nothing connects until [`ClusterInvoker::init`] or the first call.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any configured name is unknown.
    pub fn new(
        config: ConsumerConfig,
        extensions: &ExtensionRegistry,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self> {
        let listeners = Arc::new(ListenerSet::new(config.service.clone()));
        let strategy = extensions.cluster(&config.cluster)?;
        let book = extensions.address_book(&config.address_book)?;
        let load_balancer = extensions.load_balancer(&config.load_balancer, &config)?;

        let routers = if config.routers.is_empty() {
            RouterChain::builtin()
        } else {
            RouterChain::new(
                config
                    .routers
                    .iter()
                    .map(|name| extensions.router(name, &config))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        let filters = FilterChain::new(
            config
                .filters
                .iter()
                .map(|name| extensions.filter(name, &config))
                .collect::<Result<Vec<_>>>()?,
        );

        let registry = extensions.connection_registry(
            &config.connection_registry,
            RegistryContext {
                config: config.clone(),
                transports,
                listeners: listeners.clone(),
            },
        )?;

        debug!(
            service = %config.service,
            cluster = strategy.name(),
            load_balancer = load_balancer.name(),
            registry = registry.name(),
            address_book = book.name(),
            routers = ?routers.names(),
            filters = ?filters.names(),
            "Consumer assembled"
        );

        Ok(Self {
            core: ClusterCore::new(config, book, registry, load_balancer, routers, filters, listeners),
            strategy,
        })
    }

    pub fn core(&self) -> &ClusterCore {
        &self.core
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Connects the known providers. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails if the consumer was destroyed, if a direct URL does not parse,
    /// or if `check` is set and no provider is available afterwards.
    pub async fn init(&self) -> Result<()> {
        self.core.init().await
    }

    pub async fn invoke(&self, request: Request) -> Result<Response> {
        self.invoke_with_context(request, &InvokeContext::new()).await
    }

    /// Invokes `request`, reading per-call overrides from `context` and
    /// leaving per-call outputs in it.
    pub async fn invoke_with_context(&self, request: Request, context: &InvokeContext) -> Result<Response> {
        self.core.ensure_ready().await?;
        let _in_flight = self.core.enter();
        self.core.ensure_not_destroyed()?;

        let request = self.core.prepare(request)?;
        self.strategy.do_invoke(&self.core, &request, context).await
    }

    /// Sends `request` to `provider` directly, bypassing routing and retries.
    pub async fn send_msg(&self, provider: &ProviderInfo, request: Request) -> Result<Response> {
        self.core.send_msg(provider, request, &InvokeContext::new()).await
    }

    pub async fn is_available(&self) -> bool {
        self.core.is_available().await
    }

    pub fn add_listener(&self, listener: Arc<dyn ConsumerStateListener>) {
        self.core.add_listener(listener);
    }

    pub async fn add_provider(&self, group: &ProviderGroup) {
        self.core.add_provider(group).await;
    }

    pub async fn remove_provider(&self, group: &ProviderGroup) {
        self.core.remove_provider(group).await;
    }

    pub async fn update_providers(&self, group: &ProviderGroup) {
        self.core.update_providers(group).await;
    }

    pub async fn update_all_providers(&self, groups: &[ProviderGroup]) {
        self.core.update_all_providers(groups).await;
    }

    pub fn current_provider_list(&self) -> Vec<ProviderInfo> {
        self.core.current_provider_list()
    }

    /// Destroys the consumer, waiting up to the disconnect timeout for
    /// in-flight calls. Idempotent.
    pub async fn destroy(&self) {
        self.core.destroy(None).await;
    }

    /// Like [`ClusterInvoker::destroy`], running `hook` around the release of
    /// the connections. The hook is skipped if the consumer is already destroyed.
    pub async fn destroy_with_hook(&self, hook: &dyn DestroyHook) {
        self.core.destroy(Some(hook)).await;
    }
}
