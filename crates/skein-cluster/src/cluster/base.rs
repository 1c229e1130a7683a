use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skein_common::provider::DIRECT_GROUP;
use skein_common::{InvokeType, ProviderGroup, ProviderInfo, Request, Response, Result, SkeinError, Transport};

use crate::address_book::AddressBook;
use crate::config::ConsumerConfig;
use crate::connection::{ConnectionRegistry, DestroyHook};
use crate::context::InvokeContext;
use crate::filter::{Call, FilterChain};
use crate::listener::{ConsumerStateListener, ListenerSet};
use crate::load_balancer::LoadBalancer;
use crate::router::{RouteContext, RouterChain};

const UNINITIALIZED: u8 = 0;
const INITIALIZED: u8 = 1;
const DESTROYED: u8 = 2;

/// Poll interval while waiting for in-flight calls during destroy.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Machinery shared by every cluster strategy.
///
/// Owns the consumer's components and lifecycle, and provides the selection,
/// timeout and dispatch steps a strategy composes into an invocation.
pub struct ClusterCore {
    config: ConsumerConfig,
    book: Arc<dyn AddressBook>,
    registry: Arc<dyn ConnectionRegistry>,
    load_balancer: Arc<dyn LoadBalancer>,
    routers: RouterChain,
    filters: FilterChain,
    listeners: Arc<ListenerSet>,
    state: AtomicU8,
    /// Serializes init, destroy and provider updates.
    lifecycle: tokio::sync::Mutex<()>,
    in_flight: AtomicUsize,
    next_id: AtomicU64,
    last_provider: Mutex<Option<ProviderInfo>>,
}

/// Keeps the in-flight counter raised for the lifetime of a call.
pub(crate) struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Waits for in-flight calls before the registry closes its transports.
struct InFlightDrain<'a> {
    in_flight: &'a AtomicUsize,
    timeout: Duration,
    service: &'a str,
    user: Option<&'a dyn DestroyHook>,
}

#[async_trait]
impl DestroyHook for InFlightDrain<'_> {
    async fn pre_destroy(&self) {
        let deadline = Instant::now() + self.timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let remaining = self.in_flight.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!(
                service = %self.service,
                in_flight = remaining,
                "In-flight calls did not finish before the disconnect timeout, closing anyway"
            );
        }
        if let Some(user) = self.user {
            user.pre_destroy().await;
        }
    }

    async fn post_destroy(&self) {
        if let Some(user) = self.user {
            user.post_destroy().await;
        }
    }
}

fn difference(left: &[ProviderInfo], right: &[ProviderInfo]) -> Vec<ProviderInfo> {
    let right: HashSet<&ProviderInfo> = right.iter().collect();
    left.iter().filter(|p| !right.contains(p)).cloned().collect()
}

impl ClusterCore {
    pub(crate) fn new(
        config: ConsumerConfig,
        book: Arc<dyn AddressBook>,
        registry: Arc<dyn ConnectionRegistry>,
        load_balancer: Arc<dyn LoadBalancer>,
        routers: RouterChain,
        filters: FilterChain,
        listeners: Arc<ListenerSet>,
    ) -> Self {
        Self {
            config,
            book,
            registry,
            load_balancer,
            routers,
            filters,
            listeners,
            state: AtomicU8::new(UNINITIALIZED),
            lifecycle: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            last_provider: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn service(&self) -> &str {
        &self.config.service
    }

    pub fn address_book(&self) -> &Arc<dyn AddressBook> {
        &self.book
    }

    pub fn connection_registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn routers(&self) -> &RouterChain {
        &self.routers
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::SeqCst) == INITIALIZED
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == DESTROYED
    }

    /// Number of calls currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(&self.in_flight)
    }

    /// Stamps a fresh id and, for non-sync calls, the resolved invoke type
    /// so the provider knows whether to reply.
    pub(crate) fn prepare(&self, mut request: Request) -> Result<Request> {
        request.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if request.invoke_type.is_none() {
            let invoke_type = self.config.resolve_invoke_type(&request)?;
            if invoke_type != InvokeType::Sync {
                request.invoke_type = Some(invoke_type);
            }
        }
        Ok(request)
    }

    fn destroyed_error(&self) -> SkeinError {
        SkeinError::Destroyed(format!("Consumer of {} has been destroyed", self.service()))
    }

    pub async fn init(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            INITIALIZED => return Ok(()),
            DESTROYED => {
                return Err(SkeinError::IllegalState(format!(
                    "Consumer of {} cannot be initialized after destroy",
                    self.service()
                )))
            }
            _ => {}
        }

        let _lifecycle = self.lifecycle.lock().await;
        match self.state.load(Ordering::SeqCst) {
            INITIALIZED => return Ok(()),
            DESTROYED => {
                return Err(SkeinError::IllegalState(format!(
                    "Consumer of {} cannot be initialized after destroy",
                    self.service()
                )))
            }
            _ => {}
        }

        if !self.config.direct_urls.is_empty() {
            let providers = self
                .config
                .direct_urls
                .iter()
                .map(|url| url.parse::<ProviderInfo>())
                .collect::<Result<Vec<_>>>()?;
            self.book
                .replace_providers(&ProviderGroup::with_providers(DIRECT_GROUP, providers));
        }

        self.registry.start();
        let providers = self.book.list_all_providers();
        if self.config.lazy {
            info!(service = %self.service(), providers = providers.len(), "Lazy consumer, connections open on first use");
        }
        let outcome = self.registry.add_providers(&providers).await;
        if !outcome.is_completed() {
            warn!(service = %self.service(), "Initial connect did not finish in time, continuing in background");
        }

        if self.config.check && !self.scan_available().await {
            self.state.store(DESTROYED, Ordering::SeqCst);
            self.registry.destroy(None).await;
            return Err(SkeinError::Config(format!(
                "No provider of {} is available and the consumer requires one at startup",
                self.service()
            )));
        }
        self.state.store(INITIALIZED, Ordering::SeqCst);

        info!(
            service = %self.service(),
            providers = providers.len(),
            registry = self.registry.name(),
            load_balancer = self.load_balancer.name(),
            "Consumer initialized"
        );
        if !providers.is_empty() && !self.config.lazy {
            self.check_state_change(false).await;
        }
        Ok(())
    }

    /// Initializes on first use and rejects calls after destroy.
    pub(crate) async fn ensure_ready(&self) -> Result<()> {
        match self.state.load(Ordering::SeqCst) {
            INITIALIZED => Ok(()),
            DESTROYED => Err(self.destroyed_error()),
            _ => self.init().await.map_err(|e| match e {
                SkeinError::IllegalState(_) => self.destroyed_error(),
                other => other,
            }),
        }
    }

    /// Checks the consumer is still live once a call has been counted.
    pub(crate) fn ensure_not_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(self.destroyed_error())
        } else {
            Ok(())
        }
    }

    fn last_provider(&self) -> Option<ProviderInfo> {
        self.last_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, provider: &ProviderInfo) {
        *self.last_provider.lock().unwrap_or_else(PoisonError::into_inner) = Some(provider.clone());
    }

    /// Providers the router chain allows for `request`.
    pub fn route(&self, request: &Request) -> Vec<ProviderInfo> {
        let context = RouteContext {
            book: self.book.as_ref(),
            config: &self.config,
        };
        self.routers.route(request, &context)
    }

    fn no_available_provider(&self, request: &Request, candidates: &[ProviderInfo]) -> SkeinError {
        SkeinError::NoAvailableProvider {
            service: request.method_key(),
            candidates: candidates.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Picks the provider and transport for one attempt.
    ///
    /// `invoked` holds providers already tried by this call; they are skipped
    /// while any other candidate remains.
    pub async fn select(
        &self,
        request: &Request,
        context: &InvokeContext,
        invoked: &[ProviderInfo],
    ) -> Result<(ProviderInfo, Arc<dyn Transport>)> {
        let sticky = self.config.method_sticky(&request.method);
        if sticky && context.pinpoint().is_none() {
            if let Some(last) = self.last_provider().filter(|p| !invoked.contains(p)) {
                if let Some(transport) = self.registry.get_transport(&last, false).await {
                    if transport.is_available() {
                        debug!(service = %self.service(), provider = %last.address(), "Reusing sticky provider");
                        return Ok((last, transport));
                    }
                }
            }
        }

        let routed = self.route(request);
        if let Some(target) = context.pinpoint() {
            return self.select_pinpoint(request, target, &routed).await;
        }
        if routed.is_empty() {
            return Err(self.no_available_provider(request, &routed));
        }

        let mut candidates = routed.clone();
        if !invoked.is_empty() && candidates.len() > invoked.len() {
            candidates.retain(|p| !invoked.contains(p));
        }

        while !candidates.is_empty() {
            let provider = self.load_balancer.select(request, &candidates)?;
            match self.registry.get_transport(&provider, false).await {
                Some(transport) if transport.is_available() => {
                    if sticky {
                        self.remember(&provider);
                    }
                    return Ok((provider, transport));
                }
                _ => {
                    debug!(
                        service = %self.service(),
                        provider = %provider.address(),
                        "Selected provider has no usable transport, trying another"
                    );
                    self.registry.set_unavailable(&provider);
                    candidates.retain(|p| p != &provider);
                }
            }
        }

        Err(self.no_available_provider(request, &routed))
    }

    async fn select_pinpoint(
        &self,
        request: &Request,
        target: &ProviderInfo,
        routed: &[ProviderInfo],
    ) -> Result<(ProviderInfo, Arc<dyn Transport>)> {
        let (provider, on_demand) = match routed.iter().find(|p| p.same_endpoint(target)) {
            Some(provider) => (provider.clone(), false),
            None if self.config.create_on_demand => (target.clone(), true),
            None => {
                return Err(SkeinError::Routing(format!(
                    "Pinpoint provider {} is not a provider of {}",
                    target.address(),
                    request.method_key()
                )))
            }
        };

        match self.registry.get_transport(&provider, on_demand).await {
            Some(transport) if transport.is_available() => Ok((provider, transport)),
            _ => Err(SkeinError::Routing(format!(
                "Pinpoint provider {} of {} is unavailable",
                provider.address(),
                request.method_key()
            ))),
        }
    }

    /// Timeout of one attempt: request, then method config, then the
    /// provider's advertised timeout, then the consumer default.
    pub fn resolve_timeout(&self, request: &Request, provider: &ProviderInfo) -> Duration {
        let timeout_ms = request
            .timeout_ms
            .or_else(|| self.config.method(&request.method).and_then(|m| m.timeout_ms))
            .or(provider.timeout_ms)
            .unwrap_or(self.config.timeout_ms);
        Duration::from_millis(timeout_ms)
    }

    /// Runs one attempt through the filter chain.
    pub async fn call(
        &self,
        provider: &ProviderInfo,
        transport: &Arc<dyn Transport>,
        request: &Request,
        context: &InvokeContext,
    ) -> Result<Response> {
        let invoke_type = self.config.resolve_invoke_type(request)?;
        context.set_provider(provider);

        let call = Call {
            provider,
            transport,
            request,
            timeout: self.resolve_timeout(request, provider),
            invoke_type,
            context,
        };
        let outcome = self.filters.invoke(&call).await;

        if let Err(e) = &outcome {
            if e.is_connection_failure() && !transport.is_available() {
                self.registry.set_unavailable(provider);
            }
        }
        outcome
    }

    /// Sends `request` straight to `provider`, skipping routing and retries.
    pub async fn send_msg(&self, provider: &ProviderInfo, request: Request, context: &InvokeContext) -> Result<Response> {
        self.ensure_ready().await?;
        let _in_flight = self.enter();
        self.ensure_not_destroyed()?;

        let request = self.prepare(request)?;
        let transport = match self.registry.get_transport(provider, true).await {
            Some(transport) if transport.is_available() => transport,
            _ => return Err(self.no_available_provider(&request, std::slice::from_ref(provider))),
        };
        self.call(provider, &transport, &request, context).await
    }

    /// Whether any provider currently has a usable transport.
    ///
    /// Providers found with a dead transport are demoted along the way.
    pub async fn is_available(&self) -> bool {
        self.is_initialized() && self.scan_available().await
    }

    async fn scan_available(&self) -> bool {
        for provider in self.book.list_all_providers() {
            match self.registry.get_transport(&provider, false).await {
                Some(transport) if transport.is_available() => return true,
                Some(_) => self.registry.set_unavailable(&provider),
                None => {}
            }
        }
        false
    }

    /// Notifies listeners if availability differs from `previous`.
    ///
    /// The event goes through the registry's edge tracker, so an edge the
    /// reconnect loop already reported is not delivered twice.
    pub async fn check_state_change(&self, previous: bool) {
        if self.is_available().await == previous {
            return;
        }
        if let Some(event) = self.registry.publish_availability() {
            debug!(service = %self.service(), %event, "Consumer availability changed");
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ConsumerStateListener>) {
        self.listeners.add(listener);
    }

    pub fn current_provider_list(&self) -> Vec<ProviderInfo> {
        self.book.list_all_providers()
    }

    /// Applies an address book update and reconciles the registry with it.
    async fn update_with<F>(&self, update: F)
    where
        F: FnOnce(&dyn AddressBook),
    {
        let _lifecycle = self.lifecycle.lock().await;
        let before = self.book.list_all_providers();
        update(self.book.as_ref());

        if !self.is_initialized() {
            return;
        }
        let after = self.book.list_all_providers();
        let removed = difference(&before, &after);
        let added = difference(&after, &before);
        if removed.is_empty() && added.is_empty() {
            return;
        }

        let previous = self.is_available().await;
        debug!(
            service = %self.service(),
            added = added.len(),
            removed = removed.len(),
            "Reconciling providers"
        );
        if !removed.is_empty() {
            self.registry.remove_providers(&removed).await;
        }
        if !added.is_empty() {
            self.registry.add_providers(&added).await;
        }
        self.check_state_change(previous).await;
    }

    pub async fn add_provider(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        self.update_with(|book| book.add_providers(group)).await;
    }

    pub async fn remove_provider(&self, group: &ProviderGroup) {
        if group.is_empty() {
            return;
        }
        self.update_with(|book| book.remove_providers(group)).await;
    }

    pub async fn update_providers(&self, group: &ProviderGroup) {
        self.update_with(|book| book.replace_providers(group)).await;
    }

    pub async fn update_all_providers(&self, groups: &[ProviderGroup]) {
        self.update_with(|book| book.replace_all_providers(groups)).await;
    }

    /// Stops accepting calls, waits for in-flight ones, then closes every
    /// connection. Idempotent.
    pub async fn destroy(&self, hook: Option<&dyn DestroyHook>) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state.swap(DESTROYED, Ordering::SeqCst) == DESTROYED {
            debug!(service = %self.service(), "Consumer already destroyed");
            return;
        }

        info!(service = %self.service(), in_flight = self.in_flight(), "Destroying consumer");
        let drain = InFlightDrain {
            in_flight: &self.in_flight,
            timeout: self.config.disconnect_timeout(),
            service: self.service(),
            user: hook,
        };
        let drain: &dyn DestroyHook = &drain;
        self.registry.destroy(Some(drain)).await;
        info!(service = %self.service(), "Consumer destroyed");
    }
}
