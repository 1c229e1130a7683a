// Copyright 2025 Skein Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Consumer configuration.
//!
//! Every tunable the cluster invoker reads lives on [`ConsumerConfig`]. The
//! struct derives serde so an embedding application can load it from a file;
//! every field has a default, so partial documents are accepted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use skein_common::{InvokeType, Request, Result, TransportConfig};

use crate::connection::fan_out::batch_budget;

/// Lower bound applied to the reconnect period.
pub const MIN_RECONNECT_PERIOD_MS: u64 = 2000;

/// Overrides applied to a single method.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MethodConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub invoke_type: Option<String>,
    pub sticky: Option<bool>,
}

impl MethodConfig {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_invoke_type(mut self, invoke_type: impl Into<String>) -> Self {
        self.invoke_type = Some(invoke_type.into());
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = Some(sticky);
        self
    }
}

/// Configuration of one consumer (one logical service).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Logical service name
    pub service: String,
    /// Statically configured provider URLs; when non-empty discovery is ignored
    pub direct_urls: Vec<String>,

    /// Invocation strategy: `failfast` or `failover`
    pub cluster: String,
    /// Load balancer name
    pub load_balancer: String,
    /// Connection registry name: `all` or `elastic`
    pub connection_registry: String,
    /// Address book name: `single` or `multi`
    pub address_book: String,
    /// Router names in evaluation order; empty means the built-in chain
    pub routers: Vec<String>,
    /// Filter names in evaluation order
    pub filters: Vec<String>,

    /// Default invoke type (`sync`, `oneway`, `callback`, `future`)
    pub invoke_type: String,
    /// Default call timeout (milliseconds)
    pub timeout_ms: u64,
    /// Default retry count for fail-over
    pub retries: u32,
    pub sticky: bool,
    /// Skip eager connection; connect providers on first use
    pub lazy: bool,
    /// Fail initialization when no provider is available
    pub check: bool,
    /// Allow a pinpointed call to connect to a provider the registry does not track
    pub create_on_demand: bool,

    pub connect_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    /// Period of the background reconnect loop (milliseconds)
    pub reconnect_period_ms: u64,
    /// Delay between a successful reconnect and the availability re-check
    pub double_check_delay_ms: u64,
    /// Upper bound of the reconnect backoff coefficient
    pub max_reconnect_coefficient: u32,
    /// Concurrency cap of batch connect/disconnect fan-outs
    pub connect_workers: usize,
    /// Fixed wait for a connect batch; unset derives it from the connect timeout
    pub batch_wait_ms: Option<u64>,
    /// Share of providers the elastic registry connects before returning
    pub elastic_initial_percent: u32,

    /// Host considered local by the `localpref` balancer
    pub local_host: Option<String>,
    /// Attributes a provider must carry to be routed to by the `attribute` router
    pub route_attributes: BTreeMap<String, String>,

    /// Per-method overrides keyed by method name
    pub methods: HashMap<String, MethodConfig>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            service: String::new(),
            direct_urls: Vec::new(),
            cluster: "failover".to_string(),
            load_balancer: "random".to_string(),
            connection_registry: "all".to_string(),
            address_book: "single".to_string(),
            routers: Vec::new(),
            filters: Vec::new(),
            invoke_type: InvokeType::Sync.as_str().to_string(),
            timeout_ms: 3000,
            retries: 0,
            sticky: false,
            lazy: false,
            check: false,
            create_on_demand: false,
            connect_timeout_ms: 3000,
            disconnect_timeout_ms: 10000,
            reconnect_period_ms: 10000,
            double_check_delay_ms: 100,
            max_reconnect_coefficient: 5,
            connect_workers: 10,
            batch_wait_ms: None,
            elastic_initial_percent: 10,
            local_host: None,
            route_attributes: BTreeMap::new(),
            methods: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn with_direct_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.direct_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cluster(mut self, name: impl Into<String>) -> Self {
        self.cluster = name.into();
        self
    }

    pub fn with_load_balancer(mut self, name: impl Into<String>) -> Self {
        self.load_balancer = name.into();
        self
    }

    pub fn with_connection_registry(mut self, name: impl Into<String>) -> Self {
        self.connection_registry = name.into();
        self
    }

    pub fn with_address_book(mut self, name: impl Into<String>) -> Self {
        self.address_book = name.into();
        self
    }

    pub fn with_routers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_invoke_type(mut self, invoke_type: impl Into<String>) -> Self {
        self.invoke_type = invoke_type.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_create_on_demand(mut self, enabled: bool) -> Self {
        self.create_on_demand = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout_ms: u64) -> Self {
        self.disconnect_timeout_ms = timeout_ms;
        self
    }

    pub fn with_reconnect_period(mut self, period_ms: u64) -> Self {
        self.reconnect_period_ms = period_ms;
        self
    }

    pub fn with_double_check_delay(mut self, delay_ms: u64) -> Self {
        self.double_check_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_coefficient(mut self, coefficient: u32) -> Self {
        self.max_reconnect_coefficient = coefficient;
        self
    }

    pub fn with_connect_workers(mut self, workers: usize) -> Self {
        self.connect_workers = workers;
        self
    }

    pub fn with_batch_wait(mut self, wait_ms: u64) -> Self {
        self.batch_wait_ms = Some(wait_ms);
        self
    }

    pub fn with_elastic_initial_percent(mut self, percent: u32) -> Self {
        self.elastic_initial_percent = percent;
        self
    }

    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = Some(host.into());
        self
    }

    pub fn with_route_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>, config: MethodConfig) -> Self {
        self.methods.insert(method.into(), config);
        self
    }

    pub fn method(&self, method: &str) -> Option<&MethodConfig> {
        self.methods.get(method)
    }

    /// Retry budget for `method`, falling back to the consumer default.
    pub fn method_retries(&self, method: &str) -> u32 {
        self.method(method)
            .and_then(|m| m.retries)
            .unwrap_or(self.retries)
    }

    pub fn method_sticky(&self, method: &str) -> bool {
        self.method(method)
            .and_then(|m| m.sticky)
            .unwrap_or(self.sticky)
    }

    /// Invoke type for `request`: request, then method, then consumer default.
    ///
    /// Unknown names fail with a configuration error for this call only.
    pub fn resolve_invoke_type(&self, request: &Request) -> Result<InvokeType> {
        if let Some(invoke_type) = request.invoke_type {
            return Ok(invoke_type);
        }
        match self.method(&request.method).and_then(|m| m.invoke_type.as_deref()) {
            Some(name) => name.parse(),
            None => self.invoke_type.parse(),
        }
    }

    /// Reconnect loop period, never below [`MIN_RECONNECT_PERIOD_MS`].
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms.max(MIN_RECONNECT_PERIOD_MS))
    }

    pub fn double_check_delay(&self) -> Duration {
        Duration::from_millis(self.double_check_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// How long `add_providers` waits on a connect batch of `batch` providers.
    pub fn connect_batch_budget(&self, batch: usize) -> Duration {
        match self.batch_wait_ms {
            Some(wait_ms) => Duration::from_millis(wait_ms),
            None => batch_budget(self.connect_timeout(), batch, self.connect_workers),
        }
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout_ms: self.connect_timeout_ms,
            disconnect_timeout_ms: self.disconnect_timeout_ms,
        }
    }
}
