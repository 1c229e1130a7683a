//! Provider identity and grouping.
//!
//! A [`ProviderInfo`] identifies one remote endpoint able to serve a service.
//! Providers are collected into named [`ProviderGroup`]s; the consumer keeps
//! one group for statically configured (direct) providers and one per
//! discovery source.

pub mod provider_group;
pub mod provider_info;

pub use provider_group::{ProviderGroup, DIRECT_GROUP, DISCOVERED_GROUP};
pub use provider_info::{ProviderInfo, ProviderOrigin, DEFAULT_PROTOCOL, DEFAULT_WEIGHT};
