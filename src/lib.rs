#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Gatehouse
//!
//! The admission-control and pull-through manifest-caching core of a
//! multi-tenant container-image registry:
//!
//! - **Rate limiting**: per-tenant, per-action, weighted admission control
//!   with exemptions for cluster-internal callers.
//! - **Inbound caching**: time-bounded memoization of manifests fetched from
//!   upstream registries, so repeated pulls do not re-trigger upstream
//!   fetches.
//! - **Driver registries**: both backends are selected by configuration from
//!   a generic name→factory table, so an in-memory backend for tests and a
//!   distributed one for production share the same calling code.
//! - **Failure envelopes**: a closed taxonomy of registry-v2 error codes with
//!   wire-compatible status, `Retry-After`, and JSON body rendering.
//!
//! ## Quick start
//!
//! ```rust
//! use gatehouse::{AdmissionGateway, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: GatewayConfig = serde_json::from_value(serde_json::json!({
//!         "rate_limit_driver": "in-memory",
//!         "rate_limit_config": {
//!             "limits": { "pull": { "limit": 100.0, "window_secs": 60.0 } }
//!         },
//!         "inbound_cache_driver": "in-memory",
//!     }))
//!     .unwrap();
//!
//!     let gateway = AdmissionGateway::from_config(
//!         &config,
//!         &gatehouse::rate_limit::driver_registry(),
//!         &gatehouse::cache::driver_registry(),
//!     )
//!     .await
//!     .unwrap();
//!     assert!(gateway.rate_limiting_enabled());
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod driver_registry;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod rate_limit;

// Re-exports
pub use auth::{UserIdentity, UserType};
pub use cache::{CachedManifest, InboundCacheDriver, InboundCacheDriverRegistry};
pub use driver_registry::{DriverError, DriverRegistry, DriverRegistryError};
pub use errors::{RegistryV2Error, RegistryV2ErrorCode};
pub use gateway::{AdmissionGateway, GatewayConfig};
pub use models::{AccountName, ImageReference, ReducedAccount, Repository};
pub use rate_limit::{
    RateLimitDriver, RateLimitDriverRegistry, RateLimitEngine, RateLimitResult, RateLimitedAction,
};
