//! Per-tenant, per-action, weighted admission control.
//!
//! This module provides the building blocks for gating registry actions:
//! - [`RateLimitDriver`]: the pluggable counting backend.
//! - [`RateLimitEngine`]: thin wrapper the gateway consults; its absence
//!   means rate limiting is disabled and everything is allowed.
//! - [`RateLimitedAction`] / [`RateLimitResult`]: the vocabulary shared
//!   between drivers and the gateway.
//!
//! The decision itself (exemptions, the 429 envelope, `Retry-After`) lives in
//! [`crate::gateway`]; drivers only count.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver_registry::{DriverError, DriverRegistry};
use crate::models::ReducedAccount;

pub mod bucket;
pub mod middleware;

/// The kind of registry operation being gated.
///
/// Closed set; extend only by adding variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitedAction {
    /// Pulling a manifest or blob.
    Pull,
    /// Pushing a manifest or blob.
    Push,
    /// Listing or pulling a manifest list.
    PullManifestList,
    /// Deleting a tag.
    DeleteTag,
}

impl RateLimitedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::PullManifestList => "pull_manifest_list",
            Self::DeleteTag => "delete_tag",
        }
    }
}

impl fmt::Display for RateLimitedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver-side outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitResult {
    /// How long the caller should wait before retrying. Only meaningful when
    /// the decision was a denial; zero otherwise.
    pub retry_after: Duration,
}

/// A pluggable counting backend for rate limiting.
///
/// Implementations own whatever state they need (in-memory buckets, a
/// distributed store) and must be safe to call concurrently from unrelated
/// requests. Transient-backend retries are the driver's business; drivers
/// must never retry on caller cancellation (in async Rust, cancellation drops
/// the future, so there is nothing to retry from).
#[async_trait::async_trait]
pub trait RateLimitDriver: Send + Sync {
    /// The plugin type ID this driver registers under.
    fn plugin_type_id(&self) -> &'static str;

    /// One-time initialization with driver-specific configuration, called
    /// before first use. Failure here is fatal to process startup.
    async fn init(&mut self, config: &serde_json::Value) -> Result<(), DriverError>;

    /// Whether `account` may perform `amount` units of `action` right now.
    ///
    /// `amount` is a non-negative weighted cost (1 for a simple request).
    /// A driver fault is an error, never a silent allow or deny; the choice
    /// to fail open belongs to the driver, not its callers.
    async fn rate_limit_allows(
        &self,
        requester_ip: IpAddr,
        account: &ReducedAccount,
        action: RateLimitedAction,
        amount: u64,
    ) -> Result<(bool, RateLimitResult), DriverError>;
}

/// Registry for [`RateLimitDriver`] backends.
pub type RateLimitDriverRegistry = DriverRegistry<dyn RateLimitDriver>;

/// Create the registry for rate-limit drivers, with the bundled in-memory
/// driver pre-registered.
pub fn driver_registry() -> RateLimitDriverRegistry {
    let registry = DriverRegistry::new("rate-limit");
    bucket::register(&registry);
    registry
}

/// The admission-control engine consulted before every gated action.
///
/// Holds exactly one configured driver. Optional at the gateway level: a
/// gateway without an engine allows everything unconditionally.
#[derive(Clone)]
pub struct RateLimitEngine {
    driver: Arc<dyn RateLimitDriver>,
}

impl RateLimitEngine {
    pub fn new(driver: Arc<dyn RateLimitDriver>) -> Self {
        Self { driver }
    }

    /// Delegate the check to the configured driver.
    pub async fn rate_limit_allows(
        &self,
        requester_ip: IpAddr,
        account: &ReducedAccount,
        action: RateLimitedAction,
        amount: u64,
    ) -> Result<(bool, RateLimitResult), DriverError> {
        self.driver.rate_limit_allows(requester_ip, account, action, amount).await
    }

    /// The plugin type ID of the configured driver.
    pub fn plugin_type_id(&self) -> &'static str {
        self.driver.plugin_type_id()
    }
}

impl fmt::Debug for RateLimitEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitEngine").field("driver", &self.plugin_type_id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_are_stable() {
        // these strings appear in driver configuration; renaming them is a
        // breaking config change
        assert_eq!(RateLimitedAction::Pull.as_str(), "pull");
        assert_eq!(RateLimitedAction::Push.as_str(), "push");
        assert_eq!(RateLimitedAction::PullManifestList.as_str(), "pull_manifest_list");
        assert_eq!(RateLimitedAction::DeleteTag.as_str(), "delete_tag");
    }

    #[test]
    fn bundled_driver_is_registered() {
        let registry = driver_registry();
        let driver = registry.instantiate("in-memory").unwrap();
        assert_eq!(driver.plugin_type_id(), "in-memory");
    }
}
