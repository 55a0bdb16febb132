//! The admission gateway: what the HTTP layer actually calls.
//!
//! Composes the optional [`RateLimitEngine`] with an [`InboundCacheDriver`]:
//! every gated action goes through [`AdmissionGateway::check_rate_limit`]
//! first, and pull-through manifest fetches go through
//! [`AdmissionGateway::cached_manifest`] so repeated pulls do not re-trigger
//! upstream fetches.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use http::header::RETRY_AFTER;
use http::HeaderValue;
use serde::Deserialize;
use tracing::{debug, error};

use crate::auth::UserIdentity;
use crate::cache::{CachedManifest, InboundCacheDriver, InboundCacheDriverRegistry};
use crate::driver_registry::DriverError;
use crate::errors::RegistryV2ErrorCode;
use crate::models::{ImageReference, ReducedAccount};
use crate::rate_limit::{RateLimitDriverRegistry, RateLimitEngine, RateLimitedAction};

/// Which drivers to instantiate, plus their opaque configuration.
///
/// This is the configuration surface the gateway consumes; it is typically a
/// fragment of the service's larger configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Plugin type ID of the rate-limit driver; omit to disable rate
    /// limiting entirely.
    #[serde(default)]
    pub rate_limit_driver: Option<String>,
    /// Passed verbatim to the rate-limit driver's `init`.
    #[serde(default)]
    pub rate_limit_config: serde_json::Value,
    /// Plugin type ID of the inbound cache driver.
    pub inbound_cache_driver: String,
    /// Passed verbatim to the cache driver's `init`.
    #[serde(default)]
    pub inbound_cache_config: serde_json::Value,
    /// Collapse concurrent misses on the same cache key into one upstream
    /// fetch. A hardening feature, not required for correctness.
    #[serde(default)]
    pub coalesce_fetches: bool,
}

/// See module docs.
pub struct AdmissionGateway {
    rate_limit: Option<RateLimitEngine>,
    inbound_cache: Arc<dyn InboundCacheDriver>,
    coalesce_fetches: bool,
    in_flight: Mutex<HashMap<ImageReference, Arc<tokio::sync::Mutex<()>>>>,
}

impl AdmissionGateway {
    pub fn new(
        rate_limit: Option<RateLimitEngine>,
        inbound_cache: Arc<dyn InboundCacheDriver>,
    ) -> Self {
        Self {
            rate_limit,
            inbound_cache,
            coalesce_fetches: false,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Enable or disable single-flight fetch coalescing (off by default).
    pub fn with_fetch_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_fetches = enabled;
        self
    }

    /// Instantiate and initialize the configured drivers.
    ///
    /// Any failure here (unknown driver ID, rejected driver configuration)
    /// is fatal to process startup.
    pub async fn from_config(
        config: &GatewayConfig,
        rate_limit_registry: &RateLimitDriverRegistry,
        cache_registry: &InboundCacheDriverRegistry,
    ) -> Result<Self, DriverError> {
        let rate_limit = match &config.rate_limit_driver {
            None => None,
            Some(id) => {
                let mut driver = rate_limit_registry.instantiate(id)?;
                driver.init(&config.rate_limit_config).await?;
                Some(RateLimitEngine::new(Arc::from(driver)))
            }
        };

        let mut cache = cache_registry.instantiate(&config.inbound_cache_driver)?;
        cache.init(&config.inbound_cache_config).await?;

        Ok(Self::new(rate_limit, Arc::from(cache)).with_fetch_coalescing(config.coalesce_fetches))
    }

    /// Whether a rate-limit engine is configured.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit.is_some()
    }

    /// Gate one registry action for one tenant.
    ///
    /// Returns `Ok(())` when the action may proceed. A denial is reported as
    /// a `TOOMANYREQUESTS` envelope carrying a `Retry-After` header in whole
    /// seconds; a driver fault is propagated unmodified. Both travel the same
    /// error channel, and the response boundary tells them apart via
    /// [`crate::errors::RegistryV2Error::from_error`].
    pub async fn check_rate_limit(
        &self,
        requester_ip: IpAddr,
        account: &ReducedAccount,
        identity: &dyn UserIdentity,
        action: RateLimitedAction,
        amount: u64,
    ) -> Result<(), DriverError> {
        // rate-limiting is optional
        let Some(engine) = &self.rate_limit else {
            return Ok(());
        };

        // cluster-internal traffic is exempt: when such a request is caused
        // by a user API request, that request was already rate-limited at its
        // point of origin
        if identity.user_type().is_rate_limit_exempt() {
            return Ok(());
        }

        let (allowed, result) = engine
            .rate_limit_allows(requester_ip, account, action, amount)
            .await
            .map_err(|err| {
                error!(
                    target: "gatehouse::gateway",
                    account = %account.name, action = %action, error = %err,
                    "rate-limit driver failed"
                );
                err
            })?;

        if !allowed {
            // whole seconds, truncated toward zero: a client must not be
            // told to wait longer than necessary
            let retry_after_secs = result.retry_after.as_secs();
            debug!(
                target: "gatehouse::gateway",
                account = %account.name, action = %action, amount,
                retry_after_secs, "rate limit exceeded"
            );
            return Err(Box::new(
                RegistryV2ErrorCode::TooManyRequests
                    .with("")
                    .with_header(RETRY_AFTER, HeaderValue::from(retry_after_secs)),
            ));
        }

        Ok(())
    }

    /// Serve a pull-through manifest, memoizing upstream fetches.
    ///
    /// Consults the inbound cache first; on a miss, runs the caller-supplied
    /// `fetch` (the cache never fetches) and stores its result before
    /// returning it. With coalescing enabled, concurrent misses on the same
    /// key run one fetch and the rest wait for its result to land.
    pub async fn cached_manifest<F, Fut>(
        &self,
        location: &ImageReference,
        now: SystemTime,
        fetch: F,
    ) -> Result<CachedManifest, DriverError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CachedManifest, DriverError>> + Send,
    {
        if let Some(hit) = self.inbound_cache.load_manifest(location, now).await? {
            return Ok(hit);
        }

        if !self.coalesce_fetches {
            return self.fetch_and_store(location, now, fetch).await;
        }

        let key_lock = {
            let mut in_flight = self.in_flight.lock().expect("in-flight fetch table poisoned");
            in_flight
                .entry(location.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = key_lock.lock().await;

        // the fetch that held the lock before us may have populated the cache
        let result = match self.inbound_cache.load_manifest(location, now).await {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => self.fetch_and_store(location, now, fetch).await,
            Err(err) => Err(err),
        };
        drop(guard);
        // existing waiters keep their clones of the lock; later misses get a
        // fresh one
        self.in_flight.lock().expect("in-flight fetch table poisoned").remove(location);
        result
    }

    async fn fetch_and_store<F, Fut>(
        &self,
        location: &ImageReference,
        now: SystemTime,
        fetch: F,
    ) -> Result<CachedManifest, DriverError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CachedManifest, DriverError>> + Send,
    {
        debug!(
            target: "gatehouse::gateway",
            location = %location, "inbound cache miss, fetching from upstream"
        );
        let manifest = fetch().await?;
        self.inbound_cache
            .store_manifest(location, &manifest.contents, &manifest.media_type, now)
            .await?;
        Ok(manifest)
    }
}

impl std::fmt::Debug for AdmissionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGateway")
            .field("rate_limit", &self.rate_limit)
            .field("inbound_cache", &self.inbound_cache.plugin_type_id())
            .field("coalesce_fetches", &self.coalesce_fetches)
            .finish()
    }
}
