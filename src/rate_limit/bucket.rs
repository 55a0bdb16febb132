//! In-memory token-bucket rate-limit driver (plugin type ID `in-memory`).
//!
//! One bucket per `(account, action)` pair. Each bucket replenishes at
//! `limit / window_secs` tokens per second up to a capacity of `limit`, so a
//! configuration of `{"limit": 10, "window_secs": 60}` means "10 per minute
//! with bursts of up to 10". Actions with no configured limit are allowed
//! unconditionally.
//!
//! State lives in one process; deployments with multiple gateway replicas
//! need a driver backed by a shared store instead.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::driver_registry::DriverError;
use crate::models::{AccountName, ReducedAccount};
use crate::rate_limit::{
    RateLimitDriver, RateLimitDriverRegistry, RateLimitResult, RateLimitedAction,
};

pub const PLUGIN_TYPE_ID: &str = "in-memory";

/// Register this driver in the given registry.
pub fn register(registry: &RateLimitDriverRegistry) {
    registry.register(PLUGIN_TYPE_ID, || Box::<TokenBucketDriver>::default());
}

/// Per-action limit from the driver configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BucketLimit {
    /// Bucket capacity, i.e. the number of units allowed per window.
    pub limit: f64,
    /// Window length in seconds over which `limit` units replenish.
    pub window_secs: f64,
}

impl BucketLimit {
    fn rate_per_second(self) -> f64 {
        self.limit / self.window_secs
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Config {
    #[serde(default)]
    limits: HashMap<RateLimitedAction, BucketLimit>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    updated_at_nanos: u64,
}

/// See module docs.
#[derive(Debug, Default)]
pub struct TokenBucketDriver {
    limits: HashMap<RateLimitedAction, BucketLimit>,
    buckets: Mutex<HashMap<(AccountName, RateLimitedAction), BucketState>>,
}

impl TokenBucketDriver {
    fn now_nanos() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
    }
}

#[async_trait::async_trait]
impl RateLimitDriver for TokenBucketDriver {
    fn plugin_type_id(&self) -> &'static str {
        PLUGIN_TYPE_ID
    }

    async fn init(&mut self, config: &serde_json::Value) -> Result<(), DriverError> {
        let config: Config = if config.is_null() {
            Config::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        for (action, limit) in &config.limits {
            if limit.limit <= 0.0 || limit.window_secs <= 0.0 {
                return Err(format!(
                    "invalid rate limit for action {action}: limit and window_secs must be positive"
                )
                .into());
            }
        }
        self.limits = config.limits;
        Ok(())
    }

    async fn rate_limit_allows(
        &self,
        _requester_ip: IpAddr,
        account: &ReducedAccount,
        action: RateLimitedAction,
        amount: u64,
    ) -> Result<(bool, RateLimitResult), DriverError> {
        let Some(limit) = self.limits.get(&action).copied() else {
            // no limit configured for this action
            return Ok((true, RateLimitResult::default()));
        };

        let now = Self::now_nanos();
        let cost = amount as f64;
        let rate = limit.rate_per_second();
        let capacity = limit.limit;

        let mut buckets = self.buckets.lock().expect("token bucket state poisoned");
        let state = buckets
            .entry((account.name.clone(), action))
            .or_insert_with(|| BucketState { tokens: capacity, updated_at_nanos: now });

        // refill since the last touch, capped at capacity
        let elapsed_secs = (now.saturating_sub(state.updated_at_nanos) as f64) / 1e9;
        let tokens = (state.tokens + elapsed_secs * rate).min(capacity);

        if tokens >= cost {
            *state = BucketState { tokens: tokens - cost, updated_at_nanos: now };
            Ok((true, RateLimitResult::default()))
        } else {
            *state = BucketState { tokens, updated_at_nanos: now };
            let missing = cost - tokens;
            let retry_after = Duration::from_secs_f64(missing / rate);
            Ok((false, RateLimitResult { retry_after }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn driver_with_pull_limit(limit: f64, window_secs: f64) -> TokenBucketDriver {
        let mut driver = TokenBucketDriver::default();
        driver
            .init(&serde_json::json!({
                "limits": { "pull": { "limit": limit, "window_secs": window_secs } }
            }))
            .await
            .unwrap();
        driver
    }

    fn ip() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn bucket_drains_and_denies_with_positive_retry_after() {
        let driver = driver_with_pull_limit(10.0, 60.0).await;
        let account = ReducedAccount::new("tenant1");

        for _ in 0..10 {
            let (allowed, _) = driver
                .rate_limit_allows(ip(), &account, RateLimitedAction::Pull, 1)
                .await
                .unwrap();
            assert!(allowed);
        }

        let (allowed, result) = driver
            .rate_limit_allows(ip(), &account, RateLimitedAction::Pull, 1)
            .await
            .unwrap();
        assert!(!allowed);
        assert!(result.retry_after > Duration::ZERO);
        // one token replenishes every 6 seconds under 10-per-minute
        assert!(result.retry_after <= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn accounts_have_independent_buckets() {
        let driver = driver_with_pull_limit(1.0, 60.0).await;
        let first = ReducedAccount::new("tenant1");
        let second = ReducedAccount::new("tenant2");

        let (allowed, _) =
            driver.rate_limit_allows(ip(), &first, RateLimitedAction::Pull, 1).await.unwrap();
        assert!(allowed);
        let (allowed, _) =
            driver.rate_limit_allows(ip(), &first, RateLimitedAction::Pull, 1).await.unwrap();
        assert!(!allowed);

        // tenant2 still has a full bucket
        let (allowed, _) =
            driver.rate_limit_allows(ip(), &second, RateLimitedAction::Pull, 1).await.unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn unconfigured_actions_are_unlimited() {
        let driver = driver_with_pull_limit(1.0, 60.0).await;
        let account = ReducedAccount::new("tenant1");

        for _ in 0..100 {
            let (allowed, result) = driver
                .rate_limit_allows(ip(), &account, RateLimitedAction::Push, 1)
                .await
                .unwrap();
            assert!(allowed);
            assert_eq!(result.retry_after, Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn weighted_amounts_drain_proportionally() {
        let driver = driver_with_pull_limit(10.0, 60.0).await;
        let account = ReducedAccount::new("tenant1");

        let (allowed, _) = driver
            .rate_limit_allows(ip(), &account, RateLimitedAction::Pull, 8)
            .await
            .unwrap();
        assert!(allowed);
        let (allowed, _) = driver
            .rate_limit_allows(ip(), &account, RateLimitedAction::Pull, 8)
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn init_rejects_nonpositive_limits() {
        let mut driver = TokenBucketDriver::default();
        let err = driver
            .init(&serde_json::json!({
                "limits": { "pull": { "limit": 0.0, "window_secs": 60.0 } }
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[tokio::test]
    async fn null_config_disables_all_limits() {
        let mut driver = TokenBucketDriver::default();
        driver.init(&serde_json::Value::Null).await.unwrap();
        let account = ReducedAccount::new("tenant1");
        let (allowed, _) = driver
            .rate_limit_allows(ip(), &account, RateLimitedAction::Pull, 1)
            .await
            .unwrap();
        assert!(allowed);
    }
}
