//! Driver selection by configuration: registry lookups, init failures, and
//! the fully-wired startup path.

use gatehouse::driver_registry::DriverRegistryError;
use gatehouse::{AdmissionGateway, GatewayConfig};

fn config(value: serde_json::Value) -> GatewayConfig {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn full_config_wires_both_drivers() {
    let config = config(serde_json::json!({
        "rate_limit_driver": "in-memory",
        "rate_limit_config": {
            "limits": { "pull": { "limit": 100.0, "window_secs": 60.0 } }
        },
        "inbound_cache_driver": "in-memory",
        "inbound_cache_config": { "max_age_secs": 1800 },
        "coalesce_fetches": true,
    }));
    let gateway = AdmissionGateway::from_config(
        &config,
        &gatehouse::rate_limit::driver_registry(),
        &gatehouse::cache::driver_registry(),
    )
    .await
    .unwrap();
    assert!(gateway.rate_limiting_enabled());
}

#[tokio::test]
async fn omitting_the_rate_limit_driver_disables_rate_limiting() {
    let config = config(serde_json::json!({ "inbound_cache_driver": "in-memory" }));
    let gateway = AdmissionGateway::from_config(
        &config,
        &gatehouse::rate_limit::driver_registry(),
        &gatehouse::cache::driver_registry(),
    )
    .await
    .unwrap();
    assert!(!gateway.rate_limiting_enabled());
}

#[tokio::test]
async fn unknown_rate_limit_driver_is_a_startup_error() {
    let config = config(serde_json::json!({
        "rate_limit_driver": "redis",
        "inbound_cache_driver": "in-memory",
    }));
    let err = AdmissionGateway::from_config(
        &config,
        &gatehouse::rate_limit::driver_registry(),
        &gatehouse::cache::driver_registry(),
    )
    .await
    .unwrap_err();

    let registry_err = err.downcast_ref::<DriverRegistryError>().expect("unknown-driver error");
    assert_eq!(
        *registry_err,
        DriverRegistryError::UnknownDriver { family: "rate-limit", id: "redis".to_owned() }
    );
}

#[tokio::test]
async fn unknown_cache_driver_is_a_startup_error() {
    let config = config(serde_json::json!({ "inbound_cache_driver": "memcached" }));
    let err = AdmissionGateway::from_config(
        &config,
        &gatehouse::rate_limit::driver_registry(),
        &gatehouse::cache::driver_registry(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "no inbound cache driver with ID \"memcached\"");
}

#[tokio::test]
async fn rejected_driver_config_is_a_startup_error() {
    let config = config(serde_json::json!({
        "rate_limit_driver": "in-memory",
        "rate_limit_config": {
            "limits": { "pull": { "limit": -5.0, "window_secs": 60.0 } }
        },
        "inbound_cache_driver": "in-memory",
    }));
    let err = AdmissionGateway::from_config(
        &config,
        &gatehouse::rate_limit::driver_registry(),
        &gatehouse::cache::driver_registry(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("must be positive"));
}

#[test]
fn bundled_drivers_answer_to_their_registered_ids() {
    let rate_limit = gatehouse::rate_limit::driver_registry();
    let driver = rate_limit.instantiate("in-memory").unwrap();
    assert_eq!(driver.plugin_type_id(), "in-memory");

    let cache = gatehouse::cache::driver_registry();
    let driver = cache.instantiate("in-memory").unwrap();
    assert_eq!(driver.plugin_type_id(), "in-memory");
}
