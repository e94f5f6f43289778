/*!
 * Configuration Tests
 */

use serial_test::serial;
use sigdeliver::core::config::RPC_TIMEOUT_ENV;
use sigdeliver::DeliveryConfig;
use std::time::Duration;

fn with_env<R>(value: Option<&str>, f: impl FnOnce() -> R) -> R {
    match value {
        Some(v) => std::env::set_var(RPC_TIMEOUT_ENV, v),
        None => std::env::remove_var(RPC_TIMEOUT_ENV),
    }
    let result = f();
    std::env::remove_var(RPC_TIMEOUT_ENV);
    result
}

#[test]
#[serial]
fn test_timeout_from_env() {
    let config = with_env(Some("1500"), DeliveryConfig::from_env);
    assert_eq!(config.interrupted_rpc_timeout, Duration::from_millis(1500));
    assert_eq!(config.rpc_timeout_ms(), 1500);

    let padded = with_env(Some(" 20 "), DeliveryConfig::from_env);
    assert_eq!(padded.rpc_timeout_ms(), 20);
}

#[test]
#[serial]
fn test_unparseable_env_keeps_default() {
    for bad in ["", "soon", "-5", "1.5"] {
        let config = with_env(Some(bad), DeliveryConfig::from_env);
        assert_eq!(config, DeliveryConfig::default(), "value {bad:?}");
    }
}

#[test]
#[serial]
fn test_missing_env_keeps_default() {
    let config = with_env(None, DeliveryConfig::from_env);
    assert_eq!(config.rpc_timeout_ms(), 60_000);
}

#[test]
fn test_config_serializes() {
    let config = DeliveryConfig::fast_timeout();
    let json = serde_json::to_string(&config).unwrap();
    let back: DeliveryConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
