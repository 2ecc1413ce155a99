use super::*;

const SECRET: &str = "2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a";

#[test]
fn test_default_config() {
    let config = DaemonConfig::default();
    assert_eq!(config.server.path, "/device");
    assert_eq!(config.lock.max_unsuccessful_attempts, 10);
    assert_eq!(config.lock.lock_interval_length, 30);
    assert_eq!(config.rate_limit.window_secs, 3600);
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.store.failure_policy, FailurePolicy::FailOpen);
}

#[test]
fn test_parse_sections() {
    let config = DaemonConfig::parse(&format!(
        r#"
[server]
bind = "127.0.0.1:9443"

[security]
device_token_secret = "{SECRET}"

[lock]
max_unsuccessful_attempts = 5
lock_interval_length = 60

[store]
backend = "redis"
redis_url = "redis://cache:6379"
failure_policy = "fail_closed"
"#
    ))
    .unwrap();

    assert_eq!(config.server.bind.port(), 9443);
    assert_eq!(config.lock.max_unsuccessful_attempts, 5);
    assert_eq!(config.lock.lock_interval_length, 60);
    assert_eq!(config.lock.lock_live_period, 86400);
    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.store.redis_url, "redis://cache:6379");
    assert_eq!(config.store.failure_policy, FailurePolicy::FailClosed);
}

#[test]
fn test_missing_secret_rejected() {
    assert!(DaemonConfig::parse("").is_err());

    let open = DaemonConfig::parse("[security]\nrequire_device_token = false\n").unwrap();
    assert!(!open.security.require_device_token);
}

#[test]
fn test_zero_threshold_rejected() {
    let err = DaemonConfig::parse(&format!(
        "[security]\ndevice_token_secret = \"{SECRET}\"\n[lock]\nmax_unsuccessful_attempts = 0\n"
    ));
    assert!(err.is_err());
}

#[test]
fn test_zero_lock_periods_rejected() {
    let open = "[security]\nrequire_device_token = false\n";

    assert!(DaemonConfig::parse(&format!("{open}[lock]\nlock_live_period = 0\n")).is_err());
    assert!(DaemonConfig::parse(&format!("{open}[lock]\nlock_interval_length = 0\n")).is_err());
    assert!(DaemonConfig::parse(&format!("{open}[lock]\nlock_live_period = 1\n")).is_ok());
}

#[test]
fn test_handshake_timeout() {
    let open = "[security]\nrequire_device_token = false\n";

    assert_eq!(DaemonConfig::default().server.handshake_timeout_secs, 10);
    let config =
        DaemonConfig::parse(&format!("{open}[server]\nhandshake_timeout_secs = 3\n")).unwrap();
    assert_eq!(config.server.handshake_timeout_secs, 3);
    assert!(DaemonConfig::parse(&format!("{open}[server]\nhandshake_timeout_secs = 0\n")).is_err());
}

#[test]
fn test_requester_header_untrusted_by_default() {
    assert!(!DaemonConfig::default().rate_limit.trust_requester_header);

    let config = DaemonConfig::parse(
        "[security]\nrequire_device_token = false\n[rate_limit]\ntrust_requester_header = true\n",
    )
    .unwrap();
    assert!(config.rate_limit.trust_requester_header);
}

#[test]
fn test_merge_scalars() {
    let mut config = DaemonConfig::default();
    let mut other = DaemonConfig::default();
    other.lock.max_unsuccessful_attempts = 3;
    other.rate_limit.enabled = false;

    config.merge(other);

    assert_eq!(config.lock.max_unsuccessful_attempts, 3);
    assert!(!config.rate_limit.enabled);
    assert_eq!(config.lock.lock_interval_length, 30);
}

#[test]
fn test_merge_options() {
    let mut config = DaemonConfig::default();
    config.security.device_token_secret = Some("aa".to_string());

    // None does not clear an existing secret
    config.merge(DaemonConfig::default());
    assert_eq!(config.security.device_token_secret.as_deref(), Some("aa"));

    let mut other = DaemonConfig::default();
    other.security.device_token_secret = Some("bb".to_string());
    config.merge(other);
    assert_eq!(config.security.device_token_secret.as_deref(), Some("bb"));
}

#[test]
fn test_merge_store_backend() {
    let mut config = DaemonConfig::default();
    let mut other = DaemonConfig::default();
    other.store.backend = StoreBackend::Redis;
    other.store.failure_policy = FailurePolicy::FailClosed;

    config.merge(other);

    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.store.failure_policy, FailurePolicy::FailClosed);
}
