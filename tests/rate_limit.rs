//! Rate Limit Integration Tests
//!
//! Tests the per-requester, per-route window on the management API.


use integration_harness::{TestDaemon, start, test_config};

fn header(resp: &reqwest::Response, name: &str) -> Option<u64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

async fn limited_daemon(max_hits: u64) -> TestDaemon {
    let mut config = test_config();
    config.rate_limit.max_hits = max_hits;
    config.rate_limit.window_secs = 60;
    config.rate_limit.trust_requester_header = true;
    start(config).await
}

async fn get_stats(daemon: &TestDaemon, requester: &str) -> reqwest::Response {
    daemon
        .http
        .get(daemon.api("/api/stats"))
        .header("x-requester-id", requester)
        .send()
        .await
        .unwrap()
}

/// Test: hits count down the remaining budget, then 429
#[tokio::test]
async fn test_limit_enforced() {
    let daemon = limited_daemon(3).await;

    for remaining in [2, 1, 0] {
        let resp = get_stats(&daemon, "ops").await;
        assert_eq!(resp.status(), 200);
        assert_eq!(header(&resp, "x-ratelimit-limit"), Some(3));
        assert_eq!(header(&resp, "x-ratelimit-remaining"), Some(remaining));
        assert!(header(&resp, "x-ratelimit-reset").unwrap() <= 60);
    }

    let resp = get_stats(&daemon, "ops").await;
    assert_eq!(resp.status(), 429);
    assert_eq!(header(&resp, "x-ratelimit-remaining"), Some(0));
    assert!(header(&resp, "retry-after").is_some());
}

/// Test: another requester has its own budget
#[tokio::test]
async fn test_limit_is_per_requester() {
    let daemon = limited_daemon(1).await;

    assert_eq!(get_stats(&daemon, "ops").await.status(), 200);
    assert_eq!(get_stats(&daemon, "ops").await.status(), 429);
    assert_eq!(get_stats(&daemon, "other").await.status(), 200);
}

/// Test: without a trusted proxy, rotating the header buys no extra budget
#[tokio::test]
async fn test_untrusted_header_keyed_on_peer() {
    let mut config = test_config();
    config.rate_limit.max_hits = 2;
    config.rate_limit.window_secs = 60;
    let daemon = start(config).await;

    assert_eq!(get_stats(&daemon, "first").await.status(), 200);
    assert_eq!(get_stats(&daemon, "second").await.status(), 200);
    assert_eq!(get_stats(&daemon, "third").await.status(), 429);
}

/// Test: another route has its own budget
#[tokio::test]
async fn test_limit_is_per_route() {
    let daemon = limited_daemon(1).await;

    assert_eq!(get_stats(&daemon, "ops").await.status(), 200);
    assert_eq!(get_stats(&daemon, "ops").await.status(), 429);

    let resp = daemon
        .http
        .get(daemon.api("/api/devices"))
        .header("x-requester-id", "ops")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

/// Test: disabling the limiter removes the headers
#[tokio::test]
async fn test_disabled_limiter() {
    let mut config = test_config();
    config.rate_limit.enabled = false;
    let daemon = start(config).await;

    let resp = get_stats(&daemon, "ops").await;
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "x-ratelimit-limit"), None);
}
