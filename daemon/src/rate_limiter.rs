//! Fixed-window hit counters per (requester, route, method)

use iotlink_store::{SharedCounterStore, StoreError, Ttl};
use serde::Serialize;
use tracing::trace;

/// Hit state for one requester on one route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCounter {
    /// Seconds until the window resets
    pub ttl: u64,
    pub requester_id: String,
    pub hits: i64,
    pub route: String,
    pub method: String,
}

pub struct RateLimiter {
    store: SharedCounterStore,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(store: SharedCounterStore, window_secs: u64) -> Self {
        Self { store, window_secs }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Count one hit and report the window state
    ///
    /// Increment, TTL read and TTL arm are separate store calls. Two racing
    /// first hits may both arm the window, which is harmless.
    ///
    /// The window is armed only on a key without an expiry. A window in its
    /// last second reads as `Expires(0)` and is left to lapse.
    pub async fn increment_counter(
        &self,
        requester_id: &str,
        route: &str,
        method: &str,
    ) -> Result<RateCounter, StoreError> {
        let key = format!("rate:{}:{}:{}", requester_id, route, method);

        let hits = self.store.increment(&key).await?;
        let ttl = match self.store.ttl(&key).await? {
            Ttl::Expires(secs) => secs,
            Ttl::Missing | Ttl::Persistent => {
                self.store.set_ttl(&key, self.window_secs).await?;
                self.window_secs
            }
        };

        trace!("{} hit {} {} ({} hits, {}s left)", requester_id, method, route, hits, ttl);

        Ok(RateCounter {
            ttl,
            requester_id: requester_id.to_string(),
            hits,
            route: route.to_string(),
            method: method.to_string(),
        })
    }
}
