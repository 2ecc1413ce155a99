//! Login lockout with escalating lock periods
//!
//! Two independent keys per user:
//!
//! ```text
//! login:failed:{identity}   failure counter, expires after lock_live_period
//! login:lock:{identity}     lock marker, value = expiry (ms), TTL = lock period
//! ```
//!
//! Every time the failure counter reaches a multiple of
//! `max_unsuccessful_attempts`, a lock of `lock_interval_length * crossings`
//! seconds is written. Unlocking is implicit: once the lock key's TTL runs
//! out, checks see no lock. The keys are not updated transactionally.

use crate::config::LockConfig;
use crate::metrics::METRICS;
use iotlink_store::{SharedCounterStore, StoreError, Ttl};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Result of a lock check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Locked { retry_after_secs: u64 },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

/// What recording one failure did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub failed_count: i64,

    /// Lock period applied by this failure, if it crossed a threshold
    pub locked_for_secs: Option<u64>,
}

pub struct LockManager {
    store: SharedCounterStore,
    config: LockConfig,
}

fn failed_key(identity: &str) -> String {
    format!("login:failed:{}", identity)
}

fn lock_key(identity: &str) -> String {
    format!("login:lock:{}", identity)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl LockManager {
    pub fn new(store: SharedCounterStore, config: LockConfig) -> Self {
        Self { store, config }
    }

    /// Check whether `identity` is inside an active lock period
    pub async fn is_user_locked(&self, identity: &str) -> Result<LockStatus, StoreError> {
        let ttl = self.store.ttl(&lock_key(identity)).await?;
        Ok(match ttl.remaining() {
            Some(secs) => LockStatus::Locked {
                retry_after_secs: secs,
            },
            None => LockStatus::Unlocked,
        })
    }

    /// Record a failed login, locking the account on each threshold crossing
    pub async fn increment_login_failed_count(
        &self,
        identity: &str,
    ) -> Result<FailureRecord, StoreError> {
        let key = failed_key(identity);
        let failed_count = self.store.increment(&key).await?;
        METRICS.login_failures.inc();

        if !matches!(self.store.ttl(&key).await?, Ttl::Expires(_)) {
            self.store.set_ttl(&key, self.config.lock_live_period).await?;
        }

        let threshold = i64::from(self.config.max_unsuccessful_attempts.max(1));
        if failed_count % threshold != 0 {
            debug!("Login failure {} for {}", failed_count, identity);
            return Ok(FailureRecord {
                failed_count,
                locked_for_secs: None,
            });
        }

        let crossings = (failed_count / threshold) as u64;
        let lock_secs = self.config.lock_interval_length.saturating_mul(crossings);
        let expires_at_ms = now_ms().saturating_add(lock_secs.saturating_mul(1000));

        self.store
            .set_with_ttl(&lock_key(identity), expires_at_ms as i64, lock_secs)
            .await?;
        METRICS.lockouts.inc();

        info!(
            "Locked {} for {}s after {} failed logins",
            identity, lock_secs, failed_count
        );

        Ok(FailureRecord {
            failed_count,
            locked_for_secs: Some(lock_secs),
        })
    }

    /// Forget the failure history after a successful login
    ///
    /// An active lock is left in place.
    pub async fn clear_on_success(&self, identity: &str) -> Result<(), StoreError> {
        self.store.delete(&failed_key(identity)).await
    }

    /// Administrative unlock: clears both the lock and the failure history
    pub async fn reset(&self, identity: &str) -> Result<(), StoreError> {
        self.store.delete(&lock_key(identity)).await?;
        self.store.delete(&failed_key(identity)).await?;
        info!("Lock state reset for {}", identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::UnavailableStore;
    use iotlink_store::{CounterStore, MemoryCounterStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(store: Arc<MemoryCounterStore>) -> LockManager {
        LockManager::new(
            store,
            LockConfig {
                max_unsuccessful_attempts: 10,
                lock_interval_length: 30,
                lock_live_period: 86400,
            },
        )
    }

    async fn fail(manager: &LockManager, identity: &str, times: usize) -> FailureRecord {
        let mut last = None;
        for _ in 0..times {
            last = Some(manager.increment_login_failed_count(identity).await.unwrap());
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_identity_unlocked() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));
        assert_eq!(
            manager.is_user_locked("nobody@example.com").await.unwrap(),
            LockStatus::Unlocked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_stays_unlocked() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));
        let record = fail(&manager, "a@example.com", 9).await;

        assert_eq!(record.failed_count, 9);
        assert_eq!(record.locked_for_secs, None);
        assert!(!manager.is_user_locked("a@example.com").await.unwrap().is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_escalates_linearly() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));

        let record = fail(&manager, "a@example.com", 10).await;
        assert_eq!(record.locked_for_secs, Some(30));
        assert_eq!(
            manager.is_user_locked("a@example.com").await.unwrap(),
            LockStatus::Locked {
                retry_after_secs: 30
            }
        );

        let record = fail(&manager, "a@example.com", 10).await;
        assert_eq!(record.failed_count, 20);
        assert_eq!(record.locked_for_secs, Some(60));
        assert_eq!(
            manager.is_user_locked("a@example.com").await.unwrap(),
            LockStatus::Locked {
                retry_after_secs: 60
            }
        );

        let record = fail(&manager, "a@example.com", 10).await;
        assert_eq!(record.locked_for_secs, Some(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires_implicitly() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));
        fail(&manager, "a@example.com", 10).await;

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(
            manager.is_user_locked("a@example.com").await.unwrap(),
            LockStatus::Locked {
                retry_after_secs: 18
            }
        );

        tokio::time::advance(Duration::from_secs(18)).await;
        assert_eq!(
            manager.is_user_locked("a@example.com").await.unwrap(),
            LockStatus::Unlocked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_count_but_not_lock() {
        let store = Arc::new(MemoryCounterStore::new());
        let manager = manager(store.clone());
        fail(&manager, "a@example.com", 10).await;

        manager.clear_on_success("a@example.com").await.unwrap();

        assert!(manager.is_user_locked("a@example.com").await.unwrap().is_locked());
        assert_eq!(
            store.ttl("login:failed:a@example.com").await.unwrap(),
            Ttl::Missing
        );

        // Counting restarts from scratch
        let record = manager
            .increment_login_failed_count("a@example.com")
            .await
            .unwrap();
        assert_eq!(record.failed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_unlocks() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));
        fail(&manager, "a@example.com", 10).await;

        manager.reset("a@example.com").await.unwrap();

        assert_eq!(
            manager.is_user_locked("a@example.com").await.unwrap(),
            LockStatus::Unlocked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_history_expires_after_live_period() {
        let store = Arc::new(MemoryCounterStore::new());
        let manager = manager(store.clone());
        fail(&manager, "a@example.com", 5).await;

        assert_eq!(
            store.ttl("login:failed:a@example.com").await.unwrap(),
            Ttl::Expires(86400)
        );

        tokio::time::advance(Duration::from_secs(86400)).await;
        let record = manager
            .increment_login_failed_count("a@example.com")
            .await
            .unwrap();
        assert_eq!(record.failed_count, 1);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let manager = LockManager::new(Arc::new(UnavailableStore), LockConfig::default());

        assert!(matches!(
            manager.is_user_locked("a@example.com").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(manager.increment_login_failed_count("a@example.com").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_are_independent() {
        let manager = manager(Arc::new(MemoryCounterStore::new()));
        fail(&manager, "a@example.com", 10).await;

        assert!(manager.is_user_locked("a@example.com").await.unwrap().is_locked());
        assert!(!manager.is_user_locked("b@example.com").await.unwrap().is_locked());
    }
}
