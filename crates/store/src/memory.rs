//! In-process counter store

use crate::{CounterStore, StoreError, Ttl};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

/// Thread-safe counter store backed by a sharded map
///
/// Expired entries are treated as missing on access and purged by `cleanup`.
/// Uses tokio's clock so paused-time tests can advance TTLs.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Remove expired entries
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });

        if !entry.is_live(now) {
            *entry = Entry {
                value: 0,
                expires_at: None,
            };
        }

        entry.value += 1;
        Ok(entry.value)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            return Ok(Ttl::Missing);
        };

        Ok(match entry.expires_at {
            None => Ttl::Persistent,
            Some(t) if t <= now => Ttl::Missing,
            // Round up so a freshly armed TTL reads back as armed
            Some(t) => Ttl::Expires((t - now).as_millis().div_ceil(1000) as u64),
        })
    }

    async fn set_ttl(&self, key: &str, secs: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(now + Duration::from_secs(secs));
            }
        }
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: i64, secs: u64) -> Result<(), StoreError> {
        let expires_at = Instant::now() + Duration::from_secs(secs);
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
