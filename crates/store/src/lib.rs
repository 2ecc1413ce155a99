//! iotlink Store - TTL counter store
//!
//! This crate provides:
//! - The `CounterStore` contract (atomic increment, TTL read/arm, delete)
//! - An in-process backend for single-instance deployments and tests
//! - A Redis backend shared by every daemon instance
//!
//! Missing keys are never an error: `ttl` reports `Ttl::Missing` instead.

mod memory;
mod redis_store;

pub use memory::*;
pub use redis_store::*;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing store could not be reached or did not answer in time
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key does not exist (or already expired)
    Missing,

    /// Key exists without an expiry
    Persistent,

    /// Key expires in the given number of seconds
    Expires(u64),
}

impl Ttl {
    /// Seconds remaining, if an expiry is armed and still in the future
    pub fn remaining(&self) -> Option<u64> {
        match self {
            Ttl::Expires(secs) if *secs > 0 => Some(*secs),
            _ => None,
        }
    }

    /// Map the raw `TTL` reply (-2 missing, -1 no expiry)
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -1 => Ttl::Persistent,
            n if n < 0 => Ttl::Missing,
            n => Ttl::Expires(n as u64),
        }
    }
}

/// Key-value counter store with TTL
///
/// Each call is one store round trip. Callers composing several calls must
/// tolerate interleaving with other clients.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at 1
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Remaining lifetime of `key`
    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError>;

    /// Arm an expiry on an existing key; no-op if the key is missing
    async fn set_ttl(&self, key: &str, secs: u64) -> Result<(), StoreError>;

    /// Store `value` under `key` with an expiry, replacing any previous value
    async fn set_with_ttl(&self, key: &str, value: i64, secs: u64) -> Result<(), StoreError>;

    /// Delete `key`; no-op if missing
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub type SharedCounterStore = Arc<dyn CounterStore>;

/// Which backend the daemon runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}
