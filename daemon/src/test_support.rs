//! Store double for exercising failure paths

use async_trait::async_trait;
use iotlink_store::{CounterStore, StoreError, Ttl};

/// Store whose every operation fails
pub(crate) struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment(&self, _key: &str) -> Result<i64, StoreError> {
        Err(down())
    }

    async fn ttl(&self, _key: &str) -> Result<Ttl, StoreError> {
        Err(down())
    }

    async fn set_ttl(&self, _key: &str, _secs: u64) -> Result<(), StoreError> {
        Err(down())
    }

    async fn set_with_ttl(&self, _key: &str, _value: i64, _secs: u64) -> Result<(), StoreError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(down())
    }
}
