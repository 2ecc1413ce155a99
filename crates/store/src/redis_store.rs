//! Redis-backed counter store
//!
//! Shared by every daemon instance, so lockouts and rate windows hold across a
//! multi-instance deployment. Each operation is a single command; atomicity
//! beyond `INCR` is not attempted.

use crate::{CounterStore, StoreError, Ttl};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Counter store talking to Redis over a reconnecting connection
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: String,
    op_timeout: Duration,
}

impl RedisCounterStore {
    /// Connect to `url`; every key is namespaced under `prefix`
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable(format!("connect to {} timed out", url)))??;

        info!("Connected to Redis counter store at {}", url);

        Ok(Self {
            conn,
            prefix: prefix.into(),
            op_timeout,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                debug!("Redis {} failed: {}", op, e);
                Err(e.into())
            }
            Err(_) => Err(StoreError::Unavailable(format!("{} timed out", op))),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run("INCR", async move {
            redis::cmd("INCR").arg(&key).query_async::<_, i64>(&mut conn).await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let raw = self
            .run("TTL", async move {
                redis::cmd("TTL").arg(&key).query_async::<_, i64>(&mut conn).await
            })
            .await?;
        Ok(Ttl::from_raw(raw))
    }

    async fn set_ttl(&self, key: &str, secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run("EXPIRE", async move {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(secs)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: i64, secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run("SET", async move {
            redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        self.run("DEL", async move {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }
}
