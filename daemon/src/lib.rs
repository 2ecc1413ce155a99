//! iotlink Daemon
//!
//! Keeps the registry of live device sessions, routes operator commands to
//! them, and guards the management API with login lockouts and rate limits
//! backed by a shared TTL counter store.

pub mod auth;
pub mod config;
pub mod connection_registry;
pub mod handler;
pub mod lock_manager;
pub mod management;
pub mod metrics;
pub mod rate_limiter;
pub mod router;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use auth::DeviceAuthenticator;
use config::{DaemonConfig, StoreConfig};
use connection_registry::ConnectionRegistry;
use iotlink_store::{MemoryCounterStore, RedisCounterStore, SharedCounterStore, StoreBackend};
use iotlink_transport::{WssServer, WssServerConfig};
use lock_manager::LockManager;
use management::AppState;
use rate_limiter::RateLimiter;
use router::{CommandRouter, RouterEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// How often the in-process store purges expired keys
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Open the configured counter store
pub async fn build_store(config: &StoreConfig) -> Result<SharedCounterStore> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process counter store");
            let store = Arc::new(MemoryCounterStore::new());

            let weak = Arc::downgrade(&store);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(MEMORY_CLEANUP_INTERVAL);
                loop {
                    interval.tick().await;
                    let Some(store) = weak.upgrade() else { break };
                    store.cleanup();
                }
            });

            Ok(store)
        }
        StoreBackend::Redis => {
            info!("Using Redis counter store at {}", config.redis_url);
            let store = RedisCounterStore::connect(
                &config.redis_url,
                &config.key_prefix,
                Duration::from_millis(config.op_timeout_ms),
            )
            .await
            .with_context(|| format!("connecting to {}", config.redis_url))?;
            Ok(Arc::new(store))
        }
    }
}

/// Fully wired daemon components
pub struct Daemon {
    pub config: DaemonConfig,
    pub router: Arc<CommandRouter>,
    pub lock_manager: Arc<LockManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub authenticator: Arc<DeviceAuthenticator>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, store: SharedCounterStore) -> Result<Self> {
        config.validate()?;
        let authenticator = DeviceAuthenticator::from_config(&config.server, &config.security)?;
        let router = CommandRouter::new(ConnectionRegistry::new());
        let lock_manager = LockManager::new(store.clone(), config.lock.clone());
        let rate_limiter = RateLimiter::new(store, config.rate_limit.window_secs);

        Ok(Self {
            config,
            router,
            lock_manager: Arc::new(lock_manager),
            rate_limiter: Arc::new(rate_limiter),
            authenticator: Arc::new(authenticator),
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            router: self.router.clone(),
            lock_manager: self.lock_manager.clone(),
            rate_limiter: self.rate_limiter.clone(),
            rate_limit: self.config.rate_limit.clone(),
            failure_policy: self.config.store.failure_policy,
        }
    }

    /// Bind the device listener
    pub async fn bind_devices(&self) -> Result<WssServer> {
        let server = WssServer::bind(WssServerConfig {
            bind: self.config.server.bind,
            path: self.config.server.path.clone(),
            handshake_timeout: Duration::from_secs(self.config.server.handshake_timeout_secs),
        })
        .await?;
        Ok(server)
    }

    /// Serve devices and the management API until either stops
    pub async fn run(self) -> Result<()> {
        let devices = self.bind_devices().await?;
        let api = TcpListener::bind(self.config.management.bind).await?;
        self.run_with(devices, api).await
    }

    /// Same as `run`, on listeners bound by the caller
    pub async fn run_with(self, devices: WssServer, api: TcpListener) -> Result<()> {
        spawn_event_logger(&self.router);

        let device_task = handler::run_device_server(
            devices,
            self.config.server.max_connections,
            self.authenticator.clone(),
            self.router.clone(),
        );
        let api_task = management::serve(api, self.app_state());

        tokio::select! {
            res = device_task => res.context("device server stopped"),
            res = api_task => res.context("management API stopped"),
        }
    }
}

/// Log session and device events at debug level
fn spawn_event_logger(router: &CommandRouter) {
    let mut events = router.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RouterEvent::DeviceMessage {
                    device_identity,
                    payload,
                }) => debug!("Event from {}: {}", device_identity, payload),
                Ok(event) => debug!("{:?}", event),
                Err(RecvError::Lagged(n)) => warn!("Event logger skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
