use dashmap::DashMap;
use iotlink_transport::SharedTransportHandle;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("No connection for device {0}")]
    NotFound(String),
}

/// Lifecycle state of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Transport is open
    Connected,
    /// Transport is open and the device presented a valid token
    Authenticated,
}

/// One live device transport session
#[derive(Clone)]
pub struct Connection {
    pub device_identity: String,
    pub handle: SharedTransportHandle,
    pub status: ConnectionStatus,
    pub connected_at: Instant,
}

impl Connection {
    pub fn session_id(&self) -> u64 {
        self.handle.session_id()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device_identity", &self.device_identity)
            .field("session_id", &self.session_id())
            .field("status", &self.status)
            .finish()
    }
}

/// Handle-free view of a connection for the management API
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub device_identity: String,
    pub session_id: u64,
    pub status: ConnectionStatus,
    pub connected_secs: u64,
}

/// Registry of live device connections
///
/// At most one entry per device identity. Process-local: other daemon
/// instances do not see these connections.
pub struct ConnectionRegistry {
    /// Map device identity -> connection
    connections: DashMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
        })
    }

    /// Insert or replace the entry for `identity`
    ///
    /// Returns the superseded connection so the caller can close its handle.
    pub fn add_connection(
        &self,
        identity: &str,
        handle: SharedTransportHandle,
        status: ConnectionStatus,
    ) -> Option<Connection> {
        let conn = Connection {
            device_identity: identity.to_string(),
            handle,
            status,
            connected_at: Instant::now(),
        };
        trace!("Registering {} (session {})", identity, conn.session_id());
        self.connections.insert(identity.to_string(), conn)
    }

    pub fn set_status(&self, identity: &str, status: ConnectionStatus) -> Result<(), RegistryError> {
        match self.connections.get_mut(identity) {
            Some(mut conn) => {
                conn.status = status;
                Ok(())
            }
            None => Err(RegistryError::NotFound(identity.to_string())),
        }
    }

    pub fn remove_connection(&self, identity: &str) -> Option<Connection> {
        self.connections.remove(identity).map(|(_, conn)| conn)
    }

    /// Remove the entry only if it still belongs to `session_id`
    ///
    /// A session that was superseded by a reconnect must not evict its
    /// replacement when its own disconnect arrives late.
    pub fn remove_session(&self, identity: &str, session_id: u64) -> bool {
        self.connections
            .remove_if(identity, |_, conn| conn.session_id() == session_id)
            .is_some()
    }

    /// Whether `session_id` is the live session for `identity`
    pub fn is_current(&self, identity: &str, session_id: u64) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|conn| conn.session_id() == session_id)
    }

    pub fn get(&self, identity: &str) -> Option<Connection> {
        self.connections.get(identity).map(|conn| conn.clone())
    }

    /// Get number of active connections
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Point-in-time listing of every connection
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut list: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                device_identity: entry.device_identity.clone(),
                session_id: entry.session_id(),
                status: entry.status,
                connected_secs: entry.connected_at.elapsed().as_secs(),
            })
            .collect();
        list.sort_by(|a, b| a.device_identity.cmp(&b.device_identity));
        list
    }
}
