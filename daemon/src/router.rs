//! Command routing between operators and live device sessions
//!
//! Delivery is best-effort: a command for a device without a live session,
//! or whose send fails, is dropped. Nothing is queued or retried, and the
//! caller is never handed an error.

use crate::connection_registry::{ConnectionRegistry, ConnectionStatus};
use crate::metrics::METRICS;
use iotlink_protocol::Command;
use iotlink_transport::SharedTransportHandle;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Capacity of the listener channel; slow listeners lose the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Outcome of a routing attempt, for observability only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No live session for the target identity
    NotConnected,
    /// The session's handle refused the payload
    SendFailed,
}

/// Session and device-originated events published to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    SessionOpened {
        device_identity: String,
        session_id: u64,
    },
    SessionClosed {
        device_identity: String,
        session_id: u64,
    },
    DeviceMessage {
        device_identity: String,
        payload: Value,
    },
}

pub struct CommandRouter {
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Sender<RouterEvent>,
}

impl CommandRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self { registry, events })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a listener for session and device events
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Forward `command` to its target's live session, if any
    ///
    /// Connected and Authenticated entries both carry an open transport.
    pub fn route_command(&self, command: &Command) -> Delivery {
        let target = &command.target_device_identity;

        let Some(conn) = self.registry.get(target) else {
            debug!("Dropping command for {}: not connected", target);
            METRICS.commands_dropped.inc();
            return Delivery::Dropped(DropReason::NotConnected);
        };

        match conn.handle.send(&command.payload) {
            Ok(()) => {
                trace!("Routed command to {} (session {})", target, conn.session_id());
                METRICS.commands_routed.inc();
                Delivery::Sent
            }
            Err(e) => {
                debug!("Dropping command for {}: {}", target, e);
                METRICS.commands_dropped.inc();
                Delivery::Dropped(DropReason::SendFailed)
            }
        }
    }

    /// Record a new session after a successful handshake
    ///
    /// A previous session for the same identity is closed before it is
    /// forgotten, so a reconnect never leaks the old transport.
    pub fn on_device_connect(
        &self,
        identity: &str,
        handle: SharedTransportHandle,
        status: ConnectionStatus,
    ) {
        let session_id = handle.session_id();

        if let Some(previous) = self.registry.add_connection(identity, handle, status) {
            if previous.session_id() != session_id {
                info!(
                    "Device {} reconnected; closing superseded session {}",
                    identity,
                    previous.session_id()
                );
                previous.handle.close();
            }
        }

        METRICS.active_connections.set(self.registry.count() as i64);
        info!(
            "Device {} connected (session {}, {} active)",
            identity,
            session_id,
            self.registry.count()
        );

        self.publish(RouterEvent::SessionOpened {
            device_identity: identity.to_string(),
            session_id,
        });
    }

    /// Forget the session for `identity`, whichever it is
    pub fn on_device_disconnect(&self, identity: &str) {
        if let Some(conn) = self.registry.remove_connection(identity) {
            self.closed(identity, conn.session_id());
        }
    }

    /// Transport-side disconnect of one specific session
    ///
    /// Ignored when the identity has since reconnected on a newer session.
    pub fn on_session_closed(&self, identity: &str, session_id: u64) {
        if self.registry.remove_session(identity, session_id) {
            self.closed(identity, session_id);
        } else {
            trace!("Session {} for {} already superseded", session_id, identity);
        }
    }

    /// Relay a device-originated control message to listeners
    pub fn on_device_message(&self, identity: &str, payload: Value) {
        METRICS.device_messages.inc();
        self.publish(RouterEvent::DeviceMessage {
            device_identity: identity.to_string(),
            payload,
        });
    }

    fn closed(&self, identity: &str, session_id: u64) {
        METRICS.active_connections.set(self.registry.count() as i64);
        info!(
            "Device {} disconnected (session {}, {} active)",
            identity,
            session_id,
            self.registry.count()
        );
        self.publish(RouterEvent::SessionClosed {
            device_identity: identity.to_string(),
            session_id,
        });
    }

    fn publish(&self, event: RouterEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
