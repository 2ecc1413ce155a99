//! iotlink Transport - Device WebSocket layer
//!
//! This crate provides:
//! - `TransportHandle`: the send capability for one live device session
//! - `ChannelHandle`: a handle backed by the session's outbound queue
//! - WebSocket listener with handshake-time authorization

mod channel;
mod wss_server;

pub use channel::*;
pub use wss_server::*;

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    #[error("Session {0} is closed")]
    Closed(u64),
}

/// Send capability for one live device session
///
/// `send` never waits for the device: the payload is queued for the session's
/// writer and the call returns.
pub trait TransportHandle: Send + Sync {
    /// Id of the transport session this handle belongs to
    fn session_id(&self) -> u64;

    /// Queue `payload` for delivery to the device
    fn send(&self, payload: &Value) -> Result<(), SendError>;

    /// Ask the session to close; idempotent
    fn close(&self);

    /// Whether the session's writer has gone away
    fn is_closed(&self) -> bool;
}

pub type SharedTransportHandle = Arc<dyn TransportHandle>;
