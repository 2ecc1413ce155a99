//! Control-channel frames

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame pushed from the server to a device
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the handshake completes
    Welcome { session_id: u64 },

    /// A routed command body
    Command { payload: Value },
}

impl ServerMessage {
    /// Encode as a JSON text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame pushed from a device to the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Device-originated control event, relayed to listeners
    Event { payload: Value },

    /// Liveness probe, no payload
    Ping,
}

impl DeviceMessage {
    /// Decode a JSON text frame
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
