//! Command - the unit of operator-to-device control

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command addressed to a single device
///
/// Commands are issued by operators or by rule actions and pushed to the
/// target device over its live control channel. Delivery is best-effort.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Authenticated subject of the target device
    pub target_device_identity: String,

    /// Opaque command body, forwarded unmodified
    pub payload: Value,
}

impl Command {
    /// Create a new command
    pub fn new(target_device_identity: impl Into<String>, payload: Value) -> Self {
        Self {
            target_device_identity: target_device_identity.into(),
            payload,
        }
    }

    /// Size of the payload once serialized
    pub fn payload_len(&self) -> usize {
        serde_json::to_vec(&self.payload)
            .map(|v| v.len())
            .unwrap_or(usize::MAX)
    }
}
