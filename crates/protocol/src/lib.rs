//! iotlink Protocol - Command and control-channel message definitions
//!
//! This crate defines the data structures exchanged over the device channel:
//! - `Command`: an operator- or rule-initiated instruction for one device
//! - `ServerMessage`: frames the server pushes to a device
//! - `DeviceMessage`: frames a device pushes to the server
//!
//! All structures are JSON-encoded text frames.

mod command;
mod message;
mod validation;

pub use command::*;
pub use message::*;
pub use validation::*;
