//! iotlink Crypto - Device handshake credentials
//!
//! This crate provides:
//! - HMAC-SHA256 with constant-time comparison
//! - Signed, expiring device tokens presented at WebSocket handshake

mod hmac_auth;
mod token;

pub use hmac_auth::*;
pub use token::*;
