//! Identity and command validation utilities

use crate::command::Command;
use thiserror::Error;

/// Validation errors
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Identity is empty")]
    EmptyIdentity,

    #[error("Identity too long: {len} bytes (max: {max})")]
    IdentityTooLong { len: usize, max: usize },

    #[error("Identity contains invalid character {0:?}")]
    InvalidIdentityChar(char),

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Maximum allowed identity length in bytes
pub const MAX_IDENTITY_LEN: usize = 128;

/// Maximum allowed serialized payload size (64KB)
pub const MAX_PAYLOAD_SIZE: usize = 65536;

/// Validate a device or user identity
///
/// Identities end up inside counter-store keys, so whitespace and control
/// characters are rejected.
pub fn validate_identity(identity: &str) -> Result<(), ValidationError> {
    if identity.is_empty() {
        return Err(ValidationError::EmptyIdentity);
    }

    if identity.len() > MAX_IDENTITY_LEN {
        return Err(ValidationError::IdentityTooLong {
            len: identity.len(),
            max: MAX_IDENTITY_LEN,
        });
    }

    if let Some(c) = identity.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidIdentityChar(c));
    }

    Ok(())
}

/// Validate a command before routing
pub fn validate_command(command: &Command) -> Result<(), ValidationError> {
    validate_identity(&command.target_device_identity)?;

    let size = command.payload_len();
    if size > MAX_PAYLOAD_SIZE {
        return Err(ValidationError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_identity() {
        assert!(validate_identity("dev-1").is_ok());
        assert!(validate_identity("user@example.com").is_ok());
    }

    #[test]
    fn test_empty_identity() {
        assert_eq!(validate_identity(""), Err(ValidationError::EmptyIdentity));
    }

    #[test]
    fn test_identity_with_whitespace() {
        assert_eq!(
            validate_identity("dev 1"),
            Err(ValidationError::InvalidIdentityChar(' '))
        );
    }

    #[test]
    fn test_identity_too_long() {
        let long = "d".repeat(MAX_IDENTITY_LEN + 1);
        assert!(matches!(
            validate_identity(&long),
            Err(ValidationError::IdentityTooLong { .. })
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let blob = "x".repeat(MAX_PAYLOAD_SIZE + 1);
        let cmd = Command::new("dev-1", json!({ "blob": blob }));

        assert!(matches!(
            validate_command(&cmd),
            Err(ValidationError::PayloadTooLarge { .. })
        ));
    }
}
