//! HMAC-SHA256 authentication

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum HmacError {
    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("HMAC verification failed")]
    VerificationFailed,
}

/// HMAC-SHA256 authenticator
#[derive(Clone)]
pub struct HmacAuthenticator {
    secret: [u8; 32],
}

impl HmacAuthenticator {
    /// Create a new authenticator with the given secret
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Create from a 64-character hex secret
    pub fn from_hex(secret: &str) -> Result<Self, HmacError> {
        let bytes =
            hex::decode(secret.trim()).map_err(|e| HmacError::InvalidSecret(e.to_string()))?;
        let secret: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            HmacError::InvalidSecret(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self::new(secret))
    }

    /// Compute HMAC for the given data
    pub fn compute(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Verify HMAC in constant time
    pub fn verify(&self, data: &[u8], expected: &[u8; 32]) -> Result<(), HmacError> {
        let computed = self.compute(data);
        if constant_time_compare(&computed, expected) {
            Ok(())
        } else {
            Err(HmacError::VerificationFailed)
        }
    }
}

/// Constant-time comparison to prevent timing attacks
#[inline]
fn constant_time_compare(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut result = 0u8;
    for i in 0..32 {
        result |= a[i] ^ b[i];
    }
    result == 0
}
