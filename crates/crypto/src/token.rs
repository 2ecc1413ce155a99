//! Signed device tokens
//!
//! A token is `base64url("{identity}:{expires_at_ms}:{hex(hmac)}")`, where the
//! MAC covers `"{identity}:{expires_at_ms}"`. Identities may contain `:`, so the
//! token is split from the right.

use crate::hmac_auth::HmacAuthenticator;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired at {0}")]
    Expired(u64),
}

/// Claims carried by a verified device token
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceClaims {
    /// Authenticated device subject
    pub identity: String,

    /// Expiry in milliseconds since Unix epoch
    pub expires_at_ms: u64,
}

/// Issues and verifies device tokens with a shared secret
#[derive(Clone)]
pub struct DeviceTokenSigner {
    hmac: HmacAuthenticator,
}

impl DeviceTokenSigner {
    pub fn new(hmac: HmacAuthenticator) -> Self {
        Self { hmac }
    }

    /// Issue a token for `identity` valid until `expires_at_ms`
    pub fn issue(&self, identity: &str, expires_at_ms: u64) -> String {
        let body = format!("{}:{}", identity, expires_at_ms);
        let mac = self.hmac.compute(body.as_bytes());
        let raw = format!("{}:{}", body, hex::encode(mac));
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Verify a token against the current time
    pub fn verify(&self, token: &str, now_ms: u64) -> Result<DeviceClaims, TokenError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Malformed)?;
        let raw = String::from_utf8(decoded).map_err(|_| TokenError::Malformed)?;

        let mut parts = raw.rsplitn(3, ':');
        let (Some(mac_hex), Some(expiry), Some(identity)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        if identity.is_empty() {
            return Err(TokenError::Malformed);
        }

        let expires_at_ms: u64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        let mac: [u8; 32] = hex::decode(mac_hex)
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or(TokenError::Malformed)?;

        let body = format!("{}:{}", identity, expires_at_ms);
        self.hmac
            .verify(body.as_bytes(), &mac)
            .map_err(|_| TokenError::InvalidSignature)?;

        if now_ms > expires_at_ms {
            return Err(TokenError::Expired(expires_at_ms));
        }

        Ok(DeviceClaims {
            identity: identity.to_string(),
            expires_at_ms,
        })
    }
}
