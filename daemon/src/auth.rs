//! Device handshake authentication

use crate::config::{SecurityConfig, ServerConfig};
use crate::connection_registry::ConnectionStatus;
use anyhow::Context;
use iotlink_crypto::{DeviceTokenSigner, HmacAuthenticator, TokenError};
use iotlink_protocol::{ValidationError, validate_identity};
use iotlink_transport::{HandshakeRejection, HandshakeRequest};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("Unknown upgrade path {0}")]
    WrongPath(String),

    #[error("No device token presented")]
    MissingCredentials,

    #[error("Invalid device token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Invalid device identity: {0}")]
    InvalidIdentity(#[from] ValidationError),
}

impl From<AuthError> for HandshakeRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::WrongPath(_) => HandshakeRejection::not_found(),
            other => HandshakeRejection::unauthorized(other.to_string()),
        }
    }
}

/// Decides who a connecting device is
///
/// A valid token yields an `Authenticated` session. Without a token, and only
/// when tokens are not required, the `device` query parameter is trusted and
/// the session is merely `Connected`.
pub struct DeviceAuthenticator {
    signer: Option<DeviceTokenSigner>,
    require_token: bool,
    path: String,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl DeviceAuthenticator {
    pub fn new(signer: Option<DeviceTokenSigner>, require_token: bool, path: impl Into<String>) -> Self {
        Self {
            signer,
            require_token,
            path: path.into(),
        }
    }

    pub fn from_config(server: &ServerConfig, security: &SecurityConfig) -> anyhow::Result<Self> {
        let signer = match &security.device_token_secret {
            Some(secret) => Some(DeviceTokenSigner::new(
                HmacAuthenticator::from_hex(secret).context("security.device_token_secret")?,
            )),
            None => None,
        };

        Ok(Self::new(signer, security.require_device_token, server.path.clone()))
    }

    /// Authenticate against the current time
    pub fn authenticate(&self, req: &HandshakeRequest) -> Result<(String, ConnectionStatus), AuthError> {
        self.authenticate_at(req, now_ms())
    }

    pub fn authenticate_at(
        &self,
        req: &HandshakeRequest,
        now_ms: u64,
    ) -> Result<(String, ConnectionStatus), AuthError> {
        if req.path != self.path {
            return Err(AuthError::WrongPath(req.path.clone()));
        }

        match (&req.token, &self.signer) {
            (Some(token), Some(signer)) => {
                let claims = signer.verify(token, now_ms)?;
                validate_identity(&claims.identity)?;
                debug!("Device {} presented a valid token", claims.identity);
                Ok((claims.identity, ConnectionStatus::Authenticated))
            }
            _ if self.require_token => Err(AuthError::MissingCredentials),
            _ => {
                let identity = req.device.clone().ok_or(AuthError::MissingCredentials)?;
                validate_identity(&identity)?;
                debug!("Device {} connected without a token", identity);
                Ok((identity, ConnectionStatus::Connected))
            }
        }
    }
}
