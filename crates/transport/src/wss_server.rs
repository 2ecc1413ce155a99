//! WebSocket server for device connections

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::info;

#[derive(Error, Debug)]
pub enum WssServerError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    #[error("Upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

/// WebSocket server configuration
#[derive(Debug, Clone)]
pub struct WssServerConfig {
    /// Bind address
    pub bind: SocketAddr,

    /// Path devices connect on
    pub path: String,

    /// Time a connection may take to send its upgrade request
    pub handshake_timeout: Duration,
}

impl Default for WssServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8443)),
            path: "/device".to_string(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// The parts of the upgrade request an authorizer needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeRequest {
    pub path: String,

    /// Bearer token from `Authorization`, or the `token` query parameter
    pub token: Option<String>,

    /// Self-declared identity from the `device` query parameter
    pub device: Option<String>,
}

impl HandshakeRequest {
    fn from_request(req: &Request) -> Self {
        let mut parsed = Self {
            path: req.uri().path().to_string(),
            ..Default::default()
        };

        if let Some(query) = req.uri().query() {
            for pair in query.split('&') {
                match pair.split_once('=') {
                    Some(("token", v)) if !v.is_empty() => parsed.token = Some(v.to_string()),
                    Some(("device", v)) if !v.is_empty() => parsed.device = Some(v.to_string()),
                    _ => {}
                }
            }
        }

        let bearer = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(|s| s.trim().to_string());
        if bearer.is_some() {
            parsed.token = bearer;
        }

        parsed
    }
}

/// Why an authorizer refused a handshake
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRejection {
    pub status: StatusCode,
    pub reason: String,
}

impl HandshakeRejection {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            reason: reason.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            reason: "Not Found".to_string(),
        }
    }
}

/// WebSocket listener; authorization happens inside the upgrade
pub struct WssServer {
    listener: TcpListener,
    config: WssServerConfig,
}

impl WssServer {
    /// Create a new WebSocket server
    pub async fn bind(config: WssServerConfig) -> Result<Self, WssServerError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|e| WssServerError::BindFailed(e.to_string()))?;

        info!("Device WebSocket server listening on {}{}", config.bind, config.path);

        Ok(Self { listener, config })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Path devices connect on
    pub fn path(&self) -> &str {
        &self.config.path
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.config.handshake_timeout
    }

    /// Accept next connection (raw TCP - upgrade happens in `upgrade`)
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), WssServerError> {
        self.listener
            .accept()
            .await
            .map_err(|e| WssServerError::AcceptFailed(e.to_string()))
    }
}

/// Perform the WebSocket upgrade, letting `authorize` accept or refuse it
///
/// A refusal is answered with the rejection's HTTP status before any frame is
/// exchanged. A peer that has not finished the handshake within `deadline` is
/// dropped.
pub async fn upgrade<T, F>(
    stream: TcpStream,
    deadline: Duration,
    authorize: F,
) -> Result<(WebSocketStream<TcpStream>, T), WssServerError>
where
    F: FnOnce(&HandshakeRequest) -> Result<T, HandshakeRejection> + Unpin,
{
    let mut outcome: Option<Result<T, HandshakeRejection>> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let parsed = HandshakeRequest::from_request(req);
        match authorize(&parsed) {
            Ok(t) => {
                outcome = Some(Ok(t));
                Ok(resp)
            }
            Err(rejection) => {
                let mut err = ErrorResponse::new(Some(rejection.reason.clone()));
                *err.status_mut() = rejection.status;
                outcome = Some(Err(rejection));
                Err(err)
            }
        }
    };

    let handshake = tokio_tungstenite::accept_hdr_async(stream, callback);
    let upgraded = tokio::time::timeout(deadline, handshake)
        .await
        .map_err(|_| WssServerError::HandshakeTimeout(deadline))?;

    match (upgraded, outcome) {
        (Ok(ws), Some(Ok(t))) => Ok((ws, t)),
        (_, Some(Err(rejection))) => Err(WssServerError::Rejected(rejection.reason)),
        (Err(e), _) => Err(WssServerError::UpgradeFailed(e.to_string())),
        (Ok(_), None) => Err(WssServerError::UpgradeFailed(
            "handshake completed without authorization".to_string(),
        )),
    }
}
