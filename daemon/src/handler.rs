//! Device WebSocket sessions
//!
//! Each accepted TCP connection is upgraded with the handshake authorizer,
//! registered with the router, and then split: a writer task drains the
//! session's outbound queue while this task reads device frames.

use crate::auth::DeviceAuthenticator;
use crate::metrics::METRICS;
use crate::router::CommandRouter;
use anyhow::Result;
use futures::StreamExt;
use iotlink_protocol::{DeviceMessage, ServerMessage};
use iotlink_transport::{
    ChannelHandle, HandshakeRejection, HandshakeRequest, TransportHandle, WssServer,
    WssServerError, forward_outbound, upgrade,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// Accept device sessions until the listener fails
pub async fn run_device_server(
    server: WssServer,
    max_connections: usize,
    authenticator: Arc<DeviceAuthenticator>,
    router: Arc<CommandRouter>,
) -> Result<()> {
    let permits = Arc::new(Semaphore::new(max_connections));
    let handshake_timeout = server.handshake_timeout();

    loop {
        let (stream, addr) = match server.accept().await {
            Ok(r) => r,
            Err(e) => {
                error!("Device accept error: {}", e);
                continue;
            }
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!("Connection limit {} reached; refusing {}", max_connections, addr);
            continue;
        };

        debug!("New device connection from {}", addr);

        let authenticator = authenticator.clone();
        let router = router.clone();
        tokio::spawn(async move {
            handle_session(stream, addr, handshake_timeout, authenticator, router).await;
            drop(permit);
        });
    }
}

async fn handle_session(
    stream: TcpStream,
    addr: SocketAddr,
    handshake_timeout: Duration,
    authenticator: Arc<DeviceAuthenticator>,
    router: Arc<CommandRouter>,
) {
    let authorize = move |req: &HandshakeRequest| {
        authenticator
            .authenticate(req)
            .map_err(HandshakeRejection::from)
    };

    let (ws, (identity, status)) = match upgrade(stream, handshake_timeout, authorize).await {
        Ok(r) => r,
        Err(WssServerError::Rejected(reason)) => {
            METRICS.handshake_rejections.inc();
            debug!("Handshake from {} rejected: {}", addr, reason);
            return;
        }
        Err(e) => {
            debug!("Upgrade error from {}: {}", addr, e);
            return;
        }
    };

    let session_id = fastrand::u64(..);
    let (handle, rx) = ChannelHandle::new(session_id);

    // Welcome is queued ahead of anything the router may send
    if handle.push(ServerMessage::Welcome { session_id }).is_err() {
        return;
    }
    router.on_device_connect(&identity, Arc::new(handle.clone()), status);

    let (ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(forward_outbound(session_id, ws_tx, rx));

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match DeviceMessage::from_text(&text) {
                Ok(DeviceMessage::Event { payload }) => {
                    if !router.registry().is_current(&identity, session_id) {
                        debug!("Session {} for {} was superseded; closing", session_id, identity);
                        break;
                    }
                    router.on_device_message(&identity, payload)
                }
                Ok(DeviceMessage::Ping) => trace!("Ping from {} (session {})", identity, session_id),
                Err(e) => debug!("Ignoring invalid frame from {}: {}", identity, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WS read error on session {}: {}", session_id, e);
                break;
            }
        }
    }

    router.on_session_closed(&identity, session_id);
    handle.close();
    let _ = writer.await;

    info!("Session {} for {} ({}) ended", session_id, identity, addr);
}
