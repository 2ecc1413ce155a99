//! Channel-backed session handle and its writer loop

use crate::{SendError, TransportHandle};
use futures::{Sink, SinkExt};
use iotlink_protocol::ServerMessage;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace};

/// Item queued for a session's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Handle over the outbound queue of one WebSocket session
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    session_id: u64,
    tx: UnboundedSender<Outbound>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer drains
    pub fn new(session_id: u64) -> (Self, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session_id, tx }, rx)
    }

    /// Queue an arbitrary server frame
    pub fn push(&self, message: ServerMessage) -> Result<(), SendError> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| SendError::Closed(self.session_id))
    }
}

impl TransportHandle for ChannelHandle {
    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn send(&self, payload: &Value) -> Result<(), SendError> {
        self.push(ServerMessage::Command {
            payload: payload.clone(),
        })
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Drain `rx` into a WebSocket sink until the queue closes or `Close` arrives
pub async fn forward_outbound<S>(session_id: u64, mut sink: S, mut rx: UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Message(msg) => {
                let text = match msg.to_text() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Frame serialization error on session {}: {}", session_id, e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!("WS send error on session {}: {}", session_id, e);
                    break;
                }
                trace!("Delivered frame to session {}", session_id);
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    // Dropping the receiver marks every handle clone as closed
    rx.close();
    debug!("Session {} writer ended", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_wraps_payload_in_command() {
        let (handle, mut rx) = ChannelHandle::new(7);
        handle.send(&json!({"cmd": "LED", "value": 1})).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Message(ServerMessage::Command {
                payload: json!({"cmd": "LED", "value": 1})
            }))
        );
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (handle, rx) = ChannelHandle::new(7);
        drop(rx);

        assert!(handle.is_closed());
        assert_eq!(handle.send(&json!(1)), Err(SendError::Closed(7)));
    }

    #[tokio::test]
    async fn test_writer_stops_on_close() {
        let (handle, rx) = ChannelHandle::new(3);
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();

        handle.send(&json!({"cmd": "ping"})).unwrap();
        handle.close();
        forward_outbound(3, sink, rx).await;

        let text = match frames.try_next().unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("expected text frame, got {:?}", other),
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["payload"]["cmd"], "ping");

        assert!(matches!(frames.try_next().unwrap(), Some(Message::Close(None))));
        assert!(handle.is_closed());
    }
}
