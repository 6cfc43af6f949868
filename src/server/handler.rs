//! WebSocket connection handler
//!
//! Owns one upgraded connection: sends the welcome message, answers every
//! inbound data frame with exactly one response, and closes on shutdown.

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use super::protocol::{parse_frame, FrameError, ServerMessage};
use super::websocket::{wait_for_stop, ServerState};

/// Build the response for a single inbound payload
pub fn respond(payload: &[u8]) -> ServerMessage {
    match parse_frame(payload) {
        Ok(packet_id) => {
            debug!("Acknowledging packet {}", packet_id);
            ServerMessage::ack(packet_id)
        }
        Err(err) => {
            match &err {
                FrameError::InvalidJson(source) => warn!("Invalid JSON from client: {}", source),
                _ => warn!("Rejected frame: {}", err),
            }
            err.into()
        }
    }
}

async fn send_message<W>(sender: &mut W, message: &ServerMessage) -> anyhow::Result<()>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = message.to_json()?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

/// Handles a single WebSocket connection
pub struct ConnectionHandler<S> {
    ws: WebSocketStream<S>,
    state_rx: watch::Receiver<ServerState>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection handler
    pub fn new(ws: WebSocketStream<S>, state_rx: watch::Receiver<ServerState>) -> Self {
        Self { ws, state_rx }
    }

    /// Serve the connection until the client leaves, the transport fails or
    /// the server stops
    ///
    /// Frames are handled one at a time, so responses leave in the order
    /// their requests arrived.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self { ws, mut state_rx } = self;
        let (mut ws_sender, mut ws_receiver) = ws.split();

        send_message(&mut ws_sender, &ServerMessage::welcome()).await?;
        info!("New client connected");

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Received message: {}", text);
                            let response = respond(text.as_bytes());
                            send_message(&mut ws_sender, &response).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Received binary message ({} bytes)", data.len());
                            let response = respond(&data);
                            send_message(&mut ws_sender, &response).await?;
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            // Pongs are queued by tungstenite itself
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Client disconnected");
                            // Flush the close reply queued by tungstenite
                            let _ = ws_sender.close().await;
                            break;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            break;
                        }
                        None => {
                            info!("Connection closed by client");
                            break;
                        }
                    }
                }
                _ = wait_for_stop(&mut state_rx) => {
                    info!("Server stopping, closing connection");
                    let close = CloseFrame {
                        code: CloseCode::Away,
                        reason: "Server shutting down".into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(close))).await;
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::protocol::PacketId;

    #[test]
    fn test_respond_scenarios() {
        let cases: [(&[u8], &str); 5] = [
            (br#"{"packet_id": 42}"#, r#"{"status":1,"packet_id":42}"#),
            (
                br#"{"packet_id": "abc-123", "extra": true}"#,
                r#"{"status":1,"packet_id":"abc-123"}"#,
            ),
            (b"{}", r#"{"status":0,"error":"packet_id is required"}"#),
            (
                b"not valid json",
                r#"{"status":0,"error":"Invalid JSON format"}"#,
            ),
            (
                br#"{"packet_id": null}"#,
                r#"{"status":0,"error":"packet_id is required"}"#,
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(respond(input).to_json().unwrap(), expected);
        }
    }

    #[test]
    fn test_respond_rejects_boolean_packet_id() {
        assert_eq!(
            respond(br#"{"packet_id": false}"#),
            ServerMessage::error("packet_id must be a number or string")
        );
    }

    #[test]
    fn test_respond_echoes_exact_value() {
        assert_eq!(
            respond(br#"{"packet_id": "0042"}"#),
            ServerMessage::ack(PacketId::from("0042"))
        );
    }
}
