//! Physical WebSocket connections.
//!
//! The socket client never touches a WebSocket directly; it asks a
//! [`Connector`] for a pair of text-frame channels. The native implementation
//! pumps those channels from a tokio-tungstenite stream.

use async_trait::async_trait;
use fieldprime_shared::ProtocolError;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server refused the connection: {0}")]
    Refused(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Text-frame channels of one open connection.
pub struct FrameChannel {
    /// Frames to write to the server. Dropping it closes the connection.
    pub outgoing: UnboundedSender<String>,
    /// Frames read from the server. Ends when the connection closes; a read
    /// failure is delivered as a final `Err`.
    pub incoming: UnboundedReceiver<Result<String, SocketError>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<FrameChannel, SocketError>;
}

/// Native connector using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<FrameChannel, SocketError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        crate::log_debug!("WebSocket opened to {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = unbounded::<String>();
        let (incoming_tx, incoming) = unbounded::<Result<String, SocketError>>();

        // Read task
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.unbounded_send(Ok(text.as_str().to_owned())).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        crate::log_debug!("WebSocket received close frame");
                        break;
                    }
                    Ok(Message::Binary(_)) => {
                        crate::log_warn!("Ignoring binary frame");
                    }
                    Ok(_) => {
                        // Ping/pong frames are answered by tungstenite
                    }
                    Err(e) => {
                        let _ = incoming_tx.unbounded_send(Err(SocketError::Transport(e.to_string())));
                        break;
                    }
                }
            }
        });

        // Write task
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.next().await {
                if let Err(e) = write.send(Message::text(text)).await {
                    crate::log_error!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        Ok(FrameChannel { outgoing, incoming })
    }
}
