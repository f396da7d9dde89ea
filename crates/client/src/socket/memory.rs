//! In-process connector.
//!
//! Every `open` hands the server side of a channel pair to a
//! [`MemoryAcceptor`], which plays the Socket.IO server. Used by the test
//! suites and handy for driving the dashboard without a backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fieldprime_shared::{Frame, Handshake, Packet};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use serde_json::Value;

use super::connector::{Connector, FrameChannel, SocketError};

struct MemoryState {
    opens: usize,
    refusing: bool,
    accept_tx: UnboundedSender<ServerEnd>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryAcceptor) {
        let (accept_tx, accept_rx) = unbounded();
        let connector = Self {
            state: Arc::new(Mutex::new(MemoryState {
                opens: 0,
                refusing: false,
                accept_tx,
            })),
        };
        (connector, MemoryAcceptor { accept_rx })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent opens fail as if the server were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.state().refusing = refusing;
    }

    /// Number of connection attempts so far.
    pub fn opens(&self) -> usize {
        self.state().opens
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<FrameChannel, SocketError> {
        let mut state = self.state();
        state.opens += 1;
        if state.refusing {
            return Err(SocketError::Connect("connection refused".to_string()));
        }

        let (outgoing, from_client) = unbounded();
        let (to_client, incoming) = unbounded();
        state
            .accept_tx
            .unbounded_send(ServerEnd {
                url: url.to_string(),
                from_client,
                to_client,
            })
            .map_err(|_| SocketError::Connect("no acceptor listening".to_string()))?;

        Ok(FrameChannel { outgoing, incoming })
    }
}

/// Receives the server side of each accepted connection.
pub struct MemoryAcceptor {
    accept_rx: UnboundedReceiver<ServerEnd>,
}

impl MemoryAcceptor {
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accept_rx.next().await
    }
}

/// Server side of one in-memory connection.
pub struct ServerEnd {
    pub url: String,
    from_client: UnboundedReceiver<String>,
    to_client: UnboundedSender<Result<String, SocketError>>,
}

impl ServerEnd {
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.unbounded_send(Ok(frame.encode())).is_ok()
    }

    pub fn emit(&self, event: &str, data: Value) -> bool {
        self.send(Frame::event(event, Some(data)))
    }

    /// Deliver a read error, ending the connection from the client's view.
    pub fn fail(&self, error: SocketError) {
        let _ = self.to_client.unbounded_send(Err(error));
        self.to_client.close_channel();
    }

    /// Next frame written by the client.
    pub async fn recv(&mut self) -> Option<Frame> {
        while let Some(text) = self.from_client.next().await {
            if let Ok(frame) = Frame::decode(&text) {
                return Some(frame);
            }
        }
        None
    }

    /// Run the Engine.IO open and Socket.IO connect exchange.
    pub async fn handshake(&mut self, sid: &str) -> bool {
        self.send(Frame::Open(Handshake {
            sid: format!("eio-{sid}"),
            upgrades: Vec::new(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: Some(1_000_000),
        }));
        if self.recv().await != Some(Frame::Message(Packet::Connect { sid: None })) {
            return false;
        }
        self.send(Frame::Message(Packet::Connect {
            sid: Some(sid.to_string()),
        }))
    }
}
