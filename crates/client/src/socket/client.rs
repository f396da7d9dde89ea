//! The shared socket client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fieldprime_shared::{events, Frame, Packet, ProtocolError};
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::bus::{EventBus, EventKind, Subscription};
use super::connection::{ConnectionHandle, ConnectionState, Emit, ReconnectConfig};
use super::connector::{Connector, FrameChannel, SocketError, TungsteniteConnector};
use crate::config::ClientConfig;

struct Shared {
    url: String,
    reconnect: ReconnectConfig,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    handle: Mutex<Option<ConnectionHandle>>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
}

impl Shared {
    fn handle(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle()
            .as_ref()
            .is_some_and(|h| h.generation == generation)
    }

    /// Update the state on behalf of a connection task. Tasks that were
    /// replaced or torn down are ignored.
    fn set_state(&self, generation: u64, state: ConnectionState) {
        let handle = self.handle();
        if handle.as_ref().is_some_and(|h| h.generation == generation) {
            *self.state() = state;
        }
    }

    /// Final state of a connection task that gave up on its own.
    fn retire(&self, generation: u64, state: ConnectionState) {
        let mut handle = self.handle();
        if handle.as_ref().is_some_and(|h| h.generation == generation) {
            *handle = None;
            *self.state() = state;
        }
    }

    fn emit(&self, generation: u64, kind: &EventKind, payload: &Value) {
        if self.is_current(generation) {
            self.bus.emit(kind, payload);
        }
    }
}

/// Single shared persistent connection to the analytics backend.
///
/// Cheap to clone; clones share the connection, its state and the event
/// bus. Construct one per application and hand it to whoever needs it.
#[derive(Clone)]
pub struct SocketClient {
    shared: Arc<Shared>,
}

impl SocketClient {
    /// Client for `url` (a `ws://.../socket.io/` endpoint) using tungstenite.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connector(url, Arc::new(TungsteniteConnector), ReconnectConfig::default())
    }

    pub fn with_connector(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                reconnect,
                connector,
                bus: EventBus::new(),
                handle: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::with_connector(
            config.socket_endpoint()?,
            Arc::new(TungsteniteConnector),
            config.reconnect.clone(),
        ))
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Start the connection task unless one is already running.
    ///
    /// Must be called from within a tokio runtime. Failures are reported on
    /// the bus as [`EventKind::ConnectionError`], never to the caller.
    pub fn connect(&self) {
        let mut handle = self.shared.handle();
        if handle.is_some() {
            crate::log_debug!("Socket already exists, skipping connect");
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, emits) = unbounded();
        let (shutdown, shutdown_rx) = oneshot::channel();
        *handle = Some(ConnectionHandle {
            generation,
            sender,
            shutdown,
        });
        drop(handle);

        crate::log_info!("Connecting to socket server at {}", self.shared.url);
        tokio::spawn(run_connection(
            self.shared.clone(),
            generation,
            emits,
            shutdown_rx,
        ));
    }

    /// Tear down the active connection. No-op when there is none.
    pub fn disconnect(&self) {
        let handle = self.shared.handle().take();
        let Some(handle) = handle else {
            return;
        };
        let _ = handle.shutdown.send(());

        let previous = std::mem::replace(&mut *self.shared.state(), ConnectionState::Disconnected);
        crate::log_info!("Socket disconnected");
        if previous.is_connected() {
            self.shared.bus.emit(&EventKind::Disconnect, &json!({}));
        }
    }

    /// Last observed connection status. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state().clone()
    }

    /// Fire-and-forget emission.
    ///
    /// Queued until the handshake completes; dropped when no connection has
    /// been started.
    pub fn request_data(&self, event: &str, payload: Option<Value>) {
        let handle = self.shared.handle();
        let Some(handle) = handle.as_ref() else {
            crate::log_debug!("No active socket, dropping {}", event);
            return;
        };
        if let Err(e) = handle.emit(event, payload) {
            crate::log_warn!("{}", e);
        }
    }

    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.bus.subscribe(kind, callback)
    }

    pub fn remove_listener(&self, subscription: &Subscription) -> bool {
        self.shared.bus.unsubscribe(subscription)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

enum SessionEnd {
    /// `disconnect()` was called.
    Shutdown,
    /// The server sent a Socket.IO disconnect; no reconnect.
    ServerDisconnect,
    Lost {
        established: bool,
        error: SocketError,
    },
}

/// Connection management loop: open, run the session, reconnect with a
/// fixed delay until the attempt ceiling is reached.
async fn run_connection(
    shared: Arc<Shared>,
    generation: u64,
    mut emits: UnboundedReceiver<Emit>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt = 0u32;

    loop {
        if attempt == 0 {
            shared.set_state(generation, ConnectionState::Connecting);
        } else {
            shared.set_state(generation, ConnectionState::Reconnecting { attempt });
        }

        let opened = tokio::select! {
            _ = &mut shutdown => return,
            opened = shared.connector.open(&shared.url) => opened,
        };

        let failure = match opened {
            Ok(channel) => {
                match run_session(&shared, generation, channel, &mut emits, &mut shutdown).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::ServerDisconnect => {
                        crate::log_info!("Server closed the socket session");
                        shared.retire(generation, ConnectionState::Disconnected);
                        shared.bus.emit(&EventKind::Disconnect, &json!({}));
                        return;
                    }
                    SessionEnd::Lost {
                        established: true,
                        error,
                    } => {
                        crate::log_warn!("Socket connection lost: {}", error);
                        shared.set_state(generation, ConnectionState::Disconnected);
                        shared.emit(generation, &EventKind::Disconnect, &json!({}));
                        if matches!(error, SocketError::Transport(_)) {
                            shared.emit(
                                generation,
                                &EventKind::SocketError,
                                &json!({ "error": error.to_string() }),
                            );
                        }
                        // A working session restarts the attempt budget.
                        attempt = 0;
                        None
                    }
                    SessionEnd::Lost {
                        established: false,
                        error,
                    } => Some(error),
                }
            }
            Err(error) => Some(error),
        };

        if let Some(error) = failure {
            crate::log_error!("Socket connection error: {}", error);
            shared.emit(
                generation,
                &EventKind::ConnectionError,
                &json!({ "error": error.to_string() }),
            );

            if attempt >= shared.reconnect.max_attempts {
                let reason = format!(
                    "Max reconnect attempts ({}) exceeded",
                    shared.reconnect.max_attempts
                );
                crate::log_error!("{}", reason);
                shared.retire(generation, ConnectionState::Failed { reason });
                return;
            }
        }

        crate::log_info!(
            "Reconnecting in {}ms (attempt {})",
            shared.reconnect.delay.as_millis(),
            attempt + 1
        );
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(shared.reconnect.delay) => {}
        }
        attempt += 1;
    }
}

/// Drive one open connection until it ends.
async fn run_session(
    shared: &Shared,
    generation: u64,
    channel: FrameChannel,
    emits: &mut UnboundedReceiver<Emit>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let FrameChannel {
        outgoing,
        mut incoming,
    } = channel;
    let mut engine_sid: Option<String> = None;
    let mut established = false;
    // Armed by the handshake: the server must ping within interval + timeout.
    let mut heartbeat: Option<Duration> = None;
    let silence = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(silence);

    let lost = |established: bool, reason: &str| SessionEnd::Lost {
        established,
        error: SocketError::Transport(reason.to_string()),
    };

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = outgoing.unbounded_send(Frame::Message(Packet::Disconnect).encode());
                return SessionEnd::Shutdown;
            }
            _ = &mut silence, if heartbeat.is_some() => {
                crate::log_warn!("No ping from the server within {:?}", heartbeat);
                return lost(established, "ping timeout");
            }
            frame = incoming.next() => {
                let text = match frame {
                    Some(Ok(text)) => text,
                    Some(Err(error)) => return SessionEnd::Lost { established, error },
                    None => return lost(established, "connection closed"),
                };

                let reply = match Frame::decode(&text) {
                    Ok(Frame::Open(handshake)) => {
                        crate::log_debug!(
                            "Engine.IO open: sid={} pingInterval={}ms",
                            handshake.sid,
                            handshake.ping_interval
                        );
                        engine_sid = Some(handshake.sid);
                        let window = Duration::from_millis(
                            handshake.ping_interval.saturating_add(handshake.ping_timeout),
                        );
                        heartbeat = Some(window);
                        silence.as_mut().reset(Instant::now() + window);
                        Some(Frame::Message(Packet::Connect { sid: None }))
                    }
                    Ok(Frame::Ping(payload)) => {
                        if let Some(window) = heartbeat {
                            silence.as_mut().reset(Instant::now() + window);
                        }
                        Some(Frame::Pong(payload))
                    }
                    Ok(Frame::Close) => return lost(established, "server closed the transport"),
                    Ok(Frame::Message(Packet::Connect { sid })) => {
                        let Some(transport_id) = sid.or_else(|| engine_sid.clone()) else {
                            return SessionEnd::Lost {
                                established,
                                error: SocketError::Protocol(ProtocolError::Malformed(
                                    "connect without a socket id".to_string(),
                                )),
                            };
                        };
                        established = true;
                        crate::log_info!("Socket connected successfully ({})", transport_id);
                        shared.set_state(generation, ConnectionState::Connected { transport_id });
                        shared.emit(generation, &EventKind::Connect, &json!({}));
                        Some(Frame::event(events::REQUEST_INITIAL_DATA, None))
                    }
                    Ok(Frame::Message(Packet::Event { name, data })) => {
                        route_event(shared, generation, &name, data.unwrap_or(Value::Null));
                        None
                    }
                    Ok(Frame::Message(Packet::Disconnect)) => return SessionEnd::ServerDisconnect,
                    Ok(Frame::Message(Packet::ConnectError { message })) => {
                        return SessionEnd::Lost {
                            established,
                            error: SocketError::Refused(message),
                        };
                    }
                    Ok(Frame::Pong(_) | Frame::Upgrade | Frame::Noop) => None,
                    Err(ProtocolError::ForeignNamespace(namespace)) => {
                        crate::log_debug!("Ignoring packet for namespace {}", namespace);
                        None
                    }
                    Err(e) => {
                        crate::log_warn!("Dropping malformed frame {:?}: {}", text, e);
                        None
                    }
                };

                if let Some(reply) = reply {
                    if outgoing.unbounded_send(reply.encode()).is_err() {
                        return lost(established, "connection closed");
                    }
                }
            }
            emit = emits.next(), if established => {
                let Some(Emit { event, payload }) = emit else {
                    return SessionEnd::Shutdown;
                };
                crate::log_debug!("Emitting {}", event);
                if outgoing.unbounded_send(Frame::event(event, payload).encode()).is_err() {
                    return lost(established, "connection closed");
                }
            }
        }
    }
}

/// Fan a server event out on the bus.
///
/// Analysis results double as prediction updates, and carry fresh sensor
/// readings when the server embedded them.
fn route_event(shared: &Shared, generation: u64, name: &str, data: Value) {
    let kind = EventKind::from_server(name);
    crate::log_debug!("Socket event {}", name);
    shared.emit(generation, &kind, &data);

    if kind == EventKind::AnalysisResult {
        shared.emit(generation, &EventKind::PredictionUpdate, &data);
        if let Some(iot_data) = data.get("iot_data") {
            shared.emit(generation, &EventKind::IotDataUpdate, iot_data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::memory::{MemoryAcceptor, MemoryConnector};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn client() -> (SocketClient, MemoryConnector, MemoryAcceptor) {
        let (connector, acceptor) = MemoryConnector::new();
        let client = SocketClient::with_connector(
            "ws://fields.test/socket.io/?EIO=4&transport=websocket",
            Arc::new(connector.clone()),
            ReconnectConfig::default(),
        );
        (client, connector, acceptor)
    }

    fn recorder(client: &SocketClient, kind: EventKind) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.add_listener(kind, move |payload| sink.lock().unwrap().push(payload.clone()));
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (client, connector, mut acceptor) = client();
        client.connect();
        client.connect();
        settle().await;

        assert_eq!(connector.opens(), 1);
        assert!(acceptor.accept().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_sets_transport_id() {
        let (client, _connector, mut acceptor) = client();
        let connects = recorder(&client, EventKind::Connect);

        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        assert!(!client.is_connected());

        assert!(server.handshake("wZX3oN0bSVIhsaknAAAI").await);
        // The client asks for the snapshot as soon as it is connected.
        assert_eq!(
            server.recv().await,
            Some(Frame::event("request_initial_data", None))
        );

        assert!(client.is_connected());
        assert_eq!(client.state().transport_id(), Some("wZX3oN0bSVIhsaknAAAI"));
        assert_eq!(connects.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_data_is_queued_until_connected() {
        let (client, connector, mut acceptor) = client();

        // Without a connection the request goes nowhere.
        client.request_data("request_analysis", None);
        settle().await;
        assert_eq!(connector.opens(), 0);

        client.connect();
        client.request_data("request_analysis", Some(json!({"crop": "maize"})));
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;

        assert_eq!(
            server.recv().await,
            Some(Frame::event("request_initial_data", None))
        );
        assert_eq!(
            server.recv().await,
            Some(Frame::event("request_analysis", Some(json!({"crop": "maize"}))))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_pings() {
        let (client, _connector, mut acceptor) = client();
        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;
        server.recv().await;

        server.send(Frame::Ping(String::new()));
        assert_eq!(server.recv().await, Some(Frame::Pong(String::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_is_dropped() {
        let (client, connector, mut acceptor) = client();
        let disconnects = recorder(&client, EventKind::Disconnect);
        let socket_errors = recorder(&client, EventKind::SocketError);

        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;
        server.recv().await;

        // pingInterval + pingTimeout = 45s
        tokio::time::sleep(Duration::from_secs(44)).await;
        assert!(client.is_connected());
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!client.is_connected());
        assert_eq!(disconnects.lock().unwrap().len(), 1);
        assert!(socket_errors.lock().unwrap()[0]["error"]
            .as_str()
            .unwrap()
            .contains("ping timeout"));

        let mut server = acceptor.accept().await.unwrap();
        assert!(server.handshake("sid-2").await);
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_keep_the_session() {
        let (client, connector, mut acceptor) = client();
        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;
        server.recv().await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            server.send(Frame::Ping(String::new()));
            assert_eq!(server.recv().await, Some(Frame::Pong(String::new())));
        }

        assert!(client.is_connected());
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_result_fan_out() {
        let (client, _connector, mut acceptor) = client();
        let predictions = recorder(&client, EventKind::PredictionUpdate);
        let iot = recorder(&client, EventKind::IotDataUpdate);
        let errors = recorder(&client, EventKind::AnalysisError);

        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;

        let result = json!({
            "success": true,
            "prediction_map": [[0, 1], [1, 2]],
            "iot_data": [{"temperature_c": 24.5, "soil_moisture_pct": 68}]
        });
        server.emit("analysis_result", result.clone());
        server.emit("analysis_error", json!({"message": "model missing"}));
        settle().await;

        assert_eq!(*predictions.lock().unwrap(), vec![result.clone()]);
        assert_eq!(*iot.lock().unwrap(), vec![result["iot_data"].clone()]);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![json!({"message": "model missing"})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_ceiling() {
        let (client, connector, _acceptor) = client();
        connector.set_refusing(true);
        let errors = recorder(&client, EventKind::ConnectionError);

        client.connect();
        tokio::time::sleep(Duration::from_secs(30)).await;

        // One initial attempt plus five reconnects.
        assert_eq!(connector.opens(), 6);
        assert_eq!(errors.lock().unwrap().len(), 6);
        assert!(errors.lock().unwrap()[0]["error"]
            .as_str()
            .unwrap()
            .contains("refused"));
        assert!(matches!(client.state(), ConnectionState::Failed { .. }));

        // A later connect() starts over.
        connector.set_refusing(false);
        client.connect();
        settle().await;
        assert_eq!(connector.opens(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_packet_counts_as_failed_attempt() {
        let (client, connector, mut acceptor) = client();
        let errors = recorder(&client, EventKind::ConnectionError);

        client.connect();
        let server = acceptor.accept().await.unwrap();
        server.send(Frame::Message(Packet::ConnectError {
            message: "Not authorized".to_string(),
        }));
        settle().await;

        assert_eq!(
            errors.lock().unwrap()[0],
            json!({"error": "server refused the connection: Not authorized"})
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect() {
        let (client, _connector, mut acceptor) = client();
        let disconnects = recorder(&client, EventKind::Disconnect);

        client.disconnect();
        assert!(disconnects.lock().unwrap().is_empty());

        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;
        server.recv().await;

        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(disconnects.lock().unwrap().len(), 1);
        assert_eq!(
            server.recv().await,
            Some(Frame::Message(Packet::Disconnect))
        );

        client.disconnect();
        assert_eq!(disconnects.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_reconnects() {
        let (client, connector, mut acceptor) = client();
        let socket_errors = recorder(&client, EventKind::SocketError);

        client.connect();
        let mut server = acceptor.accept().await.unwrap();
        server.handshake("sid-1").await;
        server.fail(SocketError::Transport("reset by peer".to_string()));
        settle().await;

        assert!(!client.is_connected());
        assert_eq!(socket_errors.lock().unwrap().len(), 1);

        let mut server = acceptor.accept().await.unwrap();
        assert!(server.handshake("sid-2").await);
        assert_eq!(client.state().transport_id(), Some("sid-2"));
        assert_eq!(connector.opens(), 2);
    }
}
