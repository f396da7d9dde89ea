//! Typed publish/subscribe registry for socket events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use fieldprime_shared::events;
use serde_json::Value;

/// Event tags listeners can subscribe to.
///
/// Lifecycle kinds are raised by the client itself; data kinds mirror the
/// server's events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    /// A connection attempt failed; payload `{"error": message}`.
    ConnectionError,
    /// An established connection broke; payload `{"error": message}`.
    SocketError,
    InitialData,
    IotDataUpdate,
    PredictionUpdate,
    AnalysisResult,
    SpectralUpdate,
    /// Server-side analysis failure (`analysis_error` on the wire).
    AnalysisError,
    Custom(String),
}

impl EventKind {
    /// Map a server event name onto its tag.
    pub fn from_server(name: &str) -> Self {
        match name {
            events::INITIAL_DATA => EventKind::InitialData,
            events::IOT_DATA_UPDATE => EventKind::IotDataUpdate,
            events::PREDICTION_UPDATE => EventKind::PredictionUpdate,
            events::ANALYSIS_RESULT => EventKind::AnalysisResult,
            events::SPECTRAL_UPDATE => EventKind::SpectralUpdate,
            events::ANALYSIS_ERROR => EventKind::AnalysisError,
            other => EventKind::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::ConnectionError => "connection_error",
            EventKind::SocketError => "socket_error",
            EventKind::InitialData => events::INITIAL_DATA,
            EventKind::IotDataUpdate => events::IOT_DATA_UPDATE,
            EventKind::PredictionUpdate => events::PREDICTION_UPDATE,
            EventKind::AnalysisResult => events::ANALYSIS_RESULT,
            EventKind::SpectralUpdate => events::SPECTRAL_UPDATE,
            EventKind::AnalysisError => "error",
            EventKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`]; the only way to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

struct Entry {
    id: u64,
    gate: Arc<Gate>,
    callback: Listener,
}

/// Open/closed switch of one subscription.
///
/// Closing waits for the callback to return on every other thread that is
/// running it. A callback that removes its own subscription does not wait
/// on itself.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    running: Vec<ThreadId>,
}

impl Gate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke `callback` unless closed. Returns whether it ran.
    fn pass(&self, callback: &Listener, payload: &Value) -> bool {
        let thread = thread::current().id();
        {
            let mut state = self.state();
            if state.closed {
                return false;
            }
            state.running.push(thread);
        }
        let _running = Running { gate: self, thread };
        callback(payload);
        true
    }

    fn close(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        state.closed = true;
        while state.running.iter().any(|thread| *thread != me) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Marks a callback finished, even if it panicked.
struct Running<'a> {
    gate: &'a Gate,
    thread: ThreadId,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state();
        if let Some(pos) = state.running.iter().position(|t| *t == self.thread) {
            state.running.swap_remove(pos);
        }
        drop(state);
        self.gate.idle.notify_all();
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<Entry>>,
}

/// Event fan-out shared by the socket client and every acquisition.
///
/// Callbacks run outside the registry lock, so they may subscribe or
/// unsubscribe re-entrantly. A subscription removed mid fan-out is skipped,
/// and once [`unsubscribe`](Self::unsubscribe) returns its callback is
/// never invoked again.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.entry(kind.clone()).or_default().push(Entry {
            id,
            gate: Arc::new(Gate::default()),
            callback: Arc::new(callback),
        });
        Subscription { kind, id }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    ///
    /// Blocks while another thread is inside the callback, so the callback
    /// must not wait on the thread calling this.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let entry = {
            let mut registry = self.registry();
            let Some(entries) = registry.listeners.get_mut(&subscription.kind) else {
                return false;
            };
            let Some(pos) = entries.iter().position(|e| e.id == subscription.id) else {
                return false;
            };
            let entry = entries.remove(pos);
            if entries.is_empty() {
                registry.listeners.remove(&subscription.kind);
            }
            entry
        };
        entry.gate.close();
        true
    }

    /// Deliver `payload` to every listener of `kind`, in registration order.
    /// Returns how many listeners were invoked.
    pub fn emit(&self, kind: &EventKind, payload: &Value) -> usize {
        let snapshot: Vec<(Arc<Gate>, Listener)> = match self.registry().listeners.get(kind) {
            Some(entries) => entries
                .iter()
                .map(|e| (e.gate.clone(), e.callback.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (gate, callback) in &snapshot {
            if gate.pass(callback, payload) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.registry().listeners.get(kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry();
        let counts: HashMap<&str, usize> = registry
            .listeners
            .iter()
            .map(|(kind, entries)| (kind.name(), entries.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
