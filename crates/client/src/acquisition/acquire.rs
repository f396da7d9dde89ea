//! Socket-first acquisitions with a request fallback.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fieldprime_shared::{check_outcome, events, ApiError};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::machine::{AcquisitionMachine, Effect, Input, Phase};
use super::state::{AcquisitionResult, Liveness, Publisher, StateSink};
use crate::api_client::RequestTransport;
use crate::notify::{Notification, Notifier};
use crate::socket::{EventKind, SocketClient, Subscription};
use crate::transports::Transports;
use crate::{log_debug, log_error, log_info, log_warn};

/// What a page asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionKind {
    /// The full dashboard snapshot.
    InitialData,
    /// IoT readings, from live pushes or the snapshot.
    IotData,
    /// The crop health prediction map.
    PredictionMap,
}

impl AcquisitionKind {
    pub fn label(&self) -> &'static str {
        match self {
            AcquisitionKind::InitialData => "initial data",
            AcquisitionKind::IotData => "IoT data",
            AcquisitionKind::PredictionMap => "prediction data",
        }
    }

    /// Socket events that carry this kind's data.
    pub fn data_events(&self) -> Vec<EventKind> {
        match self {
            AcquisitionKind::InitialData => vec![EventKind::InitialData],
            AcquisitionKind::IotData => vec![EventKind::IotDataUpdate, EventKind::InitialData],
            AcquisitionKind::PredictionMap => {
                vec![EventKind::PredictionUpdate, EventKind::AnalysisResult]
            }
        }
    }

    /// Event emitted on mount to ask the server for data.
    pub fn request_event(&self) -> &'static str {
        match self {
            AcquisitionKind::InitialData | AcquisitionKind::IotData => events::REQUEST_INITIAL_DATA,
            AcquisitionKind::PredictionMap => events::REQUEST_ANALYSIS,
        }
    }

    /// Error text when both transports failed.
    pub fn failure_message(&self) -> &'static str {
        match self {
            AcquisitionKind::InitialData => "Failed to fetch data from both socket and API",
            AcquisitionKind::IotData => "Failed to fetch IoT data from both socket and API",
            AcquisitionKind::PredictionMap => {
                "Failed to fetch prediction data from both socket and API"
            }
        }
    }

    pub fn notification(&self) -> Notification {
        match self {
            AcquisitionKind::InitialData => Notification::destructive(
                "Connection Error",
                "Could not connect to the server. Please check your connection.",
            ),
            AcquisitionKind::IotData => Notification::destructive(
                "IoT Data Error",
                "Could not retrieve IoT data. Please try again later.",
            ),
            AcquisitionKind::PredictionMap => Notification::destructive(
                "Analysis Error",
                "Could not retrieve analysis data. Please try again later.",
            ),
        }
    }

    /// Error text for a `success: false` reply that carries no message.
    fn rejection_message(&self) -> &'static str {
        match self {
            AcquisitionKind::InitialData | AcquisitionKind::IotData => "Error loading data",
            AcquisitionKind::PredictionMap => "Error running analysis",
        }
    }

    fn fallback(&self, api: Arc<dyn RequestTransport>) -> BoxFuture<'static, Result<Value, ApiError>> {
        let kind = *self;
        Box::pin(async move {
            let payload = match kind {
                AcquisitionKind::InitialData | AcquisitionKind::IotData => api.load_snapshot().await?,
                AcquisitionKind::PredictionMap => api.run_analysis().await?,
            };
            check_outcome(payload, kind.rejection_message())
        })
    }

    fn failure_for(&self, error: &ApiError) -> String {
        error
            .server_message()
            .unwrap_or_else(|| self.failure_message().to_string())
    }
}

/// Builder for one socket-first acquisition.
pub struct Acquisition {
    kind: AcquisitionKind,
    socket_wait: Option<Duration>,
    sinks: Vec<Arc<dyn StateSink>>,
}

impl Acquisition {
    pub fn new(kind: AcquisitionKind) -> Self {
        Self {
            kind,
            socket_wait: None,
            sinks: Vec::new(),
        }
    }

    /// Override the transports' socket wait.
    pub fn socket_wait(mut self, wait: Duration) -> Self {
        self.socket_wait = Some(wait);
        self
    }

    /// Also publish every state change to `sink`.
    pub fn sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start acquiring. Must be called from within a tokio runtime.
    ///
    /// Registers the listeners, connects the socket and emits the request
    /// event before returning; the race against the fallback timer runs on
    /// a spawned task.
    pub fn mount(self, transports: &Transports) -> AcquisitionHandle {
        let kind = self.kind;
        let wait = self.socket_wait.unwrap_or(transports.socket_wait);
        let (publisher, state, alive) = Publisher::new(AcquisitionResult::loading(), self.sinks);

        let mut machine = AcquisitionMachine::new();
        machine.apply(Input::Mount);
        publisher.publish(machine.result());

        let socket = transports.socket.clone();
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::new();
        for event in kind.data_events() {
            let tx = inputs_tx.clone();
            subscriptions.push(socket.add_listener(event, move |payload| {
                let _ = tx.send(Input::SocketData(payload.clone()));
            }));
        }
        for event in [EventKind::ConnectionError, EventKind::SocketError] {
            let tx = inputs_tx.clone();
            subscriptions.push(socket.add_listener(event, move |payload| {
                let message = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Socket connection error")
                    .to_string();
                let _ = tx.send(Input::ConnectionError(message));
            }));
        }
        drop(inputs_tx);

        socket.connect();
        socket.request_data(kind.request_event(), None);
        log_debug!("Mounted {} acquisition, waiting {:?} for socket data", kind.label(), wait);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            kind,
            machine,
            publisher,
            inputs,
            listeners: ListenerGuard {
                socket,
                subscriptions,
            },
            api: transports.api.clone(),
            notifier: transports.notifier.clone(),
        };
        tokio::spawn(driver.run(Instant::now() + wait, shutdown_rx));

        AcquisitionHandle {
            kind,
            state,
            alive,
            shutdown: Mutex::new(Some(shutdown_tx)),
        }
    }
}

/// A mounted acquisition. Dropping it unmounts.
pub struct AcquisitionHandle {
    kind: AcquisitionKind,
    state: watch::Receiver<AcquisitionResult>,
    alive: Liveness,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl AcquisitionHandle {
    pub fn kind(&self) -> AcquisitionKind {
        self.kind
    }

    pub fn current(&self) -> AcquisitionResult {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionResult> {
        self.state.clone()
    }

    /// Wait until loading finishes, or the acquisition is torn down.
    pub async fn settled(&self) -> AcquisitionResult {
        let mut rx = self.state.clone();
        if let Ok(result) = rx.wait_for(|r| !r.is_loading).await {
            return result.clone();
        }
        let result = rx.borrow().clone();
        result
    }

    pub fn is_mounted(&self) -> bool {
        self.alive.is_alive()
    }

    /// Stop publishing and release timer, listeners and any in-flight
    /// fallback. A publication already in progress finishes first; nothing
    /// is published after this returns.
    pub fn unmount(&self) {
        self.alive.kill();
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for AcquisitionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionHandle")
            .field("kind", &self.kind)
            .field("state", &*self.state.borrow())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

struct ListenerGuard {
    socket: SocketClient,
    subscriptions: Vec<Subscription>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            self.socket.remove_listener(subscription);
        }
    }
}

struct Driver {
    kind: AcquisitionKind,
    machine: AcquisitionMachine,
    publisher: Publisher,
    inputs: mpsc::UnboundedReceiver<Input>,
    listeners: ListenerGuard,
    api: Arc<dyn RequestTransport>,
    notifier: Arc<dyn Notifier>,
}

impl Driver {
    async fn run(mut self, deadline: Instant, mut shutdown: oneshot::Receiver<()>) {
        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);
        let mut timer_armed = true;
        let mut fallback: BoxFuture<'static, Result<Value, ApiError>> =
            Box::pin(std::future::pending());
        let mut fallback_pending = false;

        loop {
            // Socket data wins a tie with the timer.
            let input = tokio::select! {
                biased;
                _ = &mut shutdown => Input::Unmount,
                Some(input) = self.inputs.recv() => input,
                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    log_warn!("Socket timeout for {}, falling back to API", self.kind.label());
                    Input::PrimaryTimeout
                }
                outcome = &mut fallback, if fallback_pending => {
                    fallback_pending = false;
                    match outcome {
                        Ok(data) => Input::FallbackSucceeded(data),
                        Err(e) => {
                            log_error!("Fallback for {} failed: {}", self.kind.label(), e);
                            Input::FallbackFailed(self.kind.failure_for(&e))
                        }
                    }
                }
            };

            let unmounting = input == Input::Unmount;
            if let Input::ConnectionError(message) = &input {
                log_warn!("Socket error while awaiting {}: {}", self.kind.label(), message);
            }

            let transition = self.machine.apply(input);
            if transition.changed {
                self.publisher.publish(self.machine.result());
            }
            for effect in transition.effects {
                match effect {
                    Effect::CancelTimer => timer_armed = false,
                    Effect::StartFallback => {
                        timer_armed = false;
                        fallback = self.kind.fallback(self.api.clone());
                        fallback_pending = true;
                    }
                    Effect::Notify => {
                        let notifier = &self.notifier;
                        let kind = self.kind;
                        self.publisher
                            .while_alive(|| notifier.notify(kind.notification()));
                    }
                }
            }

            if unmounting {
                log_debug!("Unmounted {} acquisition", self.kind.label());
                break;
            }
            if let Phase::Resolved(source) = self.machine.phase() {
                log_info!("Resolved {} via {}", self.kind.label(), source);
                break;
            }
            if self.machine.phase().is_terminal() {
                break;
            }
        }
        drop(self.listeners);
    }
}
