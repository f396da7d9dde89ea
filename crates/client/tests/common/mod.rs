#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fieldprime_client::socket::{MemoryAcceptor, MemoryConnector, ReconnectConfig};
use fieldprime_client::{
    AcquisitionResult, RequestTransport, SocketClient, StateSink, ToastQueue, Transports,
};
use fieldprime_shared::ApiError;
use serde_json::{json, Value};

pub const SOCKET_URL: &str = "ws://fields.test/socket.io/?EIO=4&transport=websocket";

pub type Reply = Result<Value, ApiError>;

#[derive(Default)]
struct Script {
    snapshot: VecDeque<Reply>,
    analysis: VecDeque<Reply>,
    spectral: VecDeque<Reply>,
    snapshot_calls: usize,
    analysis_calls: usize,
    spectral_calls: Vec<(u32, u32, Option<String>)>,
}

/// Request transport answering from per-operation queues, after `delay`.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
    delay: Duration,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn push_snapshot(&self, reply: Reply) {
        self.script.lock().unwrap().snapshot.push_back(reply);
    }

    pub fn push_analysis(&self, reply: Reply) {
        self.script.lock().unwrap().analysis.push_back(reply);
    }

    pub fn push_spectral(&self, reply: Reply) {
        self.script.lock().unwrap().spectral.push_back(reply);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.script.lock().unwrap().snapshot_calls
    }

    pub fn analysis_calls(&self) -> usize {
        self.script.lock().unwrap().analysis_calls
    }

    pub fn spectral_calls(&self) -> Vec<(u32, u32, Option<String>)> {
        self.script.lock().unwrap().spectral_calls.clone()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn unscripted() -> Reply {
    Err(ApiError::Network("unscripted call".to_string()))
}

#[async_trait]
impl RequestTransport for ScriptedApi {
    async fn load_snapshot(&self) -> Result<Value, ApiError> {
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.snapshot_calls += 1;
            script.snapshot.pop_front().unwrap_or_else(unscripted)
        };
        self.pause().await;
        reply
    }

    async fn run_analysis(&self) -> Result<Value, ApiError> {
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.analysis_calls += 1;
            script.analysis.pop_front().unwrap_or_else(unscripted)
        };
        self.pause().await;
        reply
    }

    async fn get_spectral_signature(
        &self,
        x: u32,
        y: u32,
        crop_type: Option<&str>,
    ) -> Result<Value, ApiError> {
        let reply = {
            let mut script = self.script.lock().unwrap();
            script
                .spectral_calls
                .push((x, y, crop_type.map(str::to_owned)));
            script.spectral.pop_front().unwrap_or_else(unscripted)
        };
        self.pause().await;
        reply
    }
}

/// Records every published state.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<AcquisitionResult>>,
}

impl Recorder {
    pub fn snapshot(&self) -> Vec<AcquisitionResult> {
        self.seen.lock().unwrap().clone()
    }
}

impl StateSink for Recorder {
    fn publish(&self, result: &AcquisitionResult) {
        self.seen.lock().unwrap().push(result.clone());
    }
}

pub struct Harness {
    pub transports: Transports,
    pub connector: MemoryConnector,
    pub acceptor: MemoryAcceptor,
    pub api: ScriptedApi,
    pub toasts: ToastQueue,
}

pub fn harness(api: ScriptedApi) -> Harness {
    let (connector, acceptor) = MemoryConnector::new();
    let socket = SocketClient::with_connector(
        SOCKET_URL,
        Arc::new(connector.clone()),
        ReconnectConfig::default(),
    );
    let toasts = ToastQueue::new();
    let transports = Transports::new(socket, Arc::new(api.clone()), Arc::new(toasts.clone()));
    Harness {
        transports,
        connector,
        acceptor,
        api,
        toasts,
    }
}

pub fn snapshot() -> Value {
    json!({
        "success": true,
        "iot_data": [
            {"timestamp": "2025-03-01T08:00:00", "temperature_c": 21.5, "humidity_pct": 64.0, "soil_moisture_pct": 38.2},
            {"timestamp": "2025-03-01T09:00:00", "temperature_c": 23.1, "humidity_pct": 60.5, "soil_moisture_pct": 37.9}
        ]
    })
}

pub fn analysis() -> Value {
    json!({
        "success": true,
        "prediction_map": [[0, 1, 2], [2, 1, 0]],
        "stats": {"healthy": 0.62, "moderate": 0.28, "stressed": 0.10}
    })
}

pub fn timeout(operation: &str) -> ApiError {
    ApiError::Timeout {
        operation: operation.to_string(),
        timeout_ms: 60_000,
    }
}
