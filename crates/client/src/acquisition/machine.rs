//! Socket-first acquisition as a pure transition function.
//!
//! The driver feeds [`Input`]s in and carries out the returned
//! [`Effect`]s; nothing here touches timers, sockets or the network.

use serde_json::Value;

use super::state::{AcquisitionResult, ConnectionType};

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    AwaitingPrimary,
    AwaitingFallback,
    Resolved(ConnectionType),
    Failed(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Resolved(_) | Phase::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Mount,
    SocketData(Value),
    ConnectionError(String),
    PrimaryTimeout,
    FallbackSucceeded(Value),
    FallbackFailed(String),
    Unmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CancelTimer,
    StartFallback,
    Notify,
}

#[derive(Debug, Default, PartialEq)]
pub struct Transition {
    /// The visible result changed and must be published.
    pub changed: bool,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn ignored() -> Self {
        Self::default()
    }

    fn publish(effects: Vec<Effect>) -> Self {
        Self {
            changed: true,
            effects,
        }
    }
}

#[derive(Debug)]
pub struct AcquisitionMachine {
    phase: Phase,
    result: AcquisitionResult,
    mounted: bool,
}

impl Default for AcquisitionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            result: AcquisitionResult::loading(),
            mounted: false,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn result(&self) -> &AcquisitionResult {
        &self.result
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn apply(&mut self, input: Input) -> Transition {
        if !self.mounted && input != Input::Mount {
            return Transition::ignored();
        }

        match (self.phase.clone(), input) {
            (Phase::Idle, Input::Mount) => {
                self.mounted = true;
                self.phase = Phase::AwaitingPrimary;
                self.result = AcquisitionResult::loading();
                Transition::publish(Vec::new())
            }
            (_, Input::Unmount) => {
                self.mounted = false;
                Transition {
                    changed: false,
                    effects: vec![Effect::CancelTimer],
                }
            }
            (Phase::AwaitingPrimary | Phase::AwaitingFallback, Input::SocketData(data)) => {
                self.resolve(ConnectionType::Socket, data);
                Transition::publish(vec![Effect::CancelTimer])
            }
            (Phase::AwaitingPrimary, Input::ConnectionError(message)) => {
                self.phase = Phase::AwaitingFallback;
                self.result.error = Some(message);
                Transition::publish(vec![Effect::CancelTimer, Effect::StartFallback])
            }
            (Phase::AwaitingPrimary, Input::PrimaryTimeout) => {
                self.phase = Phase::AwaitingFallback;
                Transition {
                    changed: false,
                    effects: vec![Effect::StartFallback],
                }
            }
            (Phase::AwaitingFallback, Input::FallbackSucceeded(data)) => {
                self.resolve(ConnectionType::Request, data);
                Transition::publish(Vec::new())
            }
            (Phase::AwaitingFallback, Input::FallbackFailed(message)) => {
                self.phase = Phase::Failed(message.clone());
                self.result.is_loading = false;
                self.result.error = Some(message);
                self.result.connection_type = ConnectionType::None;
                Transition::publish(vec![Effect::Notify])
            }
            _ => Transition::ignored(),
        }
    }

    fn resolve(&mut self, source: ConnectionType, data: Value) {
        self.phase = Phase::Resolved(source);
        self.result = AcquisitionResult {
            data: Some(data),
            is_loading: false,
            error: None,
            connection_type: source,
        };
    }
}
