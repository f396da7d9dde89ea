//! The state an acquisition exposes to its page.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// Which transport produced the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "socket")]
    Socket,
    #[serde(rename = "api")]
    Request,
    #[default]
    #[serde(rename = "none")]
    None,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionType::Socket => "socket",
            ConnectionType::Request => "api",
            ConnectionType::None => "none",
        })
    }
}

/// `{ data, isLoading, error, connectionType }` as seen by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionResult {
    pub data: Option<Value>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub connection_type: ConnectionType,
}

impl AcquisitionResult {
    /// Initial state of a mounted acquisition.
    pub fn loading() -> Self {
        Self {
            data: None,
            is_loading: true,
            error: None,
            connection_type: ConnectionType::None,
        }
    }

    /// Initial state of an on-demand action that has not run yet.
    pub fn idle() -> Self {
        Self {
            is_loading: false,
            ..Self::loading()
        }
    }
}

impl Default for AcquisitionResult {
    fn default() -> Self {
        Self::loading()
    }
}

/// Observer notified on every state publication.
pub trait StateSink: Send + Sync {
    fn publish(&self, result: &AcquisitionResult);
}

impl StateSink for watch::Sender<AcquisitionResult> {
    fn publish(&self, result: &AcquisitionResult) {
        self.send_replace(result.clone());
    }
}

/// Owner's side of a [`Publisher`]'s lifetime.
///
/// Every publication holds the lock guarding the publisher's sender.
/// [`kill`](Self::kill) takes the sender out under that lock, so it waits
/// for a publication in progress; afterwards receivers see the channel
/// closed.
#[derive(Clone)]
pub(crate) struct Liveness {
    sender: Arc<Mutex<Option<watch::Sender<AcquisitionResult>>>>,
}

impl Liveness {
    fn slot(&self) -> MutexGuard<'_, Option<watch::Sender<AcquisitionResult>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_alive(&self) -> bool {
        self.slot().is_some()
    }

    pub fn kill(&self) {
        let sender = self.slot().take();
        drop(sender);
    }
}

/// Writes state for one acquisition, and stops writing once it is unmounted.
///
/// Sinks run with the liveness lock held; a sink must not unmount the
/// acquisition it observes.
pub(crate) struct Publisher {
    alive: Liveness,
    sinks: Vec<Arc<dyn StateSink>>,
}

impl Publisher {
    pub fn new(
        initial: AcquisitionResult,
        sinks: Vec<Arc<dyn StateSink>>,
    ) -> (Self, watch::Receiver<AcquisitionResult>, Liveness) {
        let (tx, rx) = watch::channel(initial);
        let alive = Liveness {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (
            Self {
                alive: alive.clone(),
                sinks,
            },
            rx,
            alive,
        )
    }

    /// Run `f` unless unmounted; unmount waits for it to finish.
    pub fn while_alive(&self, f: impl FnOnce()) -> bool {
        let slot = self.alive.slot();
        if slot.is_none() {
            return false;
        }
        f();
        true
    }

    /// Returns `false` (and writes nothing) after unmount.
    pub fn publish(&self, result: &AcquisitionResult) -> bool {
        let slot = self.alive.slot();
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        self.write(tx, result);
        true
    }

    pub fn update(&self, f: impl FnOnce(&mut AcquisitionResult)) -> bool {
        self.update_then(f, || ())
    }

    /// Apply `f`, publish the result, then run `after`, all without an
    /// unmount slipping in between.
    pub fn update_then(
        &self,
        f: impl FnOnce(&mut AcquisitionResult),
        after: impl FnOnce(),
    ) -> bool {
        let slot = self.alive.slot();
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        let mut next = tx.borrow().clone();
        f(&mut next);
        self.write(tx, &next);
        after();
        true
    }

    fn write(&self, tx: &watch::Sender<AcquisitionResult>, result: &AcquisitionResult) {
        tx.publish(result);
        for sink in &self.sinks {
            sink.publish(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let result = AcquisitionResult {
            data: Some(json!({"iot_data": []})),
            is_loading: false,
            error: None,
            connection_type: ConnectionType::Request,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"data": {"iot_data": []}, "isLoading": false, "error": null, "connectionType": "api"})
        );
        assert_eq!(ConnectionType::Socket.to_string(), "socket");
    }

    #[test]
    fn test_publisher_stops_after_unmount() {
        let (publisher, rx, alive) = Publisher::new(AcquisitionResult::loading(), Vec::new());
        assert!(publisher.update(|r| r.is_loading = false));
        assert!(!rx.borrow().is_loading);

        alive.kill();
        assert!(!alive.is_alive());
        assert!(!publisher.update(|r| r.error = Some("late".to_string())));
        assert_eq!(rx.borrow().error, None);
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn test_update_then_skipped_after_unmount() {
        let (publisher, _rx, alive) = Publisher::new(AcquisitionResult::idle(), Vec::new());
        let mut ran = 0;
        assert!(publisher.update_then(|r| r.is_loading = true, || ran += 1));
        alive.kill();
        assert!(!publisher.update_then(|r| r.is_loading = false, || ran += 1));
        assert!(!publisher.while_alive(|| ran += 1));
        assert_eq!(ran, 1);
    }
}
