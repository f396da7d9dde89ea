//! User-triggered request calls: re-running the analysis and looking up a
//! pixel's spectral signature.

use std::future::Future;
use std::sync::Arc;

use fieldprime_shared::{check_outcome, ApiError};
use serde_json::Value;
use tokio::sync::watch;

use super::state::{AcquisitionResult, ConnectionType, Liveness, Publisher};
use crate::api_client::RequestTransport;
use crate::notify::{Notification, Notifier};
use crate::transports::Transports;
use crate::log_error;

/// State plumbing shared by the on-demand actions.
struct Action {
    api: Arc<dyn RequestTransport>,
    notifier: Arc<dyn Notifier>,
    publisher: Publisher,
    state: watch::Receiver<AcquisitionResult>,
    alive: Liveness,
}

impl Action {
    fn new(transports: &Transports) -> Self {
        let (publisher, state, alive) = Publisher::new(AcquisitionResult::idle(), Vec::new());
        Self {
            api: transports.api.clone(),
            notifier: transports.notifier.clone(),
            publisher,
            state,
            alive,
        }
    }

    /// `rejected` is the error text for a `success: false` reply without a
    /// message; `failure` covers every other error without a server message.
    async fn perform<F>(
        &self,
        request: F,
        rejected: &str,
        failure: &str,
        title: &str,
    ) -> Option<Value>
    where
        F: Future<Output = Result<Value, ApiError>>,
    {
        self.publisher.update(|r| {
            r.is_loading = true;
            r.error = None;
        });

        match request.await.and_then(|payload| check_outcome(payload, rejected)) {
            Ok(data) => {
                self.publisher.update(|r| {
                    r.data = Some(data.clone());
                    r.is_loading = false;
                    r.connection_type = ConnectionType::Request;
                });
                Some(data)
            }
            Err(e) => {
                log_error!("{}: {}", failure, e);
                let message = e.server_message().unwrap_or_else(|| failure.to_string());
                let notifier = &self.notifier;
                self.publisher.update_then(
                    |r| {
                        r.is_loading = false;
                        r.error = Some(message.clone());
                    },
                    || notifier.notify(Notification::destructive(title, message.clone())),
                );
                None
            }
        }
    }

    fn unmount(&self) {
        self.alive.kill();
    }
}

/// Runs the crop analysis on request.
pub struct AnalysisRunner {
    action: Action,
}

impl AnalysisRunner {
    pub fn new(transports: &Transports) -> Self {
        Self {
            action: Action::new(transports),
        }
    }

    /// Run the analysis. Returns the result, or `None` on failure (the
    /// error is in [`current`](Self::current) and a toast was raised).
    pub async fn run(&self) -> Option<Value> {
        let api = self.action.api.clone();
        self.action
            .perform(
                async move { api.run_analysis().await },
                "Error running analysis",
                "Failed to run analysis",
                "Analysis Error",
            )
            .await
    }

    pub fn current(&self) -> AcquisitionResult {
        self.action.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionResult> {
        self.action.state.clone()
    }

    pub fn unmount(&self) {
        self.action.unmount();
    }
}

impl Drop for AnalysisRunner {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Fetches the spectral signature of one pixel.
pub struct SpectralLookup {
    action: Action,
}

impl SpectralLookup {
    pub fn new(transports: &Transports) -> Self {
        Self {
            action: Action::new(transports),
        }
    }

    pub async fn get_signature(&self, x: u32, y: u32, crop_type: Option<&str>) -> Option<Value> {
        let api = self.action.api.clone();
        let crop_type = crop_type.map(str::to_owned);
        self.action
            .perform(
                async move { api.get_spectral_signature(x, y, crop_type.as_deref()).await },
                "Error getting spectral data",
                "Failed to get spectral signature",
                "Spectral Data Error",
            )
            .await
    }

    pub fn current(&self) -> AcquisitionResult {
        self.action.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionResult> {
        self.action.state.clone()
    }

    pub fn unmount(&self) {
        self.action.unmount();
    }
}

impl Drop for SpectralLookup {
    fn drop(&mut self) {
        self.unmount();
    }
}
