//! Request-only loading of the snapshot followed by an analysis run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fieldprime_shared::{check_outcome, ApiError};
use serde_json::Value;
use tokio::sync::watch;

use super::state::{AcquisitionResult, ConnectionType, Liveness, Publisher, StateSink};
use crate::api_client::RequestTransport;
use crate::notify::{Notification, Notifier};
use crate::transports::Transports;
use crate::{log_error, log_info, log_warn};

const TIMEOUT_DESCRIPTION: &str =
    "Analysis timed out. The operation might be too intensive. Please try again later.";
const UNREACHABLE_DESCRIPTION: &str = "Could not connect to the server. Please try again later.";

struct LoaderShared {
    api: Arc<dyn RequestTransport>,
    notifier: Arc<dyn Notifier>,
    max_retries: u32,
    publisher: Publisher,
    generation: AtomicU64,
}

impl LoaderShared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut AcquisitionResult)) -> bool {
        self.update_then(generation, f, || ())
    }

    fn update_then(
        &self,
        generation: u64,
        f: impl FnOnce(&mut AcquisitionResult),
        after: impl FnOnce(),
    ) -> bool {
        self.is_current(generation) && self.publisher.update_then(f, after)
    }
}

/// Loads data then runs the analysis over the request transport, retrying
/// timeouts. Dropping the loader unmounts it.
pub struct DataLoader {
    shared: Arc<LoaderShared>,
    state: watch::Receiver<AcquisitionResult>,
    alive: Liveness,
}

impl DataLoader {
    /// Start the first fetch. Must be called from within a tokio runtime.
    pub fn mount(transports: &Transports) -> Self {
        Self::mount_with_sinks(transports, Vec::new())
    }

    pub fn mount_with_sinks(transports: &Transports, sinks: Vec<Arc<dyn StateSink>>) -> Self {
        let (publisher, state, alive) = Publisher::new(AcquisitionResult::loading(), sinks);
        let loader = Self {
            shared: Arc::new(LoaderShared {
                api: transports.api.clone(),
                notifier: transports.notifier.clone(),
                max_retries: transports.max_retries,
                publisher,
                generation: AtomicU64::new(0),
            }),
            state,
            alive,
        };
        loader.retry_fetch();
        loader
    }

    /// Start a fresh fetch; results of any earlier fetch still in flight
    /// are discarded.
    pub fn retry_fetch(&self) {
        if !self.is_mounted() {
            return;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publisher.update(|r| r.is_loading = true);
        tokio::spawn(fetch(self.shared.clone(), generation));
    }

    pub fn current(&self) -> AcquisitionResult {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionResult> {
        self.state.clone()
    }

    /// Wait for the newest fetch to finish. Returns the last published
    /// state, possibly still loading, once the loader is unmounted.
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

    pub fn unmount(&self) {
        self.alive.kill();
    }
}

impl Drop for DataLoader {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn load_and_analyse(api: &dyn RequestTransport) -> Result<Value, ApiError> {
    check_outcome(api.load_snapshot().await?, "Error loading data")?;
    check_outcome(api.run_analysis().await?, "Error running analysis")
}

async fn fetch(shared: Arc<LoaderShared>, generation: u64) {
    let mut attempt = 0;
    loop {
        // The previous error stays visible until this attempt settles.
        if !shared.update(generation, |r| r.is_loading = true) {
            return;
        }

        match load_and_analyse(shared.api.as_ref()).await {
            Ok(analysis) => {
                log_info!("Analysis loaded over the API");
                shared.update(generation, |r| {
                    r.data = Some(analysis);
                    r.is_loading = false;
                    r.error = None;
                    r.connection_type = ConnectionType::Request;
                });
                return;
            }
            Err(e) if e.is_timeout() && attempt < shared.max_retries => {
                attempt += 1;
                log_warn!(
                    "Analysis timed out, retrying ({}/{})",
                    attempt,
                    shared.max_retries
                );
            }
            Err(e) => {
                log_error!("Error loading data: {}", e);
                let (message, description) = if e.is_timeout() {
                    (
                        "Analysis timed out".to_string(),
                        TIMEOUT_DESCRIPTION.to_string(),
                    )
                } else if let Some(server) = e.server_message() {
                    (server.clone(), server)
                } else {
                    (
                        "Failed to fetch data from API".to_string(),
                        UNREACHABLE_DESCRIPTION.to_string(),
                    )
                };
                let notifier = &shared.notifier;
                shared.update_then(
                    generation,
                    |r| {
                        r.is_loading = false;
                        r.error = Some(message);
                        r.connection_type = ConnectionType::None;
                    },
                    || {
                        notifier.notify(Notification::destructive("Error loading data", description))
                    },
                );
                return;
            }
        }
    }
}
