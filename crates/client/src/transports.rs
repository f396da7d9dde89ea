//! The transports every acquisition is built from.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::api_client::{ApiClient, RequestTransport};
use crate::config::ClientConfig;
use crate::notify::{Notifier, ToastQueue};
use crate::socket::SocketClient;

/// Socket client, request transport and notifier, plus the acquisition
/// timings. Cheap to clone; provided once at the application root.
#[derive(Clone)]
pub struct Transports {
    pub socket: SocketClient,
    pub api: Arc<dyn RequestTransport>,
    pub notifier: Arc<dyn Notifier>,
    /// How long a socket-first acquisition waits before falling back.
    pub socket_wait: Duration,
    /// Retries of a timed-out load in the data loader.
    pub max_retries: u32,
}

impl Transports {
    pub fn new(
        socket: SocketClient,
        api: Arc<dyn RequestTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let defaults = ClientConfig::default();
        Self {
            socket,
            api,
            notifier,
            socket_wait: defaults.socket_wait,
            max_retries: defaults.max_retries,
        }
    }

    pub fn from_config(config: &ClientConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        Ok(Self {
            socket: SocketClient::from_config(config)?,
            api: Arc::new(ApiClient::from_config(config)),
            notifier,
            socket_wait: config.socket_wait,
            max_retries: config.max_retries,
        })
    }

    /// Production transports with toasts collected in a [`ToastQueue`].
    pub fn with_toasts(config: &ClientConfig) -> Result<(Self, ToastQueue)> {
        let toasts = ToastQueue::new();
        let transports = Self::from_config(config, Arc::new(toasts.clone()))?;
        Ok((transports, toasts))
    }

    pub fn with_socket_wait(mut self, socket_wait: Duration) -> Self {
        self.socket_wait = socket_wait;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transports")
            .field("socket", &self.socket)
            .field("socket_wait", &self.socket_wait)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
