//! Field Prime Client - real-time data acquisition for the crop dashboard
//!
//! This crate owns the dashboard's two transports (a persistent Socket.IO
//! connection and a JSON request API) and the socket-first acquisitions
//! that combine them, plus the Dioxus hooks pages use to consume them.

pub mod acquisition;
pub mod api_client;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod notify;
pub mod socket;
pub mod transports;

pub use acquisition::{
    Acquisition, AcquisitionHandle, AcquisitionKind, AcquisitionResult, AnalysisRunner,
    ConnectionType, DataLoader, SpectralLookup, StateSink,
};
pub use api_client::{ApiClient, RequestTransport};
pub use config::ClientConfig;
pub use notify::{Notification, Notifier, ToastQueue, Variant};
pub use socket::{ConnectionState, EventKind, SocketClient};
pub use transports::Transports;
