//! Dioxus hooks exposing acquisitions to components.
//!
//! Provide [`Transports`](crate::Transports) once near the root with
//! [`use_transports_provider`]; every hook below reads it from context.
//! Each hook mounts on first render and unmounts when its scope drops.

mod acquisition;
mod connection;

pub use acquisition::{
    use_api_data, use_initial_data, use_iot_data, use_prediction_map, use_run_analysis,
    use_spectral_signature, use_transports_provider, UseApiData, UseRunAnalysis,
    UseSpectralSignature,
};
pub use connection::use_connection_state;
