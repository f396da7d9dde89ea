//! Data acquisition for dashboard pages.
//!
//! A socket-first acquisition asks the persistent socket for data and
//! waits a bounded time for it. If nothing arrives, or the socket reports
//! an error, it falls back to the request transport. The first answer
//! wins; everything after it, and everything after unmount, is ignored.
//!
//! ```text
//!  mount ──► AwaitingPrimary ──socket data──────────────► Resolved(socket)
//!                 │
//!                 ├─timeout / socket error─► AwaitingFallback ─ok──► Resolved(api)
//!                 │                                 │
//!                 │                                 └─error─► Failed (+ toast)
//!  unmount (any phase) ─► no further state changes
//! ```
//!
//! [`DataLoader`], [`AnalysisRunner`] and [`SpectralLookup`] are the
//! request-only variants.

mod acquire;
mod loader;
mod machine;
mod on_demand;
mod state;

pub use acquire::{Acquisition, AcquisitionHandle, AcquisitionKind};
pub use loader::DataLoader;
pub use machine::{AcquisitionMachine, Effect, Input, Phase, Transition};
pub use on_demand::{AnalysisRunner, SpectralLookup};
pub use state::{AcquisitionResult, ConnectionType, StateSink};
