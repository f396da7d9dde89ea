//! Shared types and utilities for the fieldprime dashboard client.
//!
//! Holds everything that describes the wire: the Socket.IO frame codec, the
//! payload models served by the analytics backend, and the request error
//! taxonomy.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
