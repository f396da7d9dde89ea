//! Persistent connection to the analytics backend.
//!
//! ```text
//!   ┌──────────────┐   frames    ┌──────────────┐   events   ┌──────────────┐
//!   │  Connector   │ ──────────▶ │ SocketClient │ ─────────▶ │   EventBus   │
//!   │ (tungstenite │ ◀────────── │ (connection  │            │ (listeners)  │
//!   │  or memory)  │   emits     │    task)     │            └──────────────┘
//!   └──────────────┘             └──────────────┘
//! ```
//!
//! One [`SocketClient`] is shared by every acquisition. It owns a single
//! connection task that speaks Socket.IO, reconnects with a fixed delay up
//! to a ceiling, and fans server events out through the [`EventBus`].

mod bus;
mod client;
mod connection;
mod connector;
pub mod memory;

pub use bus::{EventBus, EventKind, Listener, Subscription};
pub use client::SocketClient;
pub use connection::{ConnectionState, ReconnectConfig};
pub use connector::{Connector, FrameChannel, SocketError, TungsteniteConnector};
pub use memory::{MemoryAcceptor, MemoryConnector, ServerEnd};
