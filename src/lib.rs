//! chatlink: realtime connection layer for chat clients.
//!
//! The crate keeps one websocket-style link to a chat backend alive on a
//! dedicated thread: it walks the handshake to a confirmed connection id,
//! probes the link for liveness, backs off and reconnects after transient
//! failures, and dispatches decoded server events through an ordered stage
//! pipeline to subscribers.
//!
//! `connection::ConnectionManager` is the entry point; hosts plug in their
//! endpoint, transport, and platform facilities through
//! `connection::Environment`.

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod storage;
pub mod telemetry;

pub use config::{ClientConfig, LivenessConfig, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, DisconnectionSource, Environment};
pub use error::{ClientError, EngineError, Error, ServerError, Transience};
pub use events::{Event, EventSubscription, StateSubscription};
pub use storage::{InMemoryStore, StateStore};

pub type Result<T> = std::result::Result<T, Error>;
