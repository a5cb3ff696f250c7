//! Connection lifecycle: state machine, transport engines, liveness,
//! reconnection, and the manager loop that ties them together.

pub mod engine;
pub mod env;
pub(crate) mod liveness;
pub mod manager;
pub mod reconnect;
pub mod state;
pub(crate) mod timer;
pub mod websocket;

pub use engine::{ConnectTarget, EngineEvent, EngineFactory, EngineId, EngineSignal, TransportEngine};
pub use env::{
    BackgroundTask, BackgroundTaskScheduler, ConnectTargetProvider, ConnectivityMonitor,
    StaticTargetProvider, TargetError,
};
pub use manager::{ConnectionManager, Environment};
pub use reconnect::ReconnectionPolicy;
pub use state::{ConnectionState, DisconnectionSource};
pub use websocket::{WebSocketEngine, WebSocketEngineFactory};
