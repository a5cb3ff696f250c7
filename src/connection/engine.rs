//! Transport engine seam.
//!
//! The connection loop talks to the wire through `TransportEngine`, and
//! engines talk back through a shared signal channel. Every signal carries
//! the id of the engine that produced it so the loop can discard stragglers
//! from an engine it has already abandoned.

use std::fmt;

use bytes::Bytes;
use crossbeam::channel::Sender;
use url::Url;

use crate::error::EngineError;

/// Identifies one engine instance within a connection loop.
pub type EngineId = u64;

/// Where and how to open the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectTarget {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl ConnectTarget {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// What an engine reports back to the connection loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The transport handshake completed.
    Opened,
    /// A raw inbound frame, not yet decoded.
    Frame(Bytes),
    /// The transport closed, with the error if the close was abnormal.
    Closed(Option<EngineError>),
}

/// An `EngineEvent` stamped with its producer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSignal {
    pub engine_id: EngineId,
    pub event: EngineEvent,
}

impl EngineSignal {
    pub fn new(engine_id: EngineId, event: EngineEvent) -> Self {
        Self { engine_id, event }
    }
}

/// A single-use transport link.
///
/// `open` starts the handshake and the engine reports progress through its
/// signal channel. After `close` the engine must stop producing signals as
/// soon as it can, but the loop tolerates late ones via the engine id.
pub trait TransportEngine: Send {
    fn open(&mut self);
    fn close(&mut self);
    /// Send a liveness probe over the open link.
    fn send_probe(&mut self);
}

/// Creates engines. The loop builds a fresh engine per connection attempt
/// and whenever the connect target changes.
pub trait EngineFactory: Send {
    fn create(
        &self,
        target: &ConnectTarget,
        engine_id: EngineId,
        signals: Sender<EngineSignal>,
    ) -> Box<dyn TransportEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_headers_accumulate() {
        let url = Url::parse("wss://chat.example.com/connect").unwrap();
        let target = ConnectTarget::new(url)
            .with_header("Authorization", "Bearer t0")
            .with_header("X-Client", "chatlink");
        assert_eq!(target.headers.len(), 2);
        assert_eq!(target.headers[0].0, "Authorization");
    }

    #[test]
    fn targets_compare_by_url_and_headers() {
        let url = Url::parse("wss://chat.example.com/connect").unwrap();
        let a = ConnectTarget::new(url.clone()).with_header("Authorization", "t0");
        let b = ConnectTarget::new(url.clone()).with_header("Authorization", "t0");
        let c = ConnectTarget::new(url).with_header("Authorization", "t1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
