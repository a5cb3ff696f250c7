//! Host-environment collaborator seams.
//!
//! These traits let the host application plug in platform facilities the
//! connection loop cannot own itself: where to connect, whether the process
//! may keep running in the background, and whether the network is up.

use std::fmt;

use crate::connection::engine::ConnectTarget;

/// Failure to produce a connect target (missing token, bad endpoint).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("connect target unavailable: {0}")]
pub struct TargetError(pub String);

impl TargetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Supplies the target for each connection attempt. Called on every attempt
/// so rotated tokens and changed endpoints take effect at the next connect.
pub trait ConnectTargetProvider: Send {
    fn connect_target(&self) -> Result<ConnectTarget, TargetError>;
}

/// A provider with a fixed target, for hosts whose endpoint never changes.
pub struct StaticTargetProvider {
    target: ConnectTarget,
}

impl StaticTargetProvider {
    pub fn new(target: ConnectTarget) -> Self {
        Self { target }
    }
}

impl ConnectTargetProvider for StaticTargetProvider {
    fn connect_target(&self) -> Result<ConnectTarget, TargetError> {
        Ok(self.target.clone())
    }
}

/// Handle for one granted stretch of background execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundTask(pub u64);

impl fmt::Display for BackgroundTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "background-task-{}", self.0)
    }
}

/// Platform grant for keeping the link alive while the app is backgrounded.
///
/// `begin_task` returns `None` when the platform refuses; `on_expired` fires
/// if the grant runs out before `end_task` is called.
pub trait BackgroundTaskScheduler: Send {
    fn begin_task(&self, on_expired: Box<dyn FnOnce() + Send>) -> Option<BackgroundTask>;
    fn end_task(&self, task: BackgroundTask);
}

/// Reports network reachability changes. `start` registers the callback and
/// the monitor invokes it with `true` when the network becomes available and
/// `false` when it goes away.
pub trait ConnectivityMonitor: Send {
    fn start(&mut self, on_change: Box<dyn Fn(bool) + Send + Sync>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn static_provider_returns_its_target() {
        let url = Url::parse("wss://chat.example.com/connect").unwrap();
        let target = ConnectTarget::new(url).with_header("Authorization", "t0");
        let provider = StaticTargetProvider::new(target.clone());
        assert_eq!(provider.connect_target().unwrap(), target);
    }
}
