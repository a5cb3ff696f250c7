//! Reconnection policy: whether to retry and how long to wait.
//!
//! Delays are drawn uniformly from a window that widens with consecutive
//! failures. The first retry after a healthy link is near-immediate, and the
//! window is capped so a long outage never pushes retries absurdly far out.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;
use crate::error::{ClientError, Transience};

/// Tracks consecutive failed attempts and produces retry delays.
#[derive(Debug)]
pub struct ReconnectionPolicy {
    config: ReconnectConfig,
    consecutive_failures: u32,
}

impl ReconnectionPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// `None` when the error is permanent and retrying cannot help.
    pub fn next_delay(&mut self, error: Option<&ClientError>) -> Option<Duration> {
        let delay = delay_for(self.consecutive_failures, error, &self.config)?;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        Some(delay)
    }

    /// A handshake completed; the failure streak is over.
    pub fn connection_established(&mut self) {
        self.consecutive_failures = 0;
    }
}

/// The delay window for a given failure count, or `None` for permanent errors.
fn delay_for(
    failures: u32,
    error: Option<&ClientError>,
    config: &ReconnectConfig,
) -> Option<Duration> {
    if let Some(err) = error {
        if err.transience() == Transience::Permanent {
            return None;
        }
    }

    let base = config.base_ms as f64;
    let step = config.step_ms as f64;
    let floor = config.floor_ms as f64;
    let cap = config.cap_ms as f64;

    let max = (base + failures as f64 * step).min(cap);
    let min = floor.max(failures.saturating_sub(1) as f64 * step).min(cap);

    let millis = if min >= max {
        max
    } else {
        rand::rng().random_range(min..=max)
    };
    Some(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    fn config() -> ReconnectConfig {
        ReconnectConfig::default()
    }

    fn window(failures: u32) -> (Duration, Duration) {
        let cfg = config();
        let base = cfg.base_ms as f64;
        let step = cfg.step_ms as f64;
        let floor = cfg.floor_ms as f64;
        let cap = cfg.cap_ms as f64;
        let max = (base + failures as f64 * step).min(cap);
        let min = floor.max(failures.saturating_sub(1) as f64 * step).min(cap);
        (
            Duration::from_millis(min as u64),
            Duration::from_millis(max as u64),
        )
    }

    #[test]
    fn first_retry_is_short() {
        let (min, max) = window(0);
        for _ in 0..100 {
            let delay = delay_for(0, None, &config()).unwrap();
            assert!(delay >= min && delay <= max, "{delay:?}");
        }
        assert_eq!(max, Duration::from_millis(500));
    }

    #[test]
    fn window_widens_with_failures() {
        for failures in 1..8 {
            let (min, max) = window(failures);
            for _ in 0..50 {
                let delay = delay_for(failures, None, &config()).unwrap();
                assert!(delay >= min && delay <= max, "failures={failures} {delay:?}");
            }
        }
    }

    #[test]
    fn delay_never_exceeds_cap() {
        for _ in 0..200 {
            let delay = delay_for(1000, None, &config()).unwrap();
            assert!(delay <= Duration::from_millis(25_000));
        }
    }

    #[test]
    fn permanent_error_stops_retrying() {
        let err = ClientError::Server(ServerError {
            code: 40,
            message: "token expired".into(),
            status_code: Some(401),
        });
        assert_eq!(delay_for(0, Some(&err), &config()), None);
    }

    #[test]
    fn policy_counts_and_resets() {
        let mut policy = ReconnectionPolicy::new(config());
        assert!(policy.next_delay(None).is_some());
        assert!(policy.next_delay(None).is_some());
        assert_eq!(policy.consecutive_failures(), 2);

        policy.connection_established();
        assert_eq!(policy.consecutive_failures(), 0);
    }
}
