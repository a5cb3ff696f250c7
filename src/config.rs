//! Client configuration.
//!
//! Plain serde structs with validated defaults; embedders either construct
//! the config in code or load it from a TOML file shipped with the app.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub liveness: LivenessConfig,
    pub reconnect: ReconnectConfig,
    /// Keep the socket open for a platform-granted grace period when the
    /// host app is backgrounded instead of disconnecting immediately.
    pub stay_connected_in_background: bool,
    /// Per-subscriber event queue depth before a subscriber counts as lagged.
    pub event_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            stay_connected_in_background: true,
            event_queue_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.liveness.validate()?;
        self.reconnect.validate()?;
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                reason: "event_queue_capacity must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Probe cadence for the liveness controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub probe_interval_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 25_000,
            reply_timeout_ms: 3_000,
        }
    }
}

impl LivenessConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_interval_ms == 0 || self.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "liveness intervals must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// Jittered backoff constants for the reconnection policy.
///
/// The computed delay for attempt `n` is uniform in
/// `[min(max(floor, (n-1)*step), cap), min(base + n*step, cap)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_ms: u64,
    pub step_ms: u64,
    pub floor_ms: u64,
    pub cap_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            step_ms: 2_000,
            floor_ms: 250,
            cap_ms: 25_000,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.floor_ms > self.cap_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "reconnect floor_ms ({}) must not exceed cap_ms ({})",
                    self.floor_ms, self.cap_ms
                ),
            });
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let config: ClientConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if it exists and parses; fall back to defaults otherwise.
pub fn load_or_default(path: &Path) -> ClientConfig {
    if !path.exists() {
        return ClientConfig::default();
    }
    match load(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            ClientConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ClientConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.liveness.probe_interval(), Duration::from_secs(25));
        assert_eq!(cfg.liveness.reply_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.reconnect.floor_ms, 250);
        assert_eq!(cfg.reconnect.cap_ms, 25_000);
    }

    #[test]
    fn floor_above_cap_is_rejected() {
        let mut cfg = ClientConfig::default();
        cfg.reconnect.floor_ms = 30_000;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut cfg = ClientConfig::default();
        cfg.event_queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chatlink.toml");
        let mut cfg = ClientConfig::default();
        cfg.liveness.probe_interval_ms = 10_000;
        cfg.stay_connected_in_background = false;
        fs::write(&path, toml::to_string_pretty(&cfg).expect("render")).expect("write");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.liveness.probe_interval_ms, 10_000);
        assert!(!loaded.stay_connected_in_background);
        assert_eq!(loaded.reconnect.base_ms, 500);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_or_default(Path::new("/nonexistent/chatlink.toml"));
        assert_eq!(cfg.event_queue_capacity, 256);
    }
}
