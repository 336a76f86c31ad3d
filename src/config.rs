//! Node configuration.
//!
//! Defaults are the deployed vehicle's wiring and timing; a YAML file named
//! on the command line overrides any subset. Nothing here is hot-reloaded -
//! the node reads its configuration once at startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::lights::LightPins;
use crate::switches::SwitchPins;
use crate::watchdog::DEFAULT_COMM_TIMEOUT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Frame identifiers this node sends and receives (standard, non-extended).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameIds {
    /// Propulsion/HV status lights message (inbound).
    pub psc_lights: u32,
    /// ADAS status lights message (inbound).
    pub adas_lights: u32,
    /// Switch status message (outbound).
    pub switch_status: u32,
}

impl Default for FrameIds {
    fn default() -> Self {
        Self {
            psc_lights: 0x700,
            adas_lights: 0x701,
            switch_status: 0x702,
        }
    }
}

/// Timing parameters. Only `comm_timeout_ms` affects correctness (the
/// watchdog threshold); the rest are scheduling parameters.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    /// Communication-loss threshold.
    pub comm_timeout_ms: u64,
    /// Bounded wait of one transport receive.
    pub recv_wait_ms: u64,
    /// Pause between light-controller cycles.
    pub light_pause_ms: u64,
    /// Pause between switch-publisher cycles.
    pub publish_pause_ms: u64,
    /// Backoff before the single send retry on backpressure.
    pub send_backoff_ms: u64,
    /// Settle delay between per-pin writes of the shutdown all-off sweep.
    pub shutdown_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            comm_timeout_ms: DEFAULT_COMM_TIMEOUT.as_millis() as u64,
            recv_wait_ms: 500,
            light_pause_ms: 10,
            publish_pause_ms: 10,
            send_backoff_ms: 50,
            shutdown_settle_ms: 100,
        }
    }
}

impl Timing {
    pub fn comm_timeout(&self) -> Duration {
        Duration::from_millis(self.comm_timeout_ms)
    }

    pub fn recv_wait(&self) -> Duration {
        Duration::from_millis(self.recv_wait_ms)
    }

    pub fn light_pause(&self) -> Duration {
        Duration::from_millis(self.light_pause_ms)
    }

    pub fn publish_pause(&self) -> Duration {
        Duration::from_millis(self.publish_pause_ms)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    pub fn shutdown_settle(&self) -> Duration {
        Duration::from_millis(self.shutdown_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// CAN interface name.
    pub interface: String,
    /// Path to the message-schema resource.
    pub schema_path: PathBuf,
    pub frames: FrameIds,
    pub lights: LightPins,
    pub switches: SwitchPins,
    pub timing: Timing,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interface: "can1".to_string(),
            schema_path: PathBuf::from("config/messages.yaml"),
            frames: FrameIds::default(),
            lights: LightPins::default(),
            switches: SwitchPins::default(),
            timing: Timing::default(),
        }
    }
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let config = NodeConfig::default();
        assert_eq!(config.interface, "can1");
        assert_eq!(config.frames.psc_lights, 0x700);
        assert_eq!(config.frames.adas_lights, 0x701);
        assert_eq!(config.frames.switch_status, 0x702);
        assert_eq!(config.timing.comm_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let config: NodeConfig = serde_yaml::from_str(
            r"
interface: vcan0
timing:
  comm_timeout_ms: 2000
",
        )
        .unwrap();
        assert_eq!(config.interface, "vcan0");
        assert_eq!(config.timing.comm_timeout_ms, 2000);
        // Untouched sections fall back to deployed defaults.
        assert_eq!(config.frames.switch_status, 0x702);
        assert_eq!(config.lights, LightPins::default());
    }
}
