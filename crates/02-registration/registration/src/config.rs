//! Receiver configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration and files only need to list what they change.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use transport::{default_shm_dir, ChannelAttr};

use crate::RegistrationResult;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Network mode: external registrations are applied and the network
    /// loop joins the multicast group instead of the local broadcast address.
    pub network_enabled: bool,
    /// Initial loop-back state.
    pub loopback: bool,
    pub network_monitoring_disabled: bool,
    pub shm_monitoring: ShmMonitoringConfig,
    pub multicast: MulticastConfig,
    pub registration_refresh_ms: u64,
    pub channel: ChannelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_enabled: false,
            loopback: false,
            network_monitoring_disabled: false,
            shm_monitoring: ShmMonitoringConfig::default(),
            multicast: MulticastConfig::default(),
            registration_refresh_ms: 1000,
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShmMonitoringConfig {
    pub enabled: bool,
    pub domain: String,
    pub queue_size: u32,
    pub message_size: u32,
}

impl Default for ShmMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: "registration".to_string(),
            queue_size: 64,
            message_size: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub broadcast_address: Ipv4Addr,
    pub port: u16,
    /// Added to `port` for the registration socket.
    pub offset: u16,
    pub receive_buffer: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 0, 0, 1),
            broadcast_address: Ipv4Addr::new(127, 255, 255, 255),
            port: 14000,
            offset: 0,
            receive_buffer: 5 * 1024 * 1024,
        }
    }
}

impl MulticastConfig {
    pub fn registration_port(&self) -> u16 {
        self.port.wrapping_add(self.offset)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    pub ack_timeout_ms: i64,
    pub open_timeout_ms: u64,
    pub reserve_percent: u32,
    pub min_size: usize,
    /// Defaults to `/dev/shm`, or the temp dir where that does not exist.
    pub shm_dir: Option<PathBuf>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 0,
            open_timeout_ms: 50,
            reserve_percent: 50,
            min_size: 4096,
            shm_dir: None,
        }
    }
}

impl ChannelConfig {
    pub fn shm_dir(&self) -> PathBuf {
        self.shm_dir.clone().unwrap_or_else(default_shm_dir)
    }

    pub fn channel_attr(&self) -> ChannelAttr {
        ChannelAttr {
            min_size: self.min_size,
            reserve_percent: self.reserve_percent,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
            ack_timeout_ms: self.ack_timeout_ms.max(0),
            shm_dir: self.shm_dir(),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> RegistrationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing configuration {}", path.display()))
    }

    /// The network loop runs unless explicitly disabled.
    pub fn network_monitoring(&self) -> bool {
        !self.network_monitoring_disabled
    }

    /// Period of the local broadcast poll: half the refresh interval.
    pub fn local_poll_period(&self) -> Duration {
        Duration::from_millis((self.registration_refresh_ms / 2).max(1))
    }
}
