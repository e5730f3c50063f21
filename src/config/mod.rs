//! # Configuration Management Module
//!
//! One TOML file configures every postbox process. Each component reads only its own
//! section, so the same file can be shared by four separately started services or by
//! the single-process `postbox start` mode.
//!
//! ## Configuration Structure
//!
//! - [`DeviceConfig`] - where the shared state file and downloaded payloads live
//! - [`MonitorConfig`] - connectivity probing and captive-portal commands
//! - [`RecoveryConfig`] - credential rewrite, join and verification
//! - [`IngestConfig`] - remote message source endpoints and cadence
//! - [`PlaybackConfig`] - player command and trigger sensor
//! - [`LightsConfig`] - LED strip geometry and animation timing
//! - [`LoggingConfig`] - log level, log file and operational events file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use postbox::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("state file: {}", config.device.state_file);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! state_file = "/var/lib/postbox/state.json"
//! download_dir = "/var/lib/postbox/downloads"
//!
//! [monitor]
//! probe_host = "8.8.8.8"
//! check_interval_secs = 10
//! loss_threshold_secs = 30
//!
//! [ingest]
//! poll_url = "https://api.thinkkappi.com/vivi/get_post"
//! ack_url = "https://api.thinkkappi.com/vivi/delete_post"
//! ```
//!
//! Every section except `[device]` may be omitted and falls back to its defaults.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lights: LightsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub state_file: String,
    pub download_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Host pinged to decide whether the network is reachable.
    pub probe_host: String,
    pub probe_timeout_secs: u64,
    pub check_interval_secs: u64,
    /// Accumulated failure time that counts as sustained loss.
    pub loss_threshold_secs: u64,
    /// argv of the command that brings up the access point and portal.
    pub portal_activate_command: Vec<String>,
    /// argv of the command that tears the portal down again.
    pub portal_deactivate_command: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_host: "8.8.8.8".to_string(),
            probe_timeout_secs: 2,
            check_interval_secs: 10,
            loss_threshold_secs: 30,
            portal_activate_command: vec![
                "/bin/bash".to_string(),
                "/opt/postbox/captive_portal/install_captive_portal.sh".to_string(),
            ],
            // pkill exits 1 when nothing matched; an absent portal is already torn down
            portal_deactivate_command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "pkill -f captive_portal || true".to_string(),
            ],
            command_timeout_secs: 120,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// wpa_supplicant include file that holds the postbox network block.
    pub credentials_file: String,
    /// argv of the command that makes the supplicant pick up the new file.
    pub join_command: Vec<String>,
    /// How many probes to try before declaring the new credentials bad.
    pub verify_attempts: u32,
    pub verify_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            credentials_file: "/etc/wpa_supplicant/wpa_supplicant-postbox.conf".to_string(),
            join_command: vec![
                "wpa_cli".to_string(),
                "-i".to_string(),
                "wlan0".to_string(),
                "reconfigure".to_string(),
            ],
            verify_attempts: 6,
            verify_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub poll_url: String,
    /// Base URL; the message id is appended as a path segment.
    pub ack_url: String,
    pub poll_interval_secs: u64,
    /// Cadence while a message is pending, so acknowledgment follows playback quickly.
    pub pending_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_payload_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_url: "https://api.thinkkappi.com/vivi/get_post".to_string(),
            ack_url: "https://api.thinkkappi.com/vivi/delete_post".to_string(),
            poll_interval_secs: 10,
            pending_interval_secs: 1,
            request_timeout_secs: 60,
            max_payload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// argv prefix; the payload path is appended.
    pub player_command: Vec<String>,
    /// File whose content is the sensor level ("0" or "1").
    pub sensor_value_path: String,
    /// Hall sensors on a pull-up read 0 when the magnet is present.
    pub sensor_active_low: bool,
    pub poll_interval_ms: u64,
    /// Consecutive active samples required before a rising edge counts.
    pub debounce_polls: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            player_command: vec!["mpg123".to_string(), "-q".to_string()],
            sensor_value_path: "/sys/class/gpio/gpio17/value".to_string(),
            sensor_active_low: true,
            poll_interval_ms: 100,
            debounce_polls: 2,
        }
    }
}

impl PlaybackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightsConfig {
    pub led_count: usize,
    /// Global brightness, 0-255.
    pub brightness: u8,
    /// Upper bound on how stale the displayed pattern may be. Must stay below 200ms.
    pub state_check_interval_ms: u64,
    pub pending_frame_ms: u64,
    pub playing_frame_ms: u64,
    pub fade_steps: u32,
    pub fade_frame_ms: u64,
    pub ack_frames: u32,
    /// Optional file or FIFO receiving raw RGB bytes per frame. Frames are only
    /// logged when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            led_count: 16,
            brightness: 50,
            state_check_interval_ms: 100,
            pending_frame_ms: 20,
            playing_frame_ms: 10,
            fade_steps: 12,
            fade_frame_ms: 15,
            ack_frames: 60,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Operational events (recovery engaged, portal torn down, credential outcome).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            events_file: None,
        }
    }
}

impl Config {
    /// Load and validate configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.state_file.trim().is_empty() {
            bail!("device.state_file must not be empty");
        }
        if self.monitor.check_interval_secs == 0 {
            bail!("monitor.check_interval_secs must be at least 1");
        }
        if self.monitor.loss_threshold_secs < self.monitor.check_interval_secs {
            bail!(
                "monitor.loss_threshold_secs ({}) is shorter than one check interval ({})",
                self.monitor.loss_threshold_secs,
                self.monitor.check_interval_secs
            );
        }
        if self.monitor.portal_activate_command.is_empty() {
            bail!("monitor.portal_activate_command must name a program");
        }
        if self.monitor.portal_deactivate_command.is_empty() {
            bail!("monitor.portal_deactivate_command must name a program");
        }
        if self.recovery.join_command.is_empty() {
            bail!("recovery.join_command must name a program");
        }
        if self.playback.player_command.is_empty() {
            bail!("playback.player_command must name a program");
        }
        if self.playback.poll_interval_ms == 0 {
            bail!("playback.poll_interval_ms must be at least 1");
        }
        if self.lights.led_count == 0 {
            bail!("lights.led_count must be at least 1");
        }
        if self.lights.state_check_interval_ms == 0 || self.lights.state_check_interval_ms >= 200 {
            bail!(
                "lights.state_check_interval_ms must be between 1 and 199 (got {})",
                self.lights.state_check_interval_ms
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                state_file: "/var/lib/postbox/state.json".to_string(),
                download_dir: "/var/lib/postbox/downloads".to_string(),
            },
            monitor: MonitorConfig::default(),
            recovery: RecoveryConfig::default(),
            ingest: IngestConfig::default(),
            playback: PlaybackConfig::default(),
            lights: LightsConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("/var/log/postbox/postbox.log".to_string()),
                events_file: Some("/var/log/postbox/events.log".to_string()),
            },
        }
    }
}
