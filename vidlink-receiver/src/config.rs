//! Configuration for the receiver service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vidlink_core::{FailoverMode, FailoverOptions, SupervisorConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Transport selection.
    pub receiver: ReceiverSection,
    /// TCP listener settings.
    pub network: NetworkConfig,
    /// USB serial settings.
    pub serial: SerialConfig,
    /// Decoder pipeline supervision.
    pub decoder: DecoderConfig,
    /// Kiosk display coordination.
    pub kiosk: KioskConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverSection {
    /// Mode: "network", "usb", "hybrid", "all".
    pub mode: String,
    /// Resync byte-drop budget per session before the stream is
    /// declared corrupt.
    pub max_resyncs: u64,
}

/// TCP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Seconds to wait for a connection before re-checking shutdown
    /// (network/all modes).
    pub accept_timeout_secs: u64,
    /// Shorter accept window used in hybrid mode so USB is re-probed
    /// promptly.
    pub hybrid_accept_timeout_secs: u64,
}

/// USB serial settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit device path. Empty enables discovery under /dev.
    pub device: String,
    /// Baud rate.
    pub baud: u32,
    /// Seconds of silence before an open link is declared stale.
    pub idle_timeout_secs: u64,
}

/// Decoder pipeline supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Milliseconds a freshly spawned pipeline must survive to be
    /// selected.
    pub confirm_window_ms: u64,
    /// Seconds between SIGTERM and SIGKILL on teardown.
    pub grace_secs: u64,
}

/// Kiosk display coordination.
///
/// Commands run via `sh -c`; empty strings disable them. The kiosk
/// coordinator itself is a black box — these hooks only tell it when a
/// stream is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    /// Run when a stream starts (hide the idle display).
    pub on_stream_started: String,
    /// Run when a stream ends (show the idle display).
    pub on_stream_ended: String,
    /// Optional probe that must succeed before the idle display is
    /// hidden (e.g. a window check). Polled until it exits 0.
    pub surface_check: String,
    /// Seconds to keep polling the surface check before giving up and
    /// signaling anyway.
    pub surface_check_timeout_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverSection::default(),
            network: NetworkConfig::default(),
            serial: SerialConfig::default(),
            decoder: DecoderConfig::default(),
            kiosk: KioskConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ReceiverSection {
    fn default() -> Self {
        Self {
            mode: "hybrid".into(),
            max_resyncs: vidlink_core::DEFAULT_MAX_RESYNCS,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5600,
            accept_timeout_secs: 5,
            hybrid_accept_timeout_secs: 2,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud: 6_000_000,
            idle_timeout_secs: 5,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            confirm_window_ms: 750,
            grace_secs: 3,
        }
    }
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            on_stream_started: String::new(),
            on_stream_ended: String::new(),
            surface_check: String::new(),
            surface_check_timeout_secs: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ReceiverConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Convert into the core failover options.
    ///
    /// An unrecognized mode falls back to hybrid with a warning; the
    /// confirmation window is kept within sane bounds so a typo cannot
    /// make selection instant or minutes long.
    pub fn to_options(&self) -> FailoverOptions {
        let mode = self.receiver.mode.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}; using hybrid");
            FailoverMode::Hybrid
        });

        let device = if self.serial.device.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.serial.device))
        };

        FailoverOptions {
            mode,
            host: self.network.host.clone(),
            port: self.network.port,
            accept_timeout: Duration::from_secs(self.network.accept_timeout_secs.max(1)),
            hybrid_accept_timeout: Duration::from_secs(
                self.network.hybrid_accept_timeout_secs.max(1),
            ),
            serial_device: device,
            baud: self.serial.baud,
            idle_timeout: Duration::from_secs(self.serial.idle_timeout_secs.max(1)),
            max_resyncs: self.receiver.max_resyncs,
            supervisor: SupervisorConfig {
                confirm_window: Duration::from_millis(
                    self.decoder.confirm_window_ms.clamp(100, 10_000),
                ),
                grace: Duration::from_secs(self.decoder.grace_secs.clamp(1, 30)),
                ..SupervisorConfig::default()
            },
            ..FailoverOptions::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ReceiverConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("mode"));
        assert!(text.contains("baud"));
        assert!(text.contains("on_stream_started"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ReceiverConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ReceiverConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 5600);
        assert_eq!(parsed.serial.baud, 6_000_000);
        assert_eq!(parsed.receiver.mode, "hybrid");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: ReceiverConfig = toml::from_str(
            r#"
            [network]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.network.port, 9000);
        assert_eq!(parsed.network.host, "0.0.0.0");
        assert_eq!(parsed.serial.baud, 6_000_000);
    }

    #[test]
    fn to_options_clamps_confirm_window() {
        let mut cfg = ReceiverConfig::default();
        cfg.decoder.confirm_window_ms = 1; // too short to mean anything
        let options = cfg.to_options();
        assert_eq!(options.supervisor.confirm_window, Duration::from_millis(100));
    }

    #[test]
    fn bad_mode_falls_back_to_hybrid() {
        let mut cfg = ReceiverConfig::default();
        cfg.receiver.mode = "carrier-pigeon".into();
        assert_eq!(cfg.to_options().mode, FailoverMode::Hybrid);
    }

    #[test]
    fn empty_device_enables_discovery() {
        let cfg = ReceiverConfig::default();
        assert!(cfg.to_options().serial_device.is_none());

        let mut cfg = ReceiverConfig::default();
        cfg.serial.device = "/dev/ttyACM3".into();
        assert_eq!(
            cfg.to_options().serial_device,
            Some(PathBuf::from("/dev/ttyACM3"))
        );
    }
}
