//! Kiosk display signaling.
//!
//! The idle display (web dashboard, slideshow, whatever the box runs)
//! is managed by an external coordinator. This module only tells it
//! when a live stream starts and ends, via configured shell hooks. The
//! coordinator is expected to eventually converge on the requested
//! visibility; nothing here verifies that it did.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use vidlink_core::DisplayGate;

use crate::config::KioskConfig;

/// Interval between surface-check polls.
const SURFACE_POLL: Duration = Duration::from_millis(300);

/// [`DisplayGate`] implementation running the configured hooks.
pub struct KioskSignals {
    on_started: Option<String>,
    on_ended: Option<String>,
    surface_check: Option<String>,
    surface_timeout: Duration,
}

impl KioskSignals {
    pub fn from_config(config: &KioskConfig) -> Self {
        let opt = |s: &str| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        };
        Self {
            on_started: opt(&config.on_stream_started),
            on_ended: opt(&config.on_stream_ended),
            surface_check: opt(&config.surface_check),
            surface_timeout: Duration::from_secs(config.surface_check_timeout_secs),
        }
    }

    async fn run_hook(&self, what: &str, command: &str) {
        debug!(hook = what, command, "running kiosk hook");
        match Command::new("sh").arg("-c").arg(command).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(hook = what, %status, "kiosk hook failed"),
            Err(e) => warn!(hook = what, "kiosk hook did not run: {e}"),
        }
    }

    /// Poll the surface check until it succeeds or the bounded wait
    /// elapses. Returns whether the render surface actually appeared.
    async fn await_surface(&self, command: &str) -> bool {
        let deadline = Instant::now() + self.surface_timeout;
        loop {
            let ok = Command::new("sh")
                .arg("-c")
                .arg(command)
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if ok {
                return true;
            }
            if Instant::now() >= deadline {
                warn!("render surface check did not pass in {:?}", self.surface_timeout);
                return false;
            }
            tokio::time::sleep(SURFACE_POLL).await;
        }
    }
}

#[async_trait]
impl DisplayGate for KioskSignals {
    async fn stream_started(&self) {
        // No render surface means nothing to show: leave the idle
        // display up rather than hiding it over a blank screen.
        if let Some(check) = &self.surface_check {
            if !self.await_surface(check).await {
                return;
            }
        }
        if let Some(hook) = &self.on_started {
            self.run_hook("stream_started", hook).await;
        }
    }

    async fn stream_ended(&self) {
        if let Some(hook) = &self.on_ended {
            self.run_hook("stream_ended", hook).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn config(started: &str, ended: &str, check: &str) -> KioskConfig {
        KioskConfig {
            on_stream_started: started.into(),
            on_stream_ended: ended.into(),
            surface_check: check.into(),
            surface_check_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn hooks_run_on_signals() {
        let dir = tempfile::tempdir().unwrap();
        let started = dir.path().join("started");
        let ended = dir.path().join("ended");

        let gate = KioskSignals::from_config(&config(
            &format!("touch {}", started.display()),
            &format!("touch {}", ended.display()),
            "",
        ));

        gate.stream_started().await;
        gate.stream_ended().await;
        assert!(started.exists());
        assert!(ended.exists());
    }

    #[tokio::test]
    async fn empty_hooks_are_noops() {
        let gate = KioskSignals::from_config(&KioskConfig::default());
        gate.stream_started().await;
        gate.stream_ended().await;
    }

    #[tokio::test]
    async fn surface_check_gates_started_hook() {
        let dir = tempfile::tempdir().unwrap();
        let surface = dir.path().join("surface");
        let started = dir.path().join("started");

        let gate = KioskSignals::from_config(&config(
            &format!("touch {}", started.display()),
            "",
            &format!("test -e {}", surface.display()),
        ));

        // Surface appears shortly after the stream starts.
        let maker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::fs::write(surface, b"").unwrap();
        });

        let begun = Instant::now();
        gate.stream_started().await;
        assert!(begun.elapsed() >= Duration::from_millis(100));
        assert!(started.exists());
        maker.await.unwrap();
    }

    #[tokio::test]
    async fn failed_surface_check_keeps_idle_display() {
        let dir = tempfile::tempdir().unwrap();
        let started = dir.path().join("started");

        // The surface never appears: the started hook must not run,
        // and the bounded wait must still return promptly.
        let gate = KioskSignals::from_config(&config(
            &format!("touch {}", started.display()),
            "",
            "false",
        ));
        let begun = Instant::now();
        gate.stream_started().await;
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert!(!started.exists());
    }
}
