//! Throughput accounting for the frame-forwarding path.
//!
//! Counters are owned by the pumping worker and checked inline after
//! each forwarded frame, so reporting never blocks or locks anything.

use std::time::{Duration, Instant};

use tracing::info;

/// Default reporting interval.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// One accumulation window: frames, bytes, and when it started.
#[derive(Debug)]
pub struct MetricsWindow {
    frames: u64,
    bytes: u64,
    started: Instant,
    interval: Duration,
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(REPORT_INTERVAL)
    }
}

impl MetricsWindow {
    pub fn new(interval: Duration) -> Self {
        Self {
            frames: 0,
            bytes: 0,
            started: Instant::now(),
            interval,
        }
    }

    /// Account one forwarded frame.
    pub fn record(&mut self, payload_len: usize) {
        self.frames += 1;
        self.bytes += payload_len as u64;
    }

    /// Frames accumulated in the current window.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes accumulated in the current window.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Emit a report and reset if the interval has elapsed.
    pub fn maybe_report(&mut self, transport: &str) {
        let elapsed = self.started.elapsed();
        if elapsed < self.interval {
            return;
        }

        let secs = elapsed.as_secs_f64();
        let fps = self.frames as f64 / secs;
        let mbps = (self.bytes as f64 * 8.0) / (secs * 1_000_000.0);
        info!(
            transport,
            frames = self.frames,
            "fps: {fps:.1} | bitrate: {mbps:.1} Mbps"
        );

        self.frames = 0;
        self.bytes = 0;
        self.started = Instant::now();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates() {
        let mut m = MetricsWindow::default();
        m.record(5);
        m.record(3);
        assert_eq!(m.frames(), 2);
        assert_eq!(m.bytes(), 8);
    }

    #[test]
    fn report_resets_after_interval() {
        let mut m = MetricsWindow::new(Duration::from_millis(0));
        m.record(100);
        m.maybe_report("tcp");
        assert_eq!(m.frames(), 0);
        assert_eq!(m.bytes(), 0);
    }

    #[test]
    fn no_reset_before_interval() {
        let mut m = MetricsWindow::new(Duration::from_secs(3600));
        m.record(100);
        m.maybe_report("tcp");
        assert_eq!(m.frames(), 1);
    }
}
