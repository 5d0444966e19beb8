//! Display environment probing.
//!
//! Runs once at startup to snapshot what the box can do: the active
//! screen resolution (from `xrandr`), whether a VA-API sink element is
//! installed (`gst-inspect-1.0 vaapisink`), and whether `/dev/video0`
//! is present and writable. The snapshot feeds pipeline feasibility;
//! nothing here is re-checked while streaming.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use vidlink_core::DisplayProbe;

/// Gather the probe snapshot from the live environment.
pub fn probe_display() -> DisplayProbe {
    let screen_resolution = xrandr_resolution();
    let has_vaapi_sink = gst_element_exists("vaapisink");
    let has_v4l2_sink = v4l2_sink_writable(Path::new("/dev/video0"));

    info!(
        resolution = ?screen_resolution,
        vaapi = has_vaapi_sink,
        v4l2 = has_v4l2_sink,
        "display probe"
    );

    DisplayProbe {
        screen_resolution,
        has_vaapi_sink,
        has_v4l2_sink,
    }
}

/// Current mode from `xrandr`, when a display is up.
fn xrandr_resolution() -> Option<(u32, u32)> {
    let output = Command::new("xrandr").output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_xrandr(&String::from_utf8_lossy(&output.stdout))
}

/// Find the active mode line: the one flagged with `*`.
///
/// ```text
///    1920x1080     60.00*+  59.94
/// ```
fn parse_xrandr(text: &str) -> Option<(u32, u32)> {
    for line in text.lines() {
        if !line.contains('*') {
            continue;
        }
        let Some(mode) = line.split_whitespace().next() else {
            continue;
        };
        let Some((w, h)) = mode.split_once('x') else {
            continue;
        };
        if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
            return Some((w, h));
        }
    }
    None
}

/// Whether a GStreamer element is installed.
fn gst_element_exists(element: &str) -> bool {
    let found = Command::new("gst-inspect-1.0")
        .arg(element)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    debug!(element, found, "gst element check");
    found
}

/// Whether the kernel video sink device can be written to.
fn v4l2_sink_writable(path: &Path) -> bool {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .is_ok()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_active_mode() {
        let text = "\
Screen 0: minimum 320 x 200, current 1920 x 1080, maximum 8192 x 8192
HDMI-1 connected primary 1920x1080+0+0 (normal left inverted) 527mm x 296mm
   1920x1080     60.00*+  59.94    50.00
   1280x720      60.00    50.00
";
        assert_eq!(parse_xrandr(text), Some((1920, 1080)));
    }

    #[test]
    fn no_active_mode_is_none() {
        let text = "\
HDMI-1 disconnected (normal left inverted)
   1280x720      60.00    50.00
";
        assert_eq!(parse_xrandr(text), None);
    }

    #[test]
    fn malformed_mode_is_skipped() {
        assert_eq!(parse_xrandr("garbage*\n800x600 60.00*\n"), Some((800, 600)));
    }

    #[test]
    fn missing_device_is_not_writable() {
        assert!(!v4l2_sink_writable(Path::new(
            "/dev/vidlink-no-such-device"
        )));
    }
}
