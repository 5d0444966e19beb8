//! Candidate pipeline descriptors.
//!
//! The catalog is an ordered list: hardware-accelerated decode paths
//! come before software fallbacks, and selection walks it front to
//! back. Catalog construction is pure data against a [`DisplayProbe`]
//! snapshot, so ordering and feasibility are unit-testable without
//! spawning anything.

/// Snapshot of the runtime display environment, gathered by the caller
/// (the receiver binary shells out to `xrandr`/`gst-inspect-1.0`; tests
/// construct it directly).
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayProbe {
    /// Active screen resolution, when it could be determined.
    pub screen_resolution: Option<(u32, u32)>,
    /// Whether a VA-API video sink is installed.
    pub has_vaapi_sink: bool,
    /// Whether `/dev/video0` exists and is writable.
    pub has_v4l2_sink: bool,
}

/// Environment requirement a pipeline needs before it is worth
/// spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    /// No environment requirement.
    Always,
    /// Requires a VA-API sink element.
    VaapiSink,
    /// Requires a writable `/dev/video0` sink.
    V4l2Sink,
    /// Requires a known target resolution.
    ScreenResolution,
    /// Never feasible (test hook).
    Never,
}

impl Feasibility {
    pub fn satisfied_by(&self, probe: &DisplayProbe) -> bool {
        match self {
            Self::Always => true,
            Self::VaapiSink => probe.has_vaapi_sink,
            Self::V4l2Sink => probe.has_v4l2_sink,
            Self::ScreenResolution => probe.screen_resolution.is_some(),
            Self::Never => false,
        }
    }
}

/// One candidate decode-and-render pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Short name for logs and metrics.
    pub name: String,
    /// Full argv; element zero is the executable.
    pub argv: Vec<String>,
    /// Checked against the probe at selection time.
    pub requirement: Feasibility,
}

impl PipelineDescriptor {
    pub fn new(name: &str, argv: &[&str], requirement: Feasibility) -> Self {
        Self {
            name: name.to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            requirement,
        }
    }
}

// ── Built-in catalog ─────────────────────────────────────────────

/// GStreamer launch prefix shared by every candidate: read the raw
/// elementary stream from fd 0 and parse it.
fn gst_prefix(queue_buffers: u32) -> Vec<String> {
    [
        "gst-launch-1.0",
        "-e",
        "fdsrc",
        "fd=0",
        "!",
        "queue",
        &format!("max-size-buffers={queue_buffers}"),
        "max-size-time=0",
        "max-size-bytes=0",
        "!",
        "h264parse",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn with_tail(mut argv: Vec<String>, tail: &[&str]) -> Vec<String> {
    argv.extend(tail.iter().map(|s| s.to_string()));
    argv
}

/// Build the ordered built-in catalog for the probed environment.
///
/// Order encodes preference: VA-API, then the v4l2 stateless hardware
/// decoder with various sinks, then software `avdec_h264` last. When
/// the screen resolution is known, decoded video is scaled to it.
pub fn builtin_catalog(probe: &DisplayProbe) -> Vec<PipelineDescriptor> {
    let mut catalog = Vec::new();

    catalog.push(PipelineDescriptor {
        name: "vaapi-fullscreen".into(),
        argv: with_tail(
            gst_prefix(3),
            &["!", "vaapih264dec", "!", "vaapisink", "fullscreen=yes", "sync=false"],
        ),
        requirement: Feasibility::VaapiSink,
    });

    if let Some((width, height)) = probe.screen_resolution {
        let caps = format!("video/x-raw,width={width},height={height}");
        catalog.push(PipelineDescriptor {
            name: "v4l2-autosink-scaled".into(),
            argv: with_tail(
                gst_prefix(3),
                &[
                    "!", "v4l2h264dec", "capture-io-mode=mmap",
                    "!", "videoconvert",
                    "!", "videoscale",
                    "!", &caps,
                    "!", "autovideosink", "sync=false",
                ],
            ),
            requirement: Feasibility::ScreenResolution,
        });
    } else {
        catalog.push(PipelineDescriptor {
            name: "v4l2-autosink".into(),
            argv: with_tail(
                gst_prefix(3),
                &[
                    "!", "v4l2h264dec", "capture-io-mode=mmap",
                    "!", "videoconvert",
                    "!", "autovideosink", "sync=false",
                ],
            ),
            requirement: Feasibility::Always,
        });
    }

    catalog.push(PipelineDescriptor {
        name: "v4l2-kms-sink".into(),
        argv: with_tail(
            gst_prefix(2),
            &[
                "!", "v4l2h264dec",
                "!", "v4l2sink", "device=/dev/video0", "sync=false",
            ],
        ),
        requirement: Feasibility::V4l2Sink,
    });

    catalog.push(PipelineDescriptor {
        name: "v4l2-gtksink".into(),
        argv: with_tail(
            gst_prefix(2),
            &[
                "!", "v4l2h264dec",
                "!", "videoconvert",
                "!", "gtksink", "fullscreen=true", "sync=false",
            ],
        ),
        requirement: Feasibility::Always,
    });

    if let Some((width, height)) = probe.screen_resolution {
        let caps = format!("video/x-raw,width={width},height={height}");
        catalog.push(PipelineDescriptor {
            name: "software-avdec-scaled".into(),
            argv: with_tail(
                gst_prefix(4),
                &[
                    "!", "avdec_h264", "max-threads=4",
                    "!", "videoconvert",
                    "!", "videoscale",
                    "!", &caps,
                    "!", "autovideosink", "sync=false",
                ],
            ),
            requirement: Feasibility::ScreenResolution,
        });
    } else {
        catalog.push(PipelineDescriptor {
            name: "software-avdec".into(),
            argv: with_tail(
                gst_prefix(4),
                &[
                    "!", "avdec_h264", "max-threads=4",
                    "!", "videoconvert",
                    "!", "autovideosink", "sync=false",
                ],
            ),
            requirement: Feasibility::Always,
        });
    }

    catalog
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_preferred_over_software() {
        let catalog = builtin_catalog(&DisplayProbe::default());
        let software_pos = catalog
            .iter()
            .position(|p| p.name.starts_with("software"))
            .unwrap();
        assert_eq!(software_pos, catalog.len() - 1);
        assert_eq!(catalog[0].name, "vaapi-fullscreen");
    }

    #[test]
    fn resolution_produces_scaled_variants() {
        let probe = DisplayProbe {
            screen_resolution: Some((1920, 1080)),
            ..Default::default()
        };
        let catalog = builtin_catalog(&probe);
        let scaled = catalog
            .iter()
            .find(|p| p.name == "v4l2-autosink-scaled")
            .unwrap();
        assert!(scaled
            .argv
            .iter()
            .any(|a| a == "video/x-raw,width=1920,height=1080"));
    }

    #[test]
    fn feasibility_gates() {
        let probe = DisplayProbe {
            screen_resolution: None,
            has_vaapi_sink: false,
            has_v4l2_sink: true,
        };
        assert!(!Feasibility::VaapiSink.satisfied_by(&probe));
        assert!(Feasibility::V4l2Sink.satisfied_by(&probe));
        assert!(!Feasibility::ScreenResolution.satisfied_by(&probe));
        assert!(Feasibility::Always.satisfied_by(&probe));
        assert!(!Feasibility::Never.satisfied_by(&probe));
    }

    #[test]
    fn every_candidate_reads_from_stdin() {
        let catalog = builtin_catalog(&DisplayProbe {
            screen_resolution: Some((640, 480)),
            has_vaapi_sink: true,
            has_v4l2_sink: true,
        });
        assert!(catalog.len() >= 4);
        for desc in &catalog {
            assert_eq!(desc.argv[0], "gst-launch-1.0");
            assert!(desc.argv.contains(&"fd=0".to_string()), "{}", desc.name);
            assert!(desc.argv.contains(&"h264parse".to_string()), "{}", desc.name);
        }
    }
}
