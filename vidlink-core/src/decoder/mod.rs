//! External decode-and-render pipeline selection and supervision.
//!
//! The receiver never decodes video itself: it feeds raw H.264 frame
//! payloads to the standard input of an external pipeline process
//! (GStreamer in the built-in catalog) and only watches its standard
//! error for diagnostics. This module owns the ordered candidate list,
//! the probe-and-select logic, and the child-process lifecycle.

pub mod pipeline;
pub mod process;

pub use pipeline::{builtin_catalog, DisplayProbe, Feasibility, PipelineDescriptor};
pub use process::{select_and_start, DecoderProcess, SupervisorConfig};
