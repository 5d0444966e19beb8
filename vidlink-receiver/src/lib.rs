//! # vidlink-receiver — Kiosk stream receiver service
//!
//! Foreground service that receives a live H.264 elementary stream
//! from a host over TCP or USB serial, feeds it to an external
//! GStreamer decode pipeline, and signals the kiosk coordinator when
//! the display should switch between the idle UI and live video.
//!
//! ## Modes
//!
//! - **network**: TCP listener only.
//! - **usb**: USB serial link only.
//! - **hybrid**: USB-first with network fallback (default).
//! - **all**: both transports in parallel.

pub mod config;
pub mod kiosk;
pub mod probe;
pub mod service;
