//! Diagnostic probes for evdev mice and touchpads.
//!
//! `mouse-dpi-tool` measures relative-X distance and the peak report rate;
//! `touchpad-edge-detector` records the absolute X/Y range a finger reaches.
//! Both share the device, wait and session layers below.

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod mouse;
pub mod progress;
pub mod session;
pub mod touchpad;
pub mod wait;
