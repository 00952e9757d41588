//! # vnc-viewer
//!
//! Headless VNC viewer built on `vnc-core`. Connects to an RFB server
//! with [`rfb::RfbEngine`], reports session events through `tracing`
//! and forwards input typed as commands on stdin.

pub mod commands;
pub mod config;
pub mod console;
pub mod observer;
pub mod rfb;
