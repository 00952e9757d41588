//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options handed to the protocol engine before it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Preferred RFB security type; `0` lets the engine pick.
    pub security_type: i32,
    /// Ask the server to send cursor shape/position instead of
    /// painting the cursor into the framebuffer.
    pub use_local_cursor: bool,
    /// Image quality hint, `0` (smallest) to `9` (best).
    pub image_quality: u8,
    /// Restrict the server to raw encoding.
    pub raw_encoding: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            security_type: 0,
            use_local_cursor: true,
            image_quality: 5,
            raw_encoding: false,
        }
    }
}

/// Tuning for a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Options passed to the engine at construction.
    pub engine: EngineOptions,
    /// Upper bound on each reader-loop wait, in milliseconds.
    pub reader_timeout_ms: u64,
    /// How long `cleanup()` waits for the sender worker to exit.
    pub sender_shutdown_timeout_secs: u64,
    /// How long `cleanup()` waits for the reader loop to exit.
    pub reader_join_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            reader_timeout_ms: 1000,
            sender_shutdown_timeout_secs: 60,
            reader_join_timeout_secs: 5,
        }
    }
}

impl SessionConfig {
    pub fn reader_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_timeout_ms)
    }

    pub fn sender_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.sender_shutdown_timeout_secs)
    }

    pub fn reader_join_timeout(&self) -> Duration {
        Duration::from_secs(self.reader_join_timeout_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────
