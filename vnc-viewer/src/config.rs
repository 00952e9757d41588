//! Viewer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vnc_core::{EngineOptions, SessionConfig, VncError};

/// Top-level configuration for the command-line viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Which server to connect to and how to log in.
    pub server: ServerConfig,
    /// Socket settings.
    pub network: NetworkConfig,
    /// Options handed to the RFB engine.
    pub engine: EngineOptions,
    /// Session thread timeouts.
    pub session: SessionTimeouts,
    /// Input forwarding.
    pub input: InputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Server address and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// TCP port, or a display number when below 100.
    pub port: u16,
    /// Username for servers that ask for one.
    pub username: String,
    /// Password; empty means prompt on stdin when the server asks.
    pub password: String,
}

/// Socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimeouts {
    pub reader_timeout_ms: u64,
    pub sender_shutdown_timeout_secs: u64,
    pub reader_join_timeout_secs: u64,
}

/// Input forwarding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Start with keyboard, pointer and clipboard forwarding disabled.
    pub view_only: bool,
    /// Ignore cursor positions reported by the server.
    pub suppress_server_pointer_moves: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5900,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        let core = SessionConfig::default();
        Self {
            reader_timeout_ms: core.reader_timeout_ms,
            sender_shutdown_timeout_secs: core.sender_shutdown_timeout_secs,
            reader_join_timeout_secs: core.reader_join_timeout_secs,
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

// ── Overrides ────────────────────────────────────────────────────

impl ServerConfig {
    /// Apply a `host`, `host:port` or `[v6addr]:port` target.
    pub fn apply_target(&mut self, target: &str) -> Result<(), VncError> {
        let bad = || VncError::Config(format!("invalid server address '{target}'"));
        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(bad)?)),
            }
        } else {
            match target.rsplit_once(':') {
                // A bare IPv6 address has more than one colon.
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (target, None),
            }
        };
        if host.is_empty() {
            return Err(bad());
        }
        if let Some(port) = port {
            self.port = port.parse().map_err(|_| bad())?;
        }
        self.host = host.to_string();
        Ok(())
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The core session configuration this viewer config describes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            engine: self.engine.clone(),
            reader_timeout_ms: self.session.reader_timeout_ms,
            sender_shutdown_timeout_secs: self.session.sender_shutdown_timeout_secs,
            reader_join_timeout_secs: self.session.reader_join_timeout_secs,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
