//! `ConsoleObserver`: reports session events through `tracing`.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, trace, warn};
use vnc_core::{CertificateInfo, CredentialKind, SessionObserver, SessionState, UserCredential};

use crate::config::ServerConfig;
use crate::console::LineRelay;

/// Log every this many framebuffer updates at debug level.
const FRAME_LOG_INTERVAL: u64 = 100;

pub struct ConsoleObserver {
    username: String,
    password: String,
    /// Where to ask when the config has no password.
    prompt: Option<Arc<LineRelay>>,
    frames: AtomicU64,
}

impl ConsoleObserver {
    pub fn new(server: &ServerConfig, prompt: Option<Arc<LineRelay>>) -> Self {
        Self {
            username: server.username.clone(),
            password: server.password.clone(),
            prompt,
            frames: AtomicU64::new(0),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn ask(&self, label: &str) -> Option<String> {
        let relay = self.prompt.as_ref()?;
        eprint!("{label}: ");
        io::stderr().flush().ok()?;
        relay
            .prompt()
            .map(|line| line.trim_end_matches('\r').to_string())
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_credentials_required(&self, kind: CredentialKind) -> Option<UserCredential> {
        debug!(?kind, "server asked for credentials");
        let username = match kind {
            CredentialKind::UserPassword if self.username.is_empty() => self.ask("username")?,
            CredentialKind::UserPassword => self.username.clone(),
            CredentialKind::Password => String::new(),
        };
        let password = if self.password.is_empty() {
            self.ask("password")?
        } else {
            self.password.clone()
        };
        Some(UserCredential { username, password })
    }

    fn on_certificate_verify(&self, cert: &CertificateInfo) -> bool {
        warn!(
            subject = %cert.subject,
            fingerprint = %cert.fingerprint,
            "rejecting unverified server certificate"
        );
        false
    }

    fn on_clipboard_received(&self, text: &str) {
        info!(len = text.len(), "clipboard from server");
        println!("clipboard: {text}");
    }

    fn on_framebuffer_updated(&self) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % FRAME_LOG_INTERVAL == 0 {
            debug!(frames = n, "framebuffer updates");
        }
    }

    fn on_framebuffer_resized(&self, width: u16, height: u16) {
        info!(width, height, "framebuffer resized");
    }

    fn on_pointer_moved(&self, x: i32, y: i32) {
        trace!(x, y, "server moved the pointer");
    }

    fn on_state_changed(&self, state: SessionState, reason: Option<&str>) {
        match reason {
            Some(reason) => warn!(%state, reason, "session state changed"),
            None => info!(%state, "session state changed"),
        }
    }

    fn on_bell(&self) {
        info!("bell");
        print!("\x07");
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(username: &str, password: &str) -> ServerConfig {
        ServerConfig {
            username: username.into(),
            password: password.into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn configured_password_is_supplied() {
        let obs = ConsoleObserver::new(&server("", "hunter2"), None);
        let cred = obs.on_credentials_required(CredentialKind::Password).unwrap();
        assert_eq!(cred.password, "hunter2");
        assert!(cred.username.is_empty());
    }

    #[test]
    fn user_password_uses_both_fields() {
        let obs = ConsoleObserver::new(&server("alice", "pw"), None);
        let cred = obs
            .on_credentials_required(CredentialKind::UserPassword)
            .unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "pw");
    }

    #[test]
    fn missing_password_without_prompt_aborts() {
        let obs = ConsoleObserver::new(&server("", ""), None);
        assert!(obs.on_credentials_required(CredentialKind::Password).is_none());
    }

    #[test]
    fn certificates_are_rejected_and_frames_counted() {
        let obs = ConsoleObserver::new(&ServerConfig::default(), None);
        assert!(!obs.on_certificate_verify(&CertificateInfo::default()));
        obs.on_framebuffer_updated();
        obs.on_framebuffer_updated();
        assert_eq!(obs.frames(), 2);
    }
}
