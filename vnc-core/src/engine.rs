//! The protocol engine contract.
//!
//! The engine owns the wire protocol: handshake, encodings and the
//! socket. The session core only ever reaches it through
//! [`ProtocolEngine`], always while holding the session guard.
//!
//! Going the other way, the engine reports server events through an
//! [`EngineEvents`] table it receives once, at creation time, and keeps
//! for its whole life.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineOptions;
use crate::input::PointerButtons;

// ── Credentials ──────────────────────────────────────────────────

/// What kind of credential the server asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Classic VNC authentication: password only.
    Password,
    /// Username and password (e.g. VeNCrypt plain, Apple ARD).
    UserPassword,
}

/// Credentials supplied by the caller on demand.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

impl UserCredential {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Server certificate presented during a TLS-based security handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Hex-encoded SHA-256 fingerprint of the DER certificate.
    pub fingerprint: String,
}

// ── ConnectionInfo ───────────────────────────────────────────────

/// Details about the remote desktop, valid once connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub desktop_name: String,
    pub width: u16,
    pub height: u16,
    /// Whether the transport is protected by TLS.
    pub encrypted: bool,
}

// ── EngineEvents ─────────────────────────────────────────────────

/// Callbacks the engine invokes while it runs.
///
/// Calls arrive on whichever thread is inside the engine, which in
/// practice is the thread running `connect()` (credentials,
/// certificates) or the reader loop (everything else). Implementations
/// may block; doing so only stalls that one connection.
pub trait EngineEvents: Send + Sync {
    /// The server requires authentication. `None` aborts the handshake.
    fn credential(&self, kind: CredentialKind) -> Option<UserCredential>;

    /// Accept or reject a server certificate.
    fn verify_certificate(&self, cert: &CertificateInfo) -> bool;

    fn bell(&self);

    /// Server clipboard contents.
    fn cut_text(&self, text: &str);

    /// Server-side cursor moved. Returns `true` if handled.
    fn cursor_position(&self, x: i32, y: i32) -> bool;

    /// A complete framebuffer update has been applied.
    fn framebuffer_updated(&self);

    /// The remote desktop changed size.
    fn framebuffer_resized(&self, width: u16, height: u16);
}

// ── ProtocolEngine ───────────────────────────────────────────────

/// A blocking RFB client implementation.
///
/// Every method takes `&self`: the reader loop, the sender worker and
/// UI-side interrupts reach the engine concurrently under a shared
/// read guard, so implementations synchronise their own internals
/// (typically one lock for the read side, one for the write side).
pub trait ProtocolEngine: Send + Sync + 'static {
    /// Apply options. Called once, before `init`.
    fn configure(&self, options: &EngineOptions);

    /// Resolve, connect and run the handshake. Blocks.
    ///
    /// On failure returns a human-readable reason derived from the
    /// transport error.
    fn init(&self, host: &str, port: u16) -> Result<(), String>;

    /// Wait up to `timeout` for one server message and process it.
    ///
    /// A timeout with nothing to read is `Ok`. `Err` means the
    /// connection is unusable.
    fn wait_and_process_one_message(&self, timeout: Duration) -> Result<(), String>;

    fn send_key_event(&self, keysym: u32, down: bool) -> bool;

    fn send_pointer_event(&self, x: i32, y: i32, buttons: PointerButtons) -> bool;

    fn send_cut_text(&self, text: &str) -> bool;

    /// Stop or resume requesting framebuffer updates.
    fn pause_framebuffer_updates(&self, paused: bool);

    /// Request a full, non-incremental framebuffer update.
    fn refresh_framebuffer(&self) -> bool;

    /// Abort any blocking call in progress and make future ones fail
    /// fast. Idempotent; there is no way back.
    fn interrupt(&self);

    fn connection_info(&self) -> ConnectionInfo;

    /// Release everything the engine holds. Called exactly once, by
    /// [`EngineHandle`]'s destructor.
    fn destroy(&mut self);
}

/// Shared reference to the session's event table, as handed to the
/// engine factory.
pub type EventSink = Arc<dyn EngineEvents>;

// ── EngineHandle ─────────────────────────────────────────────────

/// Exclusive owner of an engine. Dropping it destroys the engine, so
/// destruction happens once and nothing can reach the engine after.
pub struct EngineHandle<E: ProtocolEngine> {
    engine: E,
}

impl<E: ProtocolEngine> EngineHandle<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: ProtocolEngine> Deref for EngineHandle<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}

impl<E: ProtocolEngine> DerefMut for EngineHandle<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: ProtocolEngine> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        self.engine.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine(Arc<AtomicUsize>);

    impl ProtocolEngine for CountingEngine {
        fn configure(&self, _: &EngineOptions) {}
        fn init(&self, _: &str, _: u16) -> Result<(), String> {
            Ok(())
        }
        fn wait_and_process_one_message(&self, _: Duration) -> Result<(), String> {
            Ok(())
        }
        fn send_key_event(&self, _: u32, _: bool) -> bool {
            true
        }
        fn send_pointer_event(&self, _: i32, _: i32, _: PointerButtons) -> bool {
            true
        }
        fn send_cut_text(&self, _: &str) -> bool {
            true
        }
        fn pause_framebuffer_updates(&self, _: bool) {}
        fn refresh_framebuffer(&self) -> bool {
            true
        }
        fn interrupt(&self) {}
        fn connection_info(&self) -> ConnectionInfo {
            ConnectionInfo::default()
        }
        fn destroy(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn handle_destroys_once_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = EngineHandle::new(CountingEngine(Arc::clone(&count)));
        let mut slot = Some(handle);
        drop(slot.take());
        drop(slot.take());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn credential_debug_hides_password() {
        let cred = UserCredential {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{cred:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
