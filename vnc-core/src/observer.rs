//! Caller-facing event interface.

use crate::engine::{CertificateInfo, CredentialKind, UserCredential};
use crate::state::SessionState;

/// Receives session events.
///
/// Callbacks run on whichever thread produced the event (mostly the
/// reader loop) and must not assume a particular one. They must not
/// panic. Credential and certificate callbacks may block while the UI
/// asks the user; only this session's message pump waits.
///
/// Callbacks invoked from inside the engine (everything except
/// `on_state_changed`) must not call `disconnect()` or `cleanup()` on
/// the same session; those return [`VncError::Misuse`] there.
///
/// [`VncError::Misuse`]: crate::VncError::Misuse
pub trait SessionObserver: Send + Sync + 'static {
    /// The server wants credentials. `None` aborts authentication.
    fn on_credentials_required(&self, _kind: CredentialKind) -> Option<UserCredential> {
        None
    }

    /// Decide whether to trust a server certificate. Rejects by default.
    fn on_certificate_verify(&self, _cert: &CertificateInfo) -> bool {
        false
    }

    fn on_clipboard_received(&self, _text: &str) {}

    fn on_framebuffer_updated(&self) {}

    fn on_framebuffer_resized(&self, _width: u16, _height: u16) {}

    fn on_pointer_moved(&self, _x: i32, _y: i32) {}

    /// The lifecycle moved to `state`. `reason` is set for failures the
    /// user should see and is `None` for user-initiated disconnects and
    /// cancellation.
    fn on_state_changed(&self, _state: SessionState, _reason: Option<&str>) {}

    fn on_bell(&self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
