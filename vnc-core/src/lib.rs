//! # vnc-core
//!
//! Session core for a VNC viewer: everything between the UI and a
//! blocking RFB protocol engine.
//!
//! This crate contains:
//! - **Session**: `Session`, the thread-safe lifecycle wrapper around one engine
//! - **State**: `SessionState`, the validated lifecycle state machine
//! - **Guard**: reader/writer lock with a non-blocking read mode
//! - **Engine**: `ProtocolEngine` / `EngineEvents`, the engine contract
//! - **Observer**: `SessionObserver`, how the session reports to its caller
//! - **Sender**: `SenderQueue`, the ordered outbound command queue
//! - **Input**: `PointerButtons`, pointer tracking and keysyms
//! - **Error**: `VncError`, the `thiserror`-based error type
//!
//! ```text
//!  UI thread ──submit──► SenderQueue worker ──send_*──┐
//!      │                                              ▼
//!      ├──try_read──► Guard<engine + state> ◄──── ProtocolEngine
//!      │                    ▲                         │
//!  connect()          reader loop ──wait/process──────┘
//!                           │
//!                           └──► SessionObserver callbacks
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod input;
pub mod observer;
mod reader;
pub mod sender;
pub mod session;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{EngineOptions, SessionConfig};
pub use engine::{
    CertificateInfo, ConnectionInfo, CredentialKind, EngineEvents, EngineHandle, EventSink,
    ProtocolEngine, UserCredential,
};
pub use error::VncError;
pub use guard::Guard;
pub use input::{PointerButtons, PointerState, keysym};
pub use observer::{NoopObserver, SessionObserver};
pub use sender::SenderQueue;
pub use session::Session;
pub use state::SessionState;
