//! The caller-facing session.
//!
//! A [`Session`] owns exactly one engine for its whole life. The engine
//! sits behind a [`Guard`] together with the lifecycle state:
//!
//! - `connect()`, the reader loop and the sender worker take blocking
//!   read guards around engine calls.
//! - UI-facing calls (`interrupt`, `is_usable`, `try_with_engine`)
//!   only ever `try_read` and silently skip on contention.
//! - State transitions and teardown take the write guard; teardown
//!   drops the engine inside it, so nothing can touch a destroyed
//!   engine.
//!
//! Outbound input never touches the engine on the calling thread: it
//! is queued on the [`SenderQueue`] and executed in order on its worker.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::engine::{
    CertificateInfo, ConnectionInfo, CredentialKind, EngineEvents, EngineHandle, EventSink,
    ProtocolEngine, UserCredential,
};
use crate::error::VncError;
use crate::guard::Guard;
use crate::input::{PointerButtons, PointerState};
use crate::observer::SessionObserver;
use crate::reader::{self, engine_call, in_engine_call};
use crate::sender::{SenderQueue, Worker};
use crate::state::SessionState;

/// Ports below this are VNC display numbers (`:1` means 5901).
const MAX_DISPLAY_NUMBER: u16 = 100;
const BASE_PORT: u16 = 5900;

fn display_port(port: u16) -> u16 {
    if port < MAX_DISPLAY_NUMBER {
        BASE_PORT + port
    } else {
        port
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Lifecycle ────────────────────────────────────────────────────

/// Everything protected by the guard.
pub(crate) struct Lifecycle<E: ProtocolEngine> {
    state: SessionState,
    engine: Option<EngineHandle<E>>,
}

impl<E: ProtocolEngine> Lifecycle<E> {
    /// The engine, if the session is connected.
    pub(crate) fn usable_engine(&self) -> Option<&E> {
        if self.state.is_connected() {
            self.engine.as_deref()
        } else {
            None
        }
    }
}

// ── Shared ───────────────────────────────────────────────────────

/// State reachable without the guard: read by UI queries, written by
/// submission paths and engine callbacks.
pub(crate) struct Shared {
    observer: Arc<dyn SessionObserver>,
    state_tag: AtomicU8,
    last_error: Mutex<Option<String>>,
    interrupted: AtomicBool,
    pointer: PointerState,
    input_disabled: AtomicBool,
    frame_updates_paused: AtomicBool,
    suppress_pointer_moves: AtomicBool,
    last_clipboard: Mutex<Option<String>>,
}

impl Shared {
    fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            observer,
            state_tag: AtomicU8::new(state_to_tag(SessionState::Created)),
            last_error: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            pointer: PointerState::new(),
            input_disabled: AtomicBool::new(false),
            frame_updates_paused: AtomicBool::new(false),
            suppress_pointer_moves: AtomicBool::new(false),
            last_clipboard: Mutex::new(None),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn state(&self) -> SessionState {
        tag_to_state(self.state_tag.load(Ordering::Acquire))
    }

    /// Mirror `state` for lock-free readers. Call with the write guard held.
    fn publish(&self, state: SessionState) {
        self.state_tag.store(state_to_tag(state), Ordering::Release);
    }

    fn notify_state(&self, state: SessionState, reason: Option<&str>) {
        debug!(%state, ?reason, "state changed");
        self.observer.on_state_changed(state, reason);
    }
}

fn state_to_tag(state: SessionState) -> u8 {
    match state {
        SessionState::Created => 0,
        SessionState::Connecting => 1,
        SessionState::Connected => 2,
        SessionState::Disconnected => 3,
        SessionState::Destroyed => 4,
    }
}

fn tag_to_state(tag: u8) -> SessionState {
    match tag {
        0 => SessionState::Created,
        1 => SessionState::Connecting,
        2 => SessionState::Connected,
        3 => SessionState::Disconnected,
        _ => SessionState::Destroyed,
    }
}

impl EngineEvents for Shared {
    fn credential(&self, kind: CredentialKind) -> Option<UserCredential> {
        debug!(?kind, "server requested credentials");
        self.observer.on_credentials_required(kind)
    }

    fn verify_certificate(&self, cert: &CertificateInfo) -> bool {
        debug!(subject = %cert.subject, "server presented certificate");
        self.observer.on_certificate_verify(cert)
    }

    fn bell(&self) {
        self.observer.on_bell();
    }

    fn cut_text(&self, text: &str) {
        *lock(&self.last_clipboard) = Some(text.to_string());
        self.observer.on_clipboard_received(text);
    }

    fn cursor_position(&self, x: i32, y: i32) -> bool {
        if self.suppress_pointer_moves.load(Ordering::Acquire) {
            return true;
        }
        self.pointer.set_position(x, y);
        self.observer.on_pointer_moved(x, y);
        true
    }

    fn framebuffer_updated(&self) {
        self.observer.on_framebuffer_updated();
    }

    fn framebuffer_resized(&self, width: u16, height: u16) {
        debug!(width, height, "framebuffer resized");
        self.observer.on_framebuffer_resized(width, height);
    }
}

// ── Inner ────────────────────────────────────────────────────────

pub(crate) struct Inner<E: ProtocolEngine> {
    config: SessionConfig,
    lifecycle: Guard<Lifecycle<E>>,
    shared: Arc<Shared>,
    sender: SenderQueue,
    reader: Mutex<Option<Worker>>,
}

impl<E: ProtocolEngine> Inner<E> {
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn lifecycle(&self) -> &Guard<Lifecycle<E>> {
        &self.lifecycle
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Apply `f` to the state under the write guard, then notify.
    fn transition(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<(), VncError>,
    ) -> Result<SessionState, VncError> {
        let state = {
            let mut lifecycle = self.lifecycle.write();
            f(&mut lifecycle.state)?;
            self.shared.publish(lifecycle.state);
            lifecycle.state
        };
        self.shared.notify_state(state, None);
        Ok(state)
    }

    /// Move to `Disconnected` if the state allows it, recording `reason`.
    ///
    /// Returns `false` (and notifies nobody) if another path already
    /// ended the connection.
    pub(crate) fn finish_disconnect(&self, reason: Option<String>) -> bool {
        {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.state.disconnect().is_err() {
                return false;
            }
            self.shared.publish(lifecycle.state);
            *lock(&self.shared.last_error) = reason.clone();
        }
        match &reason {
            Some(reason) => warn!(%reason, "disconnected"),
            None => info!("disconnected"),
        }
        self.shared
            .notify_state(SessionState::Disconnected, reason.as_deref());
        true
    }
}

/// Runs when the last handle goes away. The reader loop only holds a
/// weak reference, so a session dropped without `cleanup()` still
/// releases its engine here and the loop stops at its next iteration.
impl<E: ProtocolEngine> Drop for Inner<E> {
    fn drop(&mut self) {
        self.sender.close();
        let destroyed_now = {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.state.destroy() {
                self.shared.publish(lifecycle.state);
                drop(lifecycle.engine.take());
                true
            } else {
                false
            }
        };
        if destroyed_now {
            debug!("session dropped without cleanup; engine released");
            self.shared.notify_state(SessionState::Destroyed, None);
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// One connection to a remote display server.
///
/// Cheap to clone; all clones refer to the same session. A session
/// connects at most once. Call [`cleanup`](Self::cleanup) when done;
/// dropping the last clone without it still destroys the engine, but
/// without waiting for the worker threads.
pub struct Session<E: ProtocolEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: ProtocolEngine> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ProtocolEngine> Session<E> {
    /// Create the engine and the sender worker.
    ///
    /// `create` receives the event table the engine must report
    /// through. Any failure is an [`VncError::Allocation`].
    pub fn new<F>(
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
        create: F,
    ) -> Result<Self, VncError>
    where
        F: FnOnce(EventSink) -> Result<E, VncError>,
    {
        let shared = Arc::new(Shared::new(observer));
        let events: EventSink = Arc::clone(&shared) as EventSink;

        let engine = create(events).map_err(|e| match e {
            VncError::Allocation(_) => e,
            other => VncError::Allocation(other.to_string()),
        })?;
        engine.configure(&config.engine);
        let engine = EngineHandle::new(engine);

        let sender = SenderQueue::start("vnc-sender")
            .map_err(|e| VncError::Allocation(format!("failed to start sender: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Guard::new(Lifecycle {
                    state: SessionState::Created,
                    engine: Some(engine),
                }),
                shared,
                sender,
                reader: Mutex::new(None),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect and run the handshake, then start the reader loop.
    ///
    /// Blocks on network I/O; never call it from a UI thread. A port
    /// below 100 is treated as a display number.
    ///
    /// Errors: [`VncError::Connection`] with the transport's reason,
    /// [`VncError::Cancelled`] if interrupted or torn down meanwhile,
    /// [`VncError::Misuse`] if the session was already used.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), VncError> {
        if in_engine_call() {
            return Err(VncError::Misuse("connect() called from an engine callback"));
        }
        let port = display_port(port);
        self.inner.transition(SessionState::begin_connect)?;
        info!(host, port, "connecting");

        let result = {
            let lifecycle = self.inner.lifecycle.read();
            match (lifecycle.state, lifecycle.engine.as_deref()) {
                (SessionState::Connecting, Some(engine)) => {
                    engine_call(|| engine.init(host, port))
                }
                _ => return Err(VncError::Cancelled),
            }
        };

        match result {
            Ok(()) => {
                if self.inner.transition(SessionState::complete_connect).is_err() {
                    return Err(VncError::Cancelled);
                }
                info!(host, port, "connected");
                self.spawn_reader()
            }
            Err(_) if self.inner.shared.is_interrupted() => {
                self.inner.finish_disconnect(None);
                Err(VncError::Cancelled)
            }
            Err(reason) => {
                let reason = if reason.is_empty() {
                    format!("could not connect to {host}:{port}")
                } else {
                    reason
                };
                self.inner.finish_disconnect(Some(reason.clone()));
                Err(VncError::Connection { reason })
            }
        }
    }

    fn spawn_reader(&self) -> Result<(), VncError> {
        let mut slot = lock(&self.inner.reader);
        if slot.is_some() {
            return Err(VncError::Misuse("reader loop already started"));
        }
        let spawned = {
            // A cleanup racing the end of the handshake wins.
            let lifecycle = self.inner.lifecycle.read();
            if lifecycle.usable_engine().is_none() {
                debug!("session torn down before the reader loop started");
                return Err(VncError::Cancelled);
            }
            let session = Arc::downgrade(&self.inner);
            Worker::spawn("vnc-reader", move || reader::run(session))
        };
        match spawned {
            Ok(worker) => {
                *slot = Some(worker);
                Ok(())
            }
            Err(e) => {
                drop(slot);
                self.inner
                    .finish_disconnect(Some(format!("failed to start reader loop: {e}")));
                Err(VncError::Io(e))
            }
        }
    }

    /// End the connection. The engine stays allocated until
    /// [`cleanup`](Self::cleanup).
    ///
    /// A no-op once disconnected or destroyed.
    pub fn disconnect(&self) -> Result<(), VncError> {
        if in_engine_call() {
            return Err(VncError::Misuse(
                "disconnect() called from an engine callback",
            ));
        }
        match self.state() {
            SessionState::Created => Err(VncError::Misuse("disconnect() before connect()")),
            SessionState::Disconnected | SessionState::Destroyed => Ok(()),
            SessionState::Connecting | SessionState::Connected => {
                self.interrupt();
                self.inner.finish_disconnect(None);
                Ok(())
            }
        }
    }

    /// Tear the session down and release the engine. Idempotent and
    /// safe to race from several threads: the engine is destroyed
    /// exactly once.
    ///
    /// Waits (bounded) for the sender worker and the reader loop.
    pub fn cleanup(&self) -> Result<(), VncError> {
        if in_engine_call() {
            return Err(VncError::Misuse("cleanup() called from an engine callback"));
        }

        self.interrupt();
        self.inner.sender.close();

        let destroyed_now = {
            let mut lifecycle = self.inner.lifecycle.write();
            if lifecycle.state.destroy() {
                self.inner.shared.publish(lifecycle.state);
                drop(lifecycle.engine.take());
                true
            } else {
                false
            }
        };
        if !destroyed_now {
            return Ok(());
        }
        info!("session destroyed");
        self.inner
            .shared
            .notify_state(SessionState::Destroyed, None);

        self.inner
            .sender
            .shutdown(self.inner.config.sender_shutdown_timeout());
        let reader = lock(&self.inner.reader).take();
        if let Some(worker) = reader {
            worker.join(self.inner.config.reader_join_timeout());
        }
        Ok(())
    }

    /// Abort whatever blocking engine call is in flight. Never blocks;
    /// skipped if teardown currently holds the guard. Once armed it
    /// stays armed.
    pub fn interrupt(&self) {
        self.inner.shared.interrupted.store(true, Ordering::Release);
        match self.inner.lifecycle.try_read() {
            Some(lifecycle) => {
                if let Some(engine) = lifecycle.engine.as_deref() {
                    engine.interrupt();
                }
            }
            None => debug!("interrupt skipped: session is being torn down"),
        }
    }

    // ── Outbound input ───────────────────────────────────────────

    /// Queue `op` on the sender worker. It runs only if the session is
    /// still connected by then; a failing send is dropped.
    fn submit<F>(&self, what: &'static str, op: F) -> bool
    where
        F: FnOnce(&E) -> bool + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.sender.submit(move || {
            let lifecycle = inner.lifecycle.read();
            if let Some(engine) = lifecycle.usable_engine() {
                if !op(engine) {
                    debug!(what, "send failed; dropped");
                }
            }
        })
    }

    fn input_allowed(&self) -> bool {
        !self.inner.shared.input_disabled.load(Ordering::Acquire)
    }

    /// Queue a key press or release. Returns `false` if dropped.
    pub fn send_key(&self, keysym: u32, down: bool) -> bool {
        if !self.input_allowed() {
            return false;
        }
        self.submit("key", move |engine| engine.send_key_event(keysym, down))
    }

    /// Queue a pointer move with the buttons currently held.
    pub fn send_pointer(&self, x: i32, y: i32) -> bool {
        if !self.input_allowed() {
            return false;
        }
        let pointer = &self.inner.shared.pointer;
        pointer.set_position(x, y);
        let buttons = pointer.buttons();
        self.submit("pointer", move |engine| {
            engine.send_pointer_event(x, y, buttons)
        })
    }

    /// Queue a button press or release at `(x, y)`.
    ///
    /// The mask is updated now and captured by value, so later
    /// submissions cannot leak into this event.
    pub fn send_pointer_button(&self, button: PointerButtons, down: bool, x: i32, y: i32) -> bool {
        if !self.input_allowed() {
            return false;
        }
        let pointer = &self.inner.shared.pointer;
        pointer.set_position(x, y);
        let buttons = if down {
            pointer.press(button)
        } else {
            pointer.release(button)
        };
        self.submit("pointer button", move |engine| {
            engine.send_pointer_event(x, y, buttons)
        })
    }

    /// Queue one wheel notch: press and release of a wheel button.
    pub fn send_scroll(&self, wheel: PointerButtons, x: i32, y: i32) -> bool {
        if !self.input_allowed() {
            return false;
        }
        let wheel = wheel & PointerButtons::WHEEL;
        let pointer = &self.inner.shared.pointer;
        pointer.set_position(x, y);
        let held = pointer.buttons();
        self.submit("scroll", move |engine| {
            engine.send_pointer_event(x, y, held | wheel) && engine.send_pointer_event(x, y, held)
        })
    }

    /// Queue local clipboard text for the server.
    ///
    /// Text identical to what the server last sent us is not echoed back.
    pub fn send_clipboard(&self, text: &str) -> bool {
        if !self.input_allowed() {
            return false;
        }
        {
            let mut last = lock(&self.inner.shared.last_clipboard);
            if last.as_deref() == Some(text) {
                return false;
            }
            *last = Some(text.to_string());
        }
        let text = text.to_string();
        self.submit("clipboard", move |engine| engine.send_cut_text(&text))
    }

    /// Stop or resume framebuffer updates. Resuming also requests a
    /// full refresh.
    pub fn set_framebuffer_updates_paused(&self, paused: bool) -> bool {
        let was = self
            .inner
            .shared
            .frame_updates_paused
            .swap(paused, Ordering::AcqRel);
        if was == paused {
            return false;
        }
        self.submit("pause updates", move |engine| {
            engine.pause_framebuffer_updates(paused);
            paused || engine.refresh_framebuffer()
        })
    }

    /// Request a full framebuffer update.
    pub fn refresh_framebuffer(&self) -> bool {
        self.submit("refresh", |engine| engine.refresh_framebuffer())
    }

    // ── Flags ────────────────────────────────────────────────────

    /// View-only mode: drop all key, pointer and clipboard input.
    pub fn set_input_disabled(&self, disabled: bool) {
        self.inner
            .shared
            .input_disabled
            .store(disabled, Ordering::Release);
    }

    pub fn is_input_disabled(&self) -> bool {
        !self.input_allowed()
    }

    pub fn is_framebuffer_updates_paused(&self) -> bool {
        self.inner.shared.frame_updates_paused.load(Ordering::Acquire)
    }

    /// Ignore cursor positions reported by the server.
    pub fn set_suppress_incoming_pointer_moves(&self, suppress: bool) {
        self.inner
            .shared
            .suppress_pointer_moves
            .store(suppress, Ordering::Release);
    }

    // ── Non-blocking reads ───────────────────────────────────────

    /// Current lifecycle state. Lock-free.
    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    /// Reason recorded when the session became `Disconnected`, if the
    /// disconnect was a failure.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.shared.last_error).clone()
    }

    /// Last known pointer position.
    pub fn pointer(&self) -> (i32, i32) {
        self.inner.shared.pointer.position()
    }

    /// Buttons currently held, as tracked at submission time.
    pub fn pointer_buttons(&self) -> PointerButtons {
        self.inner.shared.pointer.buttons()
    }

    /// Last clipboard text exchanged with the server.
    pub fn last_clipboard_text(&self) -> Option<String> {
        lock(&self.inner.shared.last_clipboard).clone()
    }

    /// Whether the engine may be used right now. Never blocks; returns
    /// `false` on contention.
    pub fn is_usable(&self) -> bool {
        self.inner
            .lifecycle
            .try_read()
            .is_some_and(|lifecycle| lifecycle.usable_engine().is_some())
    }

    /// Run `f` against the engine if the session is connected and the
    /// guard is immediately available. Meant for renderers uploading
    /// frames or cursors.
    pub fn try_with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
        let lifecycle = self.inner.lifecycle.try_read()?;
        lifecycle.usable_engine().map(f)
    }

    /// Remote desktop details, if connected.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.try_with_engine(|engine| engine.connection_info())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}
