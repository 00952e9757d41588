//! Scripted in-memory engine and recording observer shared by the
//! session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use vnc_core::{
    ConnectionInfo, CredentialKind, EngineOptions, EventSink, NoopObserver, PointerButtons,
    ProtocolEngine, Session, SessionConfig, SessionObserver, SessionState, UserCredential,
    VncError,
};

// ── Script ───────────────────────────────────────────────────────

/// Something the engine was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Key(u32, bool),
    Pointer(i32, i32, PointerButtons),
    CutText(String),
    Pause(bool),
    Refresh,
}

/// Shared control and recording surface for [`ScriptedEngine`].
pub struct Script {
    pub init_result: Mutex<Result<(), String>>,
    /// `init` parks until interrupted.
    pub init_blocks: AtomicBool,
    /// Ask for a password during `init` and fail without one.
    pub require_password: AtomicBool,
    /// Results handed out by successive waits; when empty a wait idles
    /// for its timeout and succeeds.
    pub wait_results: Mutex<VecDeque<Result<(), String>>>,
    /// Fire `framebuffer_updated` from inside every wait.
    pub emit_frames: AtomicBool,
    /// How long `destroy` takes.
    pub destroy_delay: Mutex<Duration>,
    pub destroy_started: AtomicBool,

    pub interrupted: AtomicBool,
    pub configured: Mutex<Option<EngineOptions>>,
    pub init_target: Mutex<Option<(String, u16)>>,
    pub sent: Mutex<Vec<Sent>>,
    pub wait_calls: AtomicUsize,
    pub interrupt_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub active_waits: AtomicUsize,
    pub max_active_waits: AtomicUsize,
    pub events: OnceLock<EventSink>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init_result: Mutex::new(Ok(())),
            init_blocks: AtomicBool::new(false),
            require_password: AtomicBool::new(false),
            wait_results: Mutex::new(VecDeque::new()),
            emit_frames: AtomicBool::new(false),
            destroy_delay: Mutex::new(Duration::ZERO),
            destroy_started: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            configured: Mutex::new(None),
            init_target: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            wait_calls: AtomicUsize::new(0),
            interrupt_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            active_waits: AtomicUsize::new(0),
            max_active_waits: AtomicUsize::new(0),
            events: OnceLock::new(),
        }
    }
}

impl Script {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn events(&self) -> &EventSink {
        self.events.get().expect("engine created")
    }

    fn record(&self, sent: Sent) -> bool {
        if self.interrupted.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(sent);
        true
    }

    /// Sleep up to `limit`, returning early once interrupted.
    fn park(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.interrupted.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        !self.interrupted.load(Ordering::SeqCst)
    }
}

// ── ScriptedEngine ───────────────────────────────────────────────

pub struct ScriptedEngine {
    script: Arc<Script>,
    events: EventSink,
}

impl ProtocolEngine for ScriptedEngine {
    fn configure(&self, options: &EngineOptions) {
        *self.script.configured.lock().unwrap() = Some(options.clone());
    }

    fn init(&self, host: &str, port: u16) -> Result<(), String> {
        *self.script.init_target.lock().unwrap() = Some((host.to_string(), port));
        if self.script.init_blocks.load(Ordering::SeqCst) {
            self.script.park(Duration::from_secs(30));
            return Err("interrupted".into());
        }
        if self.script.interrupted.load(Ordering::SeqCst) {
            return Err("interrupted".into());
        }
        if self.script.require_password.load(Ordering::SeqCst) {
            match self.events.credential(CredentialKind::Password) {
                Some(cred) if cred.password == "secret" => {}
                Some(_) => return Err("Authentication failed".into()),
                None => return Err("Authentication aborted".into()),
            }
        }
        self.script.init_result.lock().unwrap().clone()
    }

    fn wait_and_process_one_message(&self, timeout: Duration) -> Result<(), String> {
        let active = self.script.active_waits.fetch_add(1, Ordering::SeqCst) + 1;
        self.script
            .max_active_waits
            .fetch_max(active, Ordering::SeqCst);
        self.script.wait_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.script.wait_results.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None if self.script.park(timeout) => {
                if self.script.emit_frames.load(Ordering::SeqCst) {
                    self.events.framebuffer_updated();
                }
                Ok(())
            }
            None => Err("interrupted".into()),
        };

        self.script.active_waits.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn send_key_event(&self, keysym: u32, down: bool) -> bool {
        self.script.record(Sent::Key(keysym, down))
    }

    fn send_pointer_event(&self, x: i32, y: i32, buttons: PointerButtons) -> bool {
        self.script.record(Sent::Pointer(x, y, buttons))
    }

    fn send_cut_text(&self, text: &str) -> bool {
        self.script.record(Sent::CutText(text.to_string()))
    }

    fn pause_framebuffer_updates(&self, paused: bool) {
        self.script.record(Sent::Pause(paused));
    }

    fn refresh_framebuffer(&self) -> bool {
        self.script.record(Sent::Refresh)
    }

    fn interrupt(&self) {
        self.script.interrupt_calls.fetch_add(1, Ordering::SeqCst);
        self.script.interrupted.store(true, Ordering::SeqCst);
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            desktop_name: "scripted".into(),
            width: 800,
            height: 600,
            encrypted: false,
        }
    }

    fn destroy(&mut self) {
        self.script.destroy_started.store(true, Ordering::SeqCst);
        let delay = *self.script.destroy_delay.lock().unwrap();
        thread::sleep(delay);
        self.script.destroy_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Recorder ─────────────────────────────────────────────────────

/// Observer that records everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub states: Mutex<Vec<(SessionState, Option<String>)>>,
    pub clipboard: Mutex<Vec<String>>,
    pub pointer_moves: Mutex<Vec<(i32, i32)>>,
    pub frames: AtomicUsize,
    pub bells: AtomicUsize,
    pub password: Mutex<Option<String>>,
    /// When set, every framebuffer update tries to tear this session down.
    pub teardown_target: OnceLock<Session<ScriptedEngine>>,
    /// When set, reaching `Connected` runs `cleanup()` on this session.
    pub cleanup_on_connected: OnceLock<Session<ScriptedEngine>>,
    pub teardown_errors: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn count(&self, state: SessionState) -> usize {
        self.states().into_iter().filter(|s| *s == state).count()
    }

    /// Every recorded step must be a legal successor of the previous one.
    pub fn assert_legal_transitions(&self) {
        let mut prev = SessionState::Created;
        for next in self.states() {
            assert!(prev.allows(next), "illegal transition {prev} -> {next}");
            prev = next;
        }
    }
}

impl SessionObserver for Recorder {
    fn on_credentials_required(&self, _kind: CredentialKind) -> Option<UserCredential> {
        self.password
            .lock()
            .unwrap()
            .clone()
            .map(UserCredential::password)
    }

    fn on_clipboard_received(&self, text: &str) {
        self.clipboard.lock().unwrap().push(text.to_string());
    }

    fn on_framebuffer_updated(&self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.teardown_target.get() {
            for result in [session.disconnect(), session.cleanup()] {
                if let Err(e) = result {
                    self.teardown_errors.lock().unwrap().push(e.to_string());
                }
            }
        }
    }

    fn on_pointer_moved(&self, x: i32, y: i32) {
        self.pointer_moves.lock().unwrap().push((x, y));
    }

    fn on_state_changed(&self, state: SessionState, reason: Option<&str>) {
        self.states
            .lock()
            .unwrap()
            .push((state, reason.map(str::to_string)));
        if state == SessionState::Connected {
            if let Some(session) = self.cleanup_on_connected.get() {
                if let Err(e) = session.cleanup() {
                    self.teardown_errors.lock().unwrap().push(e.to_string());
                }
            }
        }
    }

    fn on_bell(&self) {
        self.bells.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        reader_timeout_ms: 10,
        sender_shutdown_timeout_secs: 5,
        reader_join_timeout_secs: 5,
        ..SessionConfig::default()
    }
}

/// Build a session over a fresh script with a recording observer.
pub fn scripted_session() -> (Session<ScriptedEngine>, Arc<Script>, Arc<Recorder>) {
    let script = Arc::new(Script::default());
    let recorder = Arc::new(Recorder::default());
    let session = session_with(Arc::clone(&script), Arc::clone(&recorder) as _);
    (session, script, recorder)
}

pub fn session_with(
    script: Arc<Script>,
    observer: Arc<dyn SessionObserver>,
) -> Session<ScriptedEngine> {
    Session::new(fast_config(), observer, move |events| {
        let _ = script.events.set(Arc::clone(&events));
        Ok(ScriptedEngine { script, events })
    })
    .expect("session")
}

pub fn quiet_session(script: Arc<Script>) -> Session<ScriptedEngine> {
    session_with(script, Arc::new(NoopObserver))
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn is_cancelled(result: &Result<(), VncError>) -> bool {
    matches!(result, Err(VncError::Cancelled))
}
