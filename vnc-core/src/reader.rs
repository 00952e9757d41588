//! The reader loop: one dedicated thread per connected session that
//! pumps server messages through the engine.
//!
//! Each iteration holds a shared read guard for exactly one bounded
//! engine wait. On failure the loop records the reason, moves the
//! session to `Disconnected` and exits. Teardown stops it by flipping
//! the state; the loop notices at its next acquire. The loop holds the
//! session weakly, so dropping every handle also ends it.

use std::cell::Cell;
use std::sync::Weak;

use tracing::{debug, warn};

use crate::engine::ProtocolEngine;
use crate::session::Inner;

thread_local! {
    static IN_ENGINE_CALL: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as being inside an engine call for the
/// lifetime of the value.
struct EngineCallScope {
    previous: bool,
}

impl EngineCallScope {
    fn enter() -> Self {
        Self {
            previous: IN_ENGINE_CALL.with(|c| c.replace(true)),
        }
    }
}

impl Drop for EngineCallScope {
    fn drop(&mut self) {
        let previous = self.previous;
        IN_ENGINE_CALL.with(|c| c.set(previous));
    }
}

/// Run `f` flagged as an engine call. Engine callbacks fired from
/// inside `f` can then be recognised by [`in_engine_call`].
pub(crate) fn engine_call<R>(f: impl FnOnce() -> R) -> R {
    let _scope = EngineCallScope::enter();
    f()
}

/// Whether the current thread is inside an engine call (and therefore
/// holds the session's read guard).
pub(crate) fn in_engine_call() -> bool {
    IN_ENGINE_CALL.with(Cell::get)
}

pub(crate) fn run<E: ProtocolEngine>(session: Weak<Inner<E>>) {
    debug!("reader loop started");

    loop {
        let Some(inner) = session.upgrade() else {
            debug!("session dropped");
            break;
        };
        let timeout = inner.config().reader_timeout();
        let outcome = {
            let lifecycle = inner.lifecycle().read();
            let Some(engine) = lifecycle.usable_engine() else {
                break;
            };
            engine_call(|| engine.wait_and_process_one_message(timeout))
        };

        if let Err(reason) = outcome {
            if inner.shared().is_interrupted() {
                debug!("reader loop interrupted");
                inner.finish_disconnect(None);
            } else {
                let reason = if reason.is_empty() {
                    "connection lost".to_string()
                } else {
                    reason
                };
                warn!(%reason, "reader loop failed");
                inner.finish_disconnect(Some(reason));
            }
            break;
        }
    }

    debug!("reader loop exited");
}
