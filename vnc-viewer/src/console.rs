//! Stdin for the viewer.
//!
//! A single thread reads stdin. Each line goes to a pending password
//! prompt when there is one, otherwise to the command loop. Prompts and
//! commands can then share the terminal while `connect` runs on its own
//! thread.

use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info};
use vnc_core::{ProtocolEngine, Session, VncError};

use crate::commands::{self, Command};

/// What the relay hands to the command loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Stdin reached end of file or failed.
    Closed,
}

/// Everything the main thread waits on.
#[derive(Debug)]
pub enum Event {
    Input(Input),
    Connected(Result<(), VncError>),
}

impl From<Input> for Event {
    fn from(input: Input) -> Self {
        Event::Input(input)
    }
}

#[derive(Default)]
struct Slot {
    waiting: Option<Sender<String>>,
    closed: bool,
}

#[derive(Default)]
pub struct LineRelay {
    slot: Mutex<Slot>,
}

impl LineRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the reading thread. Lines no prompt claims are forwarded to
    /// `out`, followed by [`Input::Closed`] at end of input.
    pub fn spawn<R, T>(self: &Arc<Self>, input: R, out: Sender<T>) -> io::Result<()>
    where
        R: BufRead + Send + 'static,
        T: From<Input> + Send + 'static,
    {
        let relay = Arc::clone(self);
        thread::Builder::new()
            .name("vnc-stdin".into())
            .spawn(move || {
                for line in input.lines() {
                    let Ok(line) = line else { break };
                    let Some(line) = relay.deliver(line) else {
                        continue;
                    };
                    if out.send(T::from(Input::Line(line))).is_err() {
                        return;
                    }
                }
                debug!("stdin closed");
                relay.close();
                let _ = out.send(T::from(Input::Closed));
            })?;
        Ok(())
    }

    /// Block until the next line of input. `None` once input is closed.
    pub fn prompt(&self) -> Option<String> {
        let rx = {
            let mut slot = self.slot();
            if slot.closed {
                return None;
            }
            let (tx, rx) = mpsc::channel();
            slot.waiting = Some(tx);
            rx
        };
        rx.recv().ok()
    }

    /// Hand `line` to a waiting prompt. Gives it back if nobody claimed it.
    fn deliver(&self, line: String) -> Option<String> {
        let waiting = self.slot().waiting.take();
        match waiting {
            Some(tx) => tx.send(line).err().map(|e| e.0),
            None => Some(line),
        }
    }

    /// Fail any pending and future prompts.
    fn close(&self) {
        let mut slot = self.slot();
        slot.closed = true;
        slot.waiting = None;
    }
}

/// Outcome of [`connect_watching_input`].
#[derive(Debug)]
pub struct Connect {
    pub result: Result<(), VncError>,
    /// The user asked to stop (`quit` or end of input) meanwhile.
    pub stop: bool,
}

/// Run `session.connect` on its own thread while serving `inbox`.
///
/// `quit` or end of input interrupts the handshake; other commands are
/// refused until the connection is up.
pub fn connect_watching_input<E: ProtocolEngine>(
    session: &Session<E>,
    host: &str,
    port: u16,
    tx: Sender<Event>,
    inbox: &Receiver<Event>,
) -> io::Result<Connect> {
    {
        let session = session.clone();
        let host = host.to_string();
        thread::Builder::new()
            .name("vnc-connect".into())
            .spawn(move || {
                let result = session.connect(&host, port);
                let _ = tx.send(Event::Connected(result));
            })?;
    }

    let mut stop = false;
    loop {
        match inbox.recv() {
            Ok(Event::Connected(result)) => return Ok(Connect { result, stop }),
            Ok(Event::Input(Input::Line(line))) => match commands::parse(&line) {
                Ok(Some(Command::Quit)) => {
                    info!("cancelling connection");
                    stop = true;
                    session.interrupt();
                }
                Ok(Some(_)) => eprintln!("still connecting; 'quit' cancels"),
                Ok(None) => {}
                Err(msg) => eprintln!("{msg}"),
            },
            Ok(Event::Input(Input::Closed)) => {
                stop = true;
                session.interrupt();
            }
            Err(_) => {
                return Ok(Connect {
                    result: Err(VncError::Other("connect thread exited".into())),
                    stop,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_prompt(relay: &LineRelay) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while relay.slot().waiting.is_none() {
            assert!(Instant::now() < deadline, "prompt never registered");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn lines_reach_the_command_channel_then_close() {
        let relay = Arc::new(LineRelay::new());
        let (tx, rx) = mpsc::channel::<Input>();
        relay
            .spawn(io::Cursor::new(b"info\nquit\n".to_vec()), tx)
            .unwrap();

        let got: Vec<Input> = rx.iter().collect();
        assert_eq!(
            got,
            vec![
                Input::Line("info".into()),
                Input::Line("quit".into()),
                Input::Closed
            ]
        );
        assert_eq!(relay.prompt(), None);
    }

    #[test]
    fn pending_prompt_claims_the_next_line() {
        let relay = Arc::new(LineRelay::new());
        let asking = {
            let relay = Arc::clone(&relay);
            thread::spawn(move || relay.prompt())
        };
        wait_for_prompt(&relay);

        assert_eq!(relay.deliver("hunter2".into()), None);
        assert_eq!(asking.join().unwrap().as_deref(), Some("hunter2"));
        assert_eq!(relay.deliver("info".into()).as_deref(), Some("info"));
    }

    #[test]
    fn closing_input_fails_a_pending_prompt() {
        let relay = Arc::new(LineRelay::new());
        let asking = {
            let relay = Arc::clone(&relay);
            thread::spawn(move || relay.prompt())
        };
        wait_for_prompt(&relay);

        relay.close();
        assert_eq!(asking.join().unwrap(), None);
    }
}
