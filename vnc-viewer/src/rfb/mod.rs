//! `RfbEngine`: a small blocking RFB client.
//!
//! Speaks protocol 3.3, 3.7 and 3.8 with security types None and VNC
//! password. Pixel data is requested as 32bpp BGRX and decoded from
//! Raw and CopyRect rectangles; DesktopSize, cursor shape and cursor
//! position pseudo-rectangles are understood.
//!
//! The socket is split in two: the reader half is owned by whichever
//! thread is inside `init`/`wait_and_process_one_message`, the writer
//! half by whoever sends. A third clone is kept only so `interrupt` can
//! shut the connection down without waiting on either lock.

pub mod auth;
pub mod framebuffer;
pub mod messages;

use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use vnc_core::{
    ConnectionInfo, CredentialKind, EngineEvents, EngineOptions, EventSink, PointerButtons,
    ProtocolEngine, VncError,
};

use self::framebuffer::{BYTES_PER_PIXEL, Framebuffer};
use self::messages::{RectHeader, ServerInit, encoding, security, server};

type Reader = BufReader<TcpStream>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RfbEngine {
    events: EventSink,
    options: Mutex<EngineOptions>,
    connect_timeout: Duration,

    interrupted: AtomicBool,
    paused: AtomicBool,

    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<TcpStream>>,
    control: Mutex<Option<TcpStream>>,

    info: Mutex<ConnectionInfo>,
    framebuffer: Mutex<Framebuffer>,
}

impl RfbEngine {
    pub fn new(events: EventSink, connect_timeout: Duration) -> Self {
        Self {
            events,
            options: Mutex::new(EngineOptions::default()),
            connect_timeout,
            interrupted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            control: Mutex::new(None),
            info: Mutex::new(ConnectionInfo::default()),
            framebuffer: Mutex::new(Framebuffer::default()),
        }
    }

    /// Copy of the framebuffer, or `None` while the reader is drawing.
    pub fn frame_snapshot(&self) -> Option<Framebuffer> {
        self.framebuffer.try_lock().ok().map(|fb| fb.clone())
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Turn an internal failure into the reason reported to the session.
    fn reason(&self, err: VncError) -> String {
        if self.is_interrupted() {
            return "interrupted".into();
        }
        err.user_reason().unwrap_or_else(|| "interrupted".into())
    }

    // ── Connect ──────────────────────────────────────────────────

    fn open(&self, host: &str, port: u16) -> Result<TcpStream, VncError> {
        let mut last = None;
        for addr in (host, port).to_socket_addrs()? {
            if self.is_interrupted() {
                return Err(VncError::Cancelled);
            }
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, "connect failed: {e}");
                    last = Some(e);
                }
            }
        }
        Err(match last {
            Some(e) => VncError::connection(format!("could not connect to {host}:{port}: {e}")),
            None => VncError::connection(format!("{host} did not resolve")),
        })
    }

    fn handshake(&self, host: &str, port: u16) -> Result<(), VncError> {
        let stream = self.open(host, port)?;
        stream.set_nodelay(true)?;
        *lock(&self.control) = Some(stream.try_clone()?);
        *lock(&self.writer) = Some(stream.try_clone()?);
        // An interrupt that landed before `control` was stored had
        // nothing to shut down.
        if self.is_interrupted() {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(VncError::Cancelled);
        }
        stream.set_read_timeout(Some(self.connect_timeout.max(Duration::from_millis(1))))?;
        let mut rd = BufReader::new(stream);

        // Version
        let mut banner = [0u8; 12];
        rd.read_exact(&mut banner)?;
        let (major, server_minor) = messages::parse_version(&banner)
            .ok_or_else(|| VncError::Protocol("not an RFB server".into()))?;
        if major != 3 {
            return Err(VncError::Protocol(format!(
                "unsupported protocol version {major}.{server_minor}"
            )));
        }
        let minor = messages::negotiate_minor(server_minor);
        self.write(&messages::version_banner(minor))?;
        debug!(server_minor, minor, "version negotiated");

        // Security
        let options = lock(&self.options).clone();
        let chosen = if minor == 3 {
            let kind = read_u32(&mut rd)?;
            if kind == 0 {
                return Err(VncError::connection(read_reason(&mut rd)?));
            }
            u8::try_from(kind)
                .map_err(|_| VncError::Protocol(format!("unknown security type {kind}")))?
        } else {
            let count = read_u8(&mut rd)?;
            if count == 0 {
                return Err(VncError::connection(read_reason(&mut rd)?));
            }
            let offered = read_vec(&mut rd, usize::from(count))?;
            let chosen = messages::choose_security(&offered, options.security_type)
                .ok_or_else(|| {
                    VncError::Protocol(format!("no supported security type in {offered:?}"))
                })?;
            self.write(&[chosen])?;
            chosen
        };

        match chosen {
            security::NONE => {}
            security::VNC_AUTH => self.vnc_auth(&mut rd)?,
            other => {
                return Err(VncError::Protocol(format!("unsupported security type {other}")));
            }
        }

        if chosen == security::VNC_AUTH || minor >= 8 {
            if read_u32(&mut rd)? != 0 {
                let reason = if minor >= 8 {
                    read_reason(&mut rd)?
                } else {
                    String::new()
                };
                return Err(VncError::connection(if reason.is_empty() {
                    "Authentication failed".to_string()
                } else {
                    format!("Authentication failed: {reason}")
                }));
            }
        }

        // Init
        self.write(&[1])?; // shared
        let mut header = [0u8; ServerInit::SIZE];
        rd.read_exact(&mut header)?;
        let init = ServerInit::parse(&header);
        let name_len = init.name_len as usize;
        if name_len > messages::MAX_REASON {
            return Err(VncError::Protocol("desktop name too long".into()));
        }
        let name = String::from_utf8_lossy(&read_vec(&mut rd, name_len)?).into_owned();

        *lock(&self.info) = ConnectionInfo {
            desktop_name: name,
            width: init.width,
            height: init.height,
            encrypted: false,
        };
        lock(&self.framebuffer).resize(init.width, init.height);

        self.write(&messages::set_pixel_format())?;
        self.write(&messages::set_encodings(&messages::encodings_for(&options)))?;
        self.write(&messages::framebuffer_update_request(
            false,
            init.width,
            init.height,
        ))?;

        *lock(&self.reader) = Some(rd);
        Ok(())
    }

    fn vnc_auth(&self, rd: &mut Reader) -> Result<(), VncError> {
        let Some(credential) = self.events.credential(CredentialKind::Password) else {
            return Err(VncError::connection("Authentication aborted"));
        };
        let mut challenge = [0u8; auth::CHALLENGE_LEN];
        rd.read_exact(&mut challenge)?;
        self.write(&auth::vnc_auth_response(&challenge, &credential.password))
    }

    // ── Messages ─────────────────────────────────────────────────

    fn process_one(&self, rd: &mut Reader, timeout: Duration) -> Result<(), VncError> {
        rd.get_ref()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut kind = [0u8; 1];
        match rd.read(&mut kind) {
            Ok(0) => return Err(VncError::connection("server closed the connection")),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // The rest of the message is already on its way.
        rd.get_ref()
            .set_read_timeout(Some(self.connect_timeout.max(Duration::from_millis(1))))?;

        match kind[0] {
            server::FRAMEBUFFER_UPDATE => self.framebuffer_update(rd),
            server::SET_COLOUR_MAP_ENTRIES => {
                let mut head = [0u8; 5];
                rd.read_exact(&mut head)?;
                let count = u16::from_be_bytes([head[3], head[4]]);
                skip(rd, usize::from(count) * 6)
            }
            server::BELL => {
                self.events.bell();
                Ok(())
            }
            server::SERVER_CUT_TEXT => {
                let mut pad = [0u8; 3];
                rd.read_exact(&mut pad)?;
                let len = read_u32(rd)? as usize;
                if len > messages::MAX_CUT_TEXT {
                    return Err(VncError::Protocol(format!("cut text of {len} bytes")));
                }
                let text = messages::decode_latin1(&read_vec(rd, len)?);
                self.events.cut_text(&text);
                Ok(())
            }
            other => Err(VncError::Protocol(format!("unknown message type {other}"))),
        }
    }

    fn framebuffer_update(&self, rd: &mut Reader) -> Result<(), VncError> {
        let _pad = read_u8(rd)?;
        let rects = read_u16(rd)?;
        for _ in 0..rects {
            let mut raw = [0u8; RectHeader::SIZE];
            rd.read_exact(&mut raw)?;
            let rect = RectHeader::parse(&raw);
            self.rectangle(rd, rect)?;
        }

        self.events.framebuffer_updated();
        if !self.paused.load(Ordering::SeqCst) {
            let (width, height) = self.size();
            self.write(&messages::framebuffer_update_request(true, width, height))?;
        }
        Ok(())
    }

    fn rectangle(&self, rd: &mut Reader, rect: RectHeader) -> Result<(), VncError> {
        let area = usize::from(rect.width) * usize::from(rect.height);
        match rect.encoding {
            encoding::RAW => {
                lock(&self.framebuffer).read_raw(rd, rect.x, rect.y, rect.width, rect.height)?;
            }
            encoding::COPY_RECT => {
                let src_x = read_u16(rd)?;
                let src_y = read_u16(rd)?;
                lock(&self.framebuffer)
                    .copy_within(src_x, src_y, rect.x, rect.y, rect.width, rect.height);
            }
            encoding::DESKTOP_SIZE => {
                info!(width = rect.width, height = rect.height, "desktop resized");
                lock(&self.framebuffer).resize(rect.width, rect.height);
                {
                    let mut info = lock(&self.info);
                    info.width = rect.width;
                    info.height = rect.height;
                }
                self.events.framebuffer_resized(rect.width, rect.height);
            }
            encoding::POINTER_POS => {
                self.events
                    .cursor_position(i32::from(rect.x), i32::from(rect.y));
            }
            encoding::CURSOR => {
                // Shape pixels plus a 1bpp mask; the shape is not drawn.
                let mask = usize::from(rect.width).div_ceil(8) * usize::from(rect.height);
                skip(rd, area * BYTES_PER_PIXEL + mask)?;
            }
            other => {
                return Err(VncError::Protocol(format!("unsupported encoding {other}")));
            }
        }
        Ok(())
    }

    // ── Sending ──────────────────────────────────────────────────

    fn write(&self, msg: &[u8]) -> Result<(), VncError> {
        let mut writer = lock(&self.writer);
        let stream = writer
            .as_mut()
            .ok_or_else(|| VncError::connection("not connected"))?;
        stream.write_all(msg)?;
        Ok(())
    }

    fn send(&self, what: &str, msg: &[u8]) -> bool {
        if self.is_interrupted() {
            return false;
        }
        match self.write(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!("{what} not sent: {e}");
                false
            }
        }
    }

    fn size(&self) -> (u16, u16) {
        let info = lock(&self.info);
        (info.width, info.height)
    }

    fn close(&self) {
        if let Some(stream) = lock(&self.control).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        lock(&self.writer).take();
    }
}

impl ProtocolEngine for RfbEngine {
    fn configure(&self, options: &EngineOptions) {
        *lock(&self.options) = options.clone();
    }

    fn init(&self, host: &str, port: u16) -> Result<(), String> {
        debug!(host, port, "opening socket");
        self.handshake(host, port).map_err(|e| {
            self.close();
            self.reason(e)
        })?;
        let info = lock(&self.info).clone();
        info!(
            desktop = %info.desktop_name,
            width = info.width,
            height = info.height,
            "connected"
        );
        Ok(())
    }

    fn wait_and_process_one_message(&self, timeout: Duration) -> Result<(), String> {
        if self.is_interrupted() {
            return Err("interrupted".into());
        }
        let mut reader = lock(&self.reader);
        let rd = reader.as_mut().ok_or_else(|| "not connected".to_string())?;
        self.process_one(rd, timeout).map_err(|e| {
            if !self.is_interrupted() {
                warn!("connection failed: {e}");
            }
            self.reason(e)
        })
    }

    fn send_key_event(&self, keysym: u32, down: bool) -> bool {
        self.send("key event", &messages::key_event(keysym, down))
    }

    fn send_pointer_event(&self, x: i32, y: i32, buttons: PointerButtons) -> bool {
        self.send("pointer event", &messages::pointer_event(x, y, buttons))
    }

    fn send_cut_text(&self, text: &str) -> bool {
        self.send("cut text", &messages::client_cut_text(text))
    }

    fn pause_framebuffer_updates(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn refresh_framebuffer(&self) -> bool {
        let (width, height) = self.size();
        self.send(
            "update request",
            &messages::framebuffer_update_request(false, width, height),
        )
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(stream) = lock(&self.control).as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        lock(&self.info).clone()
    }

    fn destroy(&mut self) {
        self.close();
        lock(&self.reader).take();
        debug!("engine destroyed");
    }
}

// ── Wire helpers ─────────────────────────────────────────────────

fn read_u8(rd: &mut impl Read) -> io::Result<u8> {
    let mut b = [0u8; 1];
    rd.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16(rd: &mut impl Read) -> io::Result<u16> {
    let mut b = [0u8; 2];
    rd.read_exact(&mut b)?;
    Ok(u16::from_be_bytes(b))
}

fn read_u32(rd: &mut impl Read) -> io::Result<u32> {
    let mut b = [0u8; 4];
    rd.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}

fn read_vec(rd: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf)?;
    Ok(buf)
}

fn skip(rd: &mut impl Read, len: usize) -> Result<(), VncError> {
    let copied = io::copy(&mut rd.take(len as u64), &mut io::sink())?;
    if copied < len as u64 {
        return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

/// A length-prefixed failure reason.
fn read_reason(rd: &mut impl Read) -> Result<String, VncError> {
    let len = read_u32(rd)? as usize;
    if len > messages::MAX_REASON {
        return Err(VncError::Protocol("failure reason too long".into()));
    }
    Ok(String::from_utf8_lossy(&read_vec(rd, len)?).into_owned())
}
