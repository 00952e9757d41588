//! RFB message builders, parsers and constants (RFC 6143).
//!
//! Client messages are built into `BytesMut`; server messages are
//! parsed field by field by the engine straight off the socket.

use bytes::{BufMut, BytesMut};
use vnc_core::{EngineOptions, PointerButtons};

// ── Constants ────────────────────────────────────────────────────

/// Highest protocol minor version we speak (`RFB 003.008`).
pub const MAX_MINOR_VERSION: u32 = 8;

/// Upper bound on server cut text we are willing to buffer.
pub const MAX_CUT_TEXT: usize = 16 * 1024 * 1024;

/// Upper bound on failure-reason strings from the server.
pub const MAX_REASON: usize = 64 * 1024;

pub mod security {
    pub const INVALID: u8 = 0;
    pub const NONE: u8 = 1;
    pub const VNC_AUTH: u8 = 2;
}

pub mod client {
    pub const SET_PIXEL_FORMAT: u8 = 0;
    pub const SET_ENCODINGS: u8 = 2;
    pub const FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
    pub const KEY_EVENT: u8 = 4;
    pub const POINTER_EVENT: u8 = 5;
    pub const CLIENT_CUT_TEXT: u8 = 6;
}

pub mod server {
    pub const FRAMEBUFFER_UPDATE: u8 = 0;
    pub const SET_COLOUR_MAP_ENTRIES: u8 = 1;
    pub const BELL: u8 = 2;
    pub const SERVER_CUT_TEXT: u8 = 3;
}

pub mod encoding {
    pub const RAW: i32 = 0;
    pub const COPY_RECT: i32 = 1;
    pub const DESKTOP_SIZE: i32 = -223;
    pub const POINTER_POS: i32 = -232;
    pub const CURSOR: i32 = -239;
    /// JPEG quality pseudo-encodings span `-32` (lowest) to `-23`.
    pub const QUALITY_LEVEL_0: i32 = -32;
}

// ── Version ──────────────────────────────────────────────────────

/// Parse a 12-byte `RFB xxx.yyy\n` banner into `(major, minor)`.
pub fn parse_version(banner: &[u8; 12]) -> Option<(u32, u32)> {
    if &banner[..4] != b"RFB " || banner[7] != b'.' || banner[11] != b'\n' {
        return None;
    }
    let digits = |s: &[u8]| std::str::from_utf8(s).ok()?.parse::<u32>().ok();
    Some((digits(&banner[4..7])?, digits(&banner[8..11])?))
}

/// The minor version we answer a server offering `server_minor` with.
///
/// Anything unknown between 3.3 and 3.7 falls back to 3.3.
pub fn negotiate_minor(server_minor: u32) -> u32 {
    match server_minor {
        m if m >= MAX_MINOR_VERSION => MAX_MINOR_VERSION,
        7 => 7,
        _ => 3,
    }
}

pub fn version_banner(minor: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    out.copy_from_slice(format!("RFB 003.{minor:03}\n").as_bytes());
    out
}

/// Pick a security type from what the server offered.
pub fn choose_security(offered: &[u8], preferred: i32) -> Option<u8> {
    if let Ok(preferred) = u8::try_from(preferred) {
        if preferred != security::INVALID && offered.contains(&preferred) {
            return Some(preferred);
        }
    }
    [security::NONE, security::VNC_AUTH]
        .into_iter()
        .find(|t| offered.contains(t))
}

// ── Pixel format ─────────────────────────────────────────────────

/// 32bpp true colour, little-endian, `0x00RRGGBB`: BGRX in memory.
pub fn pixel_format_bgrx() -> [u8; 16] {
    let mut pf = [0u8; 16];
    pf[0] = 32; // bits-per-pixel
    pf[1] = 24; // depth
    pf[2] = 0; // big-endian-flag
    pf[3] = 1; // true-colour-flag
    pf[4..6].copy_from_slice(&255u16.to_be_bytes());
    pf[6..8].copy_from_slice(&255u16.to_be_bytes());
    pf[8..10].copy_from_slice(&255u16.to_be_bytes());
    pf[10] = 16; // red-shift
    pf[11] = 8; // green-shift
    pf[12] = 0; // blue-shift
    pf
}

// ── Client → server ──────────────────────────────────────────────

pub fn set_pixel_format() -> BytesMut {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u8(client::SET_PIXEL_FORMAT);
    buf.put_bytes(0, 3);
    buf.put_slice(&pixel_format_bgrx());
    buf
}

/// Encodings to advertise for `options`, most preferred first.
pub fn encodings_for(options: &EngineOptions) -> Vec<i32> {
    let mut list = vec![];
    if !options.raw_encoding {
        list.push(encoding::COPY_RECT);
    }
    list.push(encoding::RAW);
    list.push(encoding::DESKTOP_SIZE);
    if options.use_local_cursor {
        list.push(encoding::CURSOR);
        list.push(encoding::POINTER_POS);
    }
    list.push(encoding::QUALITY_LEVEL_0 + i32::from(options.image_quality.min(9)));
    list
}

pub fn set_encodings(encodings: &[i32]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + encodings.len() * 4);
    buf.put_u8(client::SET_ENCODINGS);
    buf.put_u8(0);
    buf.put_u16(encodings.len() as u16);
    for enc in encodings {
        buf.put_i32(*enc);
    }
    buf
}

pub fn framebuffer_update_request(incremental: bool, width: u16, height: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u8(client::FRAMEBUFFER_UPDATE_REQUEST);
    buf.put_u8(incremental as u8);
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(width);
    buf.put_u16(height);
    buf
}

pub fn key_event(keysym: u32, down: bool) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(client::KEY_EVENT);
    buf.put_u8(down as u8);
    buf.put_bytes(0, 2);
    buf.put_u32(keysym);
    buf
}

pub fn pointer_event(x: i32, y: i32, buttons: PointerButtons) -> BytesMut {
    let clamp = |v: i32| v.clamp(0, i32::from(u16::MAX)) as u16;
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(client::POINTER_EVENT);
    buf.put_u8(buttons.bits());
    buf.put_u16(clamp(x));
    buf.put_u16(clamp(y));
    buf
}

/// ClientCutText carries ISO 8859-1; unmappable characters become `?`.
pub fn client_cut_text(text: &str) -> BytesMut {
    let latin1: Vec<u8> = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    let mut buf = BytesMut::with_capacity(8 + latin1.len());
    buf.put_u8(client::CLIENT_CUT_TEXT);
    buf.put_bytes(0, 3);
    buf.put_u32(latin1.len() as u32);
    buf.put_slice(&latin1);
    buf
}

/// Decode ISO 8859-1 server cut text.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

// ── Server → client ──────────────────────────────────────────────

/// Parsed `ServerInit` header (the name follows separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub name_len: u32,
}

impl ServerInit {
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8; Self::SIZE]) -> Self {
        Self {
            width: u16::from_be_bytes([data[0], data[1]]),
            height: u16::from_be_bytes([data[2], data[3]]),
            name_len: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        }
    }
}

/// A framebuffer-update rectangle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl RectHeader {
    pub const SIZE: usize = 12;

    pub fn parse(data: &[u8; Self::SIZE]) -> Self {
        Self {
            x: u16::from_be_bytes([data[0], data[1]]),
            y: u16::from_be_bytes([data[2], data[3]]),
            width: u16::from_be_bytes([data[4], data[5]]),
            height: u16::from_be_bytes([data[6], data[7]]),
            encoding: i32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
