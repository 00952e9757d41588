//! Pointer and keyboard input state.
//!
//! Button state is tracked here at *submission* time so that the mask
//! captured into each queued command reflects the order in which the
//! caller produced events, regardless of when the sender worker gets
//! around to executing them.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use bitflags::bitflags;

bitflags! {
    /// RFB pointer button mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PointerButtons: u8 {
        const LEFT        = 0b0000_0001;
        const MIDDLE      = 0b0000_0010;
        const RIGHT       = 0b0000_0100;
        const WHEEL_UP    = 0b0000_1000;
        const WHEEL_DOWN  = 0b0001_0000;
        const WHEEL_LEFT  = 0b0010_0000;
        const WHEEL_RIGHT = 0b0100_0000;
    }
}

impl PointerButtons {
    /// Wheel "buttons" are momentary: pressed and released in one go.
    pub const WHEEL: Self = Self::WHEEL_UP
        .union(Self::WHEEL_DOWN)
        .union(Self::WHEEL_LEFT)
        .union(Self::WHEEL_RIGHT);
}

// ── PointerState ─────────────────────────────────────────────────

/// Lock-free pointer position and button mask.
///
/// Position is packed into a single `AtomicU64` so readers never see
/// an `x` from one update paired with a `y` from another.
#[derive(Debug, Default)]
pub struct PointerState {
    position: AtomicU64,
    buttons: AtomicU8,
}

fn pack(x: i32, y: i32) -> u64 {
    ((x as u32 as u64) << 32) | (y as u32 as u64)
}

fn unpack(v: u64) -> (i32, i32) {
    ((v >> 32) as u32 as i32, v as u32 as i32)
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known pointer position.
    pub fn position(&self) -> (i32, i32) {
        unpack(self.position.load(Ordering::Acquire))
    }

    pub fn set_position(&self, x: i32, y: i32) {
        self.position.store(pack(x, y), Ordering::Release);
    }

    /// Currently held buttons.
    pub fn buttons(&self) -> PointerButtons {
        PointerButtons::from_bits_truncate(self.buttons.load(Ordering::Acquire))
    }

    /// Mark `button` as held and return the resulting mask.
    pub fn press(&self, button: PointerButtons) -> PointerButtons {
        let prev = self.buttons.fetch_or(button.bits(), Ordering::AcqRel);
        PointerButtons::from_bits_truncate(prev | button.bits())
    }

    /// Mark `button` as released and return the resulting mask.
    pub fn release(&self, button: PointerButtons) -> PointerButtons {
        let prev = self.buttons.fetch_and(!button.bits(), Ordering::AcqRel);
        PointerButtons::from_bits_truncate(prev & !button.bits())
    }
}

// ── Keysyms ──────────────────────────────────────────────────────

/// X11 keysym values for keys that have no printable character.
pub mod keysym {
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const HOME: u32 = 0xff50;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
    pub const END: u32 = 0xff57;
    pub const INSERT: u32 = 0xff63;
    pub const DELETE: u32 = 0xffff;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const ALT_L: u32 = 0xffe9;
    pub const SUPER_L: u32 = 0xffeb;
    pub const F1: u32 = 0xffbe;

    /// Keysym for a printable character.
    ///
    /// Latin-1 maps directly; everything else uses the Unicode keysym
    /// range (`0x0100_0000 + codepoint`).
    pub fn from_char(c: char) -> u32 {
        match c {
            '\n' | '\r' => RETURN,
            '\t' => TAB,
            '\u{8}' => BACKSPACE,
            '\u{1b}' => ESCAPE,
            ' '..='~' | '\u{a0}'..='\u{ff}' => c as u32,
            other => 0x0100_0000 | other as u32,
        }
    }

    /// Keysym for function key `F<n>`, `n` in `1..=12`.
    pub fn function(n: u8) -> Option<u32> {
        (1..=12).contains(&n).then(|| F1 + u32::from(n) - 1)
    }

    /// Resolve a symbolic key name (case-insensitive) such as `"Return"`
    /// or `"ctrl"`, or a single character.
    pub fn from_name(name: &str) -> Option<u32> {
        let lower = name.to_ascii_lowercase();
        let sym = match lower.as_str() {
            "backspace" => BACKSPACE,
            "tab" => TAB,
            "return" | "enter" => RETURN,
            "escape" | "esc" => ESCAPE,
            "home" => HOME,
            "left" => LEFT,
            "up" => UP,
            "right" => RIGHT,
            "down" => DOWN,
            "pageup" => PAGE_UP,
            "pagedown" => PAGE_DOWN,
            "end" => END,
            "insert" => INSERT,
            "delete" | "del" => DELETE,
            "shift" => SHIFT_L,
            "ctrl" | "control" => CONTROL_L,
            "alt" => ALT_L,
            "super" | "meta" => SUPER_L,
            _ => {
                if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse().ok()) {
                    return function(n);
                }
                let mut chars = name.chars();
                return match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(from_char(c)),
                    _ => None,
                };
            }
        };
        Some(sym)
    }
}

// ── Tests ────────────────────────────────────────────────────────
