//! The line-oriented command language read from stdin.
//!
//! ```text
//! key ctrl+alt+delete     press the chord, release in reverse
//! type hello world        type text character by character
//! move 100 200            move the pointer
//! click left [x y]        press and release a button
//! scroll up|down|left|right [x y]
//! clip some text          send clipboard text
//! pause | resume | refresh
//! info                    connection details
//! save frame.ppm          write the framebuffer as PPM
//! view-only [on|off]      toggle input forwarding
//! quit
//! ```

use std::path::PathBuf;

use vnc_core::{PointerButtons, keysym};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keysyms pressed in order, released in reverse.
    Key(Vec<u32>),
    Type(String),
    Move(i32, i32),
    Click {
        button: PointerButtons,
        at: Option<(i32, i32)>,
    },
    Scroll {
        wheel: PointerButtons,
        at: Option<(i32, i32)>,
    },
    Clip(String),
    Pause,
    Resume,
    Refresh,
    Info,
    Save(PathBuf),
    /// `None` toggles.
    ViewOnly(Option<bool>),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  key <chord>            e.g. key Return, key ctrl+alt+delete
  type <text>
  move <x> <y>
  click <left|middle|right> [x y]
  scroll <up|down|left|right> [x y]
  clip <text>
  pause | resume | refresh
  info
  save <file.ppm>
  view-only [on|off]
  quit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "key" => Command::Key(parse_chord(rest)?),
        "type" => Command::Type(required(rest, "type <text>")?.to_string()),
        "move" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            match parse_point(&args)? {
                Some((x, y)) => Command::Move(x, y),
                None => return Err("usage: move <x> <y>".into()),
            }
        }
        "click" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let Some((name, point)) = args.split_first() else {
                return Err("usage: click <left|middle|right> [x y]".into());
            };
            let button = match name.to_ascii_lowercase().as_str() {
                "left" => PointerButtons::LEFT,
                "middle" => PointerButtons::MIDDLE,
                "right" => PointerButtons::RIGHT,
                other => return Err(format!("unknown button '{other}'")),
            };
            Command::Click {
                button,
                at: parse_point(point)?,
            }
        }
        "scroll" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let Some((name, point)) = args.split_first() else {
                return Err("usage: scroll <up|down|left|right> [x y]".into());
            };
            let wheel = match name.to_ascii_lowercase().as_str() {
                "up" => PointerButtons::WHEEL_UP,
                "down" => PointerButtons::WHEEL_DOWN,
                "left" => PointerButtons::WHEEL_LEFT,
                "right" => PointerButtons::WHEEL_RIGHT,
                other => return Err(format!("unknown scroll direction '{other}'")),
            };
            Command::Scroll {
                wheel,
                at: parse_point(point)?,
            }
        }
        "clip" => Command::Clip(required(rest, "clip <text>")?.to_string()),
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "refresh" => Command::Refresh,
        "info" => Command::Info,
        "save" => Command::Save(PathBuf::from(required(rest, "save <file.ppm>")?)),
        "view-only" | "viewonly" => Command::ViewOnly(match rest.to_ascii_lowercase().as_str() {
            "" => None,
            "on" | "true" | "1" => Some(true),
            "off" | "false" | "0" => Some(false),
            other => return Err(format!("expected on or off, got '{other}'")),
        }),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(cmd))
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest)
    }
}

fn parse_chord(rest: &str) -> Result<Vec<u32>, String> {
    let chord = required(rest, "key <chord>")?;
    // A lone "+" is the plus key, not an empty chord.
    if chord == "+" {
        return Ok(vec![keysym::from_char('+')]);
    }
    chord
        .split('+')
        .map(|name| keysym::from_name(name.trim()).ok_or_else(|| format!("unknown key '{name}'")))
        .collect()
}

fn parse_point(args: &[&str]) -> Result<Option<(i32, i32)>, String> {
    match args {
        [] => Ok(None),
        [x, y] => {
            let coord = |s: &str| s.parse::<i32>().map_err(|_| format!("bad coordinate '{s}'"));
            Ok(Some((coord(*x)?, coord(*y)?)))
        }
        _ => Err("expected two coordinates".into()),
    }
}
