//! Host -> engine events and the opaque per-event reply.
//!
//! Every variant has a fixed one-byte wire tag. Tags are part of the
//! protocol shared with the engine process and must never be reused.

use std::fmt;

use bitflags::bitflags;

use crate::codec::{Decode, DecodeError, Encode, WireReader, WireWriter};

/// Mouse button involved in a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Whether a click event is the press or the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Down,
    Up,
}

bitflags! {
    /// Keyboard modifiers held while an input event happened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const SHIFT   = 0b0001;
        const CONTROL = 0b0010;
        const ALT     = 0b0100;
        const META    = 0b1000;
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Modifiers::SHIFT) {
            parts.push("Shift");
        }
        if self.contains(Modifiers::CONTROL) {
            parts.push("Control");
        }
        if self.contains(Modifiers::ALT) {
            parts.push("Alt");
        }
        if self.contains(Modifiers::META) {
            parts.push("Meta");
        }

        if parts.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// One discrete host-to-engine action. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Liveness probe; the engine replies without side effects.
    Ping,
    /// Key state changes since the previous keyboard event plus typed text.
    Keyboard {
        keys_down: Vec<u32>,
        keys_up: Vec<u32>,
        chars: String,
        modifiers: Modifiers,
    },
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseClick {
        x: i32,
        y: i32,
        button: MouseButton,
        kind: ClickKind,
        count: u8,
    },
    MouseScroll {
        x: i32,
        y: i32,
        delta: i32,
    },
    Navigate {
        url: String,
    },
    GoBack,
    GoForward,
    Refresh,
    LoadHtml {
        html: String,
    },
    ExecuteJs {
        script: String,
    },
    Resize {
        width: u32,
        height: u32,
    },
    /// Tells the engine to terminate. Always the last event on a channel.
    Shutdown,
}

impl Event {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Event::Shutdown)
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Ping => "ping",
            Event::Keyboard { .. } => "keyboard",
            Event::MouseMove { .. } => "mouse-move",
            Event::MouseClick { .. } => "mouse-click",
            Event::MouseScroll { .. } => "mouse-scroll",
            Event::Navigate { .. } => "navigate",
            Event::GoBack => "go-back",
            Event::GoForward => "go-forward",
            Event::Refresh => "refresh",
            Event::LoadHtml { .. } => "load-html",
            Event::ExecuteJs { .. } => "execute-js",
            Event::Resize { .. } => "resize",
            Event::Shutdown => "shutdown",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Event::Ping => 0,
            Event::Keyboard { .. } => 1,
            Event::MouseMove { .. } => 2,
            Event::MouseClick { .. } => 3,
            Event::MouseScroll { .. } => 4,
            Event::Navigate { .. } => 5,
            Event::GoBack => 6,
            Event::GoForward => 7,
            Event::Refresh => 8,
            Event::LoadHtml { .. } => 9,
            Event::ExecuteJs { .. } => 10,
            Event::Resize { .. } => 11,
            Event::Shutdown => 0xff,
        }
    }
}

impl Encode for MouseButton {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_u8(match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        });
    }
}

impl Decode for MouseButton {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            0 => Ok(MouseButton::Left),
            1 => Ok(MouseButton::Middle),
            2 => Ok(MouseButton::Right),
            tag => Err(DecodeError::UnknownTag {
                kind: "mouse button",
                tag,
            }),
        }
    }
}

impl Encode for ClickKind {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_u8(match self {
            ClickKind::Down => 0,
            ClickKind::Up => 1,
        });
    }
}

impl Decode for ClickKind {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        match reader.read_u8()? {
            0 => Ok(ClickKind::Down),
            1 => Ok(ClickKind::Up),
            tag => Err(DecodeError::UnknownTag {
                kind: "click kind",
                tag,
            }),
        }
    }
}

impl Encode for Modifiers {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_u8(self.bits());
    }
}

impl Decode for Modifiers {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let bits = reader.read_u8()?;
        Modifiers::from_bits(bits).ok_or(DecodeError::UnknownTag {
            kind: "modifiers",
            tag: bits,
        })
    }
}

impl Encode for Event {
    fn encode(&self, writer: &mut WireWriter) {
        writer.write_u8(self.tag());
        match self {
            Event::Ping
            | Event::GoBack
            | Event::GoForward
            | Event::Refresh
            | Event::Shutdown => {}
            Event::Keyboard {
                keys_down,
                keys_up,
                chars,
                modifiers,
            } => {
                keys_down.encode(writer);
                keys_up.encode(writer);
                writer.write_str(chars);
                modifiers.encode(writer);
            }
            Event::MouseMove { x, y } => {
                writer.write_i32(*x);
                writer.write_i32(*y);
            }
            Event::MouseClick {
                x,
                y,
                button,
                kind,
                count,
            } => {
                writer.write_i32(*x);
                writer.write_i32(*y);
                button.encode(writer);
                kind.encode(writer);
                writer.write_u8(*count);
            }
            Event::MouseScroll { x, y, delta } => {
                writer.write_i32(*x);
                writer.write_i32(*y);
                writer.write_i32(*delta);
            }
            Event::Navigate { url } => writer.write_str(url),
            Event::LoadHtml { html } => writer.write_str(html),
            Event::ExecuteJs { script } => writer.write_str(script),
            Event::Resize { width, height } => {
                writer.write_u32(*width);
                writer.write_u32(*height);
            }
        }
    }
}

impl Decode for Event {
    fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let event = match reader.read_u8()? {
            0 => Event::Ping,
            1 => Event::Keyboard {
                keys_down: Vec::decode(reader)?,
                keys_up: Vec::decode(reader)?,
                chars: reader.read_string()?,
                modifiers: Modifiers::decode(reader)?,
            },
            2 => Event::MouseMove {
                x: reader.read_i32()?,
                y: reader.read_i32()?,
            },
            3 => Event::MouseClick {
                x: reader.read_i32()?,
                y: reader.read_i32()?,
                button: MouseButton::decode(reader)?,
                kind: ClickKind::decode(reader)?,
                count: reader.read_u8()?,
            },
            4 => Event::MouseScroll {
                x: reader.read_i32()?,
                y: reader.read_i32()?,
                delta: reader.read_i32()?,
            },
            5 => Event::Navigate {
                url: reader.read_string()?,
            },
            6 => Event::GoBack,
            7 => Event::GoForward,
            8 => Event::Refresh,
            9 => Event::LoadHtml {
                html: reader.read_string()?,
            },
            10 => Event::ExecuteJs {
                script: reader.read_string()?,
            },
            11 => Event::Resize {
                width: reader.read_u32()?,
                height: reader.read_u32()?,
            },
            0xff => Event::Shutdown,
            tag => return Err(DecodeError::UnknownTag { kind: "event", tag }),
        };
        Ok(event)
    }
}

/// Opaque acknowledgement returned by the engine for one event. This layer
/// never interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply(Vec<u8>);

impl Reply {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Reply {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}
