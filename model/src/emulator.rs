// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Side channels between the harness and the emulator process.

use serde::{Deserialize, Serialize};

use crate::FrameError;

pub const TAG_FRAME: u8 = 0x01;
pub const TAG_TEXT: u8 = 0x02;
pub const TAG_CLEAR: u8 = 0x03;

pub const TAG_BUTTON: u8 = 0x01;
pub const TAG_FINGER: u8 = 0x02;

/// Emulator -> harness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenMessage {
    Frame {
        width: u16,
        height: u16,
        pixels: Vec<u8>,
    },
    Text(String),
    Clear,
}

impl ScreenMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ScreenMessage::Frame {
                width,
                height,
                pixels,
            } => {
                let mut v = vec![TAG_FRAME];
                v.extend_from_slice(&width.to_be_bytes());
                v.extend_from_slice(&height.to_be_bytes());
                v.extend_from_slice(&(pixels.len() as u32).to_be_bytes());
                v.extend_from_slice(pixels);
                v
            }
            ScreenMessage::Text(text) => {
                let mut v = vec![TAG_TEXT];
                v.extend_from_slice(&(text.len() as u16).to_be_bytes());
                v.extend_from_slice(text.as_bytes());
                v
            }
            ScreenMessage::Clear => vec![TAG_CLEAR],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Button {
    Left,
    Right,
}

/// Harness -> emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum InputMessage {
    Button(Button, bool),
    Finger { x: u16, y: u16, pressed: bool },
}

impl InputMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            InputMessage::Button(button, pressed) => {
                let b = match button {
                    Button::Left => 0x00,
                    Button::Right => 0x01,
                };
                vec![TAG_BUTTON, b, *pressed as u8]
            }
            InputMessage::Finger { x, y, pressed } => {
                let mut v = vec![TAG_FINGER];
                v.extend_from_slice(&x.to_be_bytes());
                v.extend_from_slice(&y.to_be_bytes());
                v.push(*pressed as u8);
                v
            }
        }
    }

    /// Parse one message from the front of `buf`, returning it with the number
    /// of bytes consumed. `None` if `buf` doesn't hold a complete message yet.
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        match buf.first()? {
            &TAG_BUTTON if buf.len() >= 3 => {
                let button = match buf[1] {
                    0x00 => Button::Left,
                    _ => Button::Right,
                };
                Some((InputMessage::Button(button, buf[2] != 0), 3))
            }
            &TAG_FINGER if buf.len() >= 6 => Some((
                InputMessage::Finger {
                    x: u16::from_be_bytes([buf[1], buf[2]]),
                    y: u16::from_be_bytes([buf[3], buf[4]]),
                    pressed: buf[5] != 0,
                },
                6,
            )),
            _ => None,
        }
    }
}

impl core::fmt::Display for InputMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InputMessage::Button(b, pressed) => write!(f, "Button({:?}, {})", b, pressed),
            InputMessage::Finger { x, y, pressed } => {
                write!(f, "Finger({}, {}, {})", x, y, pressed)
            }
        }
    }
}

/// Largest reply payload an APDU can carry
pub const MAX_REPLY_DATA: usize = 0xFFFF;

/// Size of the header preceding every reply on the APDU socket
pub const REPLY_HEADER_LEN: usize = 5;

/// Split a reply header `[u32 BE data len][echoed instruction]` into the
/// instruction and the number of bytes left to read (data and status word)
pub fn parse_reply_header(header: [u8; REPLY_HEADER_LEN]) -> Result<(u8, usize), FrameError> {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_REPLY_DATA {
        return Err(FrameError::ReplyTooLong(len));
    }

    Ok((header[4], len + 2))
}

/// Length-prefix an APDU for the emulator's APDU socket
pub fn frame_apdu(apdu: &[u8]) -> Vec<u8> {
    let mut v = (apdu.len() as u32).to_be_bytes().to_vec();
    v.extend_from_slice(apdu);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finger_layout() {
        let msg = InputMessage::Finger {
            x: 335,
            y: 606,
            pressed: true,
        };
        let encoded = msg.encode();
        assert_eq!(encoded, vec![0x02, 0x01, 0x4F, 0x02, 0x5E, 0x01]);
        assert_eq!(InputMessage::decode(&encoded), Some((msg, 6)));
    }

    #[test]
    fn partial_input_is_not_decoded() {
        let encoded = InputMessage::Button(Button::Right, false).encode();
        assert_eq!(InputMessage::decode(&encoded[..2]), None);
        assert_eq!(
            InputMessage::decode(&encoded),
            Some((InputMessage::Button(Button::Right, false), 3))
        );
    }

    #[test]
    fn frame_header() {
        let encoded = ScreenMessage::Frame {
            width: 2,
            height: 1,
            pixels: vec![0xFF, 0x00],
        }
        .encode();
        assert_eq!(encoded, vec![0x01, 0, 2, 0, 1, 0, 0, 0, 2, 0xFF, 0x00]);
        assert_eq!(frame_apdu(&[0x55, 0x00]), vec![0, 0, 0, 2, 0x55, 0x00]);
    }

    #[test]
    fn reply_header() {
        assert_eq!(parse_reply_header([0, 0, 0, 4, 0x02]), Ok((0x02, 6)));
        assert_eq!(parse_reply_header([0, 0, 0xFF, 0xFF, 0x04]), Ok((0x04, 0x10001)));
        assert_eq!(
            parse_reply_header([0xFF, 0xFF, 0xFF, 0xFF, 0x00]),
            Err(FrameError::ReplyTooLong(0xFFFF_FFFF))
        );
    }
}
