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

//! Wire-level model of the Cosmos device app: APDU frames, derivation paths,
//! status words, typed replies and the emulator side-channel messages.

pub mod address;
pub mod apdu;
pub mod emulator;
pub mod path;
pub mod reply;
pub mod status;

pub use apdu::{ApduCommand, ApduResponse, Command, CommandKind};
pub use path::DerivationPath;
pub use reply::{AddressReply, AppInfo, Response, SignatureReply, Version};
pub use status::StatusWord;

/// Class byte of the Cosmos app
pub const CLA: u8 = 0x55;
/// Class byte answered by the device dashboard, used for `get-app-info`
pub const CLA_DASHBOARD: u8 = 0xB0;

pub const INS_GET_VERSION: u8 = 0x00;
pub const INS_SIGN_SECP256K1: u8 = 0x02;
pub const INS_GET_ADDR_SECP256K1: u8 = 0x04;
pub const INS_APP_INFO: u8 = 0x01;

pub const HARDENED_FLAG: u32 = 0x80000000;

/// Number of components in every path sent to the app
pub const HDPATH_LEN: usize = 5;
/// Number of leading path components that are always hardened
pub const HDPATH_HARDENED_LEN: usize = 3;

/// Length of a compressed secp256k1 public key
pub const PK_LEN_SECP256K1: usize = 33;

/// Maximum payload carried by a single signing chunk
pub const CHUNK_SIZE: usize = 250;

pub const MAX_BECH32_HRP_LEN: usize = 83;

/// Local integrity faults: the frame itself is unusable, regardless of what the
/// device meant to say with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes is too short to carry a status word")]
    ShortFrame(usize),
    #[error("reply for instruction {got:#04X} while waiting for {expected:#04X}")]
    InstructionMismatch { expected: u8, got: u8 },
    #[error("{kind:?} reply truncated: expected at least {expected} bytes, got {got}")]
    Truncated {
        kind: CommandKind,
        expected: usize,
        got: usize,
    },
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("invalid chain prefix {0:?}")]
    InvalidHrp(String),
    #[error("payload of {0} bytes does not fit in a single APDU")]
    PayloadTooLarge(usize),
    #[error("unsupported app info format {0}")]
    UnsupportedFormat(u8),
    #[error("reply announces {0} bytes, more than an APDU can carry")]
    ReplyTooLong(usize),
    #[error("invalid length prefix: declared {declared}, available {available}")]
    InvalidLength { declared: usize, available: usize },
}
