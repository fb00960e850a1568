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

use core::fmt;

use serde::{Deserialize, Serialize};

/// 16-bit code terminating every device reply
#[derive(Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const NO_ERROR: StatusWord = StatusWord(0x9000);
    pub const EXECUTION_ERROR: StatusWord = StatusWord(0x6400);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const EMPTY_BUFFER: StatusWord = StatusWord(0x6982);
    pub const OUTPUT_BUFFER_TOO_SMALL: StatusWord = StatusWord(0x6983);
    pub const DATA_INVALID: StatusWord = StatusWord(0x6984);
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord(0x6985);
    pub const TRANSACTION_REJECTED: StatusWord = StatusWord(0x6986);
    pub const BAD_KEY_HANDLE: StatusWord = StatusWord(0x6A80);
    pub const INVALID_P1P2: StatusWord = StatusWord(0x6B00);
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord(0x6D00);
    pub const APP_NOT_OPEN: StatusWord = StatusWord(0x6E00);
    pub const UNKNOWN: StatusWord = StatusWord(0x6F00);
    pub const SIGN_VERIFY_ERROR: StatusWord = StatusWord(0x6F01);

    pub fn is_success(&self) -> bool {
        *self == Self::NO_ERROR
    }

    pub fn description(&self) -> &'static str {
        match self.0 {
            0x9000 => "No errors",
            0x6400 => "Execution Error",
            0x6700 => "Wrong Length",
            0x6982 => "Empty Buffer",
            0x6983 => "Output buffer too small",
            0x6984 => "Data is invalid",
            0x6985 => "Conditions not satisfied",
            0x6986 => "Transaction rejected",
            0x6A80 => "Bad key handle",
            0x6B00 => "Invalid P1/P2",
            0x6D00 => "Instruction not supported",
            0x6E00 => "App does not seem to be open",
            0x6F00 => "Unknown error",
            0x6F01 => "Sign/verify error",
            _ => "Unknown Status Code",
        }
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        StatusWord(u16::from_be_bytes(bytes))
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord(value)
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({})", self.0, self.description())
    }
}
