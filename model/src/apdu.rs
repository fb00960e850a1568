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

use serde::{Deserialize, Serialize};

use crate::path::DerivationPath;
use crate::status::StatusWord;
use crate::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum CommandKind {
    GetVersion,
    AppInfo,
    GetAddress,
    ShowAddress,
    Sign,
}

impl CommandKind {
    pub fn ins(&self) -> u8 {
        match self {
            CommandKind::GetVersion => INS_GET_VERSION,
            CommandKind::AppInfo => INS_APP_INFO,
            CommandKind::GetAddress | CommandKind::ShowAddress => INS_GET_ADDR_SECP256K1,
            CommandKind::Sign => INS_SIGN_SECP256K1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkPayloadType {
    Init = 0x00,
    Add = 0x01,
    Last = 0x02,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self, FrameError> {
        if data.len() > u8::MAX as usize {
            return Err(FrameError::PayloadTooLarge(data.len()));
        }

        Ok(ApduCommand {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut v = vec![self.cla, self.ins, self.p1, self.p2, self.data.len() as u8];
        v.extend_from_slice(&self.data);
        v
    }
}

/// Raw reply as read from the transport, tagged with the instruction of the
/// request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub ins: u8,
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl ApduResponse {
    /// Split a raw `data || status word` frame
    pub fn from_raw(ins: u8, raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < 2 {
            return Err(FrameError::ShortFrame(raw.len()));
        }

        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(ApduResponse {
            ins,
            data: data.to_vec(),
            status: StatusWord::from_be_bytes([sw[0], sw[1]]),
        })
    }
}

/// A request to the app, before it's split into frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetVersion,
    AppInfo,
    GetAddress { path: DerivationPath, hrp: String },
    ShowAddress { path: DerivationPath, hrp: String },
    Sign { path: DerivationPath, payload: Vec<u8> },
}

fn address_data(path: &DerivationPath, hrp: &str) -> Result<Vec<u8>, FrameError> {
    if hrp.is_empty() || hrp.len() > MAX_BECH32_HRP_LEN || !hrp.is_ascii() {
        return Err(FrameError::InvalidHrp(hrp.to_string()));
    }

    let mut data = vec![hrp.len() as u8];
    data.extend_from_slice(hrp.as_bytes());
    data.extend(path.serialize());
    Ok(data)
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetVersion => CommandKind::GetVersion,
            Command::AppInfo => CommandKind::AppInfo,
            Command::GetAddress { .. } => CommandKind::GetAddress,
            Command::ShowAddress { .. } => CommandKind::ShowAddress,
            Command::Sign { .. } => CommandKind::Sign,
        }
    }

    /// Encode into the ordered list of frames the device consumes.
    ///
    /// Every command is a single frame except signing, which is an `Init`
    /// frame carrying the path followed by the payload in `CHUNK_SIZE` pieces,
    /// the final one flagged as `Last`.
    pub fn frames(&self) -> Result<Vec<ApduCommand>, FrameError> {
        let ins = self.kind().ins();
        match self {
            Command::GetVersion => Ok(vec![ApduCommand::new(CLA, ins, 0x00, 0x00, vec![])?]),
            Command::AppInfo => Ok(vec![ApduCommand::new(
                CLA_DASHBOARD,
                ins,
                0x00,
                0x00,
                vec![],
            )?]),
            Command::GetAddress { path, hrp } => Ok(vec![ApduCommand::new(
                CLA,
                ins,
                0x00,
                0x00,
                address_data(path, hrp)?,
            )?]),
            Command::ShowAddress { path, hrp } => Ok(vec![ApduCommand::new(
                CLA,
                ins,
                0x01,
                0x00,
                address_data(path, hrp)?,
            )?]),
            Command::Sign { path, payload } => {
                let mut frames = vec![ApduCommand::new(
                    CLA,
                    ins,
                    ChunkPayloadType::Init as u8,
                    0x00,
                    path.serialize(),
                )?];

                if payload.is_empty() {
                    frames.push(ApduCommand::new(
                        CLA,
                        ins,
                        ChunkPayloadType::Last as u8,
                        0x00,
                        vec![],
                    )?);
                    return Ok(frames);
                }

                let num_chunks = (payload.len() + CHUNK_SIZE - 1) / CHUNK_SIZE;
                for (i, chunk) in payload.chunks(CHUNK_SIZE).enumerate() {
                    let p1 = if i + 1 == num_chunks {
                        ChunkPayloadType::Last
                    } else {
                        ChunkPayloadType::Add
                    };
                    frames.push(ApduCommand::new(CLA, ins, p1 as u8, 0x00, chunk.to_vec())?);
                }

                Ok(frames)
            }
        }
    }
}
