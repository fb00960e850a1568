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

use crate::apdu::{ApduResponse, CommandKind};
use crate::status::StatusWord;
use crate::{FrameError, PK_LEN_SECP256K1};

/// Decoded reply: the status word is always there, the body only on success
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response<T> {
    pub status: StatusWord,
    pub body: Option<T>,
}

impl<T> Response<T> {
    pub fn return_code(&self) -> u16 {
        self.status.0
    }

    pub fn error_message(&self) -> &'static str {
        self.status.description()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Layout of a successful reply payload for a given command
pub trait ReplyBody: Sized + fmt::Debug {
    fn parse(kind: CommandKind, data: &[u8]) -> Result<Self, FrameError>;
}

/// Turn a raw reply into its typed form.
///
/// Non-success status words are returned as-is with no body: only frames that
/// can't be trusted at all produce an error.
pub fn decode<T: ReplyBody>(
    kind: CommandKind,
    raw: &ApduResponse,
) -> Result<Response<T>, FrameError> {
    if raw.ins != kind.ins() {
        return Err(FrameError::InstructionMismatch {
            expected: kind.ins(),
            got: raw.ins,
        });
    }

    let body = if raw.status.is_success() {
        Some(T::parse(kind, &raw.data)?)
    } else {
        None
    };

    Ok(Response {
        status: raw.status,
        body,
    })
}

fn require_len(kind: CommandKind, data: &[u8], expected: usize) -> Result<(), FrameError> {
    if data.len() < expected {
        return Err(FrameError::Truncated {
            kind,
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Version {
    pub test_mode: bool,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub device_locked: Option<bool>,
    pub target_id: Option<String>,
}

impl ReplyBody for Version {
    fn parse(kind: CommandKind, data: &[u8]) -> Result<Self, FrameError> {
        require_len(kind, data, 4)?;

        let device_locked = data.get(4).map(|v| *v == 1);
        let target_id = data
            .get(5..9)
            .map(|id| id.iter().map(|b| format!("{:02x}", b)).collect());

        Ok(Version {
            test_mode: data[0] != 0,
            major: data[1],
            minor: data[2],
            patch: data[3],
            device_locked,
            target_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppInfo {
    pub app_name: String,
    pub app_version: String,
    pub flags: Vec<u8>,
}

impl AppInfo {
    pub fn flag_recovery(&self) -> bool {
        self.flags.first().map(|f| f & 1 != 0).unwrap_or(false)
    }

    pub fn flag_onboarded(&self) -> bool {
        self.flags.first().map(|f| f & 4 != 0).unwrap_or(false)
    }

    pub fn flag_pin_validated(&self) -> bool {
        self.flags.first().map(|f| f & 128 != 0).unwrap_or(false)
    }
}

/// Read a `[len][bytes]` field, advancing `cursor`
fn read_lv<'d>(data: &'d [u8], cursor: &mut usize) -> Result<&'d [u8], FrameError> {
    let len = *data.get(*cursor).ok_or(FrameError::InvalidLength {
        declared: 1,
        available: 0,
    })? as usize;
    let start = *cursor + 1;
    let field = data.get(start..start + len).ok_or(FrameError::InvalidLength {
        declared: len,
        available: data.len().saturating_sub(start),
    })?;
    *cursor = start + len;
    Ok(field)
}

impl ReplyBody for AppInfo {
    fn parse(kind: CommandKind, data: &[u8]) -> Result<Self, FrameError> {
        require_len(kind, data, 1)?;
        if data[0] != 1 {
            return Err(FrameError::UnsupportedFormat(data[0]));
        }

        let mut cursor = 1;
        let app_name = String::from_utf8(read_lv(data, &mut cursor)?.to_vec())
            .map_err(|_| FrameError::InvalidUtf8("app name"))?;
        let app_version = String::from_utf8(read_lv(data, &mut cursor)?.to_vec())
            .map_err(|_| FrameError::InvalidUtf8("app version"))?;
        let flags = if cursor < data.len() {
            read_lv(data, &mut cursor)?.to_vec()
        } else {
            vec![]
        };

        Ok(AppInfo {
            app_name,
            app_version,
            flags,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddressReply {
    pub compressed_pk: Vec<u8>,
    pub bech32_address: String,
}

impl ReplyBody for AddressReply {
    fn parse(kind: CommandKind, data: &[u8]) -> Result<Self, FrameError> {
        // At least one character after the key
        require_len(kind, data, PK_LEN_SECP256K1 + 1)?;

        let (pk, addr) = data.split_at(PK_LEN_SECP256K1);
        let bech32_address =
            String::from_utf8(addr.to_vec()).map_err(|_| FrameError::InvalidUtf8("address"))?;

        Ok(AddressReply {
            compressed_pk: pk.to_vec(),
            bech32_address,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignatureReply {
    /// DER encoded
    pub signature: Vec<u8>,
}

impl ReplyBody for SignatureReply {
    fn parse(kind: CommandKind, data: &[u8]) -> Result<Self, FrameError> {
        // Smallest possible DER sequence: 30 06 02 01 r 02 01 s
        require_len(kind, data, 8)?;

        Ok(SignatureReply {
            signature: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;

    fn raw(ins: u8, data: &[u8], sw: u16) -> ApduResponse {
        let mut v = data.to_vec();
        v.extend_from_slice(&sw.to_be_bytes());
        ApduResponse::from_raw(ins, &v).unwrap()
    }

    #[test]
    fn version() {
        let resp = decode::<Version>(
            CommandKind::GetVersion,
            &raw(INS_GET_VERSION, &[0, 2, 34, 7, 0, 0x31, 0x10, 0x00, 0x04], 0x9000),
        )
        .unwrap();
        assert_eq!(resp.return_code(), 0x9000);
        assert_eq!(resp.error_message(), "No errors");

        let version = resp.body.unwrap();
        assert!(!version.test_mode);
        assert_eq!((version.major, version.minor, version.patch), (2, 34, 7));
        assert_eq!(version.device_locked, Some(false));
        assert_eq!(version.target_id.as_deref(), Some("31100004"));
    }

    #[test]
    fn short_version_is_truncated() {
        let err = decode::<Version>(
            CommandKind::GetVersion,
            &raw(INS_GET_VERSION, &[1, 2], 0x9000),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::Truncated { expected: 4, got: 2, .. }));
    }

    #[test]
    fn status_is_not_an_error() {
        let resp = decode::<AddressReply>(
            CommandKind::ShowAddress,
            &raw(INS_GET_ADDR_SECP256K1, &[], 0x6986),
        )
        .unwrap();
        assert_eq!(resp.return_code(), 0x6986);
        assert_eq!(resp.error_message(), "Transaction rejected");
        assert!(resp.body.is_none());
    }

    #[test]
    fn instruction_mismatch() {
        let err = decode::<SignatureReply>(
            CommandKind::Sign,
            &raw(INS_GET_VERSION, &[0, 1, 2, 3], 0x9000),
        )
        .unwrap_err();
        assert_eq!(
            err,
            FrameError::InstructionMismatch {
                expected: INS_SIGN_SECP256K1,
                got: INS_GET_VERSION
            }
        );
    }

    #[test]
    fn address() {
        let mut data = vec![0x02; PK_LEN_SECP256K1];
        data.extend_from_slice(b"cro12w3875w2a3qqqpheslfznf4e270jm005j098sg");
        let resp = decode::<AddressReply>(
            CommandKind::GetAddress,
            &raw(INS_GET_ADDR_SECP256K1, &data, 0x9000),
        )
        .unwrap();
        let body = resp.body.unwrap();
        assert_eq!(body.compressed_pk.len(), 33);
        assert_eq!(
            body.bech32_address,
            "cro12w3875w2a3qqqpheslfznf4e270jm005j098sg"
        );
    }

    #[test]
    fn address_truncated() {
        let err = decode::<AddressReply>(
            CommandKind::GetAddress,
            &raw(INS_GET_ADDR_SECP256K1, &[0x02; 20], 0x9000),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn app_info() {
        let mut data = vec![1, 6];
        data.extend_from_slice(b"Crypto");
        data.push(5);
        data.extend_from_slice(b"2.1.0");
        data.extend_from_slice(&[1, 0x84]);

        let resp = decode::<AppInfo>(CommandKind::AppInfo, &raw(INS_APP_INFO, &data, 0x9000))
            .unwrap();
        let info = resp.body.unwrap();
        assert_eq!(info.app_name, "Crypto");
        assert_eq!(info.app_version, "2.1.0");
        assert!(info.flag_onboarded());
        assert!(info.flag_pin_validated());
        assert!(!info.flag_recovery());
    }

    #[test]
    fn app_info_bad_length() {
        let err = decode::<AppInfo>(
            CommandKind::AppInfo,
            &raw(INS_APP_INFO, &[1, 10, b'a'], 0x9000),
        )
        .unwrap_err();
        assert_eq!(
            err,
            FrameError::InvalidLength {
                declared: 10,
                available: 1
            }
        );
    }
}
