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

use crate::{HARDENED_FLAG, HDPATH_HARDENED_LEN, HDPATH_LEN};

/// BIP44-style path as supplied by the caller.
///
/// Values are kept verbatim: hardening only happens when the path is turned
/// into bytes, see [`DerivationPath::hardened`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DerivationPath(pub [u32; HDPATH_LEN]);

/// Set the hardened flag on the first three components, leave the others untouched
pub const fn harden(raw: [u32; HDPATH_LEN]) -> [u32; HDPATH_LEN] {
    let mut out = raw;
    let mut i = 0;
    loop {
        if i == HDPATH_HARDENED_LEN {
            break;
        }

        out[i] |= HARDENED_FLAG;
        i += 1;
    }

    out
}

impl DerivationPath {
    pub const fn new(raw: [u32; HDPATH_LEN]) -> Self {
        DerivationPath(raw)
    }

    pub const fn hardened(&self) -> [u32; HDPATH_LEN] {
        harden(self.0)
    }

    /// Serialize the hardened path the way the app reads it: five little-endian u32
    pub fn serialize(&self) -> Vec<u8> {
        self.hardened()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

impl From<[u32; HDPATH_LEN]> for DerivationPath {
    fn from(value: [u32; HDPATH_LEN]) -> Self {
        DerivationPath(value)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for v in self.hardened() {
            if v & HARDENED_FLAG != 0 {
                write!(f, "/{}'", v & !HARDENED_FLAG)?;
            } else {
                write!(f, "/{}", v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_three_are_hardened() {
        let path = DerivationPath::new([44, 394, 5, 0, 3]);
        assert_eq!(
            path.hardened(),
            [0x8000_002C, 0x8000_018A, 0x8000_0005, 0, 3]
        );
        assert_eq!(path.to_string(), "m/44'/394'/5'/0/3");
    }

    #[test]
    fn hardening_is_idempotent() {
        let path = DerivationPath::new([44 | HARDENED_FLAG, 394, 0, 0, 0]);
        assert_eq!(path.hardened(), harden(path.hardened()));
        assert_eq!(path.hardened()[0], 0x8000_002C);
    }

    #[test]
    fn huge_indices() {
        let path = DerivationPath::new([44, 394, 2147483647, 0, 4294967295]);
        let serialized = path.serialize();
        assert_eq!(serialized.len(), 20);
        assert_eq!(
            hex::encode(&serialized),
            "2c0000808a010080ffffffff00000000ffffffff"
        );
    }
}
