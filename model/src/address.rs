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

use bech32::{ToBase32, Variant};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{FrameError, PK_LEN_SECP256K1};

/// Account identifier of a compressed public key: `ripemd160(sha256(pk))`
pub fn account_id(compressed_pk: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(compressed_pk);
    Ripemd160::digest(sha).into()
}

/// Recompute the address the app derives for `compressed_pk`
pub fn bech32_address(hrp: &str, compressed_pk: &[u8]) -> Result<String, FrameError> {
    if compressed_pk.len() != PK_LEN_SECP256K1 {
        return Err(FrameError::Truncated {
            kind: crate::CommandKind::GetAddress,
            expected: PK_LEN_SECP256K1,
            got: compressed_pk.len(),
        });
    }

    bech32::encode(hrp, account_id(compressed_pk).to_base32(), Variant::Bech32)
        .map_err(|_| FrameError::InvalidHrp(hrp.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Generator point of secp256k1, compressed
    const PK_G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn account_id_of_generator() {
        let pk = hex::decode(PK_G).unwrap();
        assert_eq!(
            hex::encode(account_id(&pk)),
            "751e76e8199196d454941c45d1b3a323f1433bd6"
        );
    }

    #[test]
    fn address_of_generator() {
        let pk = hex::decode(PK_G).unwrap();
        let addr = bech32_address("bc", &pk).unwrap();
        // Same program as the P2WPKH address of G, without the witness version
        assert!(addr.starts_with("bc1"));
        assert_eq!(addr.len(), "bc".len() + 1 + 32 + 6);

        let cro = bech32_address("cro", &pk).unwrap();
        assert!(cro.starts_with("cro1"));
        assert_ne!(cro, addr);
    }

    #[test]
    fn wrong_key_length() {
        assert!(bech32_address("cro", &[0x02; 32]).is_err());
    }
}
