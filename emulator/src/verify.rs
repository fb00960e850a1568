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

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

use model::PK_LEN_SECP256K1;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("malformed DER signature: {0}")]
    Signature(k256::ecdsa::Error),
    #[error("compressed public key must be 33 bytes, got {0}")]
    KeyLength(usize),
    #[error("compressed public key must start with 0x02 or 0x03, got {0:#04X}")]
    KeyPrefix(u8),
    #[error("malformed public key: {0}")]
    PublicKey(k256::ecdsa::Error),
}

/// What the app signs: SHA-256 of the serialized transaction
pub fn digest(payload: &[u8]) -> [u8; 32] {
    Sha256::digest(payload).into()
}

/// Check a DER signature returned by the device against the compressed key
/// it reported for the same path.
///
/// A signature that parses but doesn't match is `Ok(false)`, and so is a
/// high-S signature: only the low-S form is canonical.
pub fn verify(
    payload: &[u8],
    der_signature: &[u8],
    compressed_pk: &[u8],
) -> Result<bool, VerifyError> {
    let signature = Signature::from_der(der_signature).map_err(VerifyError::Signature)?;

    if compressed_pk.len() != PK_LEN_SECP256K1 {
        return Err(VerifyError::KeyLength(compressed_pk.len()));
    }
    if !matches!(compressed_pk[0], 0x02 | 0x03) {
        return Err(VerifyError::KeyPrefix(compressed_pk[0]));
    }
    let key = VerifyingKey::from_sec1_bytes(compressed_pk).map_err(VerifyError::PublicKey)?;

    if signature.normalize_s().is_some() {
        return Ok(false);
    }

    Ok(key.verify_prehash(&digest(payload), &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{example_tx_basic, example_tx_combined};

    use k256::ecdsa::signature::hazmat::PrehashSigner;
    use k256::ecdsa::SigningKey;

    fn device_key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 32]).unwrap()
    }

    fn device_sign(payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let key = device_key();
        let signature: Signature = key.sign_prehash(&digest(payload)).unwrap();
        let pk = key.verifying_key().to_encoded_point(true).as_bytes().to_vec();
        (signature.to_der().as_bytes().to_vec(), pk)
    }

    #[test]
    fn test_digest() {
        assert_eq!(
            hex::encode(digest(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify() {
        let tx = example_tx_basic();
        let (der, pk) = device_sign(&tx);
        assert_eq!(pk.len(), 33);

        assert!(verify(&tx, &der, &pk).unwrap());
        assert!(!verify(b"something else", &der, &pk).unwrap());

        let other = SigningKey::from_slice(&[0x22; 32]).unwrap();
        let other_pk = other.verifying_key().to_encoded_point(true).as_bytes().to_vec();
        assert!(!verify(&tx, &der, &other_pk).unwrap());
    }

    #[test]
    fn test_different_transactions() {
        let basic = example_tx_basic();
        let combined = example_tx_combined();
        let (der_basic, pk) = device_sign(&basic);
        let (der_combined, _) = device_sign(&combined);

        assert_ne!(der_basic, der_combined);
        assert!(verify(&basic, &der_basic, &pk).unwrap());
        assert!(verify(&combined, &der_combined, &pk).unwrap());
        assert!(!verify(&combined, &der_basic, &pk).unwrap());
    }

    #[test]
    fn test_high_s_rejected() {
        let tx = example_tx_basic();
        let key = device_key();
        let signature: Signature = key.sign_prehash(&digest(&tx)).unwrap();
        let high = Signature::from_scalars(signature.r().to_bytes(), (-*signature.s()).to_bytes())
            .unwrap();
        let pk = key.verifying_key().to_encoded_point(true).as_bytes().to_vec();

        assert!(verify(&tx, signature.to_der().as_bytes(), &pk).unwrap());
        assert!(!verify(&tx, high.to_der().as_bytes(), &pk).unwrap());
    }

    #[test]
    fn test_malformed() {
        let tx = example_tx_basic();
        let (der, pk) = device_sign(&tx);

        assert!(matches!(
            verify(&tx, &der[..der.len() - 3], &pk),
            Err(VerifyError::Signature(_))
        ));
        assert!(matches!(
            verify(&tx, &der, &pk[..32]),
            Err(VerifyError::KeyLength(32))
        ));

        let mut bad_pk = pk.clone();
        bad_pk[0] = 0x05;
        assert!(matches!(
            verify(&tx, &der, &bad_pk),
            Err(VerifyError::KeyPrefix(0x05))
        ));

        // Right prefix, but x is not on the curve
        let mut off_curve = vec![0x02];
        off_curve.extend_from_slice(&[0xFF; 32]);
        assert!(matches!(
            verify(&tx, &der, &off_curve),
            Err(VerifyError::PublicKey(_))
        ));
    }
}
