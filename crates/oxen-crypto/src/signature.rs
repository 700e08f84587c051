//! CryptoNote Schnorr signatures (`generate_signature` / `check_signature`).
//!
//! Used for ONS record updates, where the owner signs the update hash with
//! the spend key of the owning address.

use curve25519_dalek::constants::{ED25519_BASEPOINT_POINT, ED25519_BASEPOINT_TABLE};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;

use crate::{compress, decompress, hash_to_scalar_parts, random_scalar, CryptoError, Key, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub c: Key,
    pub r: Key,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.c);
        out[32..].copy_from_slice(&self.r);
        out
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut c = [0u8; 32];
        let mut r = [0u8; 32];
        c.copy_from_slice(&bytes[..32]);
        r.copy_from_slice(&bytes[32..]);
        Signature { c, r }
    }
}

fn challenge(hash: &Key, public: &Key, commitment: &EdwardsPoint) -> Scalar {
    hash_to_scalar_parts(&[hash, public, &compress(commitment)])
}

pub fn generate_signature(hash: &Key, public: &Key, secret: &Scalar) -> Result<Signature> {
    if crate::secret_to_public(secret) != *public {
        return Err(CryptoError::KeyMismatch);
    }
    let k = random_scalar();
    let c = challenge(hash, public, &(ED25519_BASEPOINT_TABLE * &k));
    let r = k - c * secret;
    Ok(Signature { c: c.to_bytes(), r: r.to_bytes() })
}

pub fn check_signature(hash: &Key, public: &Key, sig: &Signature) -> bool {
    let (Ok(point), Ok(c), Ok(r)) = (
        decompress(public),
        crate::scalar_from_canonical(&sig.c),
        crate::scalar_from_canonical(&sig.r),
    ) else {
        return false;
    };
    let commitment = EdwardsPoint::vartime_multiscalar_mul([r, c], [ED25519_BASEPOINT_POINT, point]);
    challenge(hash, public, &commitment) == c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_keys;

    #[test]
    fn sign_and_check() {
        let (sec, public) = generate_keys();
        let hash = crate::keccak256(b"ons update");
        let sig = generate_signature(&hash, &public, &sec).unwrap();
        assert!(check_signature(&hash, &public, &sig));
        assert!(!check_signature(&crate::keccak256(b"other"), &public, &sig));
        assert_eq!(Signature::from_bytes(&sig.to_bytes()), sig);
    }

    #[test]
    fn wrong_key_rejected() {
        let (sec, _) = generate_keys();
        let (_, other) = generate_keys();
        assert_eq!(generate_signature(&[0u8; 32], &other, &sec), Err(CryptoError::KeyMismatch));
    }
}
