//! Subaddress derivation.
//!
//! For index `(major, minor)` the secret offset is
//! `m = H_s("SubAddr\0" || v || major_LE || minor_LE)`, the spend public key
//! is `S + m·G` and the view public key is `v·(S + m·G)`. Index `(0, 0)` is
//! the primary address itself.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use oxen_types::constants::HASHKEY_SUBADDRESS;

use crate::{compress, decompress, hash_to_scalar_parts, Key, Result};

pub fn subaddress_secret(view_secret: &Scalar, major: u32, minor: u32) -> Scalar {
    hash_to_scalar_parts(&[
        HASHKEY_SUBADDRESS,
        view_secret.as_bytes(),
        &major.to_le_bytes(),
        &minor.to_le_bytes(),
    ])
}

fn spend_point(spend_public: &EdwardsPoint, view_secret: &Scalar, major: u32, minor: u32) -> EdwardsPoint {
    if major == 0 && minor == 0 {
        return *spend_public;
    }
    spend_public + ED25519_BASEPOINT_TABLE * &subaddress_secret(view_secret, major, minor)
}

/// Spend public key `D` of subaddress `(major, minor)`.
pub fn subaddress_spend_public(spend_public: &Key, view_secret: &Scalar, major: u32, minor: u32) -> Result<Key> {
    let spend = decompress(spend_public)?;
    Ok(compress(&spend_point(&spend, view_secret, major, minor)))
}

/// `(spend, view)` public keys of subaddress `(major, minor)`. The primary
/// address view key is `v·G`, which equals `v·S` only for subaddresses.
pub fn subaddress_keys(spend_public: &Key, view_secret: &Scalar, major: u32, minor: u32) -> Result<(Key, Key)> {
    let spend = decompress(spend_public)?;
    let d = spend_point(&spend, view_secret, major, minor);
    let view = if major == 0 && minor == 0 {
        ED25519_BASEPOINT_TABLE * view_secret
    } else {
        view_secret * d
    };
    Ok((compress(&d), compress(&view)))
}

/// Spend secret of the subaddress: `b + m`, or `b` for the primary address.
pub fn subaddress_spend_secret(spend_secret: &Scalar, view_secret: &Scalar, major: u32, minor: u32) -> Scalar {
    if major == 0 && minor == 0 {
        return *spend_secret;
    }
    spend_secret + subaddress_secret(view_secret, major, minor)
}

/// Every spend public key in the rectangle `[0, majors) × [0, minors)`.
pub fn subaddress_table(
    spend_public: &Key,
    view_secret: &Scalar,
    majors: u32,
    minors: u32,
) -> Result<Vec<(Key, u32, u32)>> {
    let spend = decompress(spend_public)?;
    let mut out = Vec::with_capacity(majors as usize * minors as usize);
    for major in 0..majors {
        for minor in 0..minors {
            out.push((compress(&spend_point(&spend, view_secret, major, minor)), major, minor));
        }
    }
    Ok(out)
}
