//! Amount encryption between sender and receiver.
//!
//! Both sides derive the same shared scalar `ss = H_s(D || i)` for output
//! `i`. Compact (v2) tuples carry only an 8-byte XOR-masked amount and the
//! commitment mask is re-derived from `ss`; full (v1) tuples carry both
//! the mask and the amount offset by hashes of `ss`.

use curve25519_dalek::scalar::Scalar;

use oxen_types::constants::{HASHKEY_AMOUNT, HASHKEY_COMMITMENT_MASK};

use crate::{compress, commit, hash_to_scalar, hash_to_scalar_parts, keccak256_parts, Key};

/// `ss` for output `index` of a transaction with the given derivation.
pub fn shared_secret(derivation: &Key, index: u64) -> Scalar {
    crate::derivation_to_scalar(derivation, index)
}

fn amount_pad(ss: &Scalar) -> [u8; 8] {
    let hash = keccak256_parts(&[HASHKEY_AMOUNT, ss.as_bytes()]);
    let mut pad = [0u8; 8];
    pad.copy_from_slice(&hash[..8]);
    pad
}

pub fn encode_amount(amount: u64, ss: &Scalar) -> [u8; 8] {
    let pad = amount_pad(ss);
    let mut out = amount.to_le_bytes();
    out.iter_mut().zip(pad).for_each(|(b, p)| *b ^= p);
    out
}

pub fn decode_amount(encrypted: &[u8; 8], ss: &Scalar) -> u64 {
    u64::from_le_bytes(encode_amount(u64::from_le_bytes(*encrypted), ss))
}

/// `H_s("commitment_mask" || ss)`
pub fn commitment_mask(ss: &Scalar) -> Scalar {
    hash_to_scalar_parts(&[HASHKEY_COMMITMENT_MASK, ss.as_bytes()])
}

/// Decode a full-size tuple. Returns `(amount, mask)`.
pub fn decode_full(mask: &Key, amount: &Key, ss: &Scalar) -> (u64, Scalar) {
    let first = hash_to_scalar(ss.as_bytes());
    let second = hash_to_scalar(first.as_bytes());
    let mask = Scalar::from_bytes_mod_order(*mask) - first;
    let amount = Scalar::from_bytes_mod_order(*amount) - second;
    let mut low = [0u8; 8];
    low.copy_from_slice(&amount.as_bytes()[..8]);
    (u64::from_le_bytes(low), mask)
}

/// Encode a full-size tuple; inverse of [`decode_full`].
pub fn encode_full(amount: u64, mask: &Scalar, ss: &Scalar) -> (Key, Key) {
    let first = hash_to_scalar(ss.as_bytes());
    let second = hash_to_scalar(first.as_bytes());
    ((mask + first).to_bytes(), (Scalar::from(amount) + second).to_bytes())
}

/// Whether `amount` under `mask` opens `commitment`.
pub fn opens(commitment: &Key, amount: u64, mask: &Scalar) -> bool {
    compress(&commit(amount, mask)) == *commitment
}
