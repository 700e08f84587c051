//! Cryptographic primitives for the Oxen wallet.
//!
//! Everything here has to be bit-exact with the network: keccak-based
//! hash-to-scalar, the CryptoNote hash-to-point, key derivations, Pedersen
//! commitments, CLSAG ring signatures and Bulletproofs+ range proofs.

use curve25519_dalek::constants::{ED25519_BASEPOINT_POINT, ED25519_BASEPOINT_TABLE};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;
use rand::rngs::OsRng;
use std::sync::OnceLock;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

pub mod bulletproofs_plus;
pub mod clsag;
pub mod ecdh;
mod elligator2;
pub mod signature;
pub mod subaddress;

pub use curve25519_dalek;

/// 32-byte compressed point, scalar or hash as it travels on the wire.
pub type Key = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("bytes are not a valid curve point")]
    InvalidPoint,

    #[error("bytes are not a canonical scalar")]
    InvalidScalar,

    #[error("hash did not map onto the curve")]
    HashToPoint,

    #[error("secret key does not match public key")]
    KeyMismatch,

    #[error("ring signature: {0}")]
    Clsag(&'static str),

    #[error("range proof: {0}")]
    RangeProof(&'static str),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

// ─── Hashing ────────────────────────────────────────────────────────────────

/// CryptoNote `cn_fast_hash`: original keccak-256 padding, not SHA3.
pub fn keccak256(data: &[u8]) -> Key {
    keccak256_parts(&[data])
}

pub fn keccak256_parts(parts: &[&[u8]]) -> Key {
    let mut keccak = Keccak::v256();
    for part in parts {
        keccak.update(part);
    }
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    out
}

/// `H_s`: keccak then reduce mod l.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256(data))
}

pub fn hash_to_scalar_parts(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(keccak256_parts(parts))
}

/// Unkeyed blake2b with a 32-byte digest.
pub fn blake2b32(data: &[u8]) -> Key {
    let mut out = [0u8; 32];
    out.copy_from_slice(blake2b_simd::Params::new().hash_length(32).hash(data).as_bytes());
    out
}

pub fn blake2b32_keyed(data: &[u8], key: &[u8]) -> Key {
    let mut out = [0u8; 32];
    out.copy_from_slice(
        blake2b_simd::Params::new().hash_length(32).key(key).hash(data).as_bytes(),
    );
    out
}

// ─── Points and scalars ─────────────────────────────────────────────────────

pub fn decompress(bytes: &Key) -> Result<EdwardsPoint> {
    CompressedEdwardsY(*bytes).decompress().ok_or(CryptoError::InvalidPoint)
}

pub fn compress(p: &EdwardsPoint) -> Key {
    p.compress().to_bytes()
}

pub fn scalar_from_canonical(bytes: &Key) -> Result<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes)).ok_or(CryptoError::InvalidScalar)
}

pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// `s·G`
pub fn secret_to_public(secret: &Scalar) -> Key {
    compress(&(ED25519_BASEPOINT_TABLE * secret))
}

pub fn generate_keys() -> (Scalar, Key) {
    let secret = random_scalar();
    (secret, secret_to_public(&secret))
}

/// Monero/Oxen view secret derived from the spend secret: `H_s(s)`.
pub fn view_secret_from_spend(spend: &Scalar) -> Scalar {
    hash_to_scalar(spend.as_bytes())
}

pub(crate) fn mul8(p: &EdwardsPoint) -> EdwardsPoint {
    p.mul_by_cofactor()
}

pub(crate) fn inv_eight() -> Scalar {
    Scalar::from(8u64).invert()
}

/// `P/8`, the form output commitments take inside range proofs.
pub fn div8(point: &Key) -> Result<Key> {
    Ok(compress(&(inv_eight() * decompress(point)?)))
}

/// `H_p`: keccak, the CryptoNote elligator map, then cofactor clearing.
pub fn hash_to_point(data: &[u8]) -> Result<EdwardsPoint> {
    let hash = keccak256(data);
    elligator2::ge_fromfe_frombytes_vartime(&hash)
        .map(|p| mul8(&p))
        .ok_or(CryptoError::HashToPoint)
}

/// Second Pedersen generator `H`.
const H_POINT_BYTES: Key = [
    0x8b, 0x65, 0x59, 0x70, 0x15, 0x37, 0x99, 0xaf, 0x2a, 0xea, 0xdc, 0x9f, 0xf1, 0xad, 0xd0, 0xea,
    0x6c, 0x72, 0x51, 0xd5, 0x41, 0x54, 0xcf, 0xa9, 0x2c, 0x17, 0x3a, 0x0d, 0xd3, 0x9c, 0x1f, 0x94,
];

pub fn h_point() -> &'static EdwardsPoint {
    static H: OnceLock<EdwardsPoint> = OnceLock::new();
    H.get_or_init(|| {
        CompressedEdwardsY(H_POINT_BYTES)
            .decompress()
            .expect("H generator constant is a valid point")
    })
}

// ─── Key derivation ─────────────────────────────────────────────────────────

/// `D = 8·(sec·pub)`
pub fn generate_key_derivation(public: &Key, secret: &Scalar) -> Result<Key> {
    let point = decompress(public)?;
    Ok(compress(&mul8(&(secret * point))))
}

/// `H_s(D || varint(i))`
pub fn derivation_to_scalar(derivation: &Key, output_index: u64) -> Scalar {
    let mut buf = Vec::with_capacity(32 + 10);
    buf.extend_from_slice(derivation);
    oxen_types::base58::write_varint(&mut buf, output_index);
    hash_to_scalar(&buf)
}

/// `H_s(D || i)·G + B`
pub fn derive_public_key(derivation: &Key, output_index: u64, base: &Key) -> Result<Key> {
    let base = decompress(base)?;
    let scalar = derivation_to_scalar(derivation, output_index);
    Ok(compress(&(ED25519_BASEPOINT_TABLE * &scalar + base)))
}

/// `H_s(D || i) + b`
pub fn derive_secret_key(derivation: &Key, output_index: u64, base: &Scalar) -> Scalar {
    derivation_to_scalar(derivation, output_index) + base
}

/// Inverse of [`derive_public_key`]: recovers the spend public key the output
/// was addressed to, `K' - H_s(D || i)·G`.
pub fn derive_subaddress_public_key(output_key: &Key, derivation: &Key, output_index: u64) -> Result<Key> {
    let out = decompress(output_key)?;
    let scalar = derivation_to_scalar(derivation, output_index);
    Ok(compress(&(out - ED25519_BASEPOINT_TABLE * &scalar)))
}

/// `I = x·H_p(P)`
pub fn generate_key_image(public: &Key, secret: &Scalar) -> Result<Key> {
    let hp = hash_to_point(public)?;
    Ok(compress(&(secret * hp)))
}

// ─── Commitments ────────────────────────────────────────────────────────────

/// `C = mask·G + amount·H`
pub fn commit(amount: u64, mask: &Scalar) -> EdwardsPoint {
    EdwardsPoint::vartime_multiscalar_mul(
        [*mask, Scalar::from(amount)],
        [ED25519_BASEPOINT_POINT, *h_point()],
    )
}

/// Commitment with the identity mask, as used by coinbase outputs and fees.
pub fn zero_commit(amount: u64) -> EdwardsPoint {
    commit(amount, &Scalar::ONE)
}
