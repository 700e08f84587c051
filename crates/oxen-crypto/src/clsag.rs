//! CLSAG ring signatures over (one-time key, amount commitment) pairs.
//!
//! Aggregation and round hashes use 32-byte zero-padded domain tags and
//! hash the original commitments, not the commitment differences. The key
//! image `I` is carried in the transaction inputs, so only `s`, `c1` and
//! `D/8` are part of the signature.

use curve25519_dalek::constants::{ED25519_BASEPOINT_POINT, ED25519_BASEPOINT_TABLE};
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;

use crate::{
    compress, decompress, hash_to_point, hash_to_scalar_parts, inv_eight, mul8, random_scalar,
    CryptoError, Key, Result,
};

fn domain(tag: &[u8]) -> Key {
    let mut buf = [0u8; 32];
    buf[..tag.len()].copy_from_slice(tag);
    buf
}

/// One ring member: its one-time output key and its amount commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingMember {
    pub dest: Key,
    pub mask: Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clsag {
    pub s: Vec<Key>,
    pub c1: Key,
    /// Commitment key image premultiplied by 1/8.
    pub d: Key,
}

/// Decompressed ring state shared by signer and verifier.
struct Ring<'a> {
    members: &'a [RingMember],
    keys: Vec<EdwardsPoint>,
    hashed: Vec<EdwardsPoint>,
    c_diff: Vec<EdwardsPoint>,
    pseudo: &'a Key,
}

impl<'a> Ring<'a> {
    fn new(members: &'a [RingMember], pseudo: &'a Key) -> Result<Self> {
        if members.is_empty() {
            return Err(CryptoError::Clsag("empty ring"));
        }
        let pseudo_pt = decompress(pseudo)?;
        let mut keys = Vec::with_capacity(members.len());
        let mut hashed = Vec::with_capacity(members.len());
        let mut c_diff = Vec::with_capacity(members.len());
        for m in members {
            keys.push(decompress(&m.dest)?);
            hashed.push(hash_to_point(&m.dest)?);
            c_diff.push(decompress(&m.mask)? - pseudo_pt);
        }
        Ok(Ring { members, keys, hashed, c_diff, pseudo })
    }

    /// `(mu_P, mu_C)`
    fn aggregate(&self, image: &Key, d8: &Key) -> (Scalar, Scalar) {
        let agg0 = domain(b"CLSAG_agg_0");
        let agg1 = domain(b"CLSAG_agg_1");
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2 * self.members.len() + 4);
        parts.push(&agg0);
        parts.extend(self.members.iter().map(|m| m.dest.as_slice()));
        parts.extend(self.members.iter().map(|m| m.mask.as_slice()));
        parts.push(image);
        parts.push(d8);
        parts.push(self.pseudo);
        let mu_p = hash_to_scalar_parts(&parts);
        parts[0] = &agg1;
        (mu_p, hash_to_scalar_parts(&parts))
    }

    fn challenge(&self, message: &Key, l: &EdwardsPoint, r: &EdwardsPoint) -> Scalar {
        let round = domain(b"CLSAG_round");
        let l = compress(l);
        let r = compress(r);
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2 * self.members.len() + 5);
        parts.push(&round);
        parts.extend(self.members.iter().map(|m| m.dest.as_slice()));
        parts.extend(self.members.iter().map(|m| m.mask.as_slice()));
        parts.push(self.pseudo);
        parts.push(message);
        parts.push(&l);
        parts.push(&r);
        hash_to_scalar_parts(&parts)
    }

    #[allow(clippy::too_many_arguments)]
    fn step(
        &self,
        i: usize,
        s: Scalar,
        c: Scalar,
        mu: (Scalar, Scalar),
        image: &EdwardsPoint,
        d_full: &EdwardsPoint,
        message: &Key,
    ) -> Scalar {
        let c_p = c * mu.0;
        let c_c = c * mu.1;
        let l = EdwardsPoint::vartime_multiscalar_mul(
            [s, c_p, c_c],
            [ED25519_BASEPOINT_POINT, self.keys[i], self.c_diff[i]],
        );
        let r = EdwardsPoint::vartime_multiscalar_mul([s, c_p, c_c], [self.hashed[i], *image, *d_full]);
        self.challenge(message, &l, &r)
    }
}

/// Sign `message` proving knowledge of the secret key of `ring[real]` and of
/// `z`, the difference between its commitment mask and the pseudo-output mask.
/// Returns the signature and the key image.
pub fn sign(
    message: &Key,
    ring: &[RingMember],
    real: usize,
    secret: &Scalar,
    z: &Scalar,
    pseudo_out: &Key,
) -> Result<(Clsag, Key)> {
    let ctx = Ring::new(ring, pseudo_out)?;
    let n = ring.len();
    if real >= n {
        return Err(CryptoError::Clsag("real index outside ring"));
    }
    if compress(&(ED25519_BASEPOINT_TABLE * secret)) != ring[real].dest {
        return Err(CryptoError::KeyMismatch);
    }

    let hp = ctx.hashed[real];
    let image_pt = secret * hp;
    let image = compress(&image_pt);
    let d_full = z * hp;
    let d8 = compress(&(inv_eight() * d_full));
    let mu = ctx.aggregate(&image, &d8);

    let alpha = random_scalar();
    let mut c = ctx.challenge(message, &(ED25519_BASEPOINT_TABLE * &alpha), &(alpha * hp));

    let mut s = vec![[0u8; 32]; n];
    // c1 is the challenge entering index 0; if real is the last member that
    // is the initial one.
    let mut c1 = c;
    let mut i = (real + 1) % n;
    while i != real {
        let s_i = random_scalar();
        s[i] = s_i.to_bytes();
        c = ctx.step(i, s_i, c, mu, &image_pt, &d_full, message);
        i = (i + 1) % n;
        if i == 0 {
            c1 = c;
        }
    }
    s[real] = (alpha - c * (mu.0 * secret + mu.1 * z)).to_bytes();

    Ok((Clsag { s, c1: c1.to_bytes(), d: d8 }, image))
}

/// Verify without any semantic checks on the ring itself.
pub fn verify(message: &Key, sig: &Clsag, ring: &[RingMember], image: &Key, pseudo_out: &Key) -> Result<()> {
    let ctx = Ring::new(ring, pseudo_out)?;
    if sig.s.len() != ring.len() {
        return Err(CryptoError::Clsag("response count differs from ring size"));
    }
    let image_pt = decompress(image)?;
    if image_pt.is_small_order() {
        return Err(CryptoError::Clsag("key image has small order"));
    }
    let d_full = mul8(&decompress(&sig.d)?);
    let mu = ctx.aggregate(image, &sig.d);

    let c1 = crate::scalar_from_canonical(&sig.c1)?;
    let mut c = c1;
    for (i, s) in sig.s.iter().enumerate() {
        let s_i = crate::scalar_from_canonical(s)?;
        c = ctx.step(i, s_i, c, mu, &image_pt, &d_full, message);
    }
    if c == c1 {
        Ok(())
    } else {
        Err(CryptoError::Clsag("challenge does not close the ring"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{commit, generate_keys};

    fn fixture(n: usize, real: usize) -> (Vec<RingMember>, Scalar, Scalar, Key) {
        let (secret, dest) = generate_keys();
        let in_mask = random_scalar();
        let pseudo_mask = random_scalar();
        let ring = (0..n)
            .map(|i| {
                if i == real {
                    RingMember { dest, mask: compress(&commit(500, &in_mask)) }
                } else {
                    let (_, d) = generate_keys();
                    RingMember { dest: d, mask: compress(&commit(i as u64, &random_scalar())) }
                }
            })
            .collect();
        let pseudo = compress(&commit(500, &pseudo_mask));
        (ring, secret, in_mask - pseudo_mask, pseudo)
    }

    #[test]
    fn sign_verify_full_ring() {
        let msg = [9u8; 32];
        for real in [0, 4, 9] {
            let (ring, secret, z, pseudo) = fixture(10, real);
            let (sig, image) = sign(&msg, &ring, real, &secret, &z, &pseudo).unwrap();
            assert_eq!(image, crate::generate_key_image(&ring[real].dest, &secret).unwrap());
            verify(&msg, &sig, &ring, &image, &pseudo).unwrap();
        }
    }

    #[test]
    fn single_member_ring() {
        let msg = [1u8; 32];
        let (ring, secret, z, pseudo) = fixture(1, 0);
        let (sig, image) = sign(&msg, &ring, 0, &secret, &z, &pseudo).unwrap();
        verify(&msg, &sig, &ring, &image, &pseudo).unwrap();
    }

    #[test]
    fn tampering_is_detected() {
        let msg = [2u8; 32];
        let (ring, secret, z, pseudo) = fixture(4, 2);
        let (sig, image) = sign(&msg, &ring, 2, &secret, &z, &pseudo).unwrap();
        assert!(verify(&[3u8; 32], &sig, &ring, &image, &pseudo).is_err());

        let mut other = ring.clone();
        other[1].dest = generate_keys().1;
        assert!(verify(&msg, &sig, &other, &image, &pseudo).is_err());
    }

    #[test]
    fn wrong_amount_balance_fails() {
        let msg = [4u8; 32];
        let (ring, secret, z, _) = fixture(3, 1);
        let pseudo = compress(&commit(501, &random_scalar()));
        let signed = sign(&msg, &ring, 1, &secret, &z, &pseudo);
        if let Ok((sig, image)) = signed {
            assert!(verify(&msg, &sig, &ring, &image, &pseudo).is_err());
        }
    }

    #[test]
    fn rejects_foreign_secret() {
        let (ring, _, z, pseudo) = fixture(3, 1);
        let err = sign(&[0u8; 32], &ring, 1, &random_scalar(), &z, &pseudo).unwrap_err();
        assert_eq!(err, CryptoError::KeyMismatch);
    }
}
