//! Bulletproofs+ aggregated range proofs (64-bit amounts, up to 16 outputs).
//!
//! Generators, transcript seeding and the proof layout follow the
//! `bulletproof_plus` construction used by RingCT type 6 transactions.
//! Every point inside a proof is stored premultiplied by 1/8.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{Identity, VartimeMultiscalarMul};
use std::sync::OnceLock;

use crate::{
    compress, decompress, elligator2, h_point, inv_eight, keccak256, mul8, random_scalar,
    CryptoError, Key, Result,
};

const N: usize = 64;
const LOG_N: usize = 6;
pub const MAX_OUTPUTS: usize = 16;
const MAX_MN: usize = MAX_OUTPUTS * N;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletproofPlus {
    /// Output commitments times 1/8. Not serialized; recomputed from `outPk`.
    pub v: Vec<Key>,
    pub a: Key,
    pub a1: Key,
    pub b: Key,
    pub r1: Key,
    pub s1: Key,
    pub d1: Key,
    pub l: Vec<Key>,
    pub r: Vec<Key>,
}

// ─── Generators and transcript ──────────────────────────────────────────────

/// `hash_to_p3(keccak(data))`: the generator derivation hashes twice.
fn derive_generator(data: &[u8]) -> Result<EdwardsPoint> {
    crate::hash_to_point(&keccak256(data))
}

struct Generators {
    gi: Vec<EdwardsPoint>,
    hi: Vec<EdwardsPoint>,
}

fn generators() -> Result<&'static Generators> {
    static GENS: OnceLock<Option<Generators>> = OnceLock::new();
    GENS.get_or_init(|| {
        let h = compress(h_point());
        let mut gi = Vec::with_capacity(MAX_MN);
        let mut hi = Vec::with_capacity(MAX_MN);
        for i in 0..MAX_MN as u64 {
            let mut data = Vec::with_capacity(32 + 16 + 10);
            data.extend_from_slice(&h);
            data.extend_from_slice(b"bulletproof_plus");
            let base = data.len();
            oxen_types::base58::write_varint(&mut data, 2 * i);
            hi.push(derive_generator(&data).ok()?);
            data.truncate(base);
            oxen_types::base58::write_varint(&mut data, 2 * i + 1);
            gi.push(derive_generator(&data).ok()?);
        }
        Some(Generators { gi, hi })
    })
    .as_ref()
    .ok_or(CryptoError::HashToPoint)
}

fn initial_transcript() -> Result<Key> {
    let seed = keccak256(b"bulletproof_plus_transcript");
    let point = elligator2::ge_fromfe_frombytes_vartime(&keccak256(&seed)).ok_or(CryptoError::HashToPoint)?;
    Ok(compress(&mul8(&point)))
}

/// Fiat-Shamir state: each update is `H_s(state || elements...)`.
struct Transcript(Key);

impl Transcript {
    fn new() -> Result<Self> {
        Ok(Transcript(initial_transcript()?))
    }

    fn update(&mut self, elements: &[&Key]) -> Result<Scalar> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(1 + elements.len());
        parts.push(&self.0);
        parts.extend(elements.iter().map(|e| e.as_slice()));
        let challenge = crate::hash_to_scalar_parts(&parts);
        if challenge == Scalar::ZERO {
            return Err(CryptoError::RangeProof("zero challenge"));
        }
        self.0 = challenge.to_bytes();
        Ok(challenge)
    }

    /// `z = H_s(y)`, which also replaces the state.
    fn rehash(&mut self, y: &Scalar) -> Result<Scalar> {
        let z = crate::hash_to_scalar(y.as_bytes());
        if z == Scalar::ZERO {
            return Err(CryptoError::RangeProof("zero challenge"));
        }
        self.0 = z.to_bytes();
        Ok(z)
    }
}

fn hash_commitments(v: &[Key]) -> Key {
    let flat: Vec<u8> = v.iter().flatten().copied().collect();
    crate::hash_to_scalar(&flat).to_bytes()
}

/// `(M, log2 M)` with M the padded output count.
fn padded(m: usize) -> (usize, usize) {
    let mut m_val = 1;
    let mut log_m = 0;
    while m_val < m {
        m_val *= 2;
        log_m += 1;
    }
    (m_val, log_m)
}

fn powers(x: Scalar, count: usize) -> Vec<Scalar> {
    let mut out = Vec::with_capacity(count);
    let mut acc = Scalar::ONE;
    for _ in 0..count {
        out.push(acc);
        acc *= x;
    }
    out
}

fn scalar_pow(base: Scalar, mut exp: usize) -> Scalar {
    let mut result = Scalar::ONE;
    let mut b = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result *= b;
        }
        b *= b;
        exp >>= 1;
    }
    result
}

// ─── Prove ──────────────────────────────────────────────────────────────────

/// Prove that every `amounts[j]` committed under `masks[j]` lies in `[0, 2^64)`.
pub fn prove(amounts: &[u64], masks: &[Scalar]) -> Result<BulletproofPlus> {
    if amounts.is_empty() || amounts.len() != masks.len() {
        return Err(CryptoError::RangeProof("amount and mask counts differ"));
    }
    if amounts.len() > MAX_OUTPUTS {
        return Err(CryptoError::RangeProof("too many outputs"));
    }

    let (m_val, log_m) = padded(amounts.len());
    let mn = m_val * N;
    let inv8 = inv_eight();
    let g = ED25519_BASEPOINT_POINT;
    let h = *h_point();
    let gens = generators()?;

    let v: Vec<Key> = amounts
        .iter()
        .zip(masks)
        .map(|(&amount, mask)| {
            compress(&EdwardsPoint::vartime_multiscalar_mul(
                [mask * inv8, Scalar::from(amount) * inv8],
                [g, h],
            ))
        })
        .collect();

    let mut transcript = Transcript::new()?;
    transcript.update(&[&hash_commitments(&v)])?;

    // aL holds the bits, aR = aL - 1; padding slots encode zero.
    let minus_one = -Scalar::ONE;
    let mut a_l = vec![Scalar::ZERO; mn];
    let mut a_r = vec![minus_one; mn];
    for (j, &amount) in amounts.iter().enumerate() {
        for i in 0..N {
            if (amount >> i) & 1 == 1 {
                a_l[j * N + i] = Scalar::ONE;
                a_r[j * N + i] = Scalar::ZERO;
            }
        }
    }

    let alpha = random_scalar();
    let a = EdwardsPoint::vartime_multiscalar_mul(
        a_l.iter()
            .zip(&a_r)
            .flat_map(|(l, r)| [l * inv8, r * inv8])
            .chain([alpha * inv8]),
        gens.gi[..mn]
            .iter()
            .zip(&gens.hi[..mn])
            .flat_map(|(gi, hi)| [*gi, *hi])
            .chain([g]),
    );
    let a_bytes = compress(&a);

    let y = transcript.update(&[&a_bytes])?;
    let z = transcript.rehash(&y)?;
    let z2 = z * z;

    // d[j·N + i] = z^(2(j+1)) · 2^i
    let mut d = vec![Scalar::ZERO; mn];
    let mut z_pow = z2;
    for j in 0..m_val {
        let mut two = Scalar::ONE;
        for i in 0..N {
            d[j * N + i] = z_pow * two;
            two += two;
        }
        z_pow *= z2;
    }

    let y_pow = powers(y, mn + 2);
    let y_inv_pow = powers(y.invert(), mn);

    let mut a_prime: Vec<Scalar> = a_l.iter().map(|l| l - z).collect();
    let mut b_prime: Vec<Scalar> = (0..mn).map(|i| a_r[i] + z + d[i] * y_pow[mn - i]).collect();

    let mut alpha1 = alpha;
    let mut z_acc = Scalar::ONE;
    for mask in masks {
        z_acc *= z2;
        alpha1 += z_acc * y_pow[mn + 1] * mask;
    }

    let mut g_prime = gens.gi[..mn].to_vec();
    let mut h_prime = gens.hi[..mn].to_vec();
    let mut l_out = Vec::with_capacity(LOG_N + log_m);
    let mut r_out = Vec::with_capacity(LOG_N + log_m);
    let mut n_prime = mn;

    while n_prime > 1 {
        n_prime /= 2;
        let (a_lo, a_hi) = a_prime.split_at(n_prime);
        let (b_lo, b_hi) = b_prime.split_at(n_prime);

        let mut c_l = Scalar::ZERO;
        let mut c_r = Scalar::ZERO;
        for i in 0..n_prime {
            c_l += a_lo[i] * b_hi[i] * y_pow[i + 1];
            c_r += a_hi[i] * y_pow[n_prime] * b_lo[i] * y_pow[i + 1];
        }

        let d_l = random_scalar();
        let d_r = random_scalar();

        let l_pt = EdwardsPoint::vartime_multiscalar_mul(
            (0..n_prime)
                .flat_map(|i| [a_lo[i] * y_inv_pow[n_prime] * inv8, b_hi[i] * inv8])
                .chain([c_l * inv8, d_l * inv8]),
            (0..n_prime)
                .flat_map(|i| [g_prime[n_prime + i], h_prime[i]])
                .chain([h, g]),
        );
        let r_pt = EdwardsPoint::vartime_multiscalar_mul(
            (0..n_prime)
                .flat_map(|i| [a_hi[i] * y_pow[n_prime] * inv8, b_lo[i] * inv8])
                .chain([c_r * inv8, d_r * inv8]),
            (0..n_prime)
                .flat_map(|i| [g_prime[i], h_prime[n_prime + i]])
                .chain([h, g]),
        );
        let (l_bytes, r_bytes) = (compress(&l_pt), compress(&r_pt));
        l_out.push(l_bytes);
        r_out.push(r_bytes);

        let x = transcript.update(&[&l_bytes, &r_bytes])?;
        let x_inv = x.invert();
        let gl = y_inv_pow[n_prime] * x;
        let ar = x_inv * y_pow[n_prime];

        let folded_g: Vec<EdwardsPoint> = (0..n_prime)
            .map(|i| {
                EdwardsPoint::vartime_multiscalar_mul([x_inv, gl], [g_prime[i], g_prime[n_prime + i]])
            })
            .collect();
        let folded_h: Vec<EdwardsPoint> = (0..n_prime)
            .map(|i| EdwardsPoint::vartime_multiscalar_mul([x, x_inv], [h_prime[i], h_prime[n_prime + i]]))
            .collect();
        let folded_a: Vec<Scalar> = (0..n_prime).map(|i| a_lo[i] * x + a_hi[i] * ar).collect();
        let folded_b: Vec<Scalar> = (0..n_prime).map(|i| b_lo[i] * x_inv + b_hi[i] * x).collect();

        g_prime = folded_g;
        h_prime = folded_h;
        a_prime = folded_a;
        b_prime = folded_b;
        alpha1 += d_l * x * x + d_r * x_inv * x_inv;
    }

    let r = random_scalar();
    let s = random_scalar();
    let d_ = random_scalar();
    let eta = random_scalar();

    let a1 = EdwardsPoint::vartime_multiscalar_mul(
        [
            r * inv8,
            s * inv8,
            d_ * inv8,
            (r * y * b_prime[0] + s * y * a_prime[0]) * inv8,
        ],
        [g_prime[0], h_prime[0], g, h],
    );
    let b = EdwardsPoint::vartime_multiscalar_mul([eta * inv8, r * y * s * inv8], [g, h]);
    let (a1_bytes, b_bytes) = (compress(&a1), compress(&b));
    let e = transcript.update(&[&a1_bytes, &b_bytes])?;

    Ok(BulletproofPlus {
        v,
        a: a_bytes,
        a1: a1_bytes,
        b: b_bytes,
        r1: (r + a_prime[0] * e).to_bytes(),
        s1: (s + b_prime[0] * e).to_bytes(),
        d1: (eta + d_ * e + alpha1 * e * e).to_bytes(),
        l: l_out,
        r: r_out,
    })
}

// ─── Verify ─────────────────────────────────────────────────────────────────

struct Decoded {
    v: Vec<EdwardsPoint>,
    a: EdwardsPoint,
    a1: EdwardsPoint,
    b: EdwardsPoint,
    r1: Scalar,
    s1: Scalar,
    d1: Scalar,
    l: Vec<EdwardsPoint>,
    r: Vec<EdwardsPoint>,
    m_val: usize,
    y: Scalar,
    z: Scalar,
    e: Scalar,
    x: Vec<Scalar>,
}

fn decode(proof: &BulletproofPlus) -> Result<Decoded> {
    let m = proof.v.len();
    if m == 0 || m > MAX_OUTPUTS {
        return Err(CryptoError::RangeProof("bad commitment count"));
    }
    let (m_val, log_m) = padded(m);
    let rounds = LOG_N + log_m;
    if proof.l.len() != rounds || proof.r.len() != rounds {
        return Err(CryptoError::RangeProof("bad inner-product round count"));
    }

    let mut transcript = Transcript::new()?;
    transcript.update(&[&hash_commitments(&proof.v)])?;
    let y = transcript.update(&[&proof.a])?;
    let z = transcript.rehash(&y)?;
    let x = proof
        .l
        .iter()
        .zip(&proof.r)
        .map(|(l, r)| transcript.update(&[l, r]))
        .collect::<Result<Vec<_>>>()?;
    let e = transcript.update(&[&proof.a1, &proof.b])?;

    let points = |keys: &[Key]| keys.iter().map(decompress).collect::<Result<Vec<_>>>();
    Ok(Decoded {
        v: points(&proof.v)?,
        a: decompress(&proof.a)?,
        a1: decompress(&proof.a1)?,
        b: decompress(&proof.b)?,
        r1: crate::scalar_from_canonical(&proof.r1)?,
        s1: crate::scalar_from_canonical(&proof.s1)?,
        d1: crate::scalar_from_canonical(&proof.d1)?,
        l: points(&proof.l)?,
        r: points(&proof.r)?,
        m_val,
        y,
        z,
        e,
        x,
    })
}

fn batch_invert(scalars: &[Scalar]) -> Vec<Scalar> {
    let mut prefix = Vec::with_capacity(scalars.len());
    let mut acc = Scalar::ONE;
    for s in scalars {
        prefix.push(acc);
        acc *= s;
    }
    let mut inv = acc.invert();
    let mut out = vec![Scalar::ZERO; scalars.len()];
    for i in (0..scalars.len()).rev() {
        out[i] = prefix[i] * inv;
        inv *= scalars[i];
    }
    out
}

/// Products of round challenges (or their inverses) selected by the bits of
/// each generator index.
fn challenge_products(x: &[Scalar], x_inv: &[Scalar], mn: usize) -> Vec<Scalar> {
    let mut cache = vec![Scalar::ZERO; mn];
    cache[0] = x_inv[0];
    cache[1] = x[0];
    for j in 1..x.len() {
        let slots = 1usize << (j + 1);
        for s in (0..slots).rev() {
            cache[s] = cache[s / 2] * if s % 2 == 1 { x[j] } else { x_inv[j] };
        }
    }
    cache
}

/// Batch-verify proofs. A single proof is checked with unit weight.
pub fn verify(proofs: &[&BulletproofPlus]) -> Result<()> {
    if proofs.is_empty() {
        return Ok(());
    }
    let decoded = proofs.iter().map(|p| decode(p)).collect::<Result<Vec<_>>>()?;
    let gens = generators()?;

    let mut scalars: Vec<Scalar> = Vec::new();
    let mut points: Vec<EdwardsPoint> = Vec::new();
    let mut g_scalar = Scalar::ZERO;
    let mut h_scalar = Scalar::ZERO;
    let mut gi_scalars = vec![Scalar::ZERO; MAX_MN];
    let mut hi_scalars = vec![Scalar::ZERO; MAX_MN];

    for p in &decoded {
        let w = if decoded.len() == 1 { Scalar::ONE } else { random_scalar() };
        let mn = p.m_val * N;
        let mut to_invert = p.x.clone();
        to_invert.push(p.y);
        let inverted = batch_invert(&to_invert);
        let (x_inv, y_inv) = (&inverted[..p.x.len()], inverted[p.x.len()]);

        let e2 = p.e * p.e;
        let y_mn = scalar_pow(p.y, mn);
        let y_mn1 = y_mn * p.y;
        let z2 = p.z * p.z;
        let z_pow: Vec<Scalar> = powers(z2, p.m_val + 1)[1..].to_vec();
        let sum_d = Scalar::from(u64::MAX) * z_pow.iter().sum::<Scalar>();
        let sum_y: Scalar = powers(p.y, mn + 1)[1..].iter().sum();

        for (j, v) in p.v.iter().enumerate() {
            scalars.push(-(w * e2 * z_pow[j] * y_mn1));
            points.push(mul8(v));
        }
        scalars.extend([-(w * e2), -(w * p.e), -w]);
        points.extend([mul8(&p.a), mul8(&p.a1), mul8(&p.b)]);

        g_scalar += w * p.d1;
        h_scalar += w * (p.r1 * p.y * p.s1 + e2 * (y_mn1 * p.z * sum_d + (z2 - p.z) * sum_y));

        let cache = challenge_products(&p.x, x_inv, mn);
        let mut e_r1_w = p.e * p.r1 * w;
        let e_s1_w = p.e * p.s1 * w;
        let e2_z_w = e2 * p.z * w;
        let mut minus_e2_w_y = -(e2 * w * y_mn);
        for i in 0..mn {
            let d_i = z_pow[i / N] * Scalar::from(1u64 << (i % N));
            gi_scalars[i] += e_r1_w * cache[i] + e2_z_w;
            hi_scalars[i] += e_s1_w * cache[(!i) & (mn - 1)] - e2_z_w + minus_e2_w_y * d_i;
            e_r1_w *= y_inv;
            minus_e2_w_y *= y_inv;
        }

        for (j, (l, r)) in p.l.iter().zip(&p.r).enumerate() {
            scalars.push(-(w * e2 * p.x[j] * p.x[j]));
            points.push(mul8(l));
            scalars.push(-(w * e2 * x_inv[j] * x_inv[j]));
            points.push(mul8(r));
        }
    }

    scalars.extend([g_scalar, h_scalar]);
    points.extend([ED25519_BASEPOINT_POINT, *h_point()]);
    scalars.extend(gi_scalars.into_iter().chain(hi_scalars));
    points.extend(gens.gi.iter().chain(gens.hi.iter()).copied());

    if EdwardsPoint::vartime_multiscalar_mul(scalars, points) == EdwardsPoint::identity() {
        Ok(())
    } else {
        log::debug!("bulletproof+ batch of {} failed", proofs.len());
        Err(CryptoError::RangeProof("verification equation does not hold"))
    }
}
