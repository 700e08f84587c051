//! CryptoNote `ge_fromfe_frombytes_vartime`: maps 32 hash bytes onto the
//! Ed25519 curve through an Elligator-2 style construction.
//!
//! The output is not cofactor cleared; [`crate::hash_to_point`] multiplies
//! by 8. Field arithmetic is done on 4×64-bit limbs mod `p = 2^255 - 19`
//! because dalek keeps its field element type private.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use std::ops::{Add, Mul, Neg, Sub};

/// Field element mod p, always kept fully reduced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Fe([u64; 4]);

const P: [u64; 4] = [
    0xFFFF_FFFF_FFFF_FFED,
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
    0x7FFF_FFFF_FFFF_FFFF,
];

/// sqrt(-1) mod p.
const SQRT_M1: [u8; 32] = [
    0xb0, 0xa0, 0x0e, 0x4a, 0x27, 0x1b, 0xee, 0xc4, 0x78, 0xe4, 0x2f, 0xad, 0x06, 0x18, 0x43, 0x2f,
    0xa7, 0xd7, 0xfb, 0x3d, 0x99, 0x00, 0x4d, 0x2b, 0x0b, 0xdf, 0xc1, 0x4f, 0x80, 0x24, 0x83, 0x2b,
];

/// Montgomery curve coefficient A.
const MONT_A: u64 = 486_662;

fn adc(a: u64, b: u64, carry: &mut u64) -> u64 {
    let sum = a as u128 + b as u128 + *carry as u128;
    *carry = (sum >> 64) as u64;
    sum as u64
}

fn sbb(a: u64, b: u64, borrow: &mut u64) -> u64 {
    let diff = (a as u128).wrapping_sub(b as u128 + *borrow as u128);
    *borrow = (diff >> 127) as u64;
    diff as u64
}

fn geq(a: &[u64; 4], b: &[u64; 4]) -> bool {
    for i in (0..4).rev() {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    true
}

fn sub_p(a: &mut [u64; 4]) {
    let mut borrow = 0;
    for i in 0..4 {
        a[i] = sbb(a[i], P[i], &mut borrow);
    }
}

impl Fe {
    const ZERO: Fe = Fe([0; 4]);
    const ONE: Fe = Fe([1, 0, 0, 0]);

    fn from_u64(v: u64) -> Fe {
        Fe([v, 0, 0, 0])
    }

    /// Loads all 256 bits (the top bit is not masked) and reduces.
    fn from_bytes(bytes: &[u8; 32]) -> Fe {
        let mut limbs = [0u64; 4];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[i] = u64::from_le_bytes(word);
        }
        while geq(&limbs, &P) {
            sub_p(&mut limbs);
        }
        Fe(limbs)
    }

    fn to_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    fn is_negative(&self) -> bool {
        self.0[0] & 1 == 1
    }

    fn square(self) -> Fe {
        self * self
    }

    fn pow(self, exp: &[u64; 4]) -> Fe {
        let mut acc = Fe::ONE;
        let mut base = self;
        for limb in exp {
            let mut bits = *limb;
            for _ in 0..64 {
                if bits & 1 == 1 {
                    acc = acc * base;
                }
                base = base.square();
                bits >>= 1;
            }
        }
        acc
    }

    fn invert(self) -> Fe {
        self.pow(&[P[0] - 2, P[1], P[2], P[3]])
    }

    /// `(u/v)^((p+3)/8) = u·v^3·(u·v^7)^((p-5)/8)`
    fn div_pow_m1(u: Fe, v: Fe) -> Fe {
        const P_MINUS_5_OVER_8: [u64; 4] = [
            0xFFFF_FFFF_FFFF_FFFD,
            0xFFFF_FFFF_FFFF_FFFF,
            0xFFFF_FFFF_FFFF_FFFF,
            0x0FFF_FFFF_FFFF_FFFF,
        ];
        let v3 = v.square() * v;
        let v7 = v3.square() * v;
        u * v3 * (u * v7).pow(&P_MINUS_5_OVER_8)
    }

    fn sqrt(self) -> Option<Fe> {
        const P_PLUS_3_OVER_8: [u64; 4] = [
            0xFFFF_FFFF_FFFF_FFFE,
            0xFFFF_FFFF_FFFF_FFFF,
            0xFFFF_FFFF_FFFF_FFFF,
            0x0FFF_FFFF_FFFF_FFFF,
        ];
        let candidate = self.pow(&P_PLUS_3_OVER_8);
        if candidate.square() == self {
            return Some(candidate);
        }
        let twisted = candidate * Fe::from_bytes(&SQRT_M1);
        (twisted.square() == self).then_some(twisted)
    }
}

impl Add for Fe {
    type Output = Fe;
    fn add(self, rhs: Fe) -> Fe {
        let mut carry = 0;
        let mut r = [0u64; 4];
        for i in 0..4 {
            r[i] = adc(self.0[i], rhs.0[i], &mut carry);
        }
        // Both operands are < p < 2^255 so the sum fits in 256 bits.
        if geq(&r, &P) {
            sub_p(&mut r);
        }
        Fe(r)
    }
}

impl Neg for Fe {
    type Output = Fe;
    fn neg(self) -> Fe {
        if self.is_zero() {
            return self;
        }
        let mut borrow = 0;
        let mut r = [0u64; 4];
        for i in 0..4 {
            r[i] = sbb(P[i], self.0[i], &mut borrow);
        }
        Fe(r)
    }
}

impl Sub for Fe {
    type Output = Fe;
    fn sub(self, rhs: Fe) -> Fe {
        self + (-rhs)
    }
}

impl Mul for Fe {
    type Output = Fe;
    fn mul(self, rhs: Fe) -> Fe {
        let mut wide = [0u64; 8];
        for i in 0..4 {
            let mut carry = 0u128;
            for j in 0..4 {
                let t = self.0[i] as u128 * rhs.0[j] as u128 + wide[i + j] as u128 + carry;
                wide[i + j] = t as u64;
                carry = t >> 64;
            }
            wide[i + 4] = carry as u64;
        }

        // 2^256 ≡ 38 (mod p): fold the high half down twice.
        let mut r = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let t = wide[i] as u128 + wide[i + 4] as u128 * 38 + carry;
            r[i] = t as u64;
            carry = t >> 64;
        }
        let mut top = carry as u64 * 38;
        let mut c = 0;
        r[0] = adc(r[0], top, &mut c);
        for limb in r.iter_mut().skip(1) {
            *limb = adc(*limb, 0, &mut c);
        }
        top = c * 38;
        c = 0;
        r[0] = adc(r[0], top, &mut c);
        while geq(&r, &P) {
            sub_p(&mut r);
        }
        Fe(r)
    }
}

/// Map 32 bytes to a curve point. `None` only if the construction produces
/// an undecodable encoding, which does not happen for valid field input.
pub(crate) fn ge_fromfe_frombytes_vartime(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
    let a = Fe::from_u64(MONT_A);
    let a_ap2 = a * (a + Fe::from_u64(2));
    let sqrt_m1 = Fe::from_bytes(&SQRT_M1);

    let u = Fe::from_bytes(bytes);
    let u2 = u.square();
    let v = u2 + u2;
    let w = v + Fe::ONE;
    // w^2 - 2·A^2·u^2
    let a2 = a.square();
    let x = w.square() - (a2 + a2) * u2;

    let mut r_x = Fe::div_pow_m1(w, x);
    let rx2x = r_x.square() * x;
    let mut z = -a;

    let sign = if (w - rx2x).is_zero() || (w + rx2x).is_zero() {
        let root = if (w - rx2x).is_zero() {
            (a_ap2 + a_ap2).sqrt()
        } else {
            (-(a_ap2 + a_ap2)).sqrt()
        };
        r_x = r_x * root?;
        r_x = r_x * u;
        z = z * v;
        false
    } else {
        let twisted = rx2x * sqrt_m1;
        let root = if (w - twisted).is_zero() {
            (sqrt_m1 * a_ap2).sqrt()
        } else {
            (-(sqrt_m1 * a_ap2)).sqrt()
        };
        r_x = r_x * root?;
        true
    };

    if r_x.is_negative() != sign {
        r_x = -r_x;
    }

    let zz = z + w;
    let yy = z - w;
    let xx = r_x * zz;

    let z_inv = zz.invert();
    let x_aff = xx * z_inv;
    let mut compressed = (yy * z_inv).to_bytes();
    if x_aff.is_negative() {
        compressed[31] |= 0x80;
    }
    CompressedEdwardsY(compressed).decompress()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_inverse_and_sqrt() {
        let x = Fe::from_u64(123_456_789);
        assert_eq!(x * x.invert(), Fe::ONE);
        let sq = x.square();
        let root = sq.sqrt().unwrap();
        assert!(root == x || root == -x);
        assert_eq!(Fe::from_bytes(&SQRT_M1).square(), -Fe::ONE);
    }

    #[test]
    fn reduces_values_above_p() {
        let p_bytes = Fe(P).to_bytes();
        assert_eq!(Fe::from_bytes(&p_bytes), Fe::ZERO);
        let all_ones = Fe::from_bytes(&[0xFF; 32]);
        // 2^256 - 1 = 2p + 37
        assert_eq!(all_ones, Fe::from_u64(37));
    }

    #[test]
    fn map_is_deterministic() {
        let a = ge_fromfe_frombytes_vartime(&[7u8; 32]).unwrap();
        let b = ge_fromfe_frombytes_vartime(&[7u8; 32]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ge_fromfe_frombytes_vartime(&[8u8; 32]).unwrap());
    }
}
