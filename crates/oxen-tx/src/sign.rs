//! RingCT signing and verification (CLSAG + Bulletproofs+).
//!
//! Signing takes the finished prefix and:
//!   1. Commits to every output amount and encrypts the amounts
//!   2. Picks pseudo-output masks, the last one balancing the output masks
//!   3. Proves all output amounts in one aggregated Bulletproofs+ proof
//!   4. Computes the pre-MLSAG message and signs each input with CLSAG
//!
//! Verification checks range proofs, the commitment balance and every
//! CLSAG, without any semantic checks on ring membership.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;

use oxen_crypto::bulletproofs_plus::{self, BulletproofPlus};
use oxen_crypto::clsag::{self, RingMember};
use oxen_crypto::{commit, compress, decompress, div8, keccak256, keccak256_parts, random_scalar, Key};

use crate::types::*;
use crate::TxError;

/// The real output being spent by one input, with its ring.
#[derive(Debug, Clone)]
pub struct SigningInput {
    /// Ring members sorted by global index.
    pub ring: Vec<RingMember>,
    pub real_index: usize,
    /// One-time secret key of the real output.
    pub secret: Scalar,
    /// Commitment blinding factor of the real output.
    pub mask: Scalar,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SigningOutput {
    pub amount: u64,
    pub mask: Scalar,
    pub encrypted_amount: [u8; 8],
}

/// Produce the BulletproofPlus RingCT signatures for `prefix`.
///
/// `inputs` must be in the order of the prefix inputs; the key image each
/// CLSAG produces is checked against the one already in the prefix.
pub fn sign_rct(
    prefix: &TxPrefix,
    inputs: &[SigningInput],
    outputs: &[SigningOutput],
    fee: u64,
) -> Result<RctSignatures, TxError> {
    if inputs.is_empty() {
        return Err(TxError::Signing("no inputs to sign".into()));
    }
    if outputs.is_empty() {
        return Err(TxError::Signing("no outputs".into()));
    }
    if inputs.len() != prefix.inputs.len() || outputs.len() != prefix.outputs.len() {
        return Err(TxError::Signing("signing data does not match the prefix".into()));
    }

    let sum_in = inputs.iter().try_fold(0u64, |acc, i| acc.checked_add(i.amount));
    let sum_out = outputs.iter().try_fold(fee, |acc, o| acc.checked_add(o.amount));
    match (sum_in, sum_out) {
        (Some(a), Some(b)) if a == b => {}
        _ => return Err(TxError::Signing("inputs do not balance outputs plus fee".into())),
    }

    let out_pk: Vec<Key> = outputs.iter().map(|o| compress(&commit(o.amount, &o.mask))).collect();

    let pseudo_masks = pseudo_output_masks(inputs.len(), outputs);
    let pseudo_outs: Vec<Key> =
        inputs.iter().zip(&pseudo_masks).map(|(i, m)| compress(&commit(i.amount, m))).collect();

    let amounts: Vec<u64> = outputs.iter().map(|o| o.amount).collect();
    let masks: Vec<Scalar> = outputs.iter().map(|o| o.mask).collect();
    let proof = bulletproofs_plus::prove(&amounts, &masks)?;

    let mut rct = RctSignatures {
        rct_type: rct_type::BULLETPROOF_PLUS,
        txn_fee: fee,
        base_pseudo_outs: Vec::new(),
        ecdh_info: outputs.iter().map(|o| EcdhTuple::Compact(o.encrypted_amount)).collect(),
        out_pk,
        prunable: RctPrunable::None,
    };

    let message = pre_mlsag_hash(&prefix.hash(), &rct, std::slice::from_ref(&proof));

    let mut clsags = Vec::with_capacity(inputs.len());
    for (n, (input, pseudo_mask)) in inputs.iter().zip(&pseudo_masks).enumerate() {
        let z = input.mask - pseudo_mask;
        let (sig, image) =
            clsag::sign(&message, &input.ring, input.real_index, &input.secret, &z, &pseudo_outs[n])?;
        if prefix.inputs[n].key_image() != Some(&image) {
            return Err(TxError::Signing(format!("key image mismatch on input {n}")));
        }
        clsags.push(sig);
    }

    rct.prunable = RctPrunable::BulletproofPlus { proofs: vec![proof], clsags, pseudo_outs };
    Ok(rct)
}

/// Random masks for all but the last pseudo output, which makes
/// `Σ pseudo_masks == Σ output_masks`.
fn pseudo_output_masks(n: usize, outputs: &[SigningOutput]) -> Vec<Scalar> {
    let out_sum: Scalar = outputs.iter().map(|o| o.mask).sum();
    let mut masks: Vec<Scalar> = (0..n - 1).map(|_| random_scalar()).collect();
    let partial: Scalar = masks.iter().sum();
    masks.push(out_sum - partial);
    masks
}

/// `H(prefix_hash || H(rct_base) || H(bp_components))`, the message every
/// CLSAG signs.
pub fn pre_mlsag_hash(prefix_hash: &Key, rct: &RctSignatures, proofs: &[BulletproofPlus]) -> Key {
    let base_hash = keccak256(&rct.base_bytes());
    let mut bp = Vec::new();
    for p in proofs {
        for k in [&p.a, &p.a1, &p.b, &p.r1, &p.s1, &p.d1] {
            bp.extend_from_slice(k);
        }
        for k in p.l.iter().chain(&p.r) {
            bp.extend_from_slice(k);
        }
    }
    keccak256_parts(&[prefix_hash, &base_hash, &keccak256(&bp)])
}

/// Verify a BulletproofPlus transaction. `rings` holds each input's members
/// in ring order.
pub fn verify_rct(tx: &Transaction, rings: &[Vec<RingMember>]) -> Result<(), TxError> {
    let rct = tx.rct.as_ref().ok_or_else(|| TxError::Invalid("no RingCT signatures".into()))?;
    let RctPrunable::BulletproofPlus { proofs, clsags, pseudo_outs } = &rct.prunable else {
        return Err(TxError::Invalid(format!("unsupported rct type {}", rct.rct_type)));
    };
    let images: Vec<&Key> = tx.key_images().collect();
    if images.len() != clsags.len() || images.len() != rings.len() || images.len() != pseudo_outs.len() {
        return Err(TxError::Invalid("input count mismatch".into()));
    }

    // Range proofs: each proof covers the next 2^(|L|-6) commitments at most.
    let mut with_v = Vec::with_capacity(proofs.len());
    let mut remaining = rct.out_pk.as_slice();
    for p in proofs {
        let capacity = 1usize << p.l.len().saturating_sub(6).min(5);
        let (mine, rest) = remaining.split_at(capacity.min(remaining.len()));
        remaining = rest;
        let v = mine.iter().map(div8).collect::<Result<Vec<_>, _>>()?;
        with_v.push(BulletproofPlus { v, ..p.clone() });
    }
    if !remaining.is_empty() {
        return Err(TxError::Invalid("outputs without range proof".into()));
    }
    bulletproofs_plus::verify(&with_v.iter().collect::<Vec<_>>())?;

    // Σ pseudo_outs == Σ outPk + fee·H
    let mut balance = EdwardsPoint::identity();
    for p in pseudo_outs {
        balance += decompress(p)?;
    }
    for c in &rct.out_pk {
        balance -= decompress(c)?;
    }
    balance -= commit(rct.txn_fee, &Scalar::ZERO);
    if balance != EdwardsPoint::identity() {
        return Err(TxError::Invalid("commitments do not balance".into()));
    }

    let message = pre_mlsag_hash(&tx.prefix_hash(), rct, proofs);
    for (n, sig) in clsags.iter().enumerate() {
        clsag::verify(&message, sig, &rings[n], images[n], &pseudo_outs[n])
            .map_err(|e| TxError::Invalid(format!("input {n}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxen_crypto::{generate_key_image, generate_keys};

    struct Fixture {
        prefix: TxPrefix,
        inputs: Vec<SigningInput>,
        outputs: Vec<SigningOutput>,
        fee: u64,
    }

    fn fixture(in_amounts: &[u64], out_amounts: &[u64], fee: u64) -> Fixture {
        let mut prefix = TxPrefix { version: txversion::V4_TX_TYPES, ..Default::default() };
        let mut inputs = Vec::new();
        for (n, &amount) in in_amounts.iter().enumerate() {
            let (secret, public) = generate_keys();
            let mask = random_scalar();
            let mut ring: Vec<RingMember> = (0..10)
                .map(|_| RingMember { dest: generate_keys().1, mask: compress(&commit(1, &random_scalar())) })
                .collect();
            let real_index = (n * 3) % 10;
            ring[real_index] = RingMember { dest: public, mask: compress(&commit(amount, &mask)) };
            prefix.inputs.push(TxInput::ToKey {
                amount: 0,
                key_offsets: vec![1; 10],
                key_image: generate_key_image(&public, &secret).unwrap(),
            });
            inputs.push(SigningInput { ring, real_index, secret, mask, amount });
        }
        let outputs: Vec<SigningOutput> = out_amounts
            .iter()
            .map(|&amount| {
                prefix.outputs.push(TxOutput { amount: 0, key: generate_keys().1 });
                prefix.output_unlock_times.push(0);
                SigningOutput { amount, mask: random_scalar(), encrypted_amount: [0u8; 8] }
            })
            .collect();
        Fixture { prefix, inputs, outputs, fee }
    }

    fn sign(f: &Fixture) -> Result<Transaction, TxError> {
        let rct = sign_rct(&f.prefix, &f.inputs, &f.outputs, f.fee)?;
        Ok(Transaction { prefix: f.prefix.clone(), rct: Some(rct) })
    }

    fn rings(f: &Fixture) -> Vec<Vec<RingMember>> {
        f.inputs.iter().map(|i| i.ring.clone()).collect()
    }

    #[test]
    fn signed_transaction_verifies() {
        let f = fixture(&[5_000, 7_000], &[9_000, 2_500], 500);
        let tx = sign(&f).unwrap();
        verify_rct(&tx, &rings(&f)).unwrap();

        let reparsed = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        verify_rct(&reparsed, &rings(&f)).unwrap();
        assert_eq!(reparsed.hash(), tx.hash());
    }

    #[test]
    fn unbalanced_amounts_are_refused() {
        let f = fixture(&[5_000], &[4_000], 500);
        assert!(matches!(sign(&f), Err(TxError::Signing(_))));
    }

    #[test]
    fn tampered_fee_fails_verification() {
        let f = fixture(&[5_000], &[4_000], 1_000);
        let mut tx = sign(&f).unwrap();
        if let Some(rct) = tx.rct.as_mut() {
            rct.txn_fee += 1;
        }
        assert!(verify_rct(&tx, &rings(&f)).is_err());
    }

    #[test]
    fn tampered_prefix_fails_clsag() {
        let f = fixture(&[5_000], &[4_000], 1_000);
        let mut tx = sign(&f).unwrap();
        tx.prefix.unlock_time = 99;
        assert!(verify_rct(&tx, &rings(&f)).is_err());
    }

    #[test]
    fn wrong_key_image_in_prefix() {
        let mut f = fixture(&[5_000], &[4_000], 1_000);
        if let TxInput::ToKey { key_image, .. } = &mut f.prefix.inputs[0] {
            *key_image = [1u8; 32];
        }
        assert!(matches!(sign(&f), Err(TxError::Signing(_))));
    }
}
