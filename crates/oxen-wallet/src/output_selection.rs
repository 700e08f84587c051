//! Choosing which owned outputs fund a transaction.
//!
//! A single output that covers the amount is preferred. Failing that,
//! outputs are ranked by how close their age falls to draws from a gamma
//! distribution, so older and newer outputs get mixed instead of always
//! sweeping the smallest ones, and taken in that order until they cover the
//! amount plus the fee for that many inputs.

use rand::seq::SliceRandom;

use oxen_tx::decoy::gamma_sample;

use crate::db::SpendableOutput;
use crate::error::WalletError;

const GAMMA_SHAPE: f64 = 1.0;
const GAMMA_SCALE: f64 = 2.0;
const GAMMA_ROLLS: usize = 1000;

/// Pick outputs worth at least `amount + fee_for(n)` where `n` is the number
/// picked.
pub fn select_outputs(
    available: &[SpendableOutput],
    amount: u64,
    fee_for: impl Fn(usize) -> u64,
) -> Result<Vec<SpendableOutput>, WalletError> {
    let balance: u64 = available.iter().map(|o| o.amount).sum();
    let single_fee = fee_for(1);
    if balance < amount + single_fee {
        return Err(WalletError::InsufficientBalance { need: amount + single_fee, have: balance });
    }

    let mut rng = rand::thread_rng();
    let singles: Vec<&SpendableOutput> = available.iter().filter(|o| o.amount > amount + single_fee).collect();
    if let Some(pick) = singles.choose(&mut rng) {
        return Ok(vec![(*pick).clone()]);
    }

    let oldest = available.iter().map(|o| o.block_height).min().unwrap_or(0);
    let newest = available.iter().map(|o| o.block_height).max().unwrap_or(0);
    let span = newest.saturating_sub(oldest).max(1) as f64;
    // Age on the same [0, 2] scale the gamma draws mostly land in.
    let ages: Vec<f64> = available.iter().map(|o| (newest - o.block_height) as f64 / span * 2.0).collect();

    let mut scores = vec![0.0f64; available.len()];
    for _ in 0..GAMMA_ROLLS {
        let draw = gamma_sample(GAMMA_SHAPE, GAMMA_SCALE, &mut rng);
        for (score, age) in scores.iter_mut().zip(&ages) {
            *score += (draw - age).abs();
        }
    }
    let mut order: Vec<usize> = (0..available.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut chosen = Vec::new();
    let mut total = 0u64;
    for i in order {
        chosen.push(available[i].clone());
        total += available[i].amount;
        if total >= amount + fee_for(chosen.len()) {
            return Ok(chosen);
        }
    }
    Err(WalletError::InsufficientBalance { need: amount + fee_for(chosen.len()), have: total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SubaddressIndex;
    use curve25519_dalek::scalar::Scalar;

    fn out(amount: u64, height: u64) -> SpendableOutput {
        SpendableOutput {
            amount,
            output_index: 0,
            global_index: height,
            unlock_time: 0,
            block_height: height,
            output_key: [height as u8; 32],
            derivation: [0u8; 32],
            rct_mask: Scalar::ONE,
            key_image: [height as u8; 32],
            subaddress: SubaddressIndex::PRIMARY,
        }
    }

    #[test]
    fn prefers_single_output() {
        let picked = select_outputs(&[out(5, 1), out(7, 2)], 6, |_| 0).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].amount, 7);
    }

    #[test]
    fn combines_when_no_single_output_covers() {
        let picked = select_outputs(&[out(5, 1), out(7, 2)], 8, |_| 0).unwrap();
        assert_eq!(picked.iter().map(|o| o.amount).sum::<u64>(), 12);
    }

    #[test]
    fn fee_counts_toward_single_choice() {
        // 7 covers 6 but not 6 plus a fee of 2 per input.
        let picked = select_outputs(&[out(5, 1), out(7, 2)], 6, |n| 2 * n as u64).unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn insufficient() {
        let err = select_outputs(&[out(2, 1), out(3, 2)], 10, |_| 0).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { need: 10, have: 5 }));
        assert!(select_outputs(&[], 1, |_| 0).is_err());
    }

    #[test]
    fn stops_once_covered() {
        let available: Vec<_> = (1..=20).map(|h| out(10, h)).collect();
        let picked = select_outputs(&available, 35, |_| 0).unwrap();
        assert_eq!(picked.len(), 4);
    }
}
