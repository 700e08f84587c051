//! Fee estimation and transaction weight calculation.
//!
//! Weight follows the node's estimate for a CLSAG + Bulletproofs+
//! transaction, with the BP+ clawback applied above two outputs. The fee is
//! `(weight·per_byte + outputs·per_output)·percent/100 + burn`, rounded up
//! to the node's quantization mask.

use serde::{Deserialize, Serialize};

use oxen_types::constants::{
    BLINK_BURN_TX_FEE_PERCENT_V18, BLINK_MINER_TX_FEE_PERCENT, FEE_PER_BYTE_V13, FEE_PER_OUTPUT_V18,
    FEE_QUANTIZATION_MASK, TX_OUTPUT_DECOYS,
};

/// Fee parameters reported by the node's `get_fee_estimate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub fee_per_byte: u64,
    pub fee_per_output: u64,
    pub quantization_mask: u64,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            fee_per_byte: FEE_PER_BYTE_V13,
            fee_per_output: FEE_PER_OUTPUT_V18,
            quantization_mask: FEE_QUANTIZATION_MASK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    Blink,
}

impl Priority {
    /// Percentage of the base fee charged at this priority.
    pub fn fee_percent(self) -> u64 {
        match self {
            Priority::Normal => 100,
            Priority::Blink => BLINK_MINER_TX_FEE_PERCENT + BLINK_BURN_TX_FEE_PERCENT_V18,
        }
    }

    /// RPC priority code: 5 requests blink, anything else is normal.
    pub fn from_code(code: u32) -> Self {
        if code == 5 {
            Priority::Blink
        } else {
            Priority::Normal
        }
    }
}

fn log2_ceil(n: usize, start: u32) -> u32 {
    let mut log = start;
    while (1usize << log) < n {
        log += 1;
    }
    log
}

/// Estimated weight of a transaction with `n_inputs` inputs (one is assumed
/// when zero) and `n_outputs` outputs, change included.
pub fn estimate_tx_weight(n_inputs: usize, n_outputs: usize, extra_size: usize) -> usize {
    let n_inputs = n_inputs.max(1);
    let ring = TX_OUTPUT_DECOYS + 1;
    let mut size = 1 + 6;
    size += n_inputs * (1 + 6 + ring * 2 + 32);
    size += n_outputs * (6 + 32);
    size += extra_size;

    // rct type, BP+ proof, CLSAGs, pseudo outs, ecdh, outPk, fee
    size += 1;
    let log_padded = log2_ceil(n_outputs, 0) as usize;
    size += (2 * (6 + log_padded) + 4 + 5) * 32 + 3;
    size += n_inputs * (32 * ring + 64);
    size += 32 * n_inputs;
    size += 8 * n_outputs;
    size += 32 * n_outputs;
    size += 4;

    size + bp_plus_clawback(n_outputs)
}

fn bp_plus_clawback(n_outputs: usize) -> usize {
    if n_outputs <= 2 {
        return 0;
    }
    const BP_BASE: usize = 368;
    let log_padded = log2_ceil(n_outputs, 2) as usize;
    let nlr = 2 * (6 + log_padded);
    let bp_size = 32 * (9 + nlr);
    (BP_BASE * (1 << log_padded) - bp_size) * 4 / 5
}

/// Fee for `weight` bytes and `n_outputs` outputs, plus a fixed burn.
pub fn calculate_fee(params: &FeeParams, weight: usize, n_outputs: usize, priority: Priority, burn_fixed: u64) -> u64 {
    let base = weight as u64 * params.fee_per_byte + n_outputs as u64 * params.fee_per_output;
    let fee = base * priority.fee_percent() / 100;
    quantize(fee, params.quantization_mask) + burn_fixed
}

/// Round up to a multiple of `mask`.
pub fn quantize(fee: u64, mask: u64) -> u64 {
    if mask <= 1 {
        return fee;
    }
    fee.div_ceil(mask) * mask
}

/// Fee for a transaction of `n_inputs` paying `n_recipients` plus change.
pub fn estimate_fee(
    params: &FeeParams,
    n_inputs: usize,
    n_recipients: usize,
    extra_size: usize,
    priority: Priority,
    burn_fixed: u64,
) -> u64 {
    let n_outputs = n_recipients + 1;
    let weight = estimate_tx_weight(n_inputs, n_outputs, extra_size);
    calculate_fee(params, weight, n_outputs, priority, burn_fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_two_outputs() {
        // 7 + 59 + 76 + 33 + 1 + (2*7+9)*32+3 + 384 + 32 + 16 + 64 + 4
        assert_eq!(estimate_tx_weight(1, 2, 33), 1415);
    }

    #[test]
    fn zero_inputs_counts_as_one() {
        assert_eq!(estimate_tx_weight(0, 2, 33), estimate_tx_weight(1, 2, 33));
    }

    #[test]
    fn clawback_above_two_outputs() {
        assert_eq!(bp_plus_clawback(2), 0);
        // log 2, nlr 16, bp 800: (1472 - 800) * 4/5
        assert_eq!(bp_plus_clawback(3), 537);
        assert!(bp_plus_clawback(5) > bp_plus_clawback(4));
    }

    #[test]
    fn blink_triples_base_fee() {
        let p = FeeParams::default();
        let normal = estimate_fee(&p, 2, 1, 33, Priority::Normal, 0);
        let blink = estimate_fee(&p, 2, 1, 33, Priority::Blink, 0);
        assert_eq!(blink, normal * 3);
    }

    #[test]
    fn burn_is_added_after_percent() {
        let p = FeeParams::default();
        let plain = estimate_fee(&p, 1, 1, 33, Priority::Normal, 0);
        assert_eq!(estimate_fee(&p, 1, 1, 33, Priority::Normal, 7), plain + 7);
    }

    #[test]
    fn quantization_rounds_up() {
        assert_eq!(quantize(1001, 1000), 2000);
        assert_eq!(quantize(2000, 1000), 2000);
        assert_eq!(quantize(1234, 1), 1234);
    }

    #[test]
    fn fee_grows_with_inputs() {
        let p = FeeParams::default();
        let one = estimate_fee(&p, 1, 1, 33, Priority::Normal, 0);
        let two = estimate_fee(&p, 2, 1, 33, Priority::Normal, 0);
        assert_eq!(two - one, (1 + 6 + 20 + 32 + 320 + 64 + 32) as u64 * p.fee_per_byte);
    }
}
