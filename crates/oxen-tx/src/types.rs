//! Typed transaction structures.

use oxen_crypto::bulletproofs_plus::BulletproofPlus;
use oxen_crypto::clsag::Clsag;
use oxen_crypto::Key;

use crate::extra::{self, ExtraField};

pub mod txversion {
    pub const V1: u64 = 1;
    pub const V2_RINGCT: u64 = 2;
    pub const V3_PER_OUTPUT_UNLOCK_TIMES: u64 = 3;
    pub const V4_TX_TYPES: u64 = 4;
}

pub mod rct_type {
    pub const NULL: u8 = 0;
    pub const FULL: u8 = 1;
    pub const SIMPLE: u8 = 2;
    pub const BULLETPROOF: u8 = 3;
    pub const BULLETPROOF2: u8 = 4;
    pub const CLSAG: u8 = 5;
    pub const BULLETPROOF_PLUS: u8 = 6;

    /// Types whose ECDH tuples carry only the 8-byte amount.
    pub fn is_compact(ty: u8) -> bool {
        matches!(ty, BULLETPROOF2 | CLSAG | BULLETPROOF_PLUS)
    }
}

pub(crate) const TXIN_GEN: u8 = 0xff;
pub(crate) const TXIN_TO_KEY: u8 = 0x02;
pub(crate) const TXOUT_TO_KEY: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxType {
    #[default]
    Standard,
    StateChange,
    KeyImageUnlock,
    Stake,
    OxenNameSystem,
}

impl TxType {
    pub fn as_u64(self) -> u64 {
        match self {
            TxType::Standard => 0,
            TxType::StateChange => 1,
            TxType::KeyImageUnlock => 2,
            TxType::Stake => 3,
            TxType::OxenNameSystem => 4,
        }
    }

    pub fn from_u64(v: u64) -> Option<Self> {
        Some(match v {
            0 => TxType::Standard,
            1 => TxType::StateChange,
            2 => TxType::KeyImageUnlock,
            3 => TxType::Stake,
            4 => TxType::OxenNameSystem,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub prefix: TxPrefix,
    /// Absent only for version 1 transactions.
    pub rct: Option<RctSignatures>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxPrefix {
    pub version: u64,
    /// One entry per output from version 3 on.
    pub output_unlock_times: Vec<u64>,
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<u8>,
    pub tx_type: TxType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxInput {
    /// Coinbase input.
    Gen { height: u64 },
    ToKey {
        amount: u64,
        /// Ring member global indices, relative-encoded.
        key_offsets: Vec<u64>,
        key_image: Key,
    },
}

impl TxInput {
    pub fn key_image(&self) -> Option<&Key> {
        match self {
            TxInput::ToKey { key_image, .. } => Some(key_image),
            TxInput::Gen { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutput {
    /// Plaintext amount; zero for RingCT outputs except coinbase.
    pub amount: u64,
    pub key: Key,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcdhTuple {
    Compact([u8; 8]),
    Full { mask: Key, amount: Key },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RctSignatures {
    pub rct_type: u8,
    pub txn_fee: u64,
    /// Pseudo outputs stored in the base section (type Simple only).
    pub base_pseudo_outs: Vec<Key>,
    pub ecdh_info: Vec<EcdhTuple>,
    pub out_pk: Vec<Key>,
    pub prunable: RctPrunable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RctPrunable {
    None,
    BulletproofPlus {
        proofs: Vec<BulletproofPlus>,
        clsags: Vec<Clsag>,
        pseudo_outs: Vec<Key>,
    },
    /// Older layouts are kept as raw bytes.
    Opaque(Vec<u8>),
}

impl RctSignatures {
    pub fn null() -> Self {
        RctSignatures {
            rct_type: rct_type::NULL,
            txn_fee: 0,
            base_pseudo_outs: Vec::new(),
            ecdh_info: Vec::new(),
            out_pk: Vec::new(),
            prunable: RctPrunable::None,
        }
    }

    /// Pseudo output commitments wherever the layout keeps them.
    pub fn pseudo_outs(&self) -> &[Key] {
        match &self.prunable {
            RctPrunable::BulletproofPlus { pseudo_outs, .. } => pseudo_outs,
            _ => &self.base_pseudo_outs,
        }
    }
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        matches!(self.prefix.inputs.as_slice(), [TxInput::Gen { .. }])
    }

    /// Unlock time of output `i`: per output from version 3, tx-wide before.
    pub fn get_unlock_time(&self, i: usize) -> u64 {
        if self.prefix.version >= txversion::V3_PER_OUTPUT_UNLOCK_TIMES {
            self.prefix.output_unlock_times.get(i).copied().unwrap_or(self.prefix.unlock_time)
        } else {
            self.prefix.unlock_time
        }
    }

    /// Main tx public key followed by any additional per-output keys.
    pub fn public_keys(&self) -> Vec<Key> {
        let fields = extra::parse_extra(&self.prefix.extra);
        let mut keys = Vec::new();
        for field in &fields {
            if let ExtraField::PubKey(k) = field {
                keys.push(*k);
            }
        }
        for field in fields {
            if let ExtraField::AdditionalPubKeys(more) = field {
                keys.extend(more);
            }
        }
        keys
    }

    pub fn key_images(&self) -> impl Iterator<Item = &Key> {
        self.prefix.inputs.iter().filter_map(TxInput::key_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_type_codes() {
        for v in 0..5 {
            assert_eq!(TxType::from_u64(v).unwrap().as_u64(), v);
        }
        assert_eq!(TxType::from_u64(5), None);
    }

    #[test]
    fn unlock_time_by_version() {
        let mut tx = Transaction {
            prefix: TxPrefix {
                version: txversion::V2_RINGCT,
                unlock_time: 7,
                output_unlock_times: vec![60, 61],
                ..Default::default()
            },
            rct: None,
        };
        assert_eq!(tx.get_unlock_time(1), 7);
        tx.prefix.version = txversion::V4_TX_TYPES;
        assert_eq!(tx.get_unlock_time(1), 61);
    }

    #[test]
    fn coinbase_detection() {
        let tx = Transaction {
            prefix: TxPrefix { inputs: vec![TxInput::Gen { height: 3 }], ..Default::default() },
            rct: None,
        };
        assert!(tx.is_coinbase());
        assert_eq!(tx.key_images().count(), 0);
    }
}
