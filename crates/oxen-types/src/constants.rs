//! Oxen network identities, address prefixes and economy constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Network Types
// =============================================================================

/// Network a wallet (and its ledger) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetType {
    Mainnet,
    Testnet,
    Devnet,
    Fakechain,
}

impl NetType {
    /// Name persisted in the ledger metadata and accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Devnet => "devnet",
            Self::Fakechain => "fakechain",
        }
    }

    pub fn prefixes(&self) -> AddressPrefixes {
        match self {
            Self::Mainnet | Self::Fakechain => MAINNET_PREFIXES,
            Self::Testnet => TESTNET_PREFIXES,
            Self::Devnet => DEVNET_PREFIXES,
        }
    }

    pub fn rpc_default_port(&self) -> u16 {
        match self {
            Self::Mainnet | Self::Fakechain => 22023,
            Self::Testnet => 38157,
            Self::Devnet => 38857,
        }
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network type: {0}")]
pub struct UnknownNetType(pub String);

impl FromStr for NetType {
    type Err = UnknownNetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "devnet" => Ok(Self::Devnet),
            "fakechain" => Ok(Self::Fakechain),
            other => Err(UnknownNetType(other.to_string())),
        }
    }
}

// =============================================================================
// Address Prefixes
// =============================================================================

/// Base58 varint tags for the three address kinds of one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefixes {
    pub standard: u64,
    pub integrated: u64,
    pub subaddress: u64,
}

pub const MAINNET_PREFIXES: AddressPrefixes =
    AddressPrefixes { standard: 114, integrated: 115, subaddress: 116 };
pub const TESTNET_PREFIXES: AddressPrefixes =
    AddressPrefixes { standard: 156, integrated: 157, subaddress: 158 };
pub const DEVNET_PREFIXES: AddressPrefixes =
    AddressPrefixes { standard: 3930, integrated: 4442, subaddress: 5850 };

// =============================================================================
// Sizes
// =============================================================================

pub const KEY_SIZE: usize = 32;
pub const HASH_SIZE: usize = 32;
pub const PAYMENT_ID_SIZE: usize = 8;
pub const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Economy
// =============================================================================

/// Atomic units per OXEN.
pub const COIN: u64 = 1_000_000_000;

pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 30;
pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;

/// Decoys per ring; ring size is one more.
pub const TX_OUTPUT_DECOYS: usize = 9;
pub const RING_SIZE: usize = TX_OUTPUT_DECOYS + 1;

pub const TX_BULLETPROOF_MAX_OUTPUTS: usize = 16;

/// Fallback fee parameters until the node has reported its own.
pub const FEE_PER_BYTE_V13: u64 = 215;
pub const FEE_PER_OUTPUT_V18: u64 = 5_000_000;
pub const FEE_QUANTIZATION_MASK: u64 = 1;

pub const BLINK_MINER_TX_FEE_PERCENT: u64 = 100;
pub const BLINK_BURN_TX_FEE_PERCENT_V18: u64 = 200;
pub const BLINK_BURN_FIXED: u64 = 0;

/// Hard fork the wallet builds transactions for.
pub const HF_VERSION: u8 = 19;
pub const HF_PULSE: u8 = 16;
pub const HF18: u8 = 18;

pub const TRANSACTION_VERSION: u64 = 4;

// =============================================================================
// Hash domain separators
// =============================================================================

pub const HASHKEY_SUBADDRESS: &[u8] = b"SubAddr\0";
pub const HASHKEY_AMOUNT: &[u8] = b"amount";
pub const HASHKEY_COMMITMENT_MASK: &[u8] = b"commitment_mask";
