//! Oxen transaction model and construction primitives.
//!
//! Typed transactions with byte-exact (de)serialization, the `extra` field,
//! fee and weight estimation, decoy sampling, RingCT signing and
//! verification (CLSAG + Bulletproofs+), and Oxen Name System records.
//! Low-level crypto is delegated to oxen-crypto.

pub mod decoy;
pub mod extra;
pub mod fee;
pub mod ons;
pub mod serialize;
pub mod sign;
pub mod types;

pub use decoy::DecoySelector;
pub use fee::{FeeParams, Priority};
pub use sign::{sign_rct, verify_rct};
pub use types::{RctSignatures, Transaction, TxInput, TxOutput, TxPrefix, TxType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid transaction: {0}")]
    Invalid(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("decoy selection failed: {0}")]
    DecoySelection(String),

    #[error("ONS: {0}")]
    Ons(String),

    #[error(transparent)]
    Crypto(#[from] oxen_crypto::CryptoError),
}
