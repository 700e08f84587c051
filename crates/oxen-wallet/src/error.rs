//! Wallet error types.

use oxen_types::NetType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet is for {configured} but the ledger was created for {stored}")]
    NetTypeMismatch { configured: NetType, stored: String },

    #[error("unsupported ledger version {found} (this build reads {supported})")]
    SchemaMismatch { found: i64, supported: i64 },

    #[error("block {got} is not contiguous with last scanned height {last}")]
    NonContiguousBlock { last: i64, got: i64 },

    #[error("malformed block payload: {0}")]
    MalformedBlock(String),

    #[error("failed to decode output {output_index} of tx {tx}: {reason}")]
    ScanDecode { tx: String, output_index: u64, reason: String },

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("locally built transaction failed verification: {0}")]
    SignatureVerification(String),

    #[error("node rejected transaction: {0}")]
    SubmitRejected(String),

    #[error("timed out waiting for the node to accept the transaction")]
    SubmitTimeout,

    #[error("ONS lookup failed: {0}")]
    OnsLookup(String),

    #[error("ledger error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] oxen_rpc::RpcError),

    #[error("transaction error: {0}")]
    Tx(#[from] oxen_tx::TxError),

    #[error("crypto error: {0}")]
    Crypto(#[from] oxen_crypto::CryptoError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("keys do not match the keys stored in the ledger")]
    KeyMismatch,

    #[error("output {output_index} does not open with our keys: {reason}")]
    OutputDecode { output_index: u64, reason: String },

    #[error("wallet is not running")]
    NotRunning,
}

impl WalletError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        WalletError::InvalidRequest(reason.into())
    }

    /// Stable code reported by the request surface.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::NetTypeMismatch { .. } => "NETTYPE_MISMATCH",
            WalletError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            WalletError::NonContiguousBlock { .. } => "NON_CONTIGUOUS_BLOCK",
            WalletError::MalformedBlock(_) => "MALFORMED_BLOCK",
            WalletError::ScanDecode { .. } => "SCAN_DECODE",
            WalletError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            WalletError::SignatureVerification(_) => "SIGNATURE_VERIFICATION",
            WalletError::SubmitRejected(_) => "SUBMIT_REJECTED",
            WalletError::SubmitTimeout => "SUBMIT_TIMEOUT",
            WalletError::OnsLookup(_) => "ONS_LOOKUP",
            WalletError::Store(_) => "STORE",
            WalletError::Rpc(_) => "RPC",
            WalletError::Tx(_) => "TX",
            WalletError::Crypto(_) => "CRYPTO",
            WalletError::InvalidRequest(_) => "INVALID_REQUEST",
            WalletError::KeyMismatch => "KEY_MISMATCH",
            WalletError::OutputDecode { .. } => "OUTPUT_DECODE",
            WalletError::NotRunning => "NOT_RUNNING",
        }
    }
}
