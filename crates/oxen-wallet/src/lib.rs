//! Oxen light wallet core.
//!
//! Key holder, SQLite ledger, block scanner, daemon comms with a shared sync
//! engine, transaction construction (inputs, decoys, CLSAG, ONS) and the
//! wallet orchestrator with its request surface.

pub mod block;
pub mod config;
pub mod constructor;
pub mod daemon_comms;
pub mod db;
pub mod error;
pub mod keys;
pub mod output_selection;
pub mod pending;
pub mod request;
pub mod scanner;
pub mod wallet;

pub use block::Block;
pub use config::{CommsConfig, WalletConfig};
pub use constructor::TransactionConstructor;
pub use daemon_comms::{ChainSubscriber, DaemonComms, SyncCursor, SyncStep};
pub use db::LedgerStore;
pub use error::WalletError;
pub use keys::{KeyHolder, SoftwareKeyHolder, SubaddressIndex};
pub use pending::{PendingTransaction, Recipient};
pub use request::{MnemonicEncoder, RequestHandler};
pub use wallet::{Balance, SyncEvent, SyncStatus, Wallet};
