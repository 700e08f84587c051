//! Blocks as delivered by the node, parsed for scanning.

use oxen_crypto::Key;
use oxen_rpc::daemon::BlockEntry;
use oxen_tx::Transaction;

use crate::error::WalletError;

/// A transaction inside a block, with the global index of each output.
#[derive(Debug, Clone)]
pub struct BlockTx {
    pub hash: Key,
    pub tx: Transaction,
    pub global_indices: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub height: u64,
    pub hash: Key,
    pub timestamp: u64,
    pub transactions: Vec<BlockTx>,
}

fn parse_hash(what: &str, s: &str) -> Result<Key, WalletError> {
    let bytes = hex::decode(s).map_err(|e| WalletError::MalformedBlock(format!("{what} hash: {e}")))?;
    bytes.try_into().map_err(|_| WalletError::MalformedBlock(format!("{what} hash is not 32 bytes")))
}

impl Block {
    pub fn from_entry(entry: &BlockEntry) -> Result<Self, WalletError> {
        let hash = parse_hash("block", &entry.hash)?;
        let transactions = entry
            .transactions
            .iter()
            .map(|t| {
                let tx = Transaction::from_hex(&t.tx)
                    .map_err(|e| WalletError::MalformedBlock(format!("tx {} at height {}: {e}", t.hash, entry.height)))?;
                Ok(BlockTx { hash: parse_hash("tx", &t.hash)?, tx, global_indices: t.global_indices.clone() })
            })
            .collect::<Result<_, WalletError>>()?;
        Ok(Block { height: entry.height, hash, timestamp: entry.timestamp, transactions })
    }

    /// Outputs this block adds to the chain.
    pub fn output_count(&self) -> u64 {
        self.transactions.iter().map(|t| t.tx.prefix.outputs.len() as u64).sum()
    }
}
