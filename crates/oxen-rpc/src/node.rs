//! The node interface wallet code is written against.
//!
//! [`DaemonRpc`] implements it over HTTP; tests substitute an in-memory node.

use async_trait::async_trait;

use crate::daemon::{BlockEntry, DaemonRpc, FeeEstimate, HeightInfo, OnsOwnerEntry, OutEntry, SubmitResult};
use crate::error::RpcError;

/// Outcome of one `get_blocks` round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockBatch {
    /// More blocks may follow.
    More(Vec<BlockEntry>),
    /// The batch reaches the node's tip.
    End(Vec<BlockEntry>),
    /// Anything else; the caller retries after a delay.
    Retry(String),
}

impl BlockBatch {
    pub fn from_status(status: &str, blocks: Vec<BlockEntry>) -> Self {
        match status {
            "OK" if !blocks.is_empty() => BlockBatch::More(blocks),
            "END" => BlockBatch::End(blocks),
            "OK" => BlockBatch::Retry("empty reply".into()),
            other => BlockBatch::Retry(other.to_string()),
        }
    }
}

#[async_trait]
pub trait NodeRpc: Send + Sync {
    fn url(&self) -> &str;
    async fn get_height(&self) -> Result<HeightInfo, RpcError>;
    async fn get_fee_estimate(&self) -> Result<FeeEstimate, RpcError>;
    async fn get_blocks(&self, start_height: u64, max_count: u64, size_limit: u64) -> Result<BlockBatch, RpcError>;
    async fn get_outs(&self, indices: &[u64], get_txid: bool) -> Result<Vec<OutEntry>, RpcError>;
    async fn submit_transaction(&self, tx_hex: &str, blink: bool) -> Result<SubmitResult, RpcError>;
    async fn ons_names_to_owners(&self, name_hash: &str, ons_type: u64) -> Result<Option<OnsOwnerEntry>, RpcError>;
}

#[async_trait]
impl NodeRpc for DaemonRpc {
    fn url(&self) -> &str {
        DaemonRpc::url(self)
    }

    async fn get_height(&self) -> Result<HeightInfo, RpcError> {
        DaemonRpc::get_height(self).await
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, RpcError> {
        DaemonRpc::get_fee_estimate(self).await
    }

    async fn get_blocks(&self, start_height: u64, max_count: u64, size_limit: u64) -> Result<BlockBatch, RpcError> {
        let resp = DaemonRpc::get_blocks(self, start_height, max_count, size_limit).await?;
        Ok(BlockBatch::from_status(&resp.status, resp.blocks))
    }

    async fn get_outs(&self, indices: &[u64], get_txid: bool) -> Result<Vec<OutEntry>, RpcError> {
        DaemonRpc::get_outs(self, indices, get_txid).await
    }

    async fn submit_transaction(&self, tx_hex: &str, blink: bool) -> Result<SubmitResult, RpcError> {
        DaemonRpc::submit_transaction(self, tx_hex, blink).await
    }

    async fn ons_names_to_owners(&self, name_hash: &str, ons_type: u64) -> Result<Option<OnsOwnerEntry>, RpcError> {
        DaemonRpc::ons_names_to_owners(self, name_hash, ons_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(h: u64) -> BlockEntry {
        BlockEntry { height: h, hash: String::new(), timestamp: 0, transactions: Vec::new() }
    }

    #[test]
    fn batch_status_mapping() {
        assert_eq!(BlockBatch::from_status("OK", vec![block(1)]), BlockBatch::More(vec![block(1)]));
        assert_eq!(BlockBatch::from_status("END", vec![]), BlockBatch::End(vec![]));
        assert!(matches!(BlockBatch::from_status("OK", vec![]), BlockBatch::Retry(_)));
        assert!(matches!(BlockBatch::from_status("BUSY", vec![block(1)]), BlockBatch::Retry(_)));
    }
}
