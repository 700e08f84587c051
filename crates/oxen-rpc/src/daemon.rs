//! Typed wrappers for the node calls a light wallet makes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;

// =============================================================================
// Response types
// =============================================================================

/// `/get_height`: `height` is the chain length, so the top block is
/// `height - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeightInfo {
    pub height: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub immutable_height: u64,
}

/// Fee parameters from `get_fee_estimate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FeeEstimate {
    #[serde(alias = "fee")]
    pub fee_per_byte: u64,
    #[serde(default)]
    pub fee_per_output: u64,
    #[serde(default)]
    pub quantization_mask: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    pub hash: String,
    /// Hex transaction blob.
    pub tx: String,
    /// Global index of each output, in output order.
    #[serde(default)]
    pub global_indices: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<BlockTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetBlocksResponse {
    pub status: String,
    #[serde(default)]
    pub blocks: Vec<BlockEntry>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputRequest {
    pub amount: u64,
    pub index: u64,
}

/// One output returned by `/get_outs`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutEntry {
    pub height: u64,
    pub key: String,
    pub mask: String,
    #[serde(default)]
    pub txid: Option<String>,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResult {
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub double_spend: bool,
    #[serde(default)]
    pub fee_too_low: bool,
    #[serde(default)]
    pub not_relayed: bool,
}

impl SubmitResult {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

/// Current owner of an ONS record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OnsOwnerEntry {
    #[serde(default)]
    pub name_hash: String,
    #[serde(rename = "type", default)]
    pub ons_type: u64,
    pub owner: String,
    #[serde(default)]
    pub backup_owner: Option<String>,
    #[serde(default)]
    pub encrypted_value: String,
    /// Txid of the last buy, update or renewal.
    pub txid: String,
}

// =============================================================================
// DaemonRpc
// =============================================================================

/// Async RPC client for the Oxen node.
pub struct DaemonRpc {
    client: RpcClient,
}

impl DaemonRpc {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self { client: RpcClient::new(url)? })
    }

    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self { client: RpcClient::with_config(config)? })
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn url(&self) -> &str {
        self.client.url()
    }

    pub async fn get_height(&self) -> Result<HeightInfo, RpcError> {
        let val = self.client.post("/get_height", &json!({})).await?;
        Ok(serde_json::from_value(val)?)
    }

    pub async fn get_fee_estimate(&self) -> Result<FeeEstimate, RpcError> {
        let val = self.client.call("get_fee_estimate", json!({})).await?;
        check_status("get_fee_estimate", &val)?;
        Ok(serde_json::from_value(val)?)
    }

    /// Up to `max_count` blocks from `start_height`, capped at `size_limit`
    /// bytes of transactions.
    pub async fn get_blocks(
        &self,
        start_height: u64,
        max_count: u64,
        size_limit: u64,
    ) -> Result<GetBlocksResponse, RpcError> {
        let val = self
            .client
            .post(
                "/get_blocks",
                &json!({ "start_height": start_height, "max_count": max_count, "size_limit": size_limit }),
            )
            .await?;
        Ok(serde_json::from_value(val)?)
    }

    /// Ring member data for RingCT outputs at the given global indices, in
    /// request order.
    pub async fn get_outs(&self, indices: &[u64], get_txid: bool) -> Result<Vec<OutEntry>, RpcError> {
        let outputs: Vec<OutputRequest> = indices.iter().map(|&index| OutputRequest { amount: 0, index }).collect();
        let val = self.client.post("/get_outs", &json!({ "outputs": outputs, "get_txid": get_txid })).await?;
        check_status("get_outs", &val)?;
        let outs = val.get("outs").ok_or(RpcError::NoResult { context: "get_outs".into() })?;
        let outs: Vec<OutEntry> = serde_json::from_value(outs.clone())?;
        if outs.len() != indices.len() {
            return Err(RpcError::invalid("get_outs", format!("asked for {} outputs, got {}", indices.len(), outs.len())));
        }
        Ok(outs)
    }

    pub async fn submit_transaction(&self, tx_hex: &str, blink: bool) -> Result<SubmitResult, RpcError> {
        let val = self
            .client
            .post("/send_raw_transaction", &json!({ "tx_as_hex": tx_hex, "do_not_relay": false, "blink": blink }))
            .await?;
        Ok(serde_json::from_value(val)?)
    }

    /// Owner and last txid of the record `name_hash` (base64) of `ons_type`.
    pub async fn ons_names_to_owners(&self, name_hash: &str, ons_type: u64) -> Result<Option<OnsOwnerEntry>, RpcError> {
        let val = self
            .client
            .call("ons_names_to_owners", json!({ "entries": [{ "name_hash": name_hash, "types": [ons_type] }] }))
            .await?;
        check_status("ons_names_to_owners", &val)?;
        let entries: Vec<OnsOwnerEntry> = match val.get("entries") {
            Some(e) => serde_json::from_value(e.clone())?,
            None => Vec::new(),
        };
        Ok(entries.into_iter().next())
    }
}

fn check_status(context: &str, val: &Value) -> Result<(), RpcError> {
    match val.get("status").and_then(Value::as_str) {
        None | Some("OK") => Ok(()),
        Some("BUSY") => Err(RpcError::Busy { context: context.to_string() }),
        Some(other) => Err(RpcError::Status { context: context.to_string(), status: other.to_string() }),
    }
}
