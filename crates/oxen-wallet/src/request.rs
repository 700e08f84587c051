//! Request surface for an RPC front end.
//!
//! Each command takes a serde request struct and returns a serde response;
//! [`RequestHandler::handle`] dispatches by method name over JSON values so
//! a transport only has to move bytes. Errors carry the stable
//! [`WalletError::code`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use oxen_tx::Priority;
use oxen_types::Address;

use crate::error::WalletError;
use crate::keys::SubaddressIndex;
use crate::pending::{PendingTransaction, Recipient};
use crate::wallet::Wallet;

/// Turns a spend secret into seed words.
pub trait MnemonicEncoder: Send + Sync {
    fn encode(&self, spend_secret: &[u8; 32], language: &str) -> Result<String, WalletError>;
}

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceResponse {
    pub balance: u64,
    pub unlocked_balance: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressResponse {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeightResponse {
    pub height: u64,
    pub immutable_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub syncing: bool,
    pub sync_height: i64,
    pub target_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub address: String,
    pub amount: u64,
}

/// Flags shared by every command that builds a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxOptions {
    #[serde(default)]
    pub get_tx_key: bool,
    #[serde(default)]
    pub get_tx_hex: bool,
    #[serde(default)]
    pub get_tx_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub destinations: Vec<Destination>,
    /// 5 requests a blink transaction; anything else is normal.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub unlock_time: u64,
    #[serde(default)]
    pub do_not_relay: bool,
    #[serde(flatten)]
    pub options: TxOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferResponse {
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_key: String,
    pub amount: u64,
    pub fee: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_blob: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_metadata: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsBuyRequest {
    #[serde(rename = "type")]
    pub ons_type: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub backup_owner: Option<String>,
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub options: TxOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsUpdateRequest {
    #[serde(rename = "type")]
    pub ons_type: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub backup_owner: Option<String>,
    #[serde(flatten)]
    pub options: TxOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsRenewRequest {
    #[serde(rename = "type")]
    pub ons_type: String,
    pub name: String,
    #[serde(flatten)]
    pub options: TxOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyResponse {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemonicRequest {
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "English".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MnemonicResponse {
    pub mnemonic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDaemonRequest {
    pub address: String,
}

/// Error body returned to RPC callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&WalletError> for ErrorResponse {
    fn from(e: &WalletError) -> Self {
        Self { code: e.code().to_string(), message: e.to_string() }
    }
}

/// What gets encoded into `tx_metadata`.
#[derive(Debug, Serialize)]
struct TxMetadata<'a> {
    tx_hash: &'a str,
    fee: u64,
    amount: u64,
    change: u64,
    unlock_time: u64,
    key_images: Vec<String>,
}

// =============================================================================
// Handler
// =============================================================================

pub struct RequestHandler {
    wallet: Arc<Wallet>,
    mnemonic: Option<Arc<dyn MnemonicEncoder>>,
}

impl RequestHandler {
    pub fn new(wallet: Arc<Wallet>) -> Self {
        Self { wallet, mnemonic: None }
    }

    pub fn with_mnemonic_encoder(mut self, encoder: Arc<dyn MnemonicEncoder>) -> Self {
        self.mnemonic = Some(encoder);
        self
    }

    pub fn wallet(&self) -> &Arc<Wallet> {
        &self.wallet
    }

    /// Dispatch `method` with JSON `params`.
    pub async fn handle(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        log::debug!("request {method}");
        match method {
            "get_balance" => to_value(self.get_balance()?),
            "get_address" => to_value(self.get_address(parse(params)?)?),
            "get_height" => to_value(self.get_height()?),
            "status" => to_value(self.status()?),
            "transfer" => to_value(self.transfer(parse(params)?).await?),
            "ons_buy_mapping" => to_value(self.ons_buy_mapping(parse(params)?).await?),
            "ons_update_mapping" => to_value(self.ons_update_mapping(parse(params)?).await?),
            "ons_renew_mapping" => to_value(self.ons_renew_mapping(parse(params)?).await?),
            "export_view_key" => to_value(self.export_view_key()?),
            "export_spend_key" => to_value(self.export_spend_key()?),
            "export_mnemonic_key" => to_value(self.export_mnemonic_key(parse(params)?)?),
            "set_daemon" => {
                self.set_daemon(parse(params)?)?;
                Ok(Value::Object(Default::default()))
            }
            "stop_wallet" => {
                self.stop_wallet().await;
                Ok(Value::Object(Default::default()))
            }
            other => Err(WalletError::invalid(format!("unknown method '{other}'"))),
        }
    }

    pub fn get_balance(&self) -> Result<BalanceResponse, WalletError> {
        let b = self.wallet.balance()?;
        Ok(BalanceResponse { balance: b.balance, unlocked_balance: b.unlocked_balance })
    }

    pub fn get_address(&self, req: AddressRequest) -> Result<AddressResponse, WalletError> {
        Ok(AddressResponse { address: self.wallet.address(SubaddressIndex::new(req.major, req.minor))? })
    }

    /// Chain length as last reported by the node, or what the ledger knows
    /// when no tip has been seen yet.
    pub fn get_height(&self) -> Result<HeightResponse, WalletError> {
        let tip = self.wallet.comms().top_block();
        let height = if tip.height > 0 {
            tip.height
        } else {
            self.wallet.with_store(|s| s.scan_target_height())? + 1
        };
        Ok(HeightResponse { height, immutable_height: 0 })
    }

    pub fn status(&self) -> Result<StatusResponse, WalletError> {
        let s = self.wallet.status()?;
        Ok(StatusResponse { syncing: s.syncing, sync_height: s.sync_height, target_height: s.target_height })
    }

    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferResponse, WalletError> {
        let recipients = req
            .destinations
            .iter()
            .map(|d| Ok(Recipient { address: parse_address(&d.address)?, amount: d.amount }))
            .collect::<Result<Vec<_>, WalletError>>()?;
        let ptx = self
            .wallet
            .transfer(recipients, Priority::from_code(req.priority), req.unlock_time, req.do_not_relay)
            .await?;
        describe(&ptx, &req.options)
    }

    pub async fn ons_buy_mapping(&self, req: OnsBuyRequest) -> Result<TransferResponse, WalletError> {
        let ptx = self
            .wallet
            .ons_buy(&req.name, &req.ons_type, &req.value, non_empty(&req.owner), non_empty(&req.backup_owner))
            .await?;
        describe(&ptx, &req.options)
    }

    pub async fn ons_update_mapping(&self, req: OnsUpdateRequest) -> Result<TransferResponse, WalletError> {
        let ptx = self
            .wallet
            .ons_update(
                &req.name,
                &req.ons_type,
                non_empty(&req.value),
                non_empty(&req.owner),
                non_empty(&req.backup_owner),
            )
            .await?;
        describe(&ptx, &req.options)
    }

    pub async fn ons_renew_mapping(&self, req: OnsRenewRequest) -> Result<TransferResponse, WalletError> {
        let ptx = self.wallet.ons_renew(&req.name, &req.ons_type).await?;
        describe(&ptx, &req.options)
    }

    pub fn export_view_key(&self) -> Result<KeyResponse, WalletError> {
        Ok(KeyResponse { key: hex::encode(self.wallet.keys().view_secret()?.to_bytes()) })
    }

    pub fn export_spend_key(&self) -> Result<KeyResponse, WalletError> {
        Ok(KeyResponse { key: hex::encode(self.wallet.keys().spend_secret()?.to_bytes()) })
    }

    pub fn export_mnemonic_key(&self, req: MnemonicRequest) -> Result<MnemonicResponse, WalletError> {
        let encoder = self
            .mnemonic
            .as_ref()
            .ok_or_else(|| WalletError::invalid("no mnemonic encoder configured"))?;
        let secret = self.wallet.keys().spend_secret()?.to_bytes();
        Ok(MnemonicResponse { mnemonic: encoder.encode(&secret, &req.language)? })
    }

    pub fn set_daemon(&self, req: SetDaemonRequest) -> Result<(), WalletError> {
        if req.address.trim().is_empty() {
            return Err(WalletError::invalid("daemon address is empty"));
        }
        self.wallet.set_daemon(req.address.trim())
    }

    pub async fn stop_wallet(&self) {
        self.wallet.stop().await;
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, WalletError> {
    let params = if params.is_null() { Value::Object(Default::default()) } else { params };
    serde_json::from_value(params).map_err(|e| WalletError::invalid(format!("bad params: {e}")))
}

fn to_value<T: Serialize>(v: T) -> Result<Value, WalletError> {
    serde_json::to_value(v).map_err(|e| WalletError::invalid(e.to_string()))
}

fn parse_address(s: &str) -> Result<Address, WalletError> {
    s.parse::<Address>().map_err(|e| WalletError::invalid(format!("bad address '{s}': {e}")))
}

/// Empty strings mean "leave unchanged".
fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

fn describe(ptx: &PendingTransaction, options: &TxOptions) -> Result<TransferResponse, WalletError> {
    let tx = ptx.tx.as_ref().ok_or_else(|| WalletError::invalid("transaction was not signed"))?;
    let tx_hash = hex::encode(tx.hash());
    let mut resp = TransferResponse { tx_hash, amount: ptx.sum_outputs(), fee: ptx.fee, ..Default::default() };

    if options.get_tx_key {
        if let Some(key) = &ptx.tx_key {
            let mut bytes = key.secret.to_bytes().to_vec();
            for extra in &ptx.additional_tx_keys {
                bytes.extend_from_slice(&extra.secret.to_bytes());
            }
            resp.tx_key = hex::encode(bytes);
        }
    }
    if options.get_tx_hex {
        resp.tx_blob = hex::encode(tx.to_bytes());
    }
    if options.get_tx_metadata {
        let meta = TxMetadata {
            tx_hash: &resp.tx_hash,
            fee: ptx.fee,
            amount: resp.amount,
            change: ptx.change.amount,
            unlock_time: ptx.unlock_time,
            key_images: ptx.chosen_outputs.iter().map(|o| hex::encode(o.key_image)).collect(),
        };
        let json = serde_json::to_vec(&meta).map_err(|e| WalletError::invalid(e.to_string()))?;
        resp.tx_metadata = hex::encode(json);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommsConfig, WalletConfig};
    use crate::daemon_comms::DaemonComms;
    use crate::keys::{KeyHolder, SoftwareKeyHolder};
    use curve25519_dalek::scalar::Scalar;
    use oxen_types::NetType;
    use serde_json::json;

    struct Words;

    impl MnemonicEncoder for Words {
        fn encode(&self, spend_secret: &[u8; 32], language: &str) -> Result<String, WalletError> {
            Ok(format!("{language}:{}", hex::encode(&spend_secret[..4])))
        }
    }

    async fn handler() -> RequestHandler {
        let config = WalletConfig::new(NetType::Testnet, ":memory:").subaddress_lookahead(1, 3);
        let comms = DaemonComms::new(CommsConfig::default());
        let keys: Arc<dyn KeyHolder> = Arc::new(SoftwareKeyHolder::new(Scalar::from(7u64), Scalar::from(11u64)));
        let wallet = Wallet::open(config, comms, Some(keys)).await.unwrap();
        RequestHandler::new(wallet)
    }

    #[tokio::test]
    async fn empty_wallet_queries() {
        let h = handler().await;
        let balance = h.handle("get_balance", Value::Null).await.unwrap();
        assert_eq!(balance, json!({"balance": 0, "unlocked_balance": 0}));

        let status = h.status().unwrap();
        assert_eq!(status.sync_height, -1);

        let height = h.get_height().unwrap();
        assert_eq!(height.immutable_height, 0);
    }

    #[tokio::test]
    async fn addresses() {
        let h = handler().await;
        let primary = h.get_address(AddressRequest::default()).unwrap().address;
        let expected = h.wallet().keys().address(NetType::Testnet, SubaddressIndex::PRIMARY).unwrap();
        assert_eq!(primary, expected.to_string());

        let sub = h.handle("get_address", json!({"major": 0, "minor": 1})).await.unwrap();
        let sub: Address = sub["address"].as_str().unwrap().parse().unwrap();
        assert!(sub.is_subaddress());
    }

    #[tokio::test]
    async fn key_exports() {
        let h = handler().await;
        assert_eq!(h.export_spend_key().unwrap().key, hex::encode(Scalar::from(7u64).to_bytes()));
        assert_eq!(h.export_view_key().unwrap().key, hex::encode(Scalar::from(11u64).to_bytes()));

        let err = h.handle("export_mnemonic_key", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let h = h.with_mnemonic_encoder(Arc::new(Words));
        let words = h.export_mnemonic_key(MnemonicRequest { language: "English".into() }).unwrap();
        assert_eq!(words.mnemonic, "English:07000000");
    }

    #[tokio::test]
    async fn bad_requests() {
        let h = handler().await;
        let err = h.handle("frobnicate", Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err = h
            .handle("transfer", json!({"destinations": [{"address": "nope", "amount": 1}]}))
            .await
            .unwrap_err();
        assert_eq!(ErrorResponse::from(&err).code, "INVALID_REQUEST");

        let err = h.handle("set_daemon", json!({"address": " "})).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn stop_rejects_transfers() {
        let h = handler().await;
        h.handle("stop_wallet", Value::Null).await.unwrap();
        assert!(!h.wallet().is_running());
        let primary = h.get_address(AddressRequest::default()).unwrap().address;
        let err = h
            .handle("transfer", json!({"destinations": [{"address": primary, "amount": 1}]}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_RUNNING");
    }
}
