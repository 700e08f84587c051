//! In-memory node holding a real chain, for driving wallets end to end.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;

use oxen_crypto::{compress, decompress, generate_keys, keccak256, zero_commit, Key};
use oxen_rpc::daemon::{BlockEntry, BlockTx, FeeEstimate, HeightInfo, OnsOwnerEntry, OutEntry, SubmitResult};
use oxen_rpc::{BlockBatch, NodeRpc, RpcError};
use oxen_tx::extra::ExtraBuilder;
use oxen_tx::{RctSignatures, Transaction, TxInput, TxOutput, TxPrefix};
use oxen_types::constants::COIN;
use oxen_types::{Address, NetType};
use oxen_wallet::{
    CommsConfig, DaemonComms, KeyHolder, SoftwareKeyHolder, SubaddressIndex, SyncStep, Wallet, WalletConfig,
};

pub const NET: NetType = NetType::Testnet;

struct Chain {
    blocks: Vec<BlockEntry>,
    outputs_per_block: Vec<usize>,
    outs: Vec<OutEntry>,
    pending: Vec<Transaction>,
    submissions: Vec<(Transaction, bool)>,
    ons: HashMap<(String, u64), OnsOwnerEntry>,
    reject: Option<String>,
    /// Global indices `get_outs` reports as still locked.
    locked: HashSet<u64>,
    /// Bumped on reorg so replacement blocks hash differently.
    fork: u64,
    fee: FeeEstimate,
}

pub struct MockNode {
    chain: Mutex<Chain>,
    get_outs_calls: AtomicUsize,
    stall_submits: AtomicBool,
    garbled_tip: AtomicBool,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chain: Mutex::new(Chain {
                blocks: Vec::new(),
                outputs_per_block: Vec::new(),
                outs: Vec::new(),
                pending: Vec::new(),
                submissions: Vec::new(),
                ons: HashMap::new(),
                reject: None,
                locked: HashSet::new(),
                fork: 0,
                fee: FeeEstimate { fee_per_byte: 1, fee_per_output: 1000, quantization_mask: 1 },
            }),
            get_outs_calls: AtomicUsize::new(0),
            stall_submits: AtomicBool::new(false),
            garbled_tip: AtomicBool::new(false),
        })
    }

    /// Chain length.
    pub fn height(&self) -> u64 {
        self.chain.lock().unwrap().blocks.len() as u64
    }

    pub fn get_outs_calls(&self) -> usize {
        self.get_outs_calls.load(Ordering::SeqCst)
    }

    /// A block whose coinbase pays `amount` to `to`.
    pub fn mine_to(&self, to: &Address, amount: u64) {
        self.mine_locked_to(to, amount, 0);
    }

    /// As [`mine_to`](Self::mine_to), with the output locked for `unlock_time`.
    pub fn mine_locked_to(&self, to: &Address, amount: u64, unlock_time: u64) {
        let mut chain = self.chain.lock().unwrap();
        let height = chain.blocks.len() as u64;
        let coinbase = locked_coinbase(to, amount, height, unlock_time);
        push_block(&mut chain, vec![coinbase]);
    }

    /// Queue `tx` for the next [`mine_pending`](Self::mine_pending).
    pub fn include(&self, tx: Transaction) {
        self.chain.lock().unwrap().pending.push(tx);
    }

    /// Report these global indices as locked ring members.
    pub fn lock_outputs(&self, indices: impl IntoIterator<Item = u64>) {
        self.chain.lock().unwrap().locked.extend(indices);
    }

    /// Report the tip hash as something that is not hex.
    pub fn garble_tip_hash(&self, garbled: bool) {
        self.garbled_tip.store(garbled, Ordering::SeqCst);
    }

    /// Give the first transaction of block `height` one global index too many.
    pub fn add_stray_global_index(&self, height: u64) {
        let mut chain = self.chain.lock().unwrap();
        if let Some(tx) = chain.blocks[height as usize].transactions.first_mut() {
            tx.global_indices.push(u64::MAX);
        }
    }

    /// Never answer submissions.
    pub fn stall_submissions(&self) {
        self.stall_submits.store(true, Ordering::SeqCst);
    }

    /// `n` blocks paying someone else.
    pub fn mine_empty(&self, n: usize) {
        for _ in 0..n {
            self.mine_to(&stranger(), 5 * COIN);
        }
    }

    /// A block carrying every transaction submitted since the last one.
    pub fn mine_pending(&self) -> usize {
        let mut chain = self.chain.lock().unwrap();
        let height = chain.blocks.len() as u64;
        let mut txs = vec![coinbase(&stranger(), 5 * COIN, height)];
        let pending: Vec<Transaction> = chain.pending.drain(..).collect();
        let n = pending.len();
        txs.extend(pending);
        push_block(&mut chain, txs);
        n
    }

    /// Drop every block above `keep_through`.
    pub fn reorg_to(&self, keep_through: u64) {
        let mut chain = self.chain.lock().unwrap();
        let keep = keep_through as usize + 1;
        let dropped: usize = chain.outputs_per_block[keep..].iter().sum();
        let outs_left = chain.outs.len() - dropped;
        chain.blocks.truncate(keep);
        chain.outputs_per_block.truncate(keep);
        chain.outs.truncate(outs_left);
        chain.fork += 1;
    }

    pub fn submissions(&self) -> Vec<(Transaction, bool)> {
        self.chain.lock().unwrap().submissions.clone()
    }

    pub fn reject_submissions(&self, reason: Option<&str>) {
        self.chain.lock().unwrap().reject = reason.map(str::to_string);
    }

    pub fn set_ons_record(&self, name_hash: &Key, ons_type: u64, owner: &str, backup_owner: Option<&str>, txid: Key) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(name_hash);
        self.chain.lock().unwrap().ons.insert(
            (encoded.clone(), ons_type),
            OnsOwnerEntry {
                name_hash: encoded,
                ons_type,
                owner: owner.to_string(),
                backup_owner: backup_owner.map(str::to_string),
                encrypted_value: String::new(),
                txid: hex::encode(txid),
            },
        );
    }
}

fn block_hash(height: u64, fork: u64) -> Key {
    let mut data = height.to_le_bytes().to_vec();
    data.extend_from_slice(&fork.to_le_bytes());
    keccak256(&data)
}

fn push_block(chain: &mut Chain, txs: Vec<Transaction>) {
    let height = chain.blocks.len() as u64;
    let mut entries = Vec::new();
    let mut outputs = 0;
    for tx in txs {
        let txid = tx.hash();
        let mut global_indices = Vec::new();
        for (i, out) in tx.prefix.outputs.iter().enumerate() {
            let commitment = if tx.is_coinbase() {
                compress(&zero_commit(out.amount))
            } else {
                tx.rct.as_ref().map(|r| r.out_pk[i]).unwrap_or_default()
            };
            global_indices.push(chain.outs.len() as u64);
            chain.outs.push(OutEntry {
                height,
                key: hex::encode(out.key),
                mask: hex::encode(commitment),
                txid: Some(hex::encode(txid)),
                unlocked: true,
            });
        }
        outputs += global_indices.len();
        entries.push(BlockTx { hash: hex::encode(txid), tx: hex::encode(tx.to_bytes()), global_indices });
    }
    chain.blocks.push(BlockEntry {
        height,
        hash: hex::encode(block_hash(height, chain.fork)),
        timestamp: 1_700_000_000 + height * 120,
        transactions: entries,
    });
    chain.outputs_per_block.push(outputs);
}

/// Coinbase paying `amount` to `to`, spendable right away.
pub fn coinbase(to: &Address, amount: u64, height: u64) -> Transaction {
    locked_coinbase(to, amount, height, 0)
}

pub fn locked_coinbase(to: &Address, amount: u64, height: u64, unlock_time: u64) -> Transaction {
    let (r, mut big_r) = generate_keys();
    if to.is_subaddress() {
        big_r = compress(&(r * decompress(&to.spend).unwrap()));
    }
    let miner = SoftwareKeyHolder::generate();
    let out = miner.ephemeral_out_key(&r, &big_r, to, 0, false).unwrap();
    Transaction {
        prefix: TxPrefix {
            version: 4,
            output_unlock_times: vec![unlock_time],
            inputs: vec![TxInput::Gen { height }],
            outputs: vec![TxOutput { amount, key: out.key }],
            extra: ExtraBuilder::new().pub_key(big_r).build(),
            ..Default::default()
        },
        rct: Some(RctSignatures::null()),
    }
}

/// Primary address of a throwaway wallet.
pub fn stranger() -> Address {
    let keys = SoftwareKeyHolder::generate();
    keys.address(NET, SubaddressIndex::PRIMARY).unwrap()
}

#[async_trait]
impl NodeRpc for MockNode {
    fn url(&self) -> &str {
        "mock://node"
    }

    async fn get_height(&self) -> Result<HeightInfo, RpcError> {
        let chain = self.chain.lock().unwrap();
        let mut hash = chain.blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
        if self.garbled_tip.load(Ordering::SeqCst) {
            hash = "not-hex".into();
        }
        Ok(HeightInfo { height: chain.blocks.len() as u64, hash, immutable_height: 0 })
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, RpcError> {
        Ok(self.chain.lock().unwrap().fee)
    }

    async fn get_blocks(&self, start_height: u64, max_count: u64, _size_limit: u64) -> Result<BlockBatch, RpcError> {
        let chain = self.chain.lock().unwrap();
        let len = chain.blocks.len() as u64;
        let end = (start_height + max_count).min(len);
        let blocks = chain.blocks[start_height.min(len) as usize..end as usize].to_vec();
        Ok(if end == len { BlockBatch::End(blocks) } else { BlockBatch::More(blocks) })
    }

    async fn get_outs(&self, indices: &[u64], _get_txid: bool) -> Result<Vec<OutEntry>, RpcError> {
        self.get_outs_calls.fetch_add(1, Ordering::SeqCst);
        let chain = self.chain.lock().unwrap();
        indices
            .iter()
            .map(|&i| -> Result<OutEntry, RpcError> {
                let mut out = chain.outs.get(i as usize).cloned().ok_or_else(|| RpcError::InvalidResponse {
                    context: "get_outs".into(),
                    reason: format!("no output {i}"),
                })?;
                out.unlocked = !chain.locked.contains(&i);
                Ok(out)
            })
            .collect()
    }

    async fn submit_transaction(&self, tx_hex: &str, blink: bool) -> Result<SubmitResult, RpcError> {
        if self.stall_submits.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let mut chain = self.chain.lock().unwrap();
        if let Some(reason) = chain.reject.clone() {
            return Ok(SubmitResult {
                status: "Failed".into(),
                reason,
                double_spend: false,
                fee_too_low: false,
                not_relayed: false,
            });
        }
        let tx = Transaction::from_hex(tx_hex)
            .map_err(|e| RpcError::InvalidResponse { context: "submit".into(), reason: e.to_string() })?;
        chain.pending.push(tx.clone());
        chain.submissions.push((tx, blink));
        Ok(SubmitResult { status: "OK".into(), reason: String::new(), double_spend: false, fee_too_low: false, not_relayed: false })
    }

    async fn ons_names_to_owners(&self, name_hash: &str, ons_type: u64) -> Result<Option<OnsOwnerEntry>, RpcError> {
        Ok(self.chain.lock().unwrap().ons.get(&(name_hash.to_string(), ons_type)).cloned())
    }
}

pub fn comms_for(node: &Arc<MockNode>) -> Arc<DaemonComms> {
    let node: Arc<dyn NodeRpc> = node.clone();
    DaemonComms::with_node(CommsConfig { max_blocks_per_request: 7, ..CommsConfig::default() }, node)
}

pub async fn open_wallet(comms: &Arc<DaemonComms>, keys: Arc<SoftwareKeyHolder>) -> Arc<Wallet> {
    let config = WalletConfig::new(NET, ":memory:").subaddress_lookahead(2, 5);
    let keys: Arc<dyn KeyHolder> = keys;
    Wallet::open(config, Arc::clone(comms), Some(keys)).await.unwrap()
}

pub fn primary(keys: &SoftwareKeyHolder) -> Address {
    keys.address(NET, SubaddressIndex::PRIMARY).unwrap()
}

/// Poll the tip and pull blocks until the engine reports the tip reached.
pub async fn sync(comms: &DaemonComms) {
    comms.refresh_top_block().await.unwrap();
    for _ in 0..1000 {
        match comms.sync_step().await {
            SyncStep::Idle | SyncStep::Applied { reached_tip: true, .. } => return,
            SyncStep::Applied { .. } => {}
            SyncStep::Retry(reason) => panic!("sync failed: {reason}"),
        }
    }
    panic!("sync did not reach the tip");
}
