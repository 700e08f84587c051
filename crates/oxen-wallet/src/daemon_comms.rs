//! Daemon comms: one node session shared by any number of wallets.
//!
//! A single sync cursor walks the chain for every registered wallet at once.
//! Each fetched batch is handed to every wallet, which applies the part it
//! needs and answers with the next height it wants. A tip poll keeps the
//! chain height and fee parameters fresh and lets wallets detect reorgs.
//!
//! Wallets are held weakly, keyed by the address of their `Arc`, so the
//! registry never keeps a dropped wallet alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use oxen_crypto::Key;
use oxen_rpc::{BlockBatch, DaemonRpc, NodeRpc, RpcError};
use oxen_tx::ons::OnsType;
use oxen_tx::{FeeParams, Transaction};

use crate::block::Block;
use crate::config::CommsConfig;
use crate::error::WalletError;

/// Where a wallet wants the sync engine to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    pub next_height: u64,
    /// Ask the engine to lower its cursor to this wallet's height if needed.
    pub check_sync_height: bool,
}

/// Receiver of blocks and tip updates.
pub trait ChainSubscriber: Send + Sync {
    /// Apply a batch; returns the next height wanted.
    fn add_blocks(&self, blocks: &[Block]) -> SyncCursor;

    /// New chain tip (`height` is the top block's height). Returns a cursor
    /// when the subscriber rolled back and needs blocks again.
    fn update_top_block_info(&self, height: u64, hash: &Key) -> Option<SyncCursor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Last tip seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainTip {
    /// Number of blocks on the chain, so the top block is `height - 1`.
    pub height: u64,
    pub hash: Key,
}

impl ChainTip {
    pub fn top_block_height(&self) -> Option<u64> {
        self.height.checked_sub(1)
    }
}

/// A ring member candidate as returned by `get_outs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoy {
    pub global_index: u64,
    pub height: u64,
    pub key: Key,
    pub mask: Key,
    pub txid: Option<Key>,
    pub unlocked: bool,
}

/// Current state of an ONS record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnsRecord {
    pub owner: String,
    pub backup_owner: Option<String>,
    pub encrypted_value: String,
    pub prev_txid: Key,
}

/// Outcome of one sync round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    /// Nothing to fetch.
    Idle,
    /// Blocks `start..=end` were dispatched.
    Applied { start: u64, end: u64, reached_tip: bool },
    /// The round failed; try again after the retry delay.
    Retry(String),
}

struct Registered {
    wallet: Weak<dyn ChainSubscriber>,
    next_height: u64,
}

#[derive(Default)]
struct Registry {
    wallets: HashMap<usize, Registered>,
    sync_from_height: u64,
}

impl Registry {
    fn lowest_wanted(&self) -> Option<u64> {
        self.wallets.values().map(|w| w.next_height).min()
    }

    /// Live subscribers; entries whose wallet was dropped are pruned.
    fn live(&mut self) -> Vec<(usize, Arc<dyn ChainSubscriber>)> {
        self.wallets.retain(|_, w| w.wallet.strong_count() > 0);
        self.wallets.iter().filter_map(|(id, w)| w.wallet.upgrade().map(|a| (*id, a))).collect()
    }
}

#[derive(Default)]
struct TipState {
    tip: ChainTip,
    fee: FeeParams,
    connection: ConnectionState,
    polled: bool,
}

fn wallet_id(wallet: &Arc<dyn ChainSubscriber>) -> usize {
    Arc::as_ptr(wallet) as *const () as usize
}

fn parse_key(context: &str, s: &str) -> Result<Key, RpcError> {
    let invalid = |reason: String| RpcError::InvalidResponse { context: context.into(), reason };
    let bytes = hex::decode(s).map_err(|e| invalid(e.to_string()))?;
    bytes.try_into().map_err(|_| invalid(format!("'{s}' is not a 32-byte hex key")))
}

pub struct DaemonComms {
    node: RwLock<Option<Arc<dyn NodeRpc>>>,
    config: CommsConfig,
    state: Mutex<TipState>,
    registry: tokio::sync::Mutex<Registry>,
    wake: Notify,
    running: AtomicBool,
    syncing: AtomicBool,
}

impl DaemonComms {
    pub fn new(config: CommsConfig) -> Arc<Self> {
        Arc::new(Self {
            node: RwLock::new(None),
            config,
            state: Mutex::new(TipState::default()),
            registry: tokio::sync::Mutex::new(Registry::default()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
        })
    }

    /// Comms already pointed at `node`.
    pub fn with_node(config: CommsConfig, node: Arc<dyn NodeRpc>) -> Arc<Self> {
        let comms = Self::new(config);
        comms.set_node(node);
        comms
    }

    /// Point the comms at the node at `url`.
    pub fn set_remote(&self, url: &str) -> Result<(), WalletError> {
        let node = DaemonRpc::new(url)?;
        self.set_node(Arc::new(node));
        Ok(())
    }

    pub fn set_node(&self, node: Arc<dyn NodeRpc>) {
        log::info!("connecting to node at {}", node.url());
        if let Ok(mut slot) = self.node.write() {
            *slot = Some(node);
        }
        if let Ok(mut state) = self.state.lock() {
            state.connection = ConnectionState::Connecting;
        }
        self.wake.notify_one();
    }

    fn node(&self) -> Result<Arc<dyn NodeRpc>, WalletError> {
        self.node
            .read()
            .ok()
            .and_then(|n| n.clone())
            .ok_or(WalletError::Rpc(RpcError::NotConnected))
    }

    fn set_connection(&self, connection: ConnectionState) {
        if let Ok(mut state) = self.state.lock() {
            if state.connection != connection {
                log::info!("node connection {:?} -> {:?}", state.connection, connection);
                state.connection = connection;
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().map(|s| s.connection).unwrap_or_default()
    }

    pub fn top_block(&self) -> ChainTip {
        self.state.lock().map(|s| s.tip).unwrap_or_default()
    }

    pub fn fee_params(&self) -> FeeParams {
        self.state.lock().map(|s| s.fee).unwrap_or_default()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &CommsConfig {
        &self.config
    }

    // ─── Registry ───────────────────────────────────────────────────────────

    /// Add or update a wallet. `height` is the next block it needs.
    pub async fn register_wallet(
        &self,
        wallet: &Arc<dyn ChainSubscriber>,
        height: u64,
        check_sync_height: bool,
        new_wallet: bool,
    ) {
        let mut reg = self.registry.lock().await;
        let first = reg.wallets.is_empty();
        reg.wallets.insert(wallet_id(wallet), Registered { wallet: Arc::downgrade(wallet), next_height: height });
        if first {
            reg.sync_from_height = height;
        } else if (new_wallet || check_sync_height) && height < reg.sync_from_height {
            reg.sync_from_height = height;
        }
        log::debug!("wallet registered at height {height}, sync cursor {}", reg.sync_from_height);
        drop(reg);
        self.wake.notify_one();
    }

    /// Remove a wallet. Resolves once no dispatch to it is in flight.
    pub async fn deregister_wallet(&self, wallet: &Arc<dyn ChainSubscriber>) {
        let mut reg = self.registry.lock().await;
        reg.wallets.remove(&wallet_id(wallet));
        if let Some(lowest) = reg.lowest_wanted() {
            reg.sync_from_height = lowest;
        }
        log::debug!("wallet deregistered, {} remaining", reg.wallets.len());
    }

    pub async fn registered_count(&self) -> usize {
        self.registry.lock().await.wallets.len()
    }

    /// Next height the engine will request.
    pub async fn sync_from_height(&self) -> u64 {
        self.registry.lock().await.sync_from_height
    }

    // ─── Tip poll ───────────────────────────────────────────────────────────

    /// Poll the node's tip and fee parameters and push the tip to every wallet.
    pub async fn refresh_top_block(&self) -> Result<ChainTip, WalletError> {
        let node = self.node()?;
        let info = match node.get_height().await {
            Ok(info) => info,
            Err(e) => {
                self.set_connection(ConnectionState::Connecting);
                return Err(e.into());
            }
        };
        self.set_connection(ConnectionState::Connected);
        let hash = parse_key("get_height", &info.hash).map_err(|e| {
            log::warn!("ignoring tip at height {}: {e}", info.height);
            e
        })?;
        let tip = ChainTip { height: info.height, hash };

        let fee = match node.get_fee_estimate().await {
            Ok(f) => Some(FeeParams {
                fee_per_byte: f.fee_per_byte,
                fee_per_output: f.fee_per_output,
                quantization_mask: f.quantization_mask,
            }),
            Err(e) => {
                log::warn!("fee estimate failed: {e}");
                None
            }
        };

        let grew = {
            let mut state = self.state.lock().map_err(|_| WalletError::invalid("tip state poisoned"))?;
            let grew = tip.height > state.tip.height;
            state.tip = tip;
            state.polled = true;
            if let Some(fee) = fee {
                state.fee = fee;
            }
            grew
        };
        if grew {
            log::debug!("chain height now {}", tip.height);
        }

        if let Some(top) = tip.top_block_height() {
            let mut reg = self.registry.lock().await;
            for (id, wallet) in reg.live() {
                if let Some(cursor) = wallet.update_top_block_info(top, &tip.hash) {
                    if let Some(entry) = reg.wallets.get_mut(&id) {
                        entry.next_height = cursor.next_height;
                    }
                    if cursor.next_height < reg.sync_from_height {
                        reg.sync_from_height = cursor.next_height;
                    }
                }
            }
        }
        if grew {
            self.wake.notify_one();
        }
        Ok(tip)
    }

    // ─── Sync ───────────────────────────────────────────────────────────────

    /// Fetch and dispatch one batch of blocks, if any are due.
    pub async fn sync_step(&self) -> SyncStep {
        let Ok(node) = self.node() else { return SyncStep::Idle };
        let chain_height = self.top_block().height;

        let start = {
            let reg = self.registry.lock().await;
            if reg.wallets.is_empty() || reg.sync_from_height >= chain_height {
                self.syncing.store(false, Ordering::Relaxed);
                return SyncStep::Idle;
            }
            reg.sync_from_height
        };

        self.syncing.store(true, Ordering::Relaxed);
        log::debug!("requesting blocks from {start}");
        let batch = match node.get_blocks(start, self.config.max_blocks_per_request, self.config.blocks_size_limit).await {
            Ok(b) => b,
            Err(e) => {
                log::warn!("get_blocks from {start} failed: {e}");
                if e.is_transient() {
                    self.set_connection(ConnectionState::Connecting);
                }
                return SyncStep::Retry(e.to_string());
            }
        };
        let (entries, reached_tip) = match batch {
            BlockBatch::More(b) => (b, false),
            BlockBatch::End(b) => (b, true),
            BlockBatch::Retry(reason) => {
                log::debug!("get_blocks from {start}: {reason}, retrying");
                return SyncStep::Retry(reason);
            }
        };

        let blocks = match entries.iter().map(Block::from_entry).collect::<Result<Vec<_>, _>>() {
            Ok(b) => b,
            Err(e) => {
                log::warn!("discarding block batch from {start}: {e}");
                return SyncStep::Retry(e.to_string());
            }
        };
        let Some(end) = blocks.last().map(|b| b.height) else {
            self.syncing.store(false, Ordering::Relaxed);
            return SyncStep::Idle;
        };

        // Dispatch with the registry locked so deregistration waits for it.
        let mut reg = self.registry.lock().await;
        let mut lower_to = None;
        let mut stalled = None;
        for (id, wallet) in reg.live() {
            let cursor = wallet.add_blocks(&blocks);
            if let Some(entry) = reg.wallets.get_mut(&id) {
                entry.next_height = cursor.next_height;
            }
            if cursor.check_sync_height {
                lower_to = Some(lower_to.map_or(cursor.next_height, |h: u64| h.min(cursor.next_height)));
                // Asked again for a block it was just given: it refused it.
                if (start..=end).contains(&cursor.next_height) {
                    stalled = Some(stalled.map_or(cursor.next_height, |h: u64| h.min(cursor.next_height)));
                }
            }
        }
        if start == reg.sync_from_height {
            reg.sync_from_height = end + 1;
        }
        if let Some(h) = lower_to {
            if h < reg.sync_from_height {
                log::debug!("sync cursor lowered from {} to {h}", reg.sync_from_height);
                reg.sync_from_height = h;
            }
        }
        if let Some(h) = stalled {
            log::warn!("a wallet refused block {h} of batch {start}..={end}");
            return SyncStep::Retry(format!("block {h} was not applied"));
        }
        let reached_tip = reached_tip && reg.sync_from_height > end;
        if reached_tip {
            self.syncing.store(false, Ordering::Relaxed);
        }
        log::debug!("dispatched blocks {start}..={end}");
        SyncStep::Applied { start, end, reached_tip }
    }

    /// Poll and sync until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut next_poll = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            if Instant::now() >= next_poll {
                if let Err(e) = self.refresh_top_block().await {
                    log::debug!("tip poll failed: {e}");
                }
                let polled = self.state.lock().map(|s| s.polled).unwrap_or(false);
                let period = if polled { self.config.tip_poll_interval } else { self.config.tip_poll_initial };
                next_poll = Instant::now() + period;
            }

            match self.sync_step().await {
                SyncStep::Applied { .. } => {}
                SyncStep::Retry(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.sync_retry_delay) => {}
                        _ = self.wake.notified() => {}
                    }
                }
                SyncStep::Idle => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(next_poll) => {}
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }
        log::info!("daemon comms stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let comms = Arc::clone(self);
        tokio::spawn(async move { comms.run().await })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    // ─── Requests on behalf of wallets ──────────────────────────────────────

    /// Ring member data for `indices`, in request order.
    pub async fn fetch_decoys(&self, indices: &[u64], with_txid: bool) -> Result<Vec<Decoy>, WalletError> {
        let outs = self.node()?.get_outs(indices, with_txid).await?;
        if outs.len() != indices.len() {
            return Err(RpcError::InvalidResponse {
                context: "get_outs".into(),
                reason: format!("asked for {} outputs, got {}", indices.len(), outs.len()),
            }
            .into());
        }
        indices
            .iter()
            .zip(outs)
            .map(|(&global_index, out)| {
                Ok(Decoy {
                    global_index,
                    height: out.height,
                    key: parse_key("get_outs", &out.key)?,
                    mask: parse_key("get_outs", &out.mask)?,
                    txid: out.txid.as_deref().map(|t| parse_key("get_outs", t)).transpose()?,
                    unlocked: out.unlocked,
                })
            })
            .collect::<Result<_, RpcError>>()
            .map_err(WalletError::from)
    }

    /// Relay `tx`; a non-OK reply is a [`WalletError::SubmitRejected`].
    pub async fn submit_transaction(&self, tx: &Transaction, blink: bool) -> Result<(), WalletError> {
        let hash = hex::encode(tx.hash());
        let result = self.node()?.submit_transaction(&hex::encode(tx.to_bytes()), blink).await?;
        if !result.is_ok() {
            let reason = if result.reason.is_empty() { result.status.clone() } else { result.reason.clone() };
            log::warn!("node rejected tx {hash}: {reason}");
            return Err(WalletError::SubmitRejected(reason));
        }
        log::info!("submitted tx {hash}{}", if blink { " (blink)" } else { "" });
        Ok(())
    }

    /// Current owner and last update txid of an ONS record.
    pub async fn ons_names_to_owners(&self, name_hash: &Key, ons_type: OnsType) -> Result<Option<OnsRecord>, WalletError> {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(name_hash);
        let Some(entry) = self.node()?.ons_names_to_owners(&encoded, ons_type.db_type()).await? else {
            return Ok(None);
        };
        Ok(Some(OnsRecord {
            owner: entry.owner,
            backup_owner: entry.backup_owner,
            encrypted_value: entry.encrypted_value,
            prev_txid: parse_key("ons_names_to_owners", &entry.txid)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oxen_rpc::daemon::{BlockEntry, FeeEstimate, HeightInfo, OnsOwnerEntry, OutEntry, SubmitResult};
    use std::sync::Mutex as StdMutex;

    struct EmptyChain {
        height: u64,
        requests: StdMutex<Vec<u64>>,
        /// Replies served before the real chain, oldest first.
        scripted: StdMutex<Vec<Result<BlockBatch, RpcError>>>,
        tip_hash: StdMutex<Option<String>>,
    }

    fn entry(height: u64) -> BlockEntry {
        BlockEntry { height, hash: hex::encode([height as u8; 32]), timestamp: 0, transactions: Vec::new() }
    }

    #[async_trait]
    impl NodeRpc for EmptyChain {
        fn url(&self) -> &str {
            "mock://empty"
        }
        async fn get_height(&self) -> Result<HeightInfo, RpcError> {
            let hash = self.tip_hash.lock().unwrap().clone();
            let hash = hash.unwrap_or_else(|| hex::encode([(self.height - 1) as u8; 32]));
            Ok(HeightInfo { height: self.height, hash, immutable_height: 0 })
        }
        async fn get_fee_estimate(&self) -> Result<FeeEstimate, RpcError> {
            Ok(FeeEstimate { fee_per_byte: 3, fee_per_output: 4, quantization_mask: 1 })
        }
        async fn get_blocks(&self, start: u64, max: u64, _limit: u64) -> Result<BlockBatch, RpcError> {
            self.requests.lock().unwrap().push(start);
            let mut scripted = self.scripted.lock().unwrap();
            if !scripted.is_empty() {
                return scripted.remove(0);
            }
            let end = (start + max).min(self.height);
            let blocks = (start..end).map(entry).collect();
            Ok(if end == self.height { BlockBatch::End(blocks) } else { BlockBatch::More(blocks) })
        }
        async fn get_outs(&self, indices: &[u64], _txid: bool) -> Result<Vec<OutEntry>, RpcError> {
            Ok(indices
                .iter()
                .map(|&i| OutEntry {
                    height: i,
                    key: hex::encode([i as u8; 32]),
                    mask: hex::encode([1u8; 32]),
                    txid: None,
                    unlocked: true,
                })
                .collect())
        }
        async fn submit_transaction(&self, _tx: &str, _blink: bool) -> Result<SubmitResult, RpcError> {
            Ok(SubmitResult {
                status: "Failed".into(),
                reason: "double spend".into(),
                double_spend: true,
                fee_too_low: false,
                not_relayed: false,
            })
        }
        async fn ons_names_to_owners(&self, _h: &str, _t: u64) -> Result<Option<OnsOwnerEntry>, RpcError> {
            Ok(None)
        }
    }

    /// Applies whatever is contiguous and remembers what it saw.
    struct Follower {
        next: StdMutex<u64>,
    }

    impl ChainSubscriber for Follower {
        fn add_blocks(&self, blocks: &[Block]) -> SyncCursor {
            let mut next = self.next.lock().unwrap();
            let check = blocks.first().is_some_and(|b| b.height > *next);
            for b in blocks {
                if b.height == *next {
                    *next += 1;
                }
            }
            SyncCursor { next_height: *next, check_sync_height: check }
        }
        fn update_top_block_info(&self, _height: u64, _hash: &Key) -> Option<SyncCursor> {
            None
        }
    }

    /// Takes blocks up to `refuse`, then keeps asking for it again.
    struct Refuser {
        next: StdMutex<u64>,
        refuse: StdMutex<Option<u64>>,
    }

    impl ChainSubscriber for Refuser {
        fn add_blocks(&self, blocks: &[Block]) -> SyncCursor {
            let mut next = self.next.lock().unwrap();
            let refuse = *self.refuse.lock().unwrap();
            for b in blocks {
                if b.height != *next {
                    continue;
                }
                if refuse == Some(b.height) {
                    return SyncCursor { next_height: *next, check_sync_height: true };
                }
                *next += 1;
            }
            SyncCursor { next_height: *next, check_sync_height: false }
        }
        fn update_top_block_info(&self, _height: u64, _hash: &Key) -> Option<SyncCursor> {
            None
        }
    }

    fn setup(height: u64, max: u64) -> (Arc<DaemonComms>, Arc<EmptyChain>) {
        let node = Arc::new(EmptyChain {
            height,
            requests: StdMutex::new(Vec::new()),
            scripted: StdMutex::new(Vec::new()),
            tip_hash: StdMutex::new(None),
        });
        let config = CommsConfig { max_blocks_per_request: max, ..Default::default() };
        (DaemonComms::with_node(config, node.clone()), node)
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (comms, _) = setup(10, 5);
        let w: Arc<dyn ChainSubscriber> = Arc::new(Follower { next: StdMutex::new(3) });
        comms.register_wallet(&w, 3, false, true).await;
        comms.register_wallet(&w, 3, false, true).await;
        assert_eq!(comms.registered_count().await, 1);
        assert_eq!(comms.sync_from_height().await, 3);
        comms.deregister_wallet(&w).await;
        assert_eq!(comms.registered_count().await, 0);
    }

    #[tokio::test]
    async fn syncs_to_tip_in_batches() {
        let (comms, node) = setup(12, 5);
        assert_eq!(comms.sync_step().await, SyncStep::Idle);

        let follower = Arc::new(Follower { next: StdMutex::new(0) });
        let w: Arc<dyn ChainSubscriber> = follower.clone();
        comms.register_wallet(&w, 0, false, true).await;
        let tip = comms.refresh_top_block().await.unwrap();
        assert_eq!(tip.top_block_height(), Some(11));
        assert_eq!(comms.fee_params().fee_per_byte, 3);
        assert_eq!(comms.connection_state(), ConnectionState::Connected);

        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 0, end: 4, reached_tip: false });
        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 5, end: 9, reached_tip: false });
        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 10, end: 11, reached_tip: true });
        assert_eq!(comms.sync_step().await, SyncStep::Idle);
        assert_eq!(*follower.next.lock().unwrap(), 12);
        assert_eq!(*node.requests.lock().unwrap(), vec![0, 5, 10]);
    }

    #[tokio::test]
    async fn late_wallet_lowers_cursor() {
        let (comms, node) = setup(12, 5);
        comms.refresh_top_block().await.unwrap();
        let ahead: Arc<dyn ChainSubscriber> = Arc::new(Follower { next: StdMutex::new(8) });
        comms.register_wallet(&ahead, 8, false, true).await;
        comms.sync_step().await;

        let behind = Arc::new(Follower { next: StdMutex::new(2) });
        let w: Arc<dyn ChainSubscriber> = behind.clone();
        comms.register_wallet(&w, 2, true, true).await;
        assert_eq!(comms.sync_from_height().await, 2);
        while comms.sync_step().await != SyncStep::Idle {}
        assert_eq!(*behind.next.lock().unwrap(), 12);
        assert_eq!(node.requests.lock().unwrap()[..2], [8, 2]);
    }

    #[tokio::test]
    async fn dropped_wallets_are_pruned() {
        let (comms, _) = setup(4, 5);
        comms.refresh_top_block().await.unwrap();
        let w: Arc<dyn ChainSubscriber> = Arc::new(Follower { next: StdMutex::new(0) });
        comms.register_wallet(&w, 0, false, true).await;
        drop(w);
        comms.sync_step().await;
        assert_eq!(comms.registered_count().await, 0);
    }

    #[tokio::test]
    async fn decoys_and_rejections() {
        let (comms, _) = setup(4, 5);
        let decoys = comms.fetch_decoys(&[3, 9], false).await.unwrap();
        assert_eq!(decoys[1].global_index, 9);
        assert_eq!(decoys[1].key, [9u8; 32]);

        let tx = Transaction { prefix: Default::default(), rct: None };
        match comms.submit_transaction(&tx, false).await {
            Err(WalletError::SubmitRejected(reason)) => assert_eq!(reason, "double spend"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(comms.ons_names_to_owners(&[0u8; 32], OnsType::Session).await.unwrap(), None);
    }

    #[tokio::test]
    async fn refused_block_is_retried_not_skipped() {
        let (comms, node) = setup(12, 5);
        comms.refresh_top_block().await.unwrap();
        let wallet = Arc::new(Refuser { next: StdMutex::new(0), refuse: StdMutex::new(Some(7)) });
        let w: Arc<dyn ChainSubscriber> = wallet.clone();
        comms.register_wallet(&w, 0, false, true).await;

        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 0, end: 4, reached_tip: false });
        assert!(matches!(comms.sync_step().await, SyncStep::Retry(_)));
        assert_eq!(comms.sync_from_height().await, 7);
        assert!(matches!(comms.sync_step().await, SyncStep::Retry(_)));

        *wallet.refuse.lock().unwrap() = None;
        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 7, end: 11, reached_tip: true });
        assert_eq!(*wallet.next.lock().unwrap(), 12);
        assert_eq!(*node.requests.lock().unwrap(), vec![0, 5, 7, 7]);
    }

    #[tokio::test]
    async fn failed_fetches_retry_from_the_same_height() {
        let (comms, node) = setup(6, 10);
        comms.refresh_top_block().await.unwrap();
        let follower = Arc::new(Follower { next: StdMutex::new(0) });
        let w: Arc<dyn ChainSubscriber> = follower.clone();
        comms.register_wallet(&w, 0, false, true).await;
        *node.scripted.lock().unwrap() = vec![
            Err(RpcError::Busy { context: "get_blocks".into() }),
            Ok(BlockBatch::Retry("BUSY".into())),
        ];

        assert!(matches!(comms.sync_step().await, SyncStep::Retry(_)));
        assert_eq!(comms.connection_state(), ConnectionState::Connecting);
        assert!(matches!(comms.sync_step().await, SyncStep::Retry(reason) if reason == "BUSY"));
        assert_eq!(comms.sync_step().await, SyncStep::Applied { start: 0, end: 5, reached_tip: true });
        assert_eq!(*follower.next.lock().unwrap(), 6);
        assert_eq!(*node.requests.lock().unwrap(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn unparseable_tip_is_not_pushed() {
        let (comms, node) = setup(6, 10);
        comms.refresh_top_block().await.unwrap();
        let before = comms.top_block();
        *node.tip_hash.lock().unwrap() = Some("not-hex".into());
        assert!(comms.refresh_top_block().await.is_err());
        assert_eq!(comms.top_block(), before);
    }

    #[tokio::test]
    async fn no_node_means_idle() {
        let comms = DaemonComms::new(CommsConfig::default());
        assert_eq!(comms.sync_step().await, SyncStep::Idle);
        assert!(comms.refresh_top_block().await.is_err());
    }
}
