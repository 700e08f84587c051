//! The wallet: ledger, keys, scanner and constructor behind one handle,
//! subscribed to a shared [`DaemonComms`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use oxen_crypto::Key;
use oxen_tx::Priority;
use oxen_types::NetType;

use crate::block::Block;
use crate::config::WalletConfig;
use crate::constructor::TransactionConstructor;
use crate::daemon_comms::{ChainSubscriber, DaemonComms, SyncCursor};
use crate::db::{self, LedgerStore};
use crate::error::WalletError;
use crate::keys::{KeyHolder, SoftwareKeyHolder, StoredKeys, SubaddressIndex};
use crate::pending::{PendingTransaction, Recipient};
use crate::scanner::TransactionScanner;

/// Sync notifications for a UI or log consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Blocks up to `height` applied.
    Progress { height: u64, target_height: u64, outputs_found: usize },
    /// Caught up with the node's tip.
    Complete { height: u64 },
    /// Blocks above `to_height` were rolled back.
    Reorg { from_height: u64, to_height: u64 },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub balance: u64,
    pub unlocked_balance: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub syncing: bool,
    /// Last scanned block height, −1 before the first block.
    pub sync_height: i64,
    pub target_height: u64,
}

pub struct Wallet {
    config: WalletConfig,
    keys: Arc<dyn KeyHolder>,
    store: Arc<Mutex<LedgerStore>>,
    comms: Arc<DaemonComms>,
    scanner: TransactionScanner,
    constructor: TransactionConstructor,
    /// One build at a time; concurrent transfers queue here.
    build_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    events: Mutex<Option<mpsc::Sender<SyncEvent>>>,
}

impl Wallet {
    /// Open (or create) the ledger at `config.db_path` and register with
    /// `comms`. Keys, when given, are persisted; otherwise they are loaded.
    pub async fn open(
        config: WalletConfig,
        comms: Arc<DaemonComms>,
        keys: Option<Arc<dyn KeyHolder>>,
    ) -> Result<Arc<Self>, WalletError> {
        let store = LedgerStore::open(&config.db_path, config.nettype)?;
        let keys: Arc<dyn KeyHolder> = match keys {
            Some(keys) => {
                store.save_keys(&StoredKeys::from_holder(keys.as_ref())?)?;
                keys
            }
            None => {
                let stored = store
                    .load_keys()?
                    .ok_or_else(|| WalletError::invalid("no keys supplied and none stored in the ledger"))?;
                Arc::new(SoftwareKeyHolder::from_stored(&stored)?)
            }
        };

        let (majors, minors) = config.subaddress_lookahead;
        keys.expand_subaddresses(majors, minors)?;
        let primary = keys.address(config.nettype, SubaddressIndex::PRIMARY)?;
        store.add_address(SubaddressIndex::PRIMARY, &primary.to_string())?;
        let next_height = (store.last_scan_height()? + 1) as u64;

        let store = Arc::new(Mutex::new(store));
        let constructor = TransactionConstructor::new(
            Arc::clone(&store),
            Arc::clone(&comms),
            Arc::clone(&keys),
            config.nettype,
            config.ons_lookup_timeout,
        );
        let wallet = Arc::new(Self {
            scanner: TransactionScanner::new(Arc::clone(&keys)),
            config,
            keys,
            store,
            comms,
            constructor,
            build_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(true),
            events: Mutex::new(None),
        });

        log::info!("opened wallet {primary}, resuming at height {next_height}");
        let subscriber: Arc<dyn ChainSubscriber> = wallet.clone();
        wallet.comms.register_wallet(&subscriber, next_height, true, true).await;
        Ok(wallet)
    }

    /// Receive [`SyncEvent`]s; replaces any earlier subscription.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(tx);
        }
        rx
    }

    fn emit(&self, event: SyncEvent) {
        if let Ok(slot) = self.events.lock() {
            if let Some(tx) = slot.as_ref() {
                let _ = tx.try_send(event);
            }
        }
    }

    pub fn nettype(&self) -> NetType {
        self.config.nettype
    }

    pub fn keys(&self) -> &Arc<dyn KeyHolder> {
        &self.keys
    }

    pub fn comms(&self) -> &Arc<DaemonComms> {
        &self.comms
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<(), WalletError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(WalletError::NotRunning)
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn balance(&self) -> Result<Balance, WalletError> {
        let store = db::lock(&self.store)?;
        Ok(Balance { balance: store.overall_balance()?, unlocked_balance: store.unlocked_balance()? })
    }

    /// Address for `index`, cached in the ledger after first use.
    pub fn address(&self, index: SubaddressIndex) -> Result<String, WalletError> {
        let store = db::lock(&self.store)?;
        if let Some(cached) = store.get_address(index)? {
            return Ok(cached);
        }
        let address = self.keys.address(self.config.nettype, index)?.to_string();
        store.add_address(index, &address)?;
        Ok(address)
    }

    pub fn last_scan_height(&self) -> Result<i64, WalletError> {
        db::lock(&self.store)?.last_scan_height()
    }

    pub fn status(&self) -> Result<SyncStatus, WalletError> {
        let store = db::lock(&self.store)?;
        let sync_height = store.last_scan_height()?;
        let target_height = store.scan_target_height()?;
        Ok(SyncStatus {
            syncing: self.comms.is_syncing() || sync_height < target_height as i64,
            sync_height,
            target_height,
        })
    }

    /// Run `f` against the ledger.
    pub fn with_store<T>(&self, f: impl FnOnce(&LedgerStore) -> Result<T, WalletError>) -> Result<T, WalletError> {
        let store = db::lock(&self.store)?;
        f(&*store)
    }

    // ─── Transactions ───────────────────────────────────────────────────────

    /// Build and, unless `do_not_relay`, submit a transfer.
    pub async fn transfer(
        &self,
        recipients: Vec<Recipient>,
        priority: Priority,
        unlock_time: u64,
        do_not_relay: bool,
    ) -> Result<PendingTransaction, WalletError> {
        self.ensure_running()?;
        let _build = self.build_lock.lock().await;
        let ptx = self.constructor.create_transaction(recipients, priority, unlock_time).await?;
        self.submit(ptx, do_not_relay).await
    }

    pub async fn ons_buy(
        &self,
        name: &str,
        ons_type: &str,
        value: &str,
        owner: Option<&str>,
        backup_owner: Option<&str>,
    ) -> Result<PendingTransaction, WalletError> {
        self.ensure_running()?;
        let _build = self.build_lock.lock().await;
        let ptx = self.constructor.create_ons_buy_transaction(name, ons_type, value, owner, backup_owner).await?;
        self.submit(ptx, false).await
    }

    pub async fn ons_update(
        &self,
        name: &str,
        ons_type: &str,
        value: Option<&str>,
        owner: Option<&str>,
        backup_owner: Option<&str>,
    ) -> Result<PendingTransaction, WalletError> {
        self.ensure_running()?;
        let _build = self.build_lock.lock().await;
        let ptx = self.constructor.create_ons_update_transaction(name, ons_type, value, owner, backup_owner).await?;
        self.submit(ptx, false).await
    }

    pub async fn ons_renew(&self, name: &str, ons_type: &str) -> Result<PendingTransaction, WalletError> {
        self.ensure_running()?;
        let _build = self.build_lock.lock().await;
        let ptx = self.constructor.create_ons_renew_transaction(name, ons_type).await?;
        self.submit(ptx, false).await
    }

    /// Relay a built transaction. Reserved inputs are released when the
    /// transaction is not relayed or the node refuses it; after a timeout the
    /// outcome is unknown and they stay reserved.
    async fn submit(&self, ptx: PendingTransaction, do_not_relay: bool) -> Result<PendingTransaction, WalletError> {
        let Some(tx) = ptx.tx.as_ref() else {
            self.constructor.release(&ptx);
            return Err(WalletError::invalid("transaction was not signed"));
        };
        if do_not_relay {
            self.constructor.release(&ptx);
            return Ok(ptx);
        }
        match tokio::time::timeout(self.config.submit_timeout, self.comms.submit_transaction(tx, ptx.is_blink())).await {
            Ok(Ok(())) => Ok(ptx),
            Ok(Err(e)) => {
                self.constructor.release(&ptx);
                Err(e)
            }
            Err(_) => {
                log::warn!("no reply to submit of {} within {:?}", hex::encode(tx.hash()), self.config.submit_timeout);
                Err(WalletError::SubmitTimeout)
            }
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Point the shared comms at another node.
    pub fn set_daemon(&self, url: &str) -> Result<(), WalletError> {
        self.comms.set_remote(url)
    }

    /// Stop accepting blocks and requests; resolves after any in-flight
    /// block batch for this wallet has finished.
    pub async fn stop(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let subscriber: Arc<dyn ChainSubscriber> = self.clone();
        self.comms.deregister_wallet(&subscriber).await;
        log::info!("wallet stopped");
    }

    // ─── Block application ──────────────────────────────────────────────────

    fn apply_blocks(&self, blocks: &[Block]) -> Result<SyncCursor, WalletError> {
        let store = db::lock(&self.store)?;
        let next = (store.last_scan_height()? + 1) as u64;
        let Some(first) = blocks.first() else {
            return Ok(SyncCursor { next_height: next, check_sync_height: false });
        };
        if first.height > next {
            log::debug!("batch starts at {} but wallet needs {next}", first.height);
            return Ok(SyncCursor { next_height: next, check_sync_height: true });
        }

        let mut found = 0;
        let mut applied = next;
        for block in blocks.iter().filter(|b| b.height >= next) {
            match store.with_transaction(|s| self.apply_block(s, block)) {
                Ok(n) => {
                    found += n;
                    applied = block.height + 1;
                }
                Err(e) => {
                    log::warn!("failed to apply block {}: {e}", block.height);
                    self.emit(SyncEvent::Error { message: e.to_string() });
                    return Ok(SyncCursor { next_height: applied, check_sync_height: true });
                }
            }
        }

        let target_height = store.scan_target_height()?;
        let height = applied.saturating_sub(1);
        log::debug!("applied blocks {next}..{applied}, {found} outputs received");
        self.emit(SyncEvent::Progress { height, target_height, outputs_found: found });
        if height >= target_height {
            self.emit(SyncEvent::Complete { height });
        }
        Ok(SyncCursor { next_height: applied, check_sync_height: false })
    }

    /// Store one block with its receives, then its spends.
    fn apply_block(&self, store: &LedgerStore, block: &Block) -> Result<usize, WalletError> {
        store.store_block(block.height, &block.hash, block.timestamp, block.output_count())?;
        let mut found = 0;
        for tx in &block.transactions {
            let received = match self.scanner.scan_received(tx, block.height) {
                Ok(r) => r,
                Err(e @ WalletError::ScanDecode { .. }) => {
                    log::error!("skipping tx {}: {e}", hex::encode(tx.hash));
                    self.emit(SyncEvent::Error { message: e.to_string() });
                    continue;
                }
                Err(e) => return Err(e),
            };
            if received.is_empty() {
                continue;
            }
            store.store_transaction(&tx.hash, block.height, &received)?;
            for output in &received {
                self.grow_subaddresses(output.subaddress)?;
            }
            found += received.len();
        }
        for tx in &block.transactions {
            let spent = self.scanner.scan_spent(&tx.tx, store)?;
            if !spent.is_empty() {
                log::info!("tx {} at height {} spends {} of our outputs", hex::encode(tx.hash), block.height, spent.len());
                store.store_spends(&tx.hash, block.height, &spent)?;
            }
        }
        Ok(found)
    }

    /// Keep the lookahead window ahead of the highest used subaddress.
    fn grow_subaddresses(&self, used: SubaddressIndex) -> Result<(), WalletError> {
        let (majors, minors) = self.keys.subaddress_extent();
        let (ahead_major, ahead_minor) = self.config.subaddress_lookahead;
        let want_majors = majors.max(used.major.saturating_add(ahead_major));
        let want_minors = minors.max(used.minor.saturating_add(ahead_minor));
        if (want_majors, want_minors) != (majors, minors) {
            self.keys.expand_subaddresses(want_majors, want_minors)?;
        }
        Ok(())
    }

    fn apply_tip(&self, height: u64, hash: &Key) -> Result<Option<SyncCursor>, WalletError> {
        let store = db::lock(&self.store)?;
        store.update_top_block_info(height, hash)?;
        let last = store.last_scan_height()?;
        if last < 0 {
            return Ok(None);
        }
        let rollback_from = if (height as i64) < last {
            Some(height + 1)
        } else if height as i64 == last && store.block_hash(height)?.is_some_and(|h| h != *hash) {
            Some(height)
        } else {
            None
        };
        let Some(from) = rollback_from else { return Ok(None) };

        let popped = store.pop_blocks_from(from)?;
        log::warn!("chain reorg: rolled back {popped} blocks from height {from}");
        self.emit(SyncEvent::Reorg { from_height: last as u64, to_height: from.saturating_sub(1) });
        Ok(Some(SyncCursor { next_height: from, check_sync_height: true }))
    }
}

impl ChainSubscriber for Wallet {
    fn add_blocks(&self, blocks: &[Block]) -> SyncCursor {
        let fallback = |wallet: &Self, check_sync_height| SyncCursor {
            next_height: wallet.last_scan_height().map(|h| (h + 1) as u64).unwrap_or(0),
            check_sync_height,
        };
        if !self.is_running() {
            return fallback(self, false);
        }
        self.apply_blocks(blocks).unwrap_or_else(|e| {
            log::error!("block batch failed: {e}");
            self.emit(SyncEvent::Error { message: e.to_string() });
            fallback(self, true)
        })
    }

    fn update_top_block_info(&self, height: u64, hash: &Key) -> Option<SyncCursor> {
        if !self.is_running() {
            return None;
        }
        self.apply_tip(height, hash).unwrap_or_else(|e| {
            log::error!("tip update failed: {e}");
            None
        })
    }
}
