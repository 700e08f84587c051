//! SQLite ledger of scanned blocks, owned outputs and their spends.
//!
//! Balance, scan height and output count live in the single `metadata` row
//! and are maintained by triggers, so every write keeps them consistent
//! without the caller doing any arithmetic. Popping a block cascades to its
//! transactions, outputs and spends and the triggers undo their effects.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use curve25519_dalek::scalar::Scalar;
use rusqlite::{params, Connection, OptionalExtension};

use oxen_crypto::Key;
use oxen_types::NetType;

use crate::error::WalletError;
use crate::keys::{StoredKeys, SubaddressIndex};

/// Ledger layout version this build reads and writes.
pub const DB_VERSION: i64 = 0;

/// Unspent, unreserved and unlocked at the current scan height. Expects the
/// outputs table aliased as `o`.
const SPENDABLE: &str = "o.spent_height = 0 AND NOT o.spending
    AND o.block_height + o.unlock_time <= (SELECT last_scan_height FROM metadata WHERE id = 0)";

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS metadata (
  id                 INTEGER PRIMARY KEY CHECK (id = 0),
  db_version         INTEGER NOT NULL DEFAULT 0,
  nettype            TEXT NOT NULL,
  balance            INTEGER NOT NULL DEFAULT 0,
  last_scan_height   INTEGER NOT NULL DEFAULT -1,
  scan_target_hash   TEXT NOT NULL DEFAULT '',
  scan_target_height INTEGER NOT NULL DEFAULT 0,
  output_count       INTEGER NOT NULL DEFAULT 0,
  keys               TEXT
);

CREATE TABLE IF NOT EXISTS blocks (
  height       INTEGER PRIMARY KEY NOT NULL,
  output_count INTEGER NOT NULL,
  hash         TEXT NOT NULL,
  timestamp    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
  id    INTEGER PRIMARY KEY,
  block INTEGER NOT NULL REFERENCES blocks(height) ON DELETE CASCADE,
  hash  TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subaddresses (
  major   INTEGER NOT NULL,
  minor   INTEGER NOT NULL,
  address TEXT NOT NULL DEFAULT '',
  used    BOOLEAN NOT NULL DEFAULT FALSE,
  PRIMARY KEY (major, minor)
);

CREATE TABLE IF NOT EXISTS key_images (
  id        INTEGER PRIMARY KEY,
  key_image TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS outputs (
  id           INTEGER PRIMARY KEY,
  amount       INTEGER NOT NULL,
  output_index INTEGER NOT NULL,
  global_index INTEGER NOT NULL,
  unlock_time  INTEGER NOT NULL,
  block_height INTEGER NOT NULL REFERENCES blocks(height) ON DELETE CASCADE,
  spending     BOOLEAN NOT NULL DEFAULT FALSE,
  spent_height INTEGER NOT NULL DEFAULT 0,
  tx           INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
  output_key   TEXT NOT NULL,
  derivation   TEXT NOT NULL,
  rct_mask     TEXT NOT NULL,
  key_image    INTEGER NOT NULL REFERENCES key_images(id),
  major        INTEGER NOT NULL,
  minor        INTEGER NOT NULL,
  FOREIGN KEY (major, minor) REFERENCES subaddresses(major, minor),
  UNIQUE (tx, output_index)
);
CREATE INDEX IF NOT EXISTS outputs_key_image ON outputs(key_image);
CREATE INDEX IF NOT EXISTS outputs_amount ON outputs(amount);

CREATE TABLE IF NOT EXISTS spends (
  id        INTEGER PRIMARY KEY,
  key_image INTEGER NOT NULL UNIQUE REFERENCES key_images(id),
  height    INTEGER NOT NULL REFERENCES blocks(height) ON DELETE CASCADE,
  tx        INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE
);

CREATE TRIGGER IF NOT EXISTS block_added AFTER INSERT ON blocks FOR EACH ROW BEGIN
  UPDATE metadata SET last_scan_height = NEW.height, output_count = output_count + NEW.output_count WHERE id = 0;
END;

CREATE TRIGGER IF NOT EXISTS block_removed AFTER DELETE ON blocks FOR EACH ROW BEGIN
  UPDATE metadata SET last_scan_height = OLD.height - 1, output_count = output_count - OLD.output_count WHERE id = 0;
END;

CREATE TRIGGER IF NOT EXISTS output_received AFTER INSERT ON outputs FOR EACH ROW BEGIN
  UPDATE metadata SET balance = balance + NEW.amount WHERE id = 0;
END;

CREATE TRIGGER IF NOT EXISTS output_removed AFTER DELETE ON outputs FOR EACH ROW BEGIN
  UPDATE metadata SET balance = balance -
    CASE WHEN OLD.spent_height = 0 AND NOT OLD.spending THEN OLD.amount ELSE 0 END
  WHERE id = 0;
  DELETE FROM key_images WHERE id = OLD.key_image
    AND NOT EXISTS (SELECT 1 FROM outputs WHERE key_image = OLD.key_image)
    AND NOT EXISTS (SELECT 1 FROM spends WHERE key_image = OLD.key_image);
END;

CREATE TRIGGER IF NOT EXISTS output_spending AFTER UPDATE OF spending ON outputs FOR EACH ROW
WHEN OLD.spending != NEW.spending AND OLD.spent_height = 0 AND NEW.spent_height = 0 BEGIN
  UPDATE metadata SET balance = balance + CASE WHEN NEW.spending THEN -NEW.amount ELSE NEW.amount END WHERE id = 0;
END;

CREATE TRIGGER IF NOT EXISTS spend_added AFTER INSERT ON spends FOR EACH ROW BEGIN
  UPDATE metadata SET balance = balance - COALESCE((
    SELECT SUM(amount) FROM outputs
    WHERE key_image = NEW.key_image AND spent_height = 0 AND NOT spending), 0)
  WHERE id = 0;
  UPDATE outputs SET spent_height = NEW.height, spending = FALSE WHERE key_image = NEW.key_image;
END;

CREATE TRIGGER IF NOT EXISTS spend_removed AFTER DELETE ON spends FOR EACH ROW BEGIN
  UPDATE outputs SET spent_height = 0 WHERE key_image = OLD.key_image;
  UPDATE metadata SET balance = balance + COALESCE((
    SELECT SUM(amount) FROM outputs WHERE key_image = OLD.key_image AND NOT spending), 0)
  WHERE id = 0;
  DELETE FROM key_images WHERE id = OLD.key_image
    AND NOT EXISTS (SELECT 1 FROM outputs WHERE key_image = OLD.key_image);
END;
";

/// An owned output found by the scanner, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedOutput {
    pub amount: u64,
    pub output_index: u64,
    pub global_index: u64,
    pub unlock_time: u64,
    pub output_key: Key,
    pub derivation: Key,
    pub rct_mask: Scalar,
    pub key_image: Key,
    pub subaddress: SubaddressIndex,
}

/// An unspent output as read back for input selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SpendableOutput {
    pub amount: u64,
    pub output_index: u64,
    pub global_index: u64,
    pub unlock_time: u64,
    pub block_height: u64,
    pub output_key: Key,
    pub derivation: Key,
    pub rct_mask: Scalar,
    pub key_image: Key,
    pub subaddress: SubaddressIndex,
}

/// Row counts, for consistency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub outputs: u64,
    pub spends: u64,
    pub key_images: u64,
}

/// The wallet ledger. One writer; every multi-row write runs in a transaction.
pub struct LedgerStore {
    conn: Connection,
}

/// Lock a shared ledger.
pub fn lock(store: &Mutex<LedgerStore>) -> Result<MutexGuard<'_, LedgerStore>, WalletError> {
    store.lock().map_err(|_| WalletError::invalid("ledger lock poisoned"))
}

fn key_from_hex(s: &str) -> Result<Key, WalletError> {
    let bytes = hex::decode(s).map_err(|e| WalletError::invalid(format!("corrupt key column: {e}")))?;
    bytes.try_into().map_err(|_| WalletError::invalid("corrupt key column: expected 32 bytes"))
}

impl LedgerStore {
    /// Open or create the ledger at `path` for `nettype`.
    pub fn open(path: impl AsRef<Path>, nettype: NetType) -> Result<Self, WalletError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn, nettype)
    }

    pub fn open_in_memory(nettype: NetType) -> Result<Self, WalletError> {
        Self::init(Connection::open_in_memory()?, nettype)
    }

    fn init(conn: Connection, nettype: NetType) -> Result<Self, WalletError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_DDL)?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata (id, db_version, nettype) VALUES (0, ?1, ?2)",
            params![DB_VERSION, nettype.as_str()],
        )?;

        let (version, stored): (i64, String) =
            conn.query_row("SELECT db_version, nettype FROM metadata WHERE id = 0", [], |r| Ok((r.get(0)?, r.get(1)?)))?;
        if version != DB_VERSION {
            return Err(WalletError::SchemaMismatch { found: version, supported: DB_VERSION });
        }
        if stored != nettype.as_str() {
            return Err(WalletError::NetTypeMismatch { configured: nettype, stored });
        }
        Ok(Self { conn })
    }

    /// Run `f` inside one transaction; nothing it wrote survives an error.
    /// Nested calls join the enclosing transaction.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T, WalletError>) -> Result<T, WalletError> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    fn meta_i64(&self, column: &str) -> Result<i64, WalletError> {
        let sql = format!("SELECT {column} FROM metadata WHERE id = 0");
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }

    // ─── Tip pointers ───────────────────────────────────────────────────────

    /// Height of the newest stored block, −1 when empty.
    pub fn last_scan_height(&self) -> Result<i64, WalletError> {
        self.meta_i64("last_scan_height")
    }

    pub fn scan_target_height(&self) -> Result<u64, WalletError> {
        Ok(self.meta_i64("scan_target_height")? as u64)
    }

    pub fn scan_target_hash(&self) -> Result<String, WalletError> {
        Ok(self.conn.query_row("SELECT scan_target_hash FROM metadata WHERE id = 0", [], |r| r.get(0))?)
    }

    pub fn update_top_block_info(&self, height: u64, hash: &Key) -> Result<(), WalletError> {
        self.conn.execute(
            "UPDATE metadata SET scan_target_height = ?1, scan_target_hash = ?2 WHERE id = 0",
            params![height as i64, hex::encode(hash)],
        )?;
        Ok(())
    }

    /// Number of outputs on chain up to the last scanned block.
    pub fn chain_output_count(&self) -> Result<u64, WalletError> {
        Ok(self.meta_i64("output_count")? as u64)
    }

    // ─── Blocks ─────────────────────────────────────────────────────────────

    /// Append the block at `last_scan_height + 1`.
    pub fn store_block(&self, height: u64, hash: &Key, timestamp: u64, output_count: u64) -> Result<(), WalletError> {
        let last = self.last_scan_height()?;
        if height as i64 != last + 1 {
            return Err(WalletError::NonContiguousBlock { last, got: height as i64 });
        }
        self.conn.execute(
            "INSERT INTO blocks (height, output_count, hash, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![height as i64, output_count as i64, hex::encode(hash), timestamp as i64],
        )?;
        Ok(())
    }

    pub fn block_hash(&self, height: u64) -> Result<Option<Key>, WalletError> {
        let hash: Option<String> = self
            .conn
            .query_row("SELECT hash FROM blocks WHERE height = ?1", params![height as i64], |r| r.get(0))
            .optional()?;
        hash.as_deref().map(key_from_hex).transpose()
    }

    /// Remove the newest block and everything recorded in it. Returns the
    /// popped height, or `None` on an empty ledger.
    pub fn pop_block(&self) -> Result<Option<u64>, WalletError> {
        self.with_transaction(|store| {
            let top: Option<i64> = store.conn.query_row("SELECT MAX(height) FROM blocks", [], |r| r.get(0))?;
            let Some(top) = top else { return Ok(None) };
            store.conn.execute("DELETE FROM blocks WHERE height = ?1", params![top])?;
            Ok(Some(top as u64))
        })
    }

    /// Pop blocks until `last_scan_height < height`.
    pub fn pop_blocks_from(&self, height: u64) -> Result<usize, WalletError> {
        let mut popped = 0;
        while self.last_scan_height()? >= height as i64 {
            if self.pop_block()?.is_none() {
                break;
            }
            popped += 1;
        }
        if popped > 0 {
            log::info!("rolled back {popped} block(s) to height {}", self.last_scan_height()?);
        }
        Ok(popped)
    }

    // ─── Transactions, outputs, spends ──────────────────────────────────────

    fn tx_row(&self, tx_hash: &Key, height: u64) -> Result<i64, WalletError> {
        let hash = hex::encode(tx_hash);
        self.conn.execute(
            "INSERT INTO transactions (block, hash) VALUES (?1, ?2) ON CONFLICT (hash) DO NOTHING",
            params![height as i64, hash],
        )?;
        Ok(self.conn.query_row("SELECT id FROM transactions WHERE hash = ?1", params![hash], |r| r.get(0))?)
    }

    fn key_image_row(&self, key_image: &Key) -> Result<i64, WalletError> {
        let ki = hex::encode(key_image);
        self.conn.execute(
            "INSERT INTO key_images (key_image) VALUES (?1) ON CONFLICT (key_image) DO NOTHING",
            params![ki],
        )?;
        Ok(self.conn.query_row("SELECT id FROM key_images WHERE key_image = ?1", params![ki], |r| r.get(0))?)
    }

    /// Record received outputs of one transaction. Storing the same
    /// transaction twice leaves the ledger unchanged.
    pub fn store_transaction(&self, tx_hash: &Key, height: u64, outputs: &[ReceivedOutput]) -> Result<(), WalletError> {
        if outputs.is_empty() {
            return Ok(());
        }
        self.with_transaction(|store| {
            let tx = store.tx_row(tx_hash, height)?;
            for o in outputs {
                let ki = store.key_image_row(&o.key_image)?;
                store.conn.execute(
                    "INSERT INTO subaddresses (major, minor, used) VALUES (?1, ?2, TRUE)
                     ON CONFLICT (major, minor) DO UPDATE SET used = TRUE",
                    params![o.subaddress.major, o.subaddress.minor],
                )?;
                store.conn.execute(
                    "INSERT INTO outputs (amount, output_index, global_index, unlock_time, block_height, tx,
                                          output_key, derivation, rct_mask, key_image, major, minor)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT (tx, output_index) DO NOTHING",
                    params![
                        o.amount as i64,
                        o.output_index as i64,
                        o.global_index as i64,
                        o.unlock_time as i64,
                        height as i64,
                        tx,
                        hex::encode(o.output_key),
                        hex::encode(o.derivation),
                        hex::encode(o.rct_mask.to_bytes()),
                        ki,
                        o.subaddress.major,
                        o.subaddress.minor,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Record that `tx_hash` at `height` spends our outputs with these key images.
    pub fn store_spends(&self, tx_hash: &Key, height: u64, key_images: &[Key]) -> Result<(), WalletError> {
        if key_images.is_empty() {
            return Ok(());
        }
        self.with_transaction(|store| {
            let tx = store.tx_row(tx_hash, height)?;
            for ki in key_images {
                let ki = store.key_image_row(ki)?;
                store.conn.execute(
                    "INSERT INTO spends (key_image, height, tx) VALUES (?1, ?2, ?3) ON CONFLICT (key_image) DO NOTHING",
                    params![ki, height as i64, tx],
                )?;
            }
            Ok(())
        })
    }

    pub fn key_image_exists(&self, key_image: &Key) -> Result<bool, WalletError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM key_images WHERE key_image = ?1)",
            params![hex::encode(key_image)],
            |r| r.get(0),
        )?)
    }

    /// Mark or unmark outputs as reserved by a transaction being built or
    /// in flight.
    pub fn set_spending(&self, key_images: &[Key], spending: bool) -> Result<(), WalletError> {
        self.with_transaction(|store| {
            for ki in key_images {
                store.conn.execute(
                    "UPDATE outputs SET spending = ?1
                     WHERE key_image = (SELECT id FROM key_images WHERE key_image = ?2)",
                    params![spending, hex::encode(ki)],
                )?;
            }
            Ok(())
        })
    }

    // ─── Balances ───────────────────────────────────────────────────────────

    pub fn overall_balance(&self) -> Result<u64, WalletError> {
        Ok(self.meta_i64("balance")? as u64)
    }

    pub fn unlocked_balance(&self) -> Result<u64, WalletError> {
        let sum: i64 = self.conn.query_row(
            &format!("SELECT COALESCE(SUM(amount), 0) FROM outputs o WHERE {SPENDABLE}"),
            [],
            |r| r.get(0),
        )?;
        Ok(sum as u64)
    }

    /// Balance over spendable outputs strictly larger than `min_amount`.
    pub fn available_balance(&self, min_amount: u64) -> Result<u64, WalletError> {
        let sum: i64 = self.conn.query_row(
            &format!("SELECT COALESCE(SUM(amount), 0) FROM outputs o WHERE {SPENDABLE} AND o.amount > ?1"),
            params![min_amount as i64],
            |r| r.get(0),
        )?;
        Ok(sum as u64)
    }

    /// Spendable outputs larger than `min_amount`, smallest first.
    pub fn available_outputs(&self, min_amount: u64) -> Result<Vec<SpendableOutput>, WalletError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT o.amount, o.output_index, o.global_index, o.unlock_time, o.block_height,
                    o.output_key, o.derivation, o.rct_mask, k.key_image, o.major, o.minor
             FROM outputs o JOIN key_images k ON k.id = o.key_image
             WHERE {SPENDABLE} AND o.amount > ?1
             ORDER BY o.amount, o.global_index"
        ))?;
        let rows = stmt.query_map(params![min_amount as i64], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
                r.get::<_, u32>(9)?,
                r.get::<_, u32>(10)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (amount, output_index, global_index, unlock_time, block_height, key, der, mask, ki, major, minor) = row?;
            let mask = oxen_crypto::scalar_from_canonical(&key_from_hex(&mask)?)?;
            out.push(SpendableOutput {
                amount: amount as u64,
                output_index: output_index as u64,
                global_index: global_index as u64,
                unlock_time: unlock_time as u64,
                block_height: block_height as u64,
                output_key: key_from_hex(&key)?,
                derivation: key_from_hex(&der)?,
                rct_mask: mask,
                key_image: key_from_hex(&ki)?,
                subaddress: SubaddressIndex::new(major, minor),
            });
        }
        Ok(out)
    }

    /// Height at which the output with `key_image` was spent, 0 if unspent.
    pub fn spent_height(&self, key_image: &Key) -> Result<Option<u64>, WalletError> {
        let h: Option<i64> = self
            .conn
            .query_row(
                "SELECT o.spent_height FROM outputs o JOIN key_images k ON k.id = o.key_image WHERE k.key_image = ?1",
                params![hex::encode(key_image)],
                |r| r.get(0),
            )
            .optional()?;
        Ok(h.map(|h| h as u64))
    }

    pub fn counts(&self) -> Result<TableCounts, WalletError> {
        let count = |table: &str| -> Result<u64, WalletError> {
            let n: i64 = self.conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            Ok(n as u64)
        };
        Ok(TableCounts {
            blocks: count("blocks")?,
            transactions: count("transactions")?,
            outputs: count("outputs")?,
            spends: count("spends")?,
            key_images: count("key_images")?,
        })
    }

    // ─── Keys and addresses ─────────────────────────────────────────────────

    /// Persist key material; fails if different keys are already stored.
    pub fn save_keys(&self, keys: &StoredKeys) -> Result<(), WalletError> {
        if let Some(existing) = self.load_keys()? {
            if existing != *keys {
                return Err(WalletError::KeyMismatch);
            }
            return Ok(());
        }
        let json = serde_json::to_string(keys).map_err(|e| WalletError::invalid(e.to_string()))?;
        self.conn.execute("UPDATE metadata SET keys = ?1 WHERE id = 0", params![json])?;
        Ok(())
    }

    pub fn load_keys(&self) -> Result<Option<StoredKeys>, WalletError> {
        let json: Option<String> = self.conn.query_row("SELECT keys FROM metadata WHERE id = 0", [], |r| r.get(0))?;
        json.map(|j| serde_json::from_str(&j).map_err(|e| WalletError::invalid(format!("corrupt stored keys: {e}"))))
            .transpose()
    }

    pub fn add_address(&self, index: SubaddressIndex, address: &str) -> Result<(), WalletError> {
        self.conn.execute(
            "INSERT INTO subaddresses (major, minor, address) VALUES (?1, ?2, ?3)
             ON CONFLICT (major, minor) DO UPDATE SET address = excluded.address",
            params![index.major, index.minor, address],
        )?;
        Ok(())
    }

    pub fn get_address(&self, index: SubaddressIndex) -> Result<Option<String>, WalletError> {
        let addr: Option<String> = self
            .conn
            .query_row(
                "SELECT address FROM subaddresses WHERE major = ?1 AND minor = ?2",
                params![index.major, index.minor],
                |r| r.get(0),
            )
            .optional()?;
        Ok(addr.filter(|a| !a.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Key {
        [n; 32]
    }

    fn output(ki: u8, amount: u64, index: u64) -> ReceivedOutput {
        ReceivedOutput {
            amount,
            output_index: index,
            global_index: 100 + ki as u64,
            unlock_time: 0,
            output_key: key(ki.wrapping_add(100)),
            derivation: key(7),
            rct_mask: Scalar::from(ki as u64),
            key_image: key(ki),
            subaddress: SubaddressIndex::PRIMARY,
        }
    }

    fn store_with_blocks(n: u64) -> LedgerStore {
        let store = LedgerStore::open_in_memory(NetType::Testnet).unwrap();
        for h in 0..n {
            store.store_block(h, &key(h as u8), 1_700_000_000 + h, 2).unwrap();
        }
        store
    }

    fn unspent_sum(store: &LedgerStore) -> u64 {
        store.available_balance(0).unwrap()
    }

    #[test]
    fn empty_ledger() {
        let store = LedgerStore::open_in_memory(NetType::Mainnet).unwrap();
        assert_eq!(store.last_scan_height().unwrap(), -1);
        assert_eq!(store.overall_balance().unwrap(), 0);
        assert_eq!(store.pop_block().unwrap(), None);
        assert!(store.load_keys().unwrap().is_none());
    }

    #[test]
    fn blocks_must_be_contiguous() {
        let store = store_with_blocks(3);
        assert_eq!(store.last_scan_height().unwrap(), 2);
        assert_eq!(store.chain_output_count().unwrap(), 6);
        let err = store.store_block(5, &key(5), 0, 0).unwrap_err();
        assert!(matches!(err, WalletError::NonContiguousBlock { last: 2, got: 5 }));
        assert_eq!(store.block_hash(1).unwrap(), Some(key(1)));
    }

    #[test]
    fn receive_spend_and_rollback() {
        let store = store_with_blocks(16);
        let tx = key(0xaa);
        store.store_transaction(&tx, 10, &[output(1, 1000, 0)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 1000);

        store.store_spends(&key(0xbb), 15, &[key(1)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 0);
        assert_eq!(store.spent_height(&key(1)).unwrap(), Some(15));

        store.pop_blocks_from(15).unwrap();
        assert_eq!(store.last_scan_height().unwrap(), 14);
        assert_eq!(store.overall_balance().unwrap(), 1000);
        assert_eq!(store.spent_height(&key(1)).unwrap(), Some(0));
        let counts = store.counts().unwrap();
        assert_eq!(counts.spends, 0);
        assert_eq!(counts.key_images, 1);

        store.pop_blocks_from(10).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 0);
        assert_eq!(store.counts().unwrap().key_images, 0);
    }

    #[test]
    fn pop_block_with_receive_and_spend_together() {
        let store = store_with_blocks(6);
        store.store_transaction(&key(0xa1), 3, &[output(1, 40, 0)]).unwrap();
        store.store_transaction(&key(0xa2), 5, &[output(2, 60, 0)]).unwrap();
        store.store_spends(&key(0xa3), 5, &[key(2)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 40);

        // Popping block 5 removes the output and its spend; balance must
        // not move.
        store.pop_block().unwrap();
        assert_eq!(store.overall_balance().unwrap(), 40);
        assert_eq!(store.overall_balance().unwrap(), unspent_sum(&store));
        assert_eq!(store.counts().unwrap().key_images, 1);
    }

    #[test]
    fn insert_then_pop_restores_state() {
        let store = store_with_blocks(5);
        store.store_transaction(&key(0xa1), 2, &[output(1, 10, 0), output(2, 20, 1)]).unwrap();
        let before = (store.overall_balance().unwrap(), store.last_scan_height().unwrap(), store.counts().unwrap());

        store.store_block(5, &key(5), 0, 3).unwrap();
        store.store_transaction(&key(0xa2), 5, &[output(3, 5, 0)]).unwrap();
        store.store_spends(&key(0xa2), 5, &[key(1)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 25);

        store.pop_block().unwrap();
        let after = (store.overall_balance().unwrap(), store.last_scan_height().unwrap(), store.counts().unwrap());
        assert_eq!(before, after);
        assert_eq!(store.chain_output_count().unwrap(), 10);
    }

    #[test]
    fn store_transaction_is_idempotent() {
        let store = store_with_blocks(3);
        let outs = [output(1, 10, 0), output(2, 20, 1)];
        store.store_transaction(&key(0xa1), 2, &outs).unwrap();
        let counts = store.counts().unwrap();
        store.store_transaction(&key(0xa1), 2, &outs).unwrap();
        assert_eq!(store.counts().unwrap(), counts);
        assert_eq!(store.overall_balance().unwrap(), 30);
    }

    #[test]
    fn spending_flag_moves_balance() {
        let store = store_with_blocks(3);
        store.store_transaction(&key(0xa1), 1, &[output(1, 10, 0), output(2, 20, 1)]).unwrap();
        store.set_spending(&[key(2)], true).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 10);
        assert_eq!(store.available_outputs(0).unwrap().len(), 1);
        // Setting it twice is a no-op.
        store.set_spending(&[key(2)], true).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 10);

        // Mined while reserved: the spend clears the flag without a second debit.
        store.store_spends(&key(0xa2), 2, &[key(2)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 10);
        store.pop_block().unwrap();
        assert_eq!(store.overall_balance().unwrap(), 30);

        store.set_spending(&[key(1)], true).unwrap();
        store.set_spending(&[key(1)], false).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 30);
    }

    #[test]
    fn available_outputs_filtered_and_ordered() {
        let store = store_with_blocks(3);
        store.store_transaction(&key(0xa1), 1, &[output(1, 7, 0), output(2, 5, 1), output(3, 1, 2)]).unwrap();
        let amounts: Vec<u64> = store.available_outputs(1).unwrap().iter().map(|o| o.amount).collect();
        assert_eq!(amounts, vec![5, 7]);
        assert_eq!(store.available_balance(1).unwrap(), 12);
        let first = &store.available_outputs(0).unwrap()[0];
        assert_eq!(first.key_image, key(3));
        assert_eq!(first.rct_mask, Scalar::from(3u64));
    }

    #[test]
    fn unlocked_balance_respects_unlock_time() {
        let store = store_with_blocks(10);
        let mut locked = output(1, 50, 0);
        locked.unlock_time = 60;
        store.store_transaction(&key(0xa1), 9, &[locked, output(2, 7, 1)]).unwrap();
        assert_eq!(store.overall_balance().unwrap(), 57);
        assert_eq!(store.unlocked_balance().unwrap(), 7);

        // Locked outputs are never offered for spending.
        assert_eq!(store.available_balance(0).unwrap(), 7);
        let spendable: Vec<Key> = store.available_outputs(0).unwrap().iter().map(|o| o.key_image).collect();
        assert_eq!(spendable, vec![key(2)]);

        // Unlocks once the scan reaches block_height + unlock_time.
        for h in 10..=69 {
            store.store_block(h, &key(h as u8), 0, 0).unwrap();
        }
        assert_eq!(store.unlocked_balance().unwrap(), 57);
        assert_eq!(store.available_outputs(0).unwrap().len(), 2);
    }

    #[test]
    fn keys_roundtrip_and_mismatch() {
        let store = LedgerStore::open_in_memory(NetType::Mainnet).unwrap();
        let keys = StoredKeys { spend_secret: key(1), spend_public: key(2), view_secret: key(3), view_public: key(4) };
        store.save_keys(&keys).unwrap();
        store.save_keys(&keys).unwrap();
        assert_eq!(store.load_keys().unwrap(), Some(keys.clone()));
        let other = StoredKeys { view_public: key(9), ..keys };
        assert!(matches!(store.save_keys(&other), Err(WalletError::KeyMismatch)));
    }

    #[test]
    fn nettype_and_version_checked_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite");
        drop(LedgerStore::open(&path, NetType::Testnet).unwrap());
        assert!(LedgerStore::open(&path, NetType::Testnet).is_ok());
        assert!(matches!(LedgerStore::open(&path, NetType::Mainnet), Err(WalletError::NetTypeMismatch { .. })));

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE metadata SET db_version = 7", []).unwrap();
        drop(conn);
        assert!(matches!(
            LedgerStore::open(&path, NetType::Testnet),
            Err(WalletError::SchemaMismatch { found: 7, supported: 0 })
        ));
    }

    #[test]
    fn address_cache() {
        let store = LedgerStore::open_in_memory(NetType::Mainnet).unwrap();
        let idx = SubaddressIndex::new(0, 3);
        assert_eq!(store.get_address(idx).unwrap(), None);
        store.add_address(idx, "LAddr").unwrap();
        assert_eq!(store.get_address(idx).unwrap().as_deref(), Some("LAddr"));
    }

    #[test]
    fn failed_write_leaves_no_trace() {
        let store = store_with_blocks(2);
        // Block 7 does not exist, so the foreign key rejects the output.
        assert!(store.store_transaction(&key(0xa1), 7, &[output(1, 10, 0)]).is_err());
        assert_eq!(store.counts().unwrap(), TableCounts { blocks: 2, ..Default::default() });
        assert_eq!(store.overall_balance().unwrap(), 0);
    }
}
