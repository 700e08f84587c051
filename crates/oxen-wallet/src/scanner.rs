//! Receive and spend detection for one transaction at a time.
//!
//! Receives are found by deriving the shared secret for every tx public key
//! and asking the key holder whether each output pays one of our
//! subaddresses. Spends are a lookup of each input's key image in the
//! ledger, which only ever holds key images of our own outputs.

use std::sync::Arc;

use curve25519_dalek::scalar::Scalar;

use oxen_crypto::Key;
use oxen_tx::Transaction;

use crate::block::BlockTx;
use crate::db::{LedgerStore, ReceivedOutput};
use crate::error::WalletError;
use crate::keys::KeyHolder;

pub struct TransactionScanner {
    keys: Arc<dyn KeyHolder>,
}

impl TransactionScanner {
    pub fn new(keys: Arc<dyn KeyHolder>) -> Self {
        Self { keys }
    }

    /// Outputs of `tx` that belong to this wallet.
    pub fn scan_received(&self, tx: &BlockTx, height: u64) -> Result<Vec<ReceivedOutput>, WalletError> {
        let tx_pubs = tx.tx.public_keys();
        if tx_pubs.is_empty() {
            log::debug!("tx {} at height {height} has no tx public key, skipping", hex::encode(tx.hash));
            return Ok(Vec::new());
        }

        let outputs = &tx.tx.prefix.outputs;
        if outputs.len() != tx.global_indices.len() {
            return Err(WalletError::MalformedBlock(format!(
                "tx {} has {} outputs but {} global indices",
                hex::encode(tx.hash),
                outputs.len(),
                tx.global_indices.len()
            )));
        }

        let derivations: Vec<Key> = tx_pubs
            .iter()
            .filter_map(|r| match self.keys.derive(r) {
                Ok(d) => Some(d),
                Err(e) => {
                    log::warn!("tx {}: cannot derive from tx pubkey {}: {e}", hex::encode(tx.hash), hex::encode(r));
                    None
                }
            })
            .collect();
        let coinbase = tx.tx.is_coinbase();
        let mut received = Vec::new();

        for (i, out) in outputs.iter().enumerate() {
            let index = i as u64;
            let mut matched = None;
            for d in &derivations {
                if let Some(sub) = self.keys.match_output(d, &out.key, index)? {
                    matched = Some((*d, sub));
                    break;
                }
            }
            let Some((derivation, subaddress)) = matched else { continue };

            let decode_err = |e: WalletError| WalletError::ScanDecode {
                tx: hex::encode(tx.hash),
                output_index: index,
                reason: e.to_string(),
            };
            let key_image = self.keys.key_image(&derivation, &out.key, index, subaddress).map_err(decode_err)?;
            let (amount, rct_mask) = if coinbase {
                (out.amount, Scalar::ONE)
            } else {
                open_output(self.keys.as_ref(), &tx.tx, &derivation, index).map_err(decode_err)?
            };

            log::info!(
                "received {amount} in tx {} output {i} to subaddress {}/{}",
                hex::encode(tx.hash),
                subaddress.major,
                subaddress.minor
            );
            received.push(ReceivedOutput {
                amount,
                output_index: index,
                global_index: tx.global_indices[i],
                unlock_time: tx.tx.get_unlock_time(i),
                output_key: out.key,
                derivation,
                rct_mask,
                key_image,
                subaddress,
            });
        }
        Ok(received)
    }

    /// Key images in `tx` that spend outputs recorded in `store`.
    pub fn scan_spent(&self, tx: &Transaction, store: &LedgerStore) -> Result<Vec<Key>, WalletError> {
        let mut spent = Vec::new();
        for ki in tx.key_images() {
            if store.key_image_exists(ki)? {
                spent.push(*ki);
            }
        }
        Ok(spent)
    }
}

fn open_output(keys: &dyn KeyHolder, tx: &Transaction, derivation: &Key, index: u64) -> Result<(u64, Scalar), WalletError> {
    let rct = tx.rct.as_ref().ok_or_else(|| WalletError::invalid("output has no RingCT data"))?;
    keys.open_amount(rct, derivation, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{SoftwareKeyHolder, SubaddressIndex};
    use oxen_crypto::generate_keys;
    use oxen_tx::extra::ExtraBuilder;
    use oxen_tx::{RctSignatures, TxInput, TxOutput, TxPrefix};
    use oxen_types::NetType;

    fn coinbase_to(keys: &SoftwareKeyHolder, amount: u64, height: u64) -> BlockTx {
        let (r, big_r) = generate_keys();
        let addr = keys.address(NetType::Testnet, SubaddressIndex::PRIMARY).unwrap();
        let out = keys.ephemeral_out_key(&r, &big_r, &addr, 0, false).unwrap();
        let tx = Transaction {
            prefix: TxPrefix {
                version: 4,
                output_unlock_times: vec![60],
                inputs: vec![TxInput::Gen { height }],
                outputs: vec![TxOutput { amount, key: out.key }],
                extra: ExtraBuilder::new().pub_key(big_r).build(),
                ..Default::default()
            },
            rct: Some(RctSignatures::null()),
        };
        BlockTx { hash: tx.hash(), tx, global_indices: vec![42] }
    }

    #[test]
    fn finds_coinbase_output() {
        let keys = Arc::new(SoftwareKeyHolder::generate());
        let scanner = TransactionScanner::new(keys.clone());
        let tx = coinbase_to(&keys, 1000, 10);

        let found = scanner.scan_received(&tx, 10).unwrap();
        assert_eq!(found.len(), 1);
        let o = &found[0];
        assert_eq!((o.amount, o.unlock_time, o.global_index), (1000, 60, 42));
        assert_eq!(o.rct_mask, Scalar::ONE);
        assert_eq!(o.subaddress, SubaddressIndex::PRIMARY);
    }

    #[test]
    fn ignores_foreign_outputs() {
        let mine = Arc::new(SoftwareKeyHolder::generate());
        let other = SoftwareKeyHolder::generate();
        let scanner = TransactionScanner::new(mine);
        assert!(scanner.scan_received(&coinbase_to(&other, 1000, 3), 3).unwrap().is_empty());
    }

    #[test]
    fn no_tx_pubkey_is_not_an_error() {
        let keys = Arc::new(SoftwareKeyHolder::generate());
        let scanner = TransactionScanner::new(keys.clone());
        let mut tx = coinbase_to(&keys, 1000, 3);
        tx.tx.prefix.extra.clear();
        assert!(scanner.scan_received(&tx, 3).unwrap().is_empty());
    }

    #[test]
    fn bad_tx_pubkey_is_logged_and_skipped() {
        let keys = Arc::new(SoftwareKeyHolder::generate());
        let scanner = TransactionScanner::new(keys.clone());
        let mut tx = coinbase_to(&keys, 1000, 3);
        tx.tx.prefix.extra = ExtraBuilder::new().pub_key([0xff; 32]).build();
        assert!(scanner.scan_received(&tx, 3).unwrap().is_empty());
    }

    #[test]
    fn output_count_mismatch_is_malformed() {
        let keys = Arc::new(SoftwareKeyHolder::generate());
        let scanner = TransactionScanner::new(keys.clone());
        let mut tx = coinbase_to(&keys, 1000, 3);
        tx.global_indices.push(43);
        assert!(matches!(scanner.scan_received(&tx, 3), Err(WalletError::MalformedBlock(_))));
    }

    #[test]
    fn spends_are_key_image_lookups() {
        let keys = Arc::new(SoftwareKeyHolder::generate());
        let scanner = TransactionScanner::new(keys.clone());
        let store = LedgerStore::open_in_memory(NetType::Testnet).unwrap();
        for h in 0..=10 {
            store.store_block(h, &[h as u8; 32], 0, 1).unwrap();
        }
        let cb = coinbase_to(&keys, 1000, 10);
        let found = scanner.scan_received(&cb, 10).unwrap();
        store.store_transaction(&cb.hash, 10, &found).unwrap();

        let spend = Transaction {
            prefix: TxPrefix {
                version: 4,
                inputs: vec![
                    TxInput::ToKey { amount: 0, key_offsets: vec![1], key_image: found[0].key_image },
                    TxInput::ToKey { amount: 0, key_offsets: vec![2], key_image: [5u8; 32] },
                ],
                ..Default::default()
            },
            rct: None,
        };
        assert_eq!(scanner.scan_spent(&spend, &store).unwrap(), vec![found[0].key_image]);
    }
}
