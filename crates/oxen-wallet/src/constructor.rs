//! Building and signing transactions.
//!
//! Inputs are picked from the ledger and reserved under the same lock, so
//! two builds never pick the same output. Rings are fetched from the node,
//! outputs derived through the key holder, and the signed result is checked
//! with the RingCT verifier before it is handed back. Any failure after the
//! reservation releases it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use oxen_crypto::clsag::RingMember;
use oxen_crypto::{compress, decompress, ecdh, generate_key_derivation, keccak256_parts, Key};
use oxen_rpc::RpcError;
use oxen_tx::decoy::absolute_to_relative;
use oxen_tx::extra::ExtraBuilder;
use oxen_tx::ons::{self, GenericOwner, OnsExtra, OnsType};
use oxen_tx::sign::SigningOutput;
use oxen_tx::types::txversion;
use oxen_tx::{verify_rct, DecoySelector, Priority, Transaction, TxError, TxInput, TxOutput, TxPrefix, TxType};
use oxen_types::constants::HF_VERSION;
use oxen_types::{Address, NetType};

use crate::daemon_comms::{DaemonComms, OnsRecord};
use crate::db::{self, LedgerStore};
use crate::error::WalletError;
use crate::keys::{InputToSign, KeyHolder, SubaddressIndex, TxSecretKey};
use crate::output_selection::select_outputs;
use crate::pending::{PendingTransaction, Recipient};

/// Safety net for the select/finalise loop; one round always suffices when
/// the fee is monotonic in the input count.
const MAX_SELECTION_ROUNDS: usize = 8;

const PAYMENT_ID_TAIL: u8 = 0x8d;

/// Ring fetches per input before giving up on locked members.
const MAX_RING_ATTEMPTS: usize = 4;

pub struct TransactionConstructor {
    store: Arc<Mutex<LedgerStore>>,
    comms: Arc<DaemonComms>,
    keys: Arc<dyn KeyHolder>,
    nettype: NetType,
    ons_lookup_timeout: Duration,
}

impl TransactionConstructor {
    pub fn new(
        store: Arc<Mutex<LedgerStore>>,
        comms: Arc<DaemonComms>,
        keys: Arc<dyn KeyHolder>,
        nettype: NetType,
        ons_lookup_timeout: Duration,
    ) -> Self {
        Self { store, comms, keys, nettype, ons_lookup_timeout }
    }

    fn pending(&self, recipients: Vec<Recipient>, priority: Priority) -> Result<PendingTransaction, WalletError> {
        let change = self.keys.address(self.nettype, SubaddressIndex::PRIMARY)?;
        PendingTransaction::new(recipients, change, self.comms.fee_params(), priority)
    }

    /// A plain transfer to `recipients`, change back to the primary address.
    pub async fn create_transaction(
        &self,
        recipients: Vec<Recipient>,
        priority: Priority,
        unlock_time: u64,
    ) -> Result<PendingTransaction, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::invalid("no destinations"));
        }
        for r in &recipients {
            if r.amount == 0 {
                return Err(WalletError::invalid("destination amount must be positive"));
            }
            if r.address.nettype != self.nettype {
                return Err(WalletError::invalid(format!("destination is a {} address", r.address.nettype)));
            }
        }
        let mut ptx = self.pending(recipients, priority)?;
        ptx.unlock_time = unlock_time;
        self.build(ptx).await
    }

    /// Register `name` with `value`. The owner defaults to this wallet's
    /// primary address.
    pub async fn create_ons_buy_transaction(
        &self,
        name: &str,
        ons_type: &str,
        value: &str,
        owner: Option<&str>,
        backup_owner: Option<&str>,
    ) -> Result<PendingTransaction, WalletError> {
        let ons_type: OnsType = ons_type.parse()?;
        let name = name.to_ascii_lowercase();
        ons::validate_name(ons_type, &name)?;
        let name_hash = ons::name_hash(&name);
        let encrypted = ons::encrypt_value(&name, &ons::encode_value(self.nettype, ons_type, value)?)?;

        let mut ptx = self.pending(Vec::new(), Priority::Normal)?;
        let owner = match owner {
            Some(s) => GenericOwner::parse(self.nettype, s)?,
            None => GenericOwner::from_address(&ptx.change.address),
        };
        let backup_owner = backup_owner.map(|s| GenericOwner::parse(self.nettype, s)).transpose()?;

        ptx.tx_type = TxType::OxenNameSystem;
        ptx.burn_fixed = ons_type.burn_amount();
        ptx.ons = Some(OnsExtra::buy(ons_type, name_hash, encrypted, owner, backup_owner));
        log::info!("building ONS buy of {name} ({ons_type:?})");
        self.build(ptx).await
    }

    /// Change the value and/or owners of a record this wallet owns.
    pub async fn create_ons_update_transaction(
        &self,
        name: &str,
        ons_type: &str,
        value: Option<&str>,
        owner: Option<&str>,
        backup_owner: Option<&str>,
    ) -> Result<PendingTransaction, WalletError> {
        if value.is_none() && owner.is_none() && backup_owner.is_none() {
            return Err(WalletError::invalid(
                "value, owner and backup owner are all missing; at least one must be given",
            ));
        }
        let ons_type: OnsType = ons_type.parse()?;
        let name = name.to_ascii_lowercase();
        ons::validate_name(ons_type, &name)?;
        let name_hash = ons::name_hash(&name);

        let record = self.lookup_record(&name_hash, ons_type).await?;

        let encrypted = value
            .map(|v| ons::encrypt_value(&name, &ons::encode_value(self.nettype, ons_type, v)?))
            .transpose()?;
        let owner = owner.map(|s| GenericOwner::parse(self.nettype, s)).transpose()?;
        let backup_owner = backup_owner.map(|s| GenericOwner::parse(self.nettype, s)).transpose()?;

        let signature = self.sign_ons_update(&record, owner.as_ref(), backup_owner.as_ref(), encrypted.as_deref())?;

        let mut ptx = self.pending(Vec::new(), Priority::Normal)?;
        ptx.tx_type = TxType::OxenNameSystem;
        ptx.ons = Some(OnsExtra::update(
            signature,
            ons_type,
            name_hash,
            encrypted,
            owner,
            backup_owner,
            record.prev_txid,
        ));
        log::info!("building ONS update of {name} ({ons_type:?})");
        self.build(ptx).await
    }

    /// Extend a lokinet registration.
    pub async fn create_ons_renew_transaction(&self, name: &str, ons_type: &str) -> Result<PendingTransaction, WalletError> {
        let ons_type: OnsType = ons_type.parse()?;
        if !ons_type.is_lokinet() {
            return Err(WalletError::invalid("only lokinet records can be renewed"));
        }
        let name = name.to_ascii_lowercase();
        ons::validate_name(ons_type, &name)?;
        let name_hash = ons::name_hash(&name);
        let record = self.lookup_record(&name_hash, ons_type).await?;

        let mut ptx = self.pending(Vec::new(), Priority::Normal)?;
        ptx.tx_type = TxType::OxenNameSystem;
        ptx.burn_fixed = ons_type.burn_amount();
        ptx.ons = Some(OnsExtra::renew(ons_type, name_hash, record.prev_txid));
        log::info!("building ONS renewal of {name} ({ons_type:?})");
        self.build(ptx).await
    }

    async fn lookup_record(&self, name_hash: &Key, ons_type: OnsType) -> Result<OnsRecord, WalletError> {
        match tokio::time::timeout(self.ons_lookup_timeout, self.comms.ons_names_to_owners(name_hash, ons_type)).await {
            Err(_) => Err(WalletError::OnsLookup("timed out waiting for ons_names_to_owners".into())),
            Ok(Err(e)) => Err(WalletError::OnsLookup(e.to_string())),
            Ok(Ok(None)) => Err(WalletError::OnsLookup("no record for that name".into())),
            Ok(Ok(Some(record))) => Ok(record),
        }
    }

    /// Sign as the current owner, falling back to the backup owner.
    fn sign_ons_update(
        &self,
        record: &OnsRecord,
        owner: Option<&GenericOwner>,
        backup_owner: Option<&GenericOwner>,
        encrypted: Option<&[u8]>,
    ) -> Result<ons::GenericSignature, WalletError> {
        let current = GenericOwner::parse(self.nettype, &record.owner)
            .map_err(|e| WalletError::OnsLookup(format!("unreadable owner: {e}")))?;
        match self.keys.ons_signature(&current, owner, backup_owner, encrypted, &record.prev_txid) {
            Err(WalletError::InvalidRequest(reason)) => {
                let Some(backup) = &record.backup_owner else {
                    return Err(WalletError::InvalidRequest(reason));
                };
                let backup = GenericOwner::parse(self.nettype, backup)
                    .map_err(|e| WalletError::OnsLookup(format!("unreadable backup owner: {e}")))?;
                self.keys.ons_signature(&backup, owner, backup_owner, encrypted, &record.prev_txid)
            }
            other => other,
        }
    }

    /// Select, fetch rings, sign. Reserved inputs are released on failure.
    async fn build(&self, mut ptx: PendingTransaction) -> Result<PendingTransaction, WalletError> {
        self.select_inputs_and_finalise(&mut ptx)?;
        let result: Result<(), WalletError> = async {
            self.select_and_fetch_decoys(&mut ptx).await?;
            self.sign(&mut ptx)
        }
        .await;
        if let Err(e) = result {
            self.release(&ptx);
            return Err(e);
        }
        Ok(ptx)
    }

    /// Clear the spending reservation on `ptx`'s inputs.
    pub fn release(&self, ptx: &PendingTransaction) {
        let key_images: Vec<Key> = ptx.chosen_outputs.iter().map(|o| o.key_image).collect();
        if key_images.is_empty() {
            return;
        }
        if let Err(e) = db::lock(&self.store).and_then(|s| s.set_spending(&key_images, false)) {
            log::error!("failed to release {} reserved outputs: {e}", key_images.len());
        }
    }

    fn select_inputs_and_finalise(&self, ptx: &mut PendingTransaction) -> Result<(), WalletError> {
        for _ in 0..MAX_SELECTION_ROUNDS {
            if ptx.finalise() {
                log::debug!(
                    "selected {} inputs worth {} for {} plus fee {}",
                    ptx.chosen_outputs.len(),
                    ptx.sum_inputs(),
                    ptx.sum_outputs(),
                    ptx.fee
                );
                return Ok(());
            }
            self.release(ptx);
            self.select_inputs(ptx)?;
        }
        self.release(ptx);
        Err(WalletError::invalid("input selection did not converge"))
    }

    fn select_inputs(&self, ptx: &mut PendingTransaction) -> Result<(), WalletError> {
        let per_byte = ptx.fee_params.fee_per_byte;
        let single_input = ptx.get_tx_weight(1) as u64 * per_byte;
        let additional_input = ptx.get_tx_weight(2).saturating_sub(ptx.get_tx_weight(1)) as u64 * per_byte;
        let mut target = ptx.sum_outputs();

        let store = db::lock(&self.store)?;
        // Outputs worth less than the cost of spending them are dust.
        let balance = store.available_balance(additional_input)?;
        if balance < target {
            return Err(WalletError::InsufficientBalance { need: target, have: balance });
        }
        // Leave room for change worth spending later, if the wallet can.
        if balance > target + single_input {
            target += single_input;
        } else if balance > target + additional_input {
            target += additional_input;
        }

        let available = store.available_outputs(additional_input)?;
        let chosen = select_outputs(&available, target, |n| ptx.get_fee(n))?;
        let key_images: Vec<Key> = chosen.iter().map(|o| o.key_image).collect();
        store.set_spending(&key_images, true)?;
        drop(store);

        ptx.chosen_outputs = chosen;
        ptx.update_change();
        Ok(())
    }

    async fn select_and_fetch_decoys(&self, ptx: &mut PendingTransaction) -> Result<(), WalletError> {
        let (output_count, chain_height) = {
            let store = db::lock(&self.store)?;
            (store.chain_output_count()?, (store.last_scan_height()? + 1).max(0) as u64)
        };
        let max_index = output_count
            .checked_sub(1)
            .ok_or_else(|| TxError::DecoySelection("no outputs on chain to use as decoys".into()))?;
        let selector = DecoySelector::new(0, max_index, chain_height)?;

        ptx.decoys.clear();
        for output in &ptx.chosen_outputs {
            let mut locked = Vec::new();
            let mut ring = None;
            for _ in 0..MAX_RING_ATTEMPTS {
                let (indices, real_pos) = selector.default_ring_avoiding(output.global_index, &locked)?;
                let candidate = self.comms.fetch_decoys(&indices, false).await?;
                if candidate[real_pos].key != output.output_key {
                    return Err(RpcError::InvalidResponse {
                        context: "get_outs".into(),
                        reason: format!("key for our output {} does not match the ledger", output.global_index),
                    }
                    .into());
                }
                let before = locked.len();
                locked.extend(
                    candidate
                        .iter()
                        .enumerate()
                        .filter(|(i, d)| *i != real_pos && !d.unlocked)
                        .map(|(_, d)| d.global_index),
                );
                if locked.len() == before {
                    ring = Some(candidate);
                    break;
                }
                log::debug!("{} ring members still locked, resampling", locked.len() - before);
            }
            let ring = ring.ok_or_else(|| {
                TxError::DecoySelection(format!("no ring of unlocked outputs for {}", output.global_index))
            })?;
            ptx.decoys.push(ring);
        }
        log::debug!("fetched {} rings", ptx.decoys.len());
        Ok(())
    }

    fn sign(&self, ptx: &mut PendingTransaction) -> Result<(), WalletError> {
        let mut paired: Vec<_> = ptx.chosen_outputs.drain(..).zip(ptx.decoys.drain(..)).collect();
        paired.sort_by(|a, b| b.0.key_image.cmp(&a.0.key_image));
        let (chosen, rings): (Vec<_>, Vec<_>) = paired.into_iter().unzip();
        ptx.chosen_outputs = chosen;
        ptx.decoys = rings;

        let mut prefix_inputs = Vec::with_capacity(ptx.chosen_outputs.len());
        let mut inputs = Vec::with_capacity(ptx.chosen_outputs.len());
        for (output, ring) in ptx.chosen_outputs.iter().zip(&ptx.decoys) {
            let indices: Vec<u64> = ring.iter().map(|d| d.global_index).collect();
            let real_index = indices
                .iter()
                .position(|&g| g == output.global_index)
                .ok_or_else(|| TxError::DecoySelection(format!("output {} missing from its ring", output.global_index)))?;
            prefix_inputs.push(TxInput::ToKey {
                amount: 0,
                key_offsets: absolute_to_relative(&indices),
                key_image: output.key_image,
            });
            inputs.push(InputToSign {
                ring: ring.iter().map(|d| RingMember { dest: d.key, mask: d.mask }).collect(),
                real_index,
                derivation: output.derivation,
                output_key: output.output_key,
                output_index: output.output_index,
                subaddress: output.subaddress,
                mask: output.rct_mask,
                amount: output.amount,
            });
        }

        let tx_key = self.keys.generate_tx_key(HF_VERSION);
        let lone_subaddress = match ptx.recipients.as_slice() {
            [only] if only.address.is_subaddress() => Some(only.address.spend),
            _ => None,
        };
        let tx_pub = match lone_subaddress {
            Some(spend) => compress(&(tx_key.secret * decompress(&spend)?)),
            None => tx_key.public,
        };
        let tx_key = TxSecretKey { secret: tx_key.secret, public: tx_pub };

        let destinations: Vec<(&Address, u64, bool)> = ptx
            .recipients
            .iter()
            .map(|r| (&r.address, r.amount, false))
            .chain(std::iter::once((&ptx.change.address, ptx.change.amount, true)))
            .collect();

        let additional: Vec<TxSecretKey> = if ptx.needs_additional_keys() {
            destinations
                .iter()
                .map(|(addr, _, _)| {
                    let k = self.keys.generate_tx_key(HF_VERSION);
                    let public = if addr.is_subaddress() {
                        compress(&(k.secret * decompress(&addr.spend)?))
                    } else {
                        k.public
                    };
                    Ok(TxSecretKey { secret: k.secret, public })
                })
                .collect::<Result<_, WalletError>>()?
        } else {
            Vec::new()
        };

        let mut outputs = Vec::with_capacity(destinations.len());
        let mut signing = Vec::with_capacity(destinations.len());
        let mut unlock_times = Vec::with_capacity(destinations.len());
        let mut payment_id = None;
        for (i, (addr, amount, is_change)) in destinations.iter().enumerate() {
            let key = additional.get(i).unwrap_or(&tx_key);
            let out = self.keys.ephemeral_out_key(&key.secret, &key.public, addr, i as u64, *is_change)?;
            if let Some(pid) = addr.payment_id() {
                payment_id = Some(encrypt_payment_id(pid, &generate_key_derivation(&addr.view, &tx_key.secret)?));
            }
            outputs.push(TxOutput { amount: 0, key: out.key });
            signing.push(SigningOutput {
                amount: *amount,
                mask: ecdh::commitment_mask(&out.amount_key),
                encrypted_amount: ecdh::encode_amount(*amount, &out.amount_key),
            });
            unlock_times.push(if *is_change { ptx.change_unlock_time } else { ptx.unlock_time });
        }

        let mut extra = ExtraBuilder::new().pub_key(tx_pub).burn(ptx.burn_fixed);
        if !additional.is_empty() {
            extra = extra.additional_pub_keys(additional.iter().map(|k| k.public).collect());
        }
        if let Some(pid) = payment_id {
            extra = extra.encrypted_payment_id(pid);
        }
        if let Some(record) = &ptx.ons {
            extra = extra.ons(record.clone());
        }

        let prefix = TxPrefix {
            version: txversion::V4_TX_TYPES,
            output_unlock_times: unlock_times,
            unlock_time: 0,
            inputs: prefix_inputs,
            outputs,
            extra: extra.build(),
            tx_type: ptx.tx_type,
        };
        let rct = self.keys.sign(&prefix, &inputs, &signing, ptx.fee)?;
        let tx = Transaction { prefix, rct: Some(rct) };

        let rings: Vec<Vec<RingMember>> = inputs.into_iter().map(|i| i.ring).collect();
        verify_rct(&tx, &rings).map_err(|e| WalletError::SignatureVerification(e.to_string()))?;
        log::info!(
            "built tx {} with {} inputs, {} outputs, fee {}",
            hex::encode(tx.hash()),
            tx.prefix.inputs.len(),
            tx.prefix.outputs.len(),
            ptx.fee
        );

        ptx.tx = Some(tx);
        ptx.tx_key = Some(tx_key);
        ptx.additional_tx_keys = additional;
        Ok(())
    }
}

/// XOR `pid` with the first 8 bytes of `keccak(D || 0x8d)`.
pub fn encrypt_payment_id(pid: [u8; 8], derivation: &Key) -> [u8; 8] {
    let mask = keccak256_parts(&[derivation.as_slice(), &[PAYMENT_ID_TAIL]]);
    let mut out = pid;
    for (b, m) in out.iter_mut().zip(mask) {
        *b ^= m;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_id_encryption_is_an_involution() {
        let d = [7u8; 32];
        let pid = *b"oxenpid!";
        let enc = encrypt_payment_id(pid, &d);
        assert_ne!(enc, pid);
        assert_eq!(encrypt_payment_id(enc, &d), pid);
        assert_ne!(encrypt_payment_id(pid, &[8u8; 32]), enc);
    }
}
