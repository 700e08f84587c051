//! A transaction under construction.

use oxen_tx::extra::ExtraBuilder;
use oxen_tx::fee::{calculate_fee, estimate_tx_weight};
use oxen_tx::ons::OnsExtra;
use oxen_tx::{FeeParams, Priority, Transaction, TxType};
use oxen_types::Address;

use crate::daemon_comms::Decoy;
use crate::db::SpendableOutput;
use crate::error::WalletError;
use crate::keys::TxSecretKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    pub amount: u64,
}

/// Everything chosen so far for one transaction: recipients, inputs, rings,
/// fee and change, and once signed the transaction itself.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub recipients: Vec<Recipient>,
    pub change: Recipient,
    pub chosen_outputs: Vec<SpendableOutput>,
    /// One ring per chosen output, sorted by global index.
    pub decoys: Vec<Vec<Decoy>>,
    pub fee: u64,
    pub fee_params: FeeParams,
    pub priority: Priority,
    /// Fixed amount burned on top of the fee.
    pub burn_fixed: u64,
    pub ons: Option<OnsExtra>,
    pub tx_type: TxType,
    pub unlock_time: u64,
    pub change_unlock_time: u64,
    pub tx: Option<Transaction>,
    pub tx_key: Option<TxSecretKey>,
    pub additional_tx_keys: Vec<TxSecretKey>,
}

impl PendingTransaction {
    pub fn new(
        recipients: Vec<Recipient>,
        change: Address,
        fee_params: FeeParams,
        priority: Priority,
    ) -> Result<Self, WalletError> {
        recipients
            .iter()
            .try_fold(0u64, |acc, r| acc.checked_add(r.amount))
            .ok_or_else(|| WalletError::invalid("recipient amounts overflow"))?;
        if recipients.iter().filter(|r| r.address.payment_id().is_some()).count() > 1 {
            return Err(WalletError::invalid("at most one integrated address per transaction"));
        }
        Ok(Self {
            recipients,
            change: Recipient { address: change, amount: 0 },
            chosen_outputs: Vec::new(),
            decoys: Vec::new(),
            fee: 0,
            fee_params,
            priority,
            burn_fixed: 0,
            ons: None,
            tx_type: TxType::Standard,
            unlock_time: 0,
            change_unlock_time: 0,
            tx: None,
            tx_key: None,
            additional_tx_keys: Vec::new(),
        })
    }

    pub fn sum_inputs(&self) -> u64 {
        self.chosen_outputs.iter().map(|o| o.amount).sum()
    }

    pub fn sum_outputs(&self) -> u64 {
        self.recipients.iter().map(|r| r.amount).sum()
    }

    /// Recipients plus change.
    pub fn output_count(&self) -> usize {
        self.recipients.len() + 1
    }

    /// Whether per-output tx keys are needed: a subaddress recipient
    /// alongside a standard address or another subaddress.
    pub fn needs_additional_keys(&self) -> bool {
        let subaddresses = self.recipients.iter().filter(|r| r.address.is_subaddress()).count();
        subaddresses > 0 && (subaddresses < self.recipients.len() || subaddresses > 1)
    }

    /// Size of the `extra` this transaction will carry.
    pub fn extra_size(&self) -> usize {
        let mut builder = ExtraBuilder::new().pub_key([0u8; 32]).burn(self.burn_fixed);
        if self.needs_additional_keys() {
            builder = builder.additional_pub_keys(vec![[0u8; 32]; self.output_count()]);
        }
        if self.recipients.iter().any(|r| r.address.payment_id().is_some()) {
            builder = builder.encrypted_payment_id([0u8; 8]);
        }
        if let Some(ons) = &self.ons {
            builder = builder.ons(ons.clone());
        }
        builder.build().len()
    }

    pub fn get_tx_weight(&self, n_inputs: usize) -> usize {
        estimate_tx_weight(n_inputs, self.output_count(), self.extra_size())
    }

    /// Fee for this transaction with `n_inputs` inputs, burn included.
    pub fn get_fee(&self, n_inputs: usize) -> u64 {
        calculate_fee(
            &self.fee_params,
            self.get_tx_weight(n_inputs),
            self.output_count(),
            self.priority,
            self.burn_fixed,
        )
    }

    /// Recompute fee and change from the chosen inputs.
    pub fn update_change(&mut self) {
        self.fee = self.get_fee(self.chosen_outputs.len());
        self.change.amount = self.sum_inputs().saturating_sub(self.sum_outputs() + self.fee);
    }

    /// True once the chosen inputs pay recipients, fee and change exactly.
    pub fn finalise(&self) -> bool {
        !self.chosen_outputs.is_empty()
            && self.sum_inputs() >= self.sum_outputs() + self.fee
            && self.sum_inputs() == self.sum_outputs() + self.fee + self.change.amount
    }

    pub fn is_blink(&self) -> bool {
        self.priority == Priority::Blink
    }
}
