//! The transaction `extra` field: a sequence of tagged records.
//!
//! Parsing stops at the first tag it does not understand; the remaining
//! bytes are kept verbatim so rewriting the field never loses data.

use oxen_crypto::Key;
use oxen_types::base58::write_varint;

use crate::ons::OnsExtra;
use crate::serialize::Reader;
use crate::TxError;

pub const TAG_PADDING: u8 = 0x00;
pub const TAG_PUBKEY: u8 = 0x01;
pub const TAG_NONCE: u8 = 0x02;
pub const TAG_MERGE_MINING: u8 = 0x03;
pub const TAG_ADDITIONAL_PUBKEYS: u8 = 0x04;
pub const TAG_BURN: u8 = 0x79;
pub const TAG_ONS: u8 = 0x7A;

pub const MAX_NONCE_SIZE: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// Zero padding running to the end of the field.
    Padding(usize),
    PubKey(Key),
    Nonce(Vec<u8>),
    MergeMining(Vec<u8>),
    AdditionalPubKeys(Vec<Key>),
    /// Amount irrevocably burned by this transaction.
    Burn(u64),
    Ons(OnsExtra),
    /// Everything from the first unrecognised tag on.
    Unknown(Vec<u8>),
}

/// Parse as many records as can be understood.
pub fn parse_extra(extra: &[u8]) -> Vec<ExtraField> {
    let mut r = Reader::new(extra);
    let mut fields = Vec::new();
    while r.remaining() > 0 {
        let start = r.offset();
        match read_field(&mut r) {
            Ok(field) => fields.push(field),
            Err(_) => {
                fields.push(ExtraField::Unknown(extra[start..].to_vec()));
                break;
            }
        }
    }
    fields
}

fn read_field(r: &mut Reader) -> Result<ExtraField, TxError> {
    Ok(match r.byte()? {
        TAG_PADDING => {
            let rest = r.rest();
            if rest.iter().any(|b| *b != 0) {
                return Err(TxError::Parse("non-zero padding".into()));
            }
            ExtraField::Padding(rest.len() + 1)
        }
        TAG_PUBKEY => ExtraField::PubKey(r.key()?),
        TAG_NONCE => {
            let n = r.count(1)?;
            if n > MAX_NONCE_SIZE {
                return Err(TxError::Parse("nonce too long".into()));
            }
            ExtraField::Nonce(r.bytes(n)?.to_vec())
        }
        TAG_MERGE_MINING => {
            let n = r.count(1)?;
            ExtraField::MergeMining(r.bytes(n)?.to_vec())
        }
        TAG_ADDITIONAL_PUBKEYS => {
            let n = r.count(32)?;
            ExtraField::AdditionalPubKeys(r.keys(n)?)
        }
        TAG_BURN => ExtraField::Burn(r.u64_le()?),
        TAG_ONS => ExtraField::Ons(OnsExtra::read(r)?),
        tag => return Err(TxError::Parse(format!("unknown extra tag {tag:#x}"))),
    })
}

pub fn write_field(out: &mut Vec<u8>, field: &ExtraField) {
    match field {
        ExtraField::Padding(n) => out.extend(std::iter::repeat(0u8).take(*n)),
        ExtraField::PubKey(k) => {
            out.push(TAG_PUBKEY);
            out.extend_from_slice(k);
        }
        ExtraField::Nonce(data) => {
            out.push(TAG_NONCE);
            write_varint(out, data.len() as u64);
            out.extend_from_slice(data);
        }
        ExtraField::MergeMining(data) => {
            out.push(TAG_MERGE_MINING);
            write_varint(out, data.len() as u64);
            out.extend_from_slice(data);
        }
        ExtraField::AdditionalPubKeys(keys) => {
            out.push(TAG_ADDITIONAL_PUBKEYS);
            write_varint(out, keys.len() as u64);
            for k in keys {
                out.extend_from_slice(k);
            }
        }
        ExtraField::Burn(amount) => {
            out.push(TAG_BURN);
            out.extend_from_slice(&amount.to_le_bytes());
        }
        ExtraField::Ons(ons) => {
            out.push(TAG_ONS);
            ons.write(out);
        }
        ExtraField::Unknown(raw) => out.extend_from_slice(raw),
    }
}

pub fn serialize_extra(fields: &[ExtraField]) -> Vec<u8> {
    let mut out = Vec::new();
    for f in fields {
        write_field(&mut out, f);
    }
    out
}

/// Builds an `extra` in canonical order: tx key, additional keys, ONS, burn.
#[derive(Debug, Default, Clone)]
pub struct ExtraBuilder {
    pub_key: Option<Key>,
    additional: Vec<Key>,
    ons: Option<OnsExtra>,
    burn: Option<u64>,
    nonce: Option<Vec<u8>>,
}

impl ExtraBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tx public key, replacing any earlier one.
    pub fn pub_key(mut self, key: Key) -> Self {
        self.pub_key = Some(key);
        self
    }

    pub fn additional_pub_keys(mut self, keys: Vec<Key>) -> Self {
        self.additional = keys;
        self
    }

    pub fn ons(mut self, ons: OnsExtra) -> Self {
        self.ons = Some(ons);
        self
    }

    pub fn burn(mut self, amount: u64) -> Self {
        self.burn = (amount > 0).then_some(amount);
        self
    }

    /// Encrypted short payment id: nonce tag 0x01 followed by 8 bytes.
    pub fn encrypted_payment_id(mut self, pid: [u8; 8]) -> Self {
        let mut nonce = vec![0x01];
        nonce.extend_from_slice(&pid);
        self.nonce = Some(nonce);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut fields = Vec::new();
        if let Some(k) = self.pub_key {
            fields.push(ExtraField::PubKey(k));
        }
        if !self.additional.is_empty() {
            fields.push(ExtraField::AdditionalPubKeys(self.additional));
        }
        if let Some(n) = self.nonce {
            fields.push(ExtraField::Nonce(n));
        }
        if let Some(o) = self.ons {
            fields.push(ExtraField::Ons(o));
        }
        if let Some(b) = self.burn {
            fields.push(ExtraField::Burn(b));
        }
        serialize_extra(&fields)
    }
}

/// Burn amount recorded in `extra`, zero when absent.
pub fn burn_amount(extra: &[u8]) -> u64 {
    parse_extra(extra)
        .into_iter()
        .find_map(|f| match f {
            ExtraField::Burn(a) => Some(a),
            _ => None,
        })
        .unwrap_or(0)
}

pub fn ons_record(extra: &[u8]) -> Option<OnsExtra> {
    parse_extra(extra).into_iter().find_map(|f| match f {
        ExtraField::Ons(o) => Some(o),
        _ => None,
    })
}

/// Encrypted short payment id from the nonce, if present.
pub fn encrypted_payment_id(extra: &[u8]) -> Option<[u8; 8]> {
    parse_extra(extra).into_iter().find_map(|f| match f {
        ExtraField::Nonce(n) if n.len() == 9 && n[0] == 0x01 => {
            let mut pid = [0u8; 8];
            pid.copy_from_slice(&n[1..]);
            Some(pid)
        }
        _ => None,
    })
}
