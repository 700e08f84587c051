//! Byte-exact transaction wire format.
//!
//! Prefix: `version`, then from v3 the per-output unlock times (plus a
//! state-change flag on v3 only), `unlock_time`, inputs, outputs, `extra`,
//! and from v4 the tx type. The RingCT base follows; the prunable section
//! (range proofs, CLSAGs, pseudo outputs) comes last.

use oxen_crypto::bulletproofs_plus::BulletproofPlus;
use oxen_crypto::clsag::Clsag;
use oxen_crypto::{keccak256, keccak256_parts, Key};
use oxen_types::base58::{read_varint, write_varint};

use crate::types::*;
use crate::TxError;

// ─── Cursor ──────────────────────────────────────────────────────────────────

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.offset.min(self.data.len())..];
        self.offset = self.data.len();
        slice
    }

    pub(crate) fn bytes(&mut self, count: usize) -> Result<&'a [u8], TxError> {
        if count > self.remaining() {
            return Err(TxError::Parse(format!(
                "unexpected end of data at offset {} (need {count}, have {})",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub(crate) fn byte(&mut self) -> Result<u8, TxError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn key(&mut self) -> Result<Key, TxError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.bytes(32)?);
        Ok(out)
    }

    pub(crate) fn u64_le(&mut self) -> Result<u64, TxError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(out))
    }

    pub(crate) fn varint(&mut self) -> Result<u64, TxError> {
        let (value, read) = read_varint(&self.data[self.offset.min(self.data.len())..])
            .ok_or_else(|| TxError::Parse(format!("bad varint at offset {}", self.offset)))?;
        self.offset += read;
        Ok(value)
    }

    /// Varint count, bounded by what the remaining bytes could possibly hold.
    pub(crate) fn count(&mut self, min_item_size: usize) -> Result<usize, TxError> {
        let n = self.varint()?;
        if n as u128 * min_item_size.max(1) as u128 > self.remaining() as u128 {
            return Err(TxError::Parse(format!("count {n} exceeds remaining data")));
        }
        Ok(n as usize)
    }

    pub(crate) fn keys(&mut self, n: usize) -> Result<Vec<Key>, TxError> {
        (0..n).map(|_| self.key()).collect()
    }
}

pub(crate) fn write_keys(out: &mut Vec<u8>, keys: &[Key]) {
    for k in keys {
        out.extend_from_slice(k);
    }
}

pub(crate) fn write_counted_keys(out: &mut Vec<u8>, keys: &[Key]) {
    write_varint(out, keys.len() as u64);
    write_keys(out, keys);
}

// ─── Prefix ──────────────────────────────────────────────────────────────────

impl TxPrefix {
    pub fn write(&self, out: &mut Vec<u8>) {
        write_varint(out, self.version);
        if self.version >= txversion::V3_PER_OUTPUT_UNLOCK_TIMES {
            write_varint(out, self.output_unlock_times.len() as u64);
            for t in &self.output_unlock_times {
                write_varint(out, *t);
            }
            if self.version == txversion::V3_PER_OUTPUT_UNLOCK_TIMES {
                out.push(u8::from(self.tx_type == TxType::StateChange));
            }
        }
        write_varint(out, self.unlock_time);

        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            match input {
                TxInput::Gen { height } => {
                    out.push(TXIN_GEN);
                    write_varint(out, *height);
                }
                TxInput::ToKey { amount, key_offsets, key_image } => {
                    out.push(TXIN_TO_KEY);
                    write_varint(out, *amount);
                    write_varint(out, key_offsets.len() as u64);
                    for o in key_offsets {
                        write_varint(out, *o);
                    }
                    out.extend_from_slice(key_image);
                }
            }
        }

        write_varint(out, self.outputs.len() as u64);
        for o in &self.outputs {
            write_varint(out, o.amount);
            out.push(TXOUT_TO_KEY);
            out.extend_from_slice(&o.key);
        }

        write_varint(out, self.extra.len() as u64);
        out.extend_from_slice(&self.extra);

        if self.version >= txversion::V4_TX_TYPES {
            write_varint(out, self.tx_type.as_u64());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        self.write(&mut out);
        out
    }

    pub fn hash(&self) -> Key {
        keccak256(&self.to_bytes())
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, TxError> {
        let version = r.varint()?;
        if version == 0 || version > txversion::V4_TX_TYPES {
            return Err(TxError::Parse(format!("unsupported version {version}")));
        }
        let mut prefix = TxPrefix { version, ..Default::default() };

        if version >= txversion::V3_PER_OUTPUT_UNLOCK_TIMES {
            let n = r.count(1)?;
            prefix.output_unlock_times = (0..n).map(|_| r.varint()).collect::<Result<_, _>>()?;
            if version == txversion::V3_PER_OUTPUT_UNLOCK_TIMES && r.byte()? != 0 {
                prefix.tx_type = TxType::StateChange;
            }
        }
        prefix.unlock_time = r.varint()?;

        let n_in = r.count(2)?;
        for _ in 0..n_in {
            let input = match r.byte()? {
                TXIN_GEN => TxInput::Gen { height: r.varint()? },
                TXIN_TO_KEY => {
                    let amount = r.varint()?;
                    let n = r.count(1)?;
                    let key_offsets = (0..n).map(|_| r.varint()).collect::<Result<_, _>>()?;
                    TxInput::ToKey { amount, key_offsets, key_image: r.key()? }
                }
                tag => return Err(TxError::Parse(format!("unknown input tag {tag:#x}"))),
            };
            prefix.inputs.push(input);
        }

        let n_out = r.count(34)?;
        for _ in 0..n_out {
            let amount = r.varint()?;
            let tag = r.byte()?;
            if tag != TXOUT_TO_KEY {
                return Err(TxError::Parse(format!("unknown output tag {tag:#x}")));
            }
            prefix.outputs.push(TxOutput { amount, key: r.key()? });
        }
        if version >= txversion::V3_PER_OUTPUT_UNLOCK_TIMES
            && prefix.output_unlock_times.len() != prefix.outputs.len()
        {
            return Err(TxError::Parse("unlock time count differs from output count".into()));
        }

        let n_extra = r.count(1)?;
        prefix.extra = r.bytes(n_extra)?.to_vec();

        if version >= txversion::V4_TX_TYPES {
            let ty = r.varint()?;
            prefix.tx_type = TxType::from_u64(ty).ok_or_else(|| TxError::Parse(format!("unknown tx type {ty}")))?;
        }
        Ok(prefix)
    }
}

// ─── RingCT ──────────────────────────────────────────────────────────────────

impl RctSignatures {
    pub fn write_base(&self, out: &mut Vec<u8>) {
        out.push(self.rct_type);
        if self.rct_type == rct_type::NULL {
            return;
        }
        write_varint(out, self.txn_fee);
        if self.rct_type == rct_type::SIMPLE {
            write_keys(out, &self.base_pseudo_outs);
        }
        for e in &self.ecdh_info {
            match e {
                EcdhTuple::Compact(amount) => out.extend_from_slice(amount),
                EcdhTuple::Full { mask, amount } => {
                    out.extend_from_slice(mask);
                    out.extend_from_slice(amount);
                }
            }
        }
        write_keys(out, &self.out_pk);
    }

    pub fn base_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_base(&mut out);
        out
    }

    pub fn write_prunable(&self, out: &mut Vec<u8>) {
        match &self.prunable {
            RctPrunable::None => {}
            RctPrunable::Opaque(bytes) => out.extend_from_slice(bytes),
            RctPrunable::BulletproofPlus { proofs, clsags, pseudo_outs } => {
                write_varint(out, proofs.len() as u64);
                for p in proofs {
                    write_bulletproof_plus(out, p);
                }
                for c in clsags {
                    write_keys(out, &c.s);
                    out.extend_from_slice(&c.c1);
                    out.extend_from_slice(&c.d);
                }
                write_keys(out, pseudo_outs);
            }
        }
    }

    pub fn prunable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_prunable(&mut out);
        out
    }

    /// Parse the base section. `inputs` and `outputs` size the fixed-width
    /// vectors, which carry no count on the wire.
    fn read_base(r: &mut Reader, inputs: usize, outputs: usize) -> Result<Self, TxError> {
        let ty = r.byte()?;
        let mut rct = RctSignatures { rct_type: ty, ..RctSignatures::null() };
        if ty == rct_type::NULL {
            return Ok(rct);
        }
        if ty > rct_type::BULLETPROOF_PLUS {
            return Err(TxError::Parse(format!("unknown rct type {ty}")));
        }
        rct.txn_fee = r.varint()?;
        if ty == rct_type::SIMPLE {
            rct.base_pseudo_outs = r.keys(inputs)?;
        }
        for _ in 0..outputs {
            let tuple = if rct_type::is_compact(ty) {
                let mut amount = [0u8; 8];
                amount.copy_from_slice(r.bytes(8)?);
                EcdhTuple::Compact(amount)
            } else {
                EcdhTuple::Full { mask: r.key()?, amount: r.key()? }
            };
            rct.ecdh_info.push(tuple);
        }
        rct.out_pk = r.keys(outputs)?;
        Ok(rct)
    }

    fn read_prunable(&mut self, r: &mut Reader, ring_sizes: &[usize]) -> Result<(), TxError> {
        self.prunable = match self.rct_type {
            rct_type::NULL => RctPrunable::None,
            rct_type::BULLETPROOF_PLUS => {
                let n = r.count(6 * 32)?;
                let mut proofs = Vec::with_capacity(n);
                for _ in 0..n {
                    proofs.push(read_bulletproof_plus(r)?);
                }
                let mut clsags = Vec::with_capacity(ring_sizes.len());
                for &size in ring_sizes {
                    clsags.push(Clsag { s: r.keys(size)?, c1: r.key()?, d: r.key()? });
                }
                let pseudo_outs = r.keys(ring_sizes.len())?;
                RctPrunable::BulletproofPlus { proofs, clsags, pseudo_outs }
            }
            _ => RctPrunable::Opaque(r.rest().to_vec()),
        };
        Ok(())
    }
}

fn write_bulletproof_plus(out: &mut Vec<u8>, p: &BulletproofPlus) {
    for k in [&p.a, &p.a1, &p.b, &p.r1, &p.s1, &p.d1] {
        out.extend_from_slice(k);
    }
    write_counted_keys(out, &p.l);
    write_counted_keys(out, &p.r);
}

fn read_bulletproof_plus(r: &mut Reader) -> Result<BulletproofPlus, TxError> {
    let (a, a1, b) = (r.key()?, r.key()?, r.key()?);
    let (r1, s1, d1) = (r.key()?, r.key()?, r.key()?);
    let nl = r.count(32)?;
    let l = r.keys(nl)?;
    let nr = r.count(32)?;
    let rv = r.keys(nr)?;
    Ok(BulletproofPlus { v: Vec::new(), a, a1, b, r1, s1, d1, l, r: rv })
}

// ─── Transaction ─────────────────────────────────────────────────────────────

impl Transaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.prefix.to_bytes();
        if let Some(rct) = &self.rct {
            rct.write_base(&mut out);
            rct.write_prunable(&mut out);
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, TxError> {
        let mut r = Reader::new(data);
        let prefix = TxPrefix::read(&mut r)?;
        let rct = if prefix.version >= txversion::V2_RINGCT {
            let ring_sizes: Vec<usize> = prefix
                .inputs
                .iter()
                .filter_map(|i| match i {
                    TxInput::ToKey { key_offsets, .. } => Some(key_offsets.len()),
                    TxInput::Gen { .. } => None,
                })
                .collect();
            let mut rct = RctSignatures::read_base(&mut r, ring_sizes.len(), prefix.outputs.len())?;
            rct.read_prunable(&mut r, &ring_sizes)?;
            Some(rct)
        } else {
            // v1 signatures are not modelled; drop them.
            r.rest();
            None
        };
        if r.remaining() != 0 {
            return Err(TxError::Parse(format!("{} trailing bytes at offset {}", r.remaining(), r.offset())));
        }
        Ok(Transaction { prefix, rct })
    }

    pub fn from_hex(s: &str) -> Result<Self, TxError> {
        let bytes = hex::decode(s).map_err(|e| TxError::Parse(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn prefix_hash(&self) -> Key {
        self.prefix.hash()
    }

    /// `H(H(prefix) || H(rct_base) || H(prunable))` for RingCT transactions;
    /// the prunable hash is zero for type Null.
    pub fn hash(&self) -> Key {
        match &self.rct {
            None => keccak256(&self.to_bytes()),
            Some(rct) => {
                let prefix = self.prefix_hash();
                let base = keccak256(&rct.base_bytes());
                let prunable = if rct.rct_type == rct_type::NULL {
                    [0u8; 32]
                } else {
                    keccak256(&rct.prunable_bytes())
                };
                keccak256_parts(&[&prefix, &base, &prunable])
            }
        }
    }
}
