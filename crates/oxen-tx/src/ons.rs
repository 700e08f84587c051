//! Oxen Name System records carried in the transaction `extra`.
//!
//! A record maps `blake2b(name)` to a value encrypted under a key derived
//! from the name itself, so only someone who knows the name can read it.
//! Updates are authorised by a signature from the current owner over
//! `blake2b(encrypted_value || owner || backup_owner || prev_txid)`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

use oxen_crypto::signature::Signature;
use oxen_crypto::{blake2b32, blake2b32_keyed, Key};
use oxen_types::base58::write_varint;
use oxen_types::constants::COIN;
use oxen_types::{Address, AddressKind, NetType};

use crate::serialize::Reader;
use crate::TxError;

pub const ONS_EXTRA_VERSION: u8 = 0;
pub const NAME_MAX: usize = 64;
pub const LOKINET_DOMAIN_MAX: usize = 253;
pub const LOKINET_SUFFIX: &str = ".loki";
pub const SESSION_ID_BYTES: usize = 33;
pub const NONCE_SIZE: usize = 24;
const POLY1305_TAG: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnsType {
    Session,
    Wallet,
    Lokinet,
    Lokinet2Years,
    Lokinet5Years,
    Lokinet10Years,
}

impl OnsType {
    pub fn as_u64(self) -> u64 {
        match self {
            OnsType::Session => 0,
            OnsType::Wallet => 1,
            OnsType::Lokinet => 2,
            OnsType::Lokinet2Years => 3,
            OnsType::Lokinet5Years => 4,
            OnsType::Lokinet10Years => 5,
        }
    }

    pub fn from_u64(v: u64) -> Option<Self> {
        Some(match v {
            0 => OnsType::Session,
            1 => OnsType::Wallet,
            2 => OnsType::Lokinet,
            3 => OnsType::Lokinet2Years,
            4 => OnsType::Lokinet5Years,
            5 => OnsType::Lokinet10Years,
            _ => return None,
        })
    }

    pub fn is_lokinet(self) -> bool {
        matches!(
            self,
            OnsType::Lokinet | OnsType::Lokinet2Years | OnsType::Lokinet5Years | OnsType::Lokinet10Years
        )
    }

    /// Type as stored by the node; all lokinet durations share one table.
    pub fn db_type(self) -> u64 {
        if self.is_lokinet() {
            OnsType::Lokinet.as_u64()
        } else {
            self.as_u64()
        }
    }

    /// Amount burned to buy or renew a record of this type.
    pub fn burn_amount(self) -> u64 {
        match self {
            OnsType::Session | OnsType::Wallet | OnsType::Lokinet => 7 * COIN,
            OnsType::Lokinet2Years => 14 * COIN,
            OnsType::Lokinet5Years => 28 * COIN,
            OnsType::Lokinet10Years => 42 * COIN,
        }
    }
}

impl std::str::FromStr for OnsType {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "session" => OnsType::Session,
            "wallet" => OnsType::Wallet,
            "lokinet" | "lokinet_1y" | "lokinet_1years" => OnsType::Lokinet,
            "lokinet_2y" | "lokinet_2years" => OnsType::Lokinet2Years,
            "lokinet_5y" | "lokinet_5years" => OnsType::Lokinet5Years,
            "lokinet_10y" | "lokinet_10years" => OnsType::Lokinet10Years,
            other => return Err(TxError::Ons(format!("unknown ONS type '{other}'"))),
        })
    }
}

// ─── Owners and signatures ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericOwner {
    /// A wallet address; `is_subaddress` selects the signing key.
    Monero { spend: Key, view: Key, is_subaddress: bool },
    Ed25519(Key),
}

const OWNER_TYPE_MONERO: u64 = 0;
const OWNER_TYPE_ED25519: u64 = 1;

impl GenericOwner {
    pub fn from_address(addr: &Address) -> Self {
        GenericOwner::Monero { spend: addr.spend, view: addr.view, is_subaddress: addr.is_subaddress() }
    }

    /// Accepts a wallet address on `nettype` or a 64-char hex ed25519 key.
    pub fn parse(nettype: NetType, s: &str) -> Result<Self, TxError> {
        if s.len() == 64 {
            if let Ok(bytes) = hex::decode(s) {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return Ok(GenericOwner::Ed25519(key));
            }
        }
        let addr = Address::parse_for(nettype, s).map_err(|e| TxError::Ons(format!("bad owner '{s}': {e}")))?;
        Ok(Self::from_address(&addr))
    }

    /// Public key the ownership signature must verify under.
    pub fn signing_key(&self) -> Key {
        match self {
            GenericOwner::Monero { spend, .. } => *spend,
            GenericOwner::Ed25519(k) => *k,
        }
    }

    /// In-memory layout hashed into the update signature: a 72-byte union,
    /// the type byte, then padding.
    pub fn to_hash_bytes(&self) -> [u8; 80] {
        let mut out = [0u8; 80];
        match self {
            GenericOwner::Monero { spend, view, is_subaddress } => {
                out[..32].copy_from_slice(spend);
                out[32..64].copy_from_slice(view);
                out[64] = u8::from(*is_subaddress);
                out[72] = OWNER_TYPE_MONERO as u8;
            }
            GenericOwner::Ed25519(k) => {
                out[..32].copy_from_slice(k);
                out[72] = OWNER_TYPE_ED25519 as u8;
            }
        }
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            GenericOwner::Monero { spend, view, is_subaddress } => {
                write_varint(out, OWNER_TYPE_MONERO);
                out.extend_from_slice(spend);
                out.extend_from_slice(view);
                out.push(u8::from(*is_subaddress));
            }
            GenericOwner::Ed25519(k) => {
                write_varint(out, OWNER_TYPE_ED25519);
                out.extend_from_slice(k);
            }
        }
    }

    fn read(r: &mut Reader) -> Result<Self, TxError> {
        match r.varint()? {
            OWNER_TYPE_MONERO => {
                let (spend, view) = (r.key()?, r.key()?);
                Ok(GenericOwner::Monero { spend, view, is_subaddress: r.byte()? != 0 })
            }
            OWNER_TYPE_ED25519 => Ok(GenericOwner::Ed25519(r.key()?)),
            t => Err(TxError::Parse(format!("unknown ONS owner type {t}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericSignature {
    pub ed25519: bool,
    pub data: [u8; 64],
}

impl GenericSignature {
    pub fn monero(sig: &Signature) -> Self {
        Self { ed25519: false, data: sig.to_bytes() }
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_varint(out, if self.ed25519 { OWNER_TYPE_ED25519 } else { OWNER_TYPE_MONERO });
        out.extend_from_slice(&self.data);
    }

    fn read(r: &mut Reader) -> Result<Self, TxError> {
        let ed25519 = match r.varint()? {
            OWNER_TYPE_MONERO => false,
            OWNER_TYPE_ED25519 => true,
            t => return Err(TxError::Parse(format!("unknown ONS signature type {t}"))),
        };
        let mut data = [0u8; 64];
        data.copy_from_slice(r.bytes(64)?);
        Ok(Self { ed25519, data })
    }
}

/// Hash the current owner signs to authorise an update.
pub fn update_signature_hash(
    encrypted_value: Option<&[u8]>,
    owner: Option<&GenericOwner>,
    backup_owner: Option<&GenericOwner>,
    prev_txid: &Key,
) -> Key {
    let mut buf = Vec::with_capacity(256);
    if let Some(v) = encrypted_value {
        buf.extend_from_slice(v);
    }
    if let Some(o) = owner {
        buf.extend_from_slice(&o.to_hash_bytes());
    }
    if let Some(b) = backup_owner {
        buf.extend_from_slice(&b.to_hash_bytes());
    }
    buf.extend_from_slice(prev_txid);
    blake2b32(&buf)
}

// ─── Extra record ────────────────────────────────────────────────────────────

pub mod field {
    pub const NONE: u64 = 0;
    pub const OWNER: u64 = 1 << 0;
    pub const BACKUP_OWNER: u64 = 1 << 1;
    pub const SIGNATURE: u64 = 1 << 2;
    pub const ENCRYPTED_VALUE: u64 = 1 << 3;
    pub const ALL: u64 = OWNER | BACKUP_OWNER | SIGNATURE | ENCRYPTED_VALUE;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnsExtra {
    pub version: u8,
    pub ons_type: OnsType,
    pub name_hash: Key,
    /// Zero for a buy; the txid of the last update otherwise.
    pub prev_txid: Key,
    pub owner: Option<GenericOwner>,
    pub backup_owner: Option<GenericOwner>,
    pub signature: Option<GenericSignature>,
    pub encrypted_value: Option<Vec<u8>>,
}

impl OnsExtra {
    pub fn buy(
        ons_type: OnsType,
        name_hash: Key,
        encrypted_value: Vec<u8>,
        owner: GenericOwner,
        backup_owner: Option<GenericOwner>,
    ) -> Self {
        Self {
            version: ONS_EXTRA_VERSION,
            ons_type,
            name_hash,
            prev_txid: [0u8; 32],
            owner: Some(owner),
            backup_owner,
            signature: None,
            encrypted_value: Some(encrypted_value),
        }
    }

    pub fn update(
        signature: GenericSignature,
        ons_type: OnsType,
        name_hash: Key,
        encrypted_value: Option<Vec<u8>>,
        owner: Option<GenericOwner>,
        backup_owner: Option<GenericOwner>,
        prev_txid: Key,
    ) -> Self {
        Self {
            version: ONS_EXTRA_VERSION,
            ons_type,
            name_hash,
            prev_txid,
            owner,
            backup_owner,
            signature: Some(signature),
            encrypted_value,
        }
    }

    pub fn renew(ons_type: OnsType, name_hash: Key, prev_txid: Key) -> Self {
        Self {
            version: ONS_EXTRA_VERSION,
            ons_type,
            name_hash,
            prev_txid,
            owner: None,
            backup_owner: None,
            signature: None,
            encrypted_value: None,
        }
    }

    pub fn fields(&self) -> u64 {
        let mut f = field::NONE;
        if self.owner.is_some() {
            f |= field::OWNER;
        }
        if self.backup_owner.is_some() {
            f |= field::BACKUP_OWNER;
        }
        if self.signature.is_some() {
            f |= field::SIGNATURE;
        }
        if self.encrypted_value.is_some() {
            f |= field::ENCRYPTED_VALUE;
        }
        f
    }

    pub fn is_buy(&self) -> bool {
        self.fields() & (field::OWNER | field::ENCRYPTED_VALUE) == (field::OWNER | field::ENCRYPTED_VALUE)
            && self.signature.is_none()
    }

    pub fn is_renew(&self) -> bool {
        self.fields() == field::NONE && self.prev_txid != [0u8; 32]
    }

    /// Record body, without the leading extra tag.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        write_varint(out, self.ons_type.as_u64());
        out.extend_from_slice(&self.name_hash);
        out.extend_from_slice(&self.prev_txid);
        write_varint(out, self.fields());
        if let Some(o) = &self.owner {
            o.write(out);
        }
        if let Some(b) = &self.backup_owner {
            b.write(out);
        }
        if let Some(s) = &self.signature {
            s.write(out);
        }
        if let Some(v) = &self.encrypted_value {
            write_varint(out, v.len() as u64);
            out.extend_from_slice(v);
        }
    }

    pub(crate) fn read(r: &mut Reader) -> Result<Self, TxError> {
        let version = r.byte()?;
        let ty = r.varint()?;
        let ons_type = OnsType::from_u64(ty).ok_or_else(|| TxError::Parse(format!("unknown ONS type {ty}")))?;
        let name_hash = r.key()?;
        let prev_txid = r.key()?;
        let fields = r.varint()?;
        if fields > field::ALL {
            return Err(TxError::Parse(format!("bad ONS field mask {fields:#x}")));
        }
        let owner = (fields & field::OWNER != 0).then(|| GenericOwner::read(r)).transpose()?;
        let backup_owner = (fields & field::BACKUP_OWNER != 0).then(|| GenericOwner::read(r)).transpose()?;
        let signature = (fields & field::SIGNATURE != 0).then(|| GenericSignature::read(r)).transpose()?;
        let encrypted_value = if fields & field::ENCRYPTED_VALUE != 0 {
            let n = r.count(1)?;
            Some(r.bytes(n)?.to_vec())
        } else {
            None
        };
        Ok(Self { version, ons_type, name_hash, prev_txid, owner, backup_owner, signature, encrypted_value })
    }
}

// ─── Names ───────────────────────────────────────────────────────────────────

fn is_label_char(c: u8) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-'
}

/// Validate an already-lowercased name for `ons_type`.
pub fn validate_name(ons_type: OnsType, name: &str) -> Result<(), TxError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(TxError::Ons("name must not be empty".into()));
    }
    if ons_type.is_lokinet() {
        if name.len() > LOKINET_DOMAIN_MAX {
            return Err(TxError::Ons(format!("lokinet name exceeds {LOKINET_DOMAIN_MAX} characters")));
        }
        let label = name
            .strip_suffix(LOKINET_SUFFIX)
            .ok_or_else(|| TxError::Ons(format!("lokinet name must end with {LOKINET_SUFFIX}")))?;
        let lb = label.as_bytes();
        if lb.is_empty() || lb.len() > 63 || label.contains('.') {
            return Err(TxError::Ons("lokinet name must be a single label of 1-63 characters".into()));
        }
        if !lb.iter().all(|&c| is_label_char(c)) {
            return Err(TxError::Ons("lokinet name may only contain a-z, 0-9 and '-'".into()));
        }
        if !lb[0].is_ascii_alphanumeric() || !lb[lb.len() - 1].is_ascii_alphanumeric() {
            return Err(TxError::Ons("lokinet name must start and end with a letter or digit".into()));
        }
        if lb.len() >= 4 && &lb[2..4] == b"--" && !label.starts_with("xn--") {
            return Err(TxError::Ons("lokinet name may not have '--' in positions 3-4".into()));
        }
        return Ok(());
    }

    if name.len() > NAME_MAX {
        return Err(TxError::Ons(format!("name exceeds {NAME_MAX} characters")));
    }
    if !bytes.iter().all(|&c| is_label_char(c) || c == b'_') {
        return Err(TxError::Ons("name may only contain a-z, 0-9, '-' and '_'".into()));
    }
    let edge = |c: u8| c.is_ascii_alphanumeric() || c == b'_';
    if !edge(bytes[0]) || !edge(bytes[bytes.len() - 1]) {
        return Err(TxError::Ons("name must start and end with a letter, digit or '_'".into()));
    }
    Ok(())
}

pub fn name_hash(name: &str) -> Key {
    blake2b32(name.as_bytes())
}

fn cipher_for(name: &str, name_hash: &Key) -> Result<XChaCha20Poly1305, TxError> {
    let key = blake2b32_keyed(name.as_bytes(), name_hash);
    XChaCha20Poly1305::new_from_slice(&key).map_err(|_| TxError::Ons("bad value key".into()))
}

// ─── Values ──────────────────────────────────────────────────────────────────

const WALLET_PRIMARY: u8 = 0;
const WALLET_SUBADDRESS: u8 = 1;
const WALLET_INTEGRATED: u8 = 2;

const BASE32Z: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

fn base32z_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let (mut acc, mut bits) = (0u32, 0u32);
    for c in s.bytes() {
        let v = BASE32Z.iter().position(|&b| b == c)? as u32;
        acc = (acc << 5) | v;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    (acc == 0).then_some(out)
}

fn base32z_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let (mut acc, mut bits) = (0u32, 0u32);
    for &b in data {
        acc = (acc << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32Z[((acc >> bits) & 31) as usize] as char);
        }
        acc &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BASE32Z[((acc << (5 - bits)) & 31) as usize] as char);
    }
    out
}

/// Binary form of a user-supplied value for `ons_type`.
pub fn encode_value(nettype: NetType, ons_type: OnsType, value: &str) -> Result<Vec<u8>, TxError> {
    match ons_type {
        OnsType::Session => {
            let bytes = hex::decode(value).map_err(|_| TxError::Ons("session id must be hex".into()))?;
            if bytes.len() != SESSION_ID_BYTES || bytes[0] != 0x05 {
                return Err(TxError::Ons("session id must be 66 hex characters starting with 05".into()));
            }
            Ok(bytes)
        }
        OnsType::Wallet => {
            let addr =
                Address::parse_for(nettype, value).map_err(|e| TxError::Ons(format!("bad wallet address: {e}")))?;
            let mut out = Vec::with_capacity(73);
            match addr.kind {
                AddressKind::Standard => out.push(WALLET_PRIMARY),
                AddressKind::Subaddress => out.push(WALLET_SUBADDRESS),
                AddressKind::Integrated(_) => out.push(WALLET_INTEGRATED),
            }
            out.extend_from_slice(&addr.spend);
            out.extend_from_slice(&addr.view);
            if let Some(pid) = addr.payment_id() {
                out.extend_from_slice(&pid);
            }
            Ok(out)
        }
        _ => {
            let b32 = value
                .strip_suffix(LOKINET_SUFFIX)
                .filter(|v| v.len() == 52)
                .ok_or_else(|| TxError::Ons("lokinet value must be a 52-character .loki address".into()))?;
            let key = base32z_decode(b32)
                .filter(|k| k.len() == 32)
                .ok_or_else(|| TxError::Ons("lokinet value is not valid base32z".into()))?;
            Ok(key)
        }
    }
}

/// Inverse of [`encode_value`].
pub fn decode_value(nettype: NetType, ons_type: OnsType, value: &[u8]) -> Result<String, TxError> {
    match ons_type {
        OnsType::Session => Ok(hex::encode(value)),
        OnsType::Wallet => {
            if value.len() < 65 {
                return Err(TxError::Ons("wallet value too short".into()));
            }
            let mut spend = [0u8; 32];
            let mut view = [0u8; 32];
            spend.copy_from_slice(&value[1..33]);
            view.copy_from_slice(&value[33..65]);
            let kind = match (value[0], value.len()) {
                (WALLET_PRIMARY, 65) => AddressKind::Standard,
                (WALLET_SUBADDRESS, 65) => AddressKind::Subaddress,
                (WALLET_INTEGRATED, 73) => {
                    let mut pid = [0u8; 8];
                    pid.copy_from_slice(&value[65..]);
                    AddressKind::Integrated(pid)
                }
                _ => return Err(TxError::Ons("malformed wallet value".into())),
            };
            Ok(Address { nettype, kind, spend, view }.to_string())
        }
        _ => {
            if value.len() != 32 {
                return Err(TxError::Ons("lokinet value must be 32 bytes".into()));
            }
            Ok(format!("{}{LOKINET_SUFFIX}", base32z_encode(value)))
        }
    }
}

/// Encrypt a binary value; the result is `ciphertext || nonce`.
pub fn encrypt_value(name: &str, value: &[u8]) -> Result<Vec<u8>, TxError> {
    let hash = name_hash(name);
    let cipher = cipher_for(name, &hash)?;
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut out = cipher
        .encrypt(XNonce::from_slice(&nonce), value)
        .map_err(|_| TxError::Ons("value encryption failed".into()))?;
    out.extend_from_slice(&nonce);
    Ok(out)
}

pub fn decrypt_value(name: &str, encrypted: &[u8]) -> Result<Vec<u8>, TxError> {
    if encrypted.len() < NONCE_SIZE + POLY1305_TAG {
        return Err(TxError::Ons("encrypted value too short".into()));
    }
    let hash = name_hash(name);
    let (ciphertext, nonce) = encrypted.split_at(encrypted.len() - NONCE_SIZE);
    cipher_for(name, &hash)?
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| TxError::Ons("value decryption failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxen_crypto::signature::{check_signature, generate_signature};

    #[test]
    fn name_rules() {
        assert!(validate_name(OnsType::Session, "alice_01").is_ok());
        assert!(validate_name(OnsType::Wallet, "-alice").is_err());
        assert!(validate_name(OnsType::Session, "Alice").is_err());
        assert!(validate_name(OnsType::Session, &"a".repeat(65)).is_err());
        assert!(validate_name(OnsType::Lokinet, "my-site.loki").is_ok());
        assert!(validate_name(OnsType::Lokinet, "my_site.loki").is_err());
        assert!(validate_name(OnsType::Lokinet2Years, "a.b.loki").is_err());
        assert!(validate_name(OnsType::Lokinet, "site").is_err());
        assert!(validate_name(OnsType::Lokinet, "ab--cd.loki").is_err());
    }

    #[test]
    fn burn_and_db_type() {
        assert_eq!(OnsType::Session.burn_amount(), 7 * COIN);
        assert_eq!(OnsType::Lokinet10Years.burn_amount(), 42 * COIN);
        assert_eq!(OnsType::Lokinet5Years.db_type(), 2);
        assert_eq!("lokinet_2y".parse::<OnsType>().unwrap(), OnsType::Lokinet2Years);
    }

    #[test]
    fn encrypted_value_needs_the_name() {
        let value = encode_value(NetType::Mainnet, OnsType::Session, &format!("05{}", "ab".repeat(32))).unwrap();
        let enc = encrypt_value("alice", &value).unwrap();
        assert_eq!(enc.len(), value.len() + POLY1305_TAG + NONCE_SIZE);
        assert_eq!(decrypt_value("alice", &enc).unwrap(), value);
        assert!(decrypt_value("bob", &enc).is_err());
    }

    #[test]
    fn lokinet_value_roundtrip() {
        let key = [0x5au8; 32];
        let text = format!("{}{LOKINET_SUFFIX}", base32z_encode(&key));
        assert_eq!(text.len(), 52 + LOKINET_SUFFIX.len());
        assert_eq!(encode_value(NetType::Mainnet, OnsType::Lokinet, &text).unwrap(), key);
        assert_eq!(decode_value(NetType::Mainnet, OnsType::Lokinet, &key).unwrap(), text);
    }

    #[test]
    fn wallet_value_roundtrip() {
        let addr = Address::subaddress(NetType::Testnet, [3u8; 32], [4u8; 32]);
        let bytes = encode_value(NetType::Testnet, OnsType::Wallet, &addr.to_string()).unwrap();
        assert_eq!(bytes[0], WALLET_SUBADDRESS);
        assert_eq!(bytes.len(), 65);
        assert_eq!(decode_value(NetType::Testnet, OnsType::Wallet, &bytes).unwrap(), addr.to_string());
    }

    #[test]
    fn record_field_mask_and_parse() {
        let owner = GenericOwner::Monero { spend: [1u8; 32], view: [2u8; 32], is_subaddress: false };
        let buy = OnsExtra::buy(OnsType::Wallet, name_hash("bob"), vec![9u8; 40], owner, None);
        assert_eq!(buy.fields(), field::OWNER | field::ENCRYPTED_VALUE);
        assert!(buy.is_buy());
        let mut bytes = Vec::new();
        buy.write(&mut bytes);
        assert_eq!(OnsExtra::read(&mut Reader::new(&bytes)).unwrap(), buy);

        let renew = OnsExtra::renew(OnsType::Lokinet, name_hash("x.loki"), [7u8; 32]);
        assert!(renew.is_renew());
        let mut bytes = Vec::new();
        renew.write(&mut bytes);
        assert_eq!(bytes.len(), 1 + 1 + 32 + 32 + 1);
    }

    #[test]
    fn owner_hash_layout() {
        let owner = GenericOwner::Monero { spend: [1u8; 32], view: [2u8; 32], is_subaddress: true };
        let raw = owner.to_hash_bytes();
        assert_eq!(raw[64], 1);
        assert!(raw[65..].iter().all(|b| *b == 0));
        let ed = GenericOwner::Ed25519([9u8; 32]).to_hash_bytes();
        assert_eq!(ed[72], 1);
    }

    #[test]
    fn update_signature_verifies_under_owner() {
        let (secret, public) = oxen_crypto::generate_keys();
        let owner = GenericOwner::Monero { spend: public, view: [2u8; 32], is_subaddress: false };
        let hash = update_signature_hash(Some(b"value"), None, Some(&owner), &[5u8; 32]);
        let sig = generate_signature(&hash, &owner.signing_key(), &secret).unwrap();
        assert!(check_signature(&hash, &public, &sig));
        let other = update_signature_hash(Some(b"value"), None, None, &[5u8; 32]);
        assert!(!check_signature(&other, &public, &sig));
    }
}
