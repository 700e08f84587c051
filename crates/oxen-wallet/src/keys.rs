//! Wallet key material and the operations performed with it.
//!
//! Everything that touches the spend or view secret goes through
//! [`KeyHolder`], so a device-backed holder can keep the secrets to itself.
//! [`SoftwareKeyHolder`] keeps both secrets in memory.

use std::collections::HashMap;
use std::sync::RwLock;

use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use oxen_crypto::clsag::RingMember;
use oxen_crypto::signature::generate_signature;
use oxen_crypto::subaddress::{subaddress_keys, subaddress_spend_public, subaddress_spend_secret};
use oxen_crypto::{
    derivation_to_scalar, derive_public_key, derive_secret_key, derive_subaddress_public_key, ecdh,
    generate_key_derivation, generate_key_image, random_scalar, scalar_from_canonical, secret_to_public,
    view_secret_from_spend, Key,
};
use oxen_tx::ons::{update_signature_hash, GenericOwner, GenericSignature};
use oxen_tx::sign::{SigningInput, SigningOutput};
use oxen_tx::types::EcdhTuple;
use oxen_tx::{RctSignatures, TxPrefix};
use oxen_types::{Address, NetType};

use crate::error::WalletError;

/// `(major, minor)` subaddress index; `(0, 0)` is the primary address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SubaddressIndex {
    pub major: u32,
    pub minor: u32,
}

impl SubaddressIndex {
    pub const PRIMARY: SubaddressIndex = SubaddressIndex { major: 0, minor: 0 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_primary(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

/// Transaction secret `r` and its public counterpart.
#[derive(Clone)]
pub struct TxSecretKey {
    pub secret: Scalar,
    pub public: Key,
}

impl std::fmt::Debug for TxSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSecretKey").field("public", &hex::encode(self.public)).finish_non_exhaustive()
    }
}

/// One-time key of a new output and the scalar that hides its amount.
#[derive(Debug, Clone, Copy)]
pub struct OutputKey {
    pub key: Key,
    pub amount_key: Scalar,
    pub derivation: Key,
}

/// An owned output being spent, with the ring it hides in.
#[derive(Debug, Clone)]
pub struct InputToSign {
    pub ring: Vec<RingMember>,
    pub real_index: usize,
    pub derivation: Key,
    pub output_key: Key,
    pub output_index: u64,
    pub subaddress: SubaddressIndex,
    pub mask: Scalar,
    pub amount: u64,
}

/// Key material as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeys {
    #[serde(with = "hex_key")]
    pub spend_secret: Key,
    #[serde(with = "hex_key")]
    pub spend_public: Key,
    #[serde(with = "hex_key")]
    pub view_secret: Key,
    #[serde(with = "hex_key")]
    pub view_public: Key,
}

impl StoredKeys {
    pub fn from_holder(keys: &dyn KeyHolder) -> Result<Self, WalletError> {
        Ok(Self {
            spend_secret: keys.spend_secret()?.to_bytes(),
            spend_public: keys.spend_public(),
            view_secret: keys.view_secret()?.to_bytes(),
            view_public: keys.view_public(),
        })
    }
}

mod hex_key {
    use oxen_crypto::Key;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Key, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Key, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        bytes.try_into().map_err(|_| de::Error::custom("expected 32 bytes"))
    }
}

/// Cryptographic operations a wallet needs from its keys.
pub trait KeyHolder: Send + Sync {
    fn spend_public(&self) -> Key;
    fn view_public(&self) -> Key;
    fn view_secret(&self) -> Result<Scalar, WalletError>;
    fn spend_secret(&self) -> Result<Scalar, WalletError>;

    /// `D = 8·v·R`
    fn derive(&self, tx_pub: &Key) -> Result<Key, WalletError>;

    fn derive_all(&self, tx_pubs: &[Key]) -> Result<Vec<Key>, WalletError> {
        tx_pubs.iter().map(|k| self.derive(k)).collect()
    }

    /// Spend key an output was addressed to: `K' - H_s(D || i)·G`.
    fn subaddress_spend_key(&self, derivation: &Key, output_key: &Key, output_index: u64) -> Result<Key, WalletError>;

    /// Subaddress the output pays, if it is one of ours.
    fn match_output(
        &self,
        derivation: &Key,
        output_key: &Key,
        output_index: u64,
    ) -> Result<Option<SubaddressIndex>, WalletError>;

    /// Key image of an owned output; fails if the derived secret does not
    /// reproduce `output_key`.
    fn key_image(
        &self,
        derivation: &Key,
        output_key: &Key,
        output_index: u64,
        subaddress: SubaddressIndex,
    ) -> Result<Key, WalletError>;

    /// Decrypt amount and commitment mask of output `output_index`.
    fn open_amount(&self, rct: &RctSignatures, derivation: &Key, output_index: u64) -> Result<(u64, Scalar), WalletError>;

    fn generate_tx_key(&self, hf_version: u8) -> TxSecretKey;

    /// One-time key for output slot `output_index`. Change is derived from
    /// our own view secret and `tx_pub`, everything else from `tx_secret`
    /// and the destination's view key.
    fn ephemeral_out_key(
        &self,
        tx_secret: &Scalar,
        tx_pub: &Key,
        destination: &Address,
        output_index: u64,
        is_change: bool,
    ) -> Result<OutputKey, WalletError>;

    fn sign(
        &self,
        prefix: &TxPrefix,
        inputs: &[InputToSign],
        outputs: &[SigningOutput],
        fee: u64,
    ) -> Result<RctSignatures, WalletError>;

    /// Signature authorising an ONS update of a record owned by `current_owner`.
    fn ons_signature(
        &self,
        current_owner: &GenericOwner,
        new_owner: Option<&GenericOwner>,
        new_backup_owner: Option<&GenericOwner>,
        encrypted_value: Option<&[u8]>,
        prev_txid: &Key,
    ) -> Result<GenericSignature, WalletError>;

    /// Grow the subaddress table to cover `[0, majors) × [0, minors)`.
    fn expand_subaddresses(&self, majors: u32, minors: u32) -> Result<(), WalletError>;

    /// Current table extent `(majors, minors)`.
    fn subaddress_extent(&self) -> (u32, u32);

    fn address(&self, nettype: NetType, index: SubaddressIndex) -> Result<Address, WalletError>;
}

struct SubaddressTable {
    keys: HashMap<Key, SubaddressIndex>,
    majors: u32,
    minors: u32,
}

/// Key holder with both secrets in memory.
pub struct SoftwareKeyHolder {
    spend_secret: Scalar,
    spend_public: Key,
    view_secret: Scalar,
    view_public: Key,
    subaddresses: RwLock<SubaddressTable>,
}

impl SoftwareKeyHolder {
    pub fn new(spend_secret: Scalar, view_secret: Scalar) -> Self {
        let spend_public = secret_to_public(&spend_secret);
        let mut keys = HashMap::new();
        keys.insert(spend_public, SubaddressIndex::PRIMARY);
        Self {
            spend_secret,
            spend_public,
            view_secret,
            view_public: secret_to_public(&view_secret),
            subaddresses: RwLock::new(SubaddressTable { keys, majors: 1, minors: 1 }),
        }
    }

    /// Standard deterministic wallet: the view secret is `H_s(spend)`.
    pub fn from_spend_secret(spend_secret: Scalar) -> Self {
        Self::new(spend_secret, view_secret_from_spend(&spend_secret))
    }

    pub fn generate() -> Self {
        Self::from_spend_secret(random_scalar())
    }

    pub fn from_stored(stored: &StoredKeys) -> Result<Self, WalletError> {
        let holder = Self::new(scalar_from_canonical(&stored.spend_secret)?, scalar_from_canonical(&stored.view_secret)?);
        if holder.spend_public != stored.spend_public || holder.view_public != stored.view_public {
            return Err(WalletError::KeyMismatch);
        }
        Ok(holder)
    }

    fn subaddress_secret(&self, index: SubaddressIndex) -> Scalar {
        subaddress_spend_secret(&self.spend_secret, &self.view_secret, index.major, index.minor)
    }

    fn lookup(&self, spend_key: &Key) -> Option<SubaddressIndex> {
        self.subaddresses.read().ok()?.keys.get(spend_key).copied()
    }
}

impl KeyHolder for SoftwareKeyHolder {
    fn spend_public(&self) -> Key {
        self.spend_public
    }

    fn view_public(&self) -> Key {
        self.view_public
    }

    fn view_secret(&self) -> Result<Scalar, WalletError> {
        Ok(self.view_secret)
    }

    fn spend_secret(&self) -> Result<Scalar, WalletError> {
        Ok(self.spend_secret)
    }

    fn derive(&self, tx_pub: &Key) -> Result<Key, WalletError> {
        Ok(generate_key_derivation(tx_pub, &self.view_secret)?)
    }

    fn subaddress_spend_key(&self, derivation: &Key, output_key: &Key, output_index: u64) -> Result<Key, WalletError> {
        Ok(derive_subaddress_public_key(output_key, derivation, output_index)?)
    }

    fn match_output(
        &self,
        derivation: &Key,
        output_key: &Key,
        output_index: u64,
    ) -> Result<Option<SubaddressIndex>, WalletError> {
        let candidate = self.subaddress_spend_key(derivation, output_key, output_index)?;
        Ok(self.lookup(&candidate))
    }

    fn key_image(
        &self,
        derivation: &Key,
        output_key: &Key,
        output_index: u64,
        subaddress: SubaddressIndex,
    ) -> Result<Key, WalletError> {
        let secret = derive_secret_key(derivation, output_index, &self.subaddress_secret(subaddress));
        if secret_to_public(&secret) != *output_key {
            return Err(WalletError::OutputDecode { output_index, reason: "derived key differs from output key".into() });
        }
        Ok(generate_key_image(output_key, &secret)?)
    }

    fn open_amount(&self, rct: &RctSignatures, derivation: &Key, output_index: u64) -> Result<(u64, Scalar), WalletError> {
        let i = output_index as usize;
        let ss = ecdh::shared_secret(derivation, output_index);
        let (amount, mask) = match rct.ecdh_info.get(i) {
            Some(EcdhTuple::Compact(enc)) => (ecdh::decode_amount(enc, &ss), ecdh::commitment_mask(&ss)),
            Some(EcdhTuple::Full { mask, amount }) => ecdh::decode_full(mask, amount, &ss),
            None => return Err(WalletError::invalid(format!("no ecdh info for output {i}"))),
        };
        let commitment = rct.out_pk.get(i).ok_or_else(|| WalletError::invalid(format!("no commitment for output {i}")))?;
        if !ecdh::opens(commitment, amount, &mask) {
            return Err(WalletError::OutputDecode {
                output_index,
                reason: "decoded amount does not open the commitment".into(),
            });
        }
        Ok((amount, mask))
    }

    fn generate_tx_key(&self, _hf_version: u8) -> TxSecretKey {
        let secret = random_scalar();
        TxSecretKey { secret, public: secret_to_public(&secret) }
    }

    fn ephemeral_out_key(
        &self,
        tx_secret: &Scalar,
        tx_pub: &Key,
        destination: &Address,
        output_index: u64,
        is_change: bool,
    ) -> Result<OutputKey, WalletError> {
        let derivation = if is_change {
            generate_key_derivation(tx_pub, &self.view_secret)?
        } else {
            generate_key_derivation(&destination.view, tx_secret)?
        };
        Ok(OutputKey {
            key: derive_public_key(&derivation, output_index, &destination.spend)?,
            amount_key: derivation_to_scalar(&derivation, output_index),
            derivation,
        })
    }

    fn sign(
        &self,
        prefix: &TxPrefix,
        inputs: &[InputToSign],
        outputs: &[SigningOutput],
        fee: u64,
    ) -> Result<RctSignatures, WalletError> {
        let signing: Vec<SigningInput> = inputs
            .iter()
            .map(|input| {
                let secret =
                    derive_secret_key(&input.derivation, input.output_index, &self.subaddress_secret(input.subaddress));
                if secret_to_public(&secret) != input.output_key {
                    return Err(WalletError::OutputDecode {
                        output_index: input.output_index,
                        reason: "derived key differs from output key".into(),
                    });
                }
                Ok(SigningInput {
                    ring: input.ring.clone(),
                    real_index: input.real_index,
                    secret,
                    mask: input.mask,
                    amount: input.amount,
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(oxen_tx::sign_rct(prefix, &signing, outputs, fee)?)
    }

    fn ons_signature(
        &self,
        current_owner: &GenericOwner,
        new_owner: Option<&GenericOwner>,
        new_backup_owner: Option<&GenericOwner>,
        encrypted_value: Option<&[u8]>,
        prev_txid: &Key,
    ) -> Result<GenericSignature, WalletError> {
        let GenericOwner::Monero { spend, .. } = current_owner else {
            return Err(WalletError::invalid("record is owned by an ed25519 key this wallet does not hold"));
        };
        let index = self
            .lookup(spend)
            .ok_or_else(|| WalletError::invalid("record owner is not an address of this wallet"))?;
        let hash = update_signature_hash(encrypted_value, new_owner, new_backup_owner, prev_txid);
        let sig = generate_signature(&hash, spend, &self.subaddress_secret(index))?;
        Ok(GenericSignature::monero(&sig))
    }

    fn expand_subaddresses(&self, majors: u32, minors: u32) -> Result<(), WalletError> {
        let (have_majors, have_minors) = self.subaddress_extent();
        if majors <= have_majors && minors <= have_minors {
            return Ok(());
        }
        let (majors, minors) = (majors.max(have_majors), minors.max(have_minors));
        let mut fresh = Vec::new();
        for major in 0..majors {
            for minor in 0..minors {
                if major < have_majors && minor < have_minors {
                    continue;
                }
                let key = subaddress_spend_public(&self.spend_public, &self.view_secret, major, minor)?;
                fresh.push((key, SubaddressIndex::new(major, minor)));
            }
        }
        let mut table = self.subaddresses.write().map_err(|_| WalletError::invalid("subaddress table poisoned"))?;
        table.keys.extend(fresh);
        table.majors = majors;
        table.minors = minors;
        log::debug!("subaddress table now covers {majors}x{minors}");
        Ok(())
    }

    fn subaddress_extent(&self) -> (u32, u32) {
        self.subaddresses.read().map(|t| (t.majors, t.minors)).unwrap_or((1, 1))
    }

    fn address(&self, nettype: NetType, index: SubaddressIndex) -> Result<Address, WalletError> {
        if index.is_primary() {
            return Ok(Address::standard(nettype, self.spend_public, self.view_public));
        }
        let (spend, view) = subaddress_keys(&self.spend_public, &self.view_secret, index.major, index.minor)?;
        Ok(Address::subaddress(nettype, spend, view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxen_crypto::{commit, compress, generate_keys};

    #[test]
    fn primary_output_roundtrip() {
        let keys = SoftwareKeyHolder::generate();
        let (r, big_r) = generate_keys();
        let addr = keys.address(NetType::Mainnet, SubaddressIndex::PRIMARY).unwrap();

        let out = keys.ephemeral_out_key(&r, &big_r, &addr, 3, false).unwrap();
        let d = keys.derive(&big_r).unwrap();
        assert_eq!(d, out.derivation);
        assert_eq!(keys.match_output(&d, &out.key, 3).unwrap(), Some(SubaddressIndex::PRIMARY));
        assert_eq!(keys.match_output(&d, &out.key, 4).unwrap(), None);
        keys.key_image(&d, &out.key, 3, SubaddressIndex::PRIMARY).unwrap();

        let err = keys.key_image(&d, &out.key, 4, SubaddressIndex::PRIMARY).unwrap_err();
        assert!(matches!(err, WalletError::OutputDecode { output_index: 4, .. }));
        assert_eq!(err.code(), "OUTPUT_DECODE");
    }

    #[test]
    fn change_uses_own_view_key() {
        let keys = SoftwareKeyHolder::generate();
        let (r, big_r) = generate_keys();
        let addr = keys.address(NetType::Mainnet, SubaddressIndex::PRIMARY).unwrap();
        let sent = keys.ephemeral_out_key(&r, &big_r, &addr, 1, false).unwrap();
        let change = keys.ephemeral_out_key(&Scalar::ZERO, &big_r, &addr, 1, true).unwrap();
        assert_eq!(sent.key, change.key);
    }

    #[test]
    fn subaddress_detection_after_expansion() {
        let keys = SoftwareKeyHolder::generate();
        let index = SubaddressIndex::new(1, 4);
        let sub = keys.address(NetType::Testnet, index).unwrap();
        assert!(sub.is_subaddress());

        // Sender to a lone subaddress publishes R = r·D.
        let r = random_scalar();
        let big_r = compress(&(r * oxen_crypto::decompress(&sub.spend).unwrap()));
        let out = keys.ephemeral_out_key(&r, &big_r, &sub, 0, false).unwrap();
        let d = keys.derive(&big_r).unwrap();
        assert_eq!(keys.match_output(&d, &out.key, 0).unwrap(), None);

        keys.expand_subaddresses(2, 5).unwrap();
        assert_eq!(keys.subaddress_extent(), (2, 5));
        assert_eq!(keys.match_output(&d, &out.key, 0).unwrap(), Some(index));
        keys.key_image(&d, &out.key, 0, index).unwrap();
        assert!(keys.key_image(&d, &out.key, 0, SubaddressIndex::PRIMARY).is_err());
    }

    #[test]
    fn open_amount_checks_commitment() {
        let keys = SoftwareKeyHolder::generate();
        let d = keys.derive(&generate_keys().1).unwrap();
        let ss = ecdh::shared_secret(&d, 0);
        let mask = ecdh::commitment_mask(&ss);
        let mut rct = RctSignatures::null();
        rct.rct_type = oxen_tx::types::rct_type::BULLETPROOF_PLUS;
        rct.ecdh_info.push(EcdhTuple::Compact(ecdh::encode_amount(1234, &ss)));
        rct.out_pk.push(compress(&commit(1234, &mask)));
        assert_eq!(keys.open_amount(&rct, &d, 0).unwrap(), (1234, mask));

        rct.out_pk[0] = compress(&commit(1235, &mask));
        let err = keys.open_amount(&rct, &d, 0).unwrap_err();
        assert!(matches!(err, WalletError::OutputDecode { output_index: 0, .. }));
    }

    #[test]
    fn stored_keys_roundtrip() {
        let keys = SoftwareKeyHolder::generate();
        let stored = StoredKeys::from_holder(&keys).unwrap();
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredKeys = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stored);
        let restored = SoftwareKeyHolder::from_stored(&back).unwrap();
        assert_eq!(restored.spend_public(), keys.spend_public());

        let mut tampered = stored;
        tampered.view_public = [9u8; 32];
        assert!(matches!(SoftwareKeyHolder::from_stored(&tampered), Err(WalletError::KeyMismatch)));
    }

    #[test]
    fn ons_signature_verifies_under_owner() {
        let keys = SoftwareKeyHolder::generate();
        let addr = keys.address(NetType::Mainnet, SubaddressIndex::PRIMARY).unwrap();
        let owner = GenericOwner::from_address(&addr);
        let prev = [7u8; 32];
        let sig = keys.ons_signature(&owner, None, None, Some(b"value"), &prev).unwrap();
        let hash = update_signature_hash(Some(b"value"), None, None, &prev);
        let parsed = oxen_crypto::signature::Signature::from_bytes(&sig.data);
        assert!(oxen_crypto::signature::check_signature(&hash, &addr.spend, &parsed));

        let stranger = GenericOwner::Monero { spend: generate_keys().1, view: [0u8; 32], is_subaddress: false };
        assert!(keys.ons_signature(&stranger, None, None, None, &prev).is_err());
    }
}
