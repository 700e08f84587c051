//! Oxen wallet addresses: standard, integrated and subaddress forms on each
//! network.

use crate::base58::{self, Base58Error};
use crate::constants::{NetType, KEY_SIZE, PAYMENT_ID_SIZE};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be a non-empty string")]
    Empty,

    #[error("base58 decode error: {0}")]
    Base58(#[from] Base58Error),

    #[error("unknown address prefix {0}")]
    UnknownPrefix(u64),

    #[error("invalid data length: expected {expected} bytes, got {actual}")]
    InvalidDataLength { expected: usize, actual: usize },

    #[error("address belongs to {found}, expected {expected}")]
    WrongNetwork { expected: NetType, found: NetType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Standard,
    Integrated([u8; PAYMENT_ID_SIZE]),
    Subaddress,
}

/// A decoded public address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub nettype: NetType,
    pub kind: AddressKind,
    pub spend: [u8; KEY_SIZE],
    pub view: [u8; KEY_SIZE],
}

impl Address {
    pub fn standard(nettype: NetType, spend: [u8; 32], view: [u8; 32]) -> Self {
        Self { nettype, kind: AddressKind::Standard, spend, view }
    }

    pub fn subaddress(nettype: NetType, spend: [u8; 32], view: [u8; 32]) -> Self {
        Self { nettype, kind: AddressKind::Subaddress, spend, view }
    }

    pub fn is_subaddress(&self) -> bool {
        self.kind == AddressKind::Subaddress
    }

    pub fn payment_id(&self) -> Option<[u8; PAYMENT_ID_SIZE]> {
        match self.kind {
            AddressKind::Integrated(pid) => Some(pid),
            _ => None,
        }
    }

    /// Parse and additionally require the address to belong to `nettype`.
    pub fn parse_for(nettype: NetType, s: &str) -> Result<Self, AddressError> {
        let addr: Address = s.parse()?;
        // Fakechain reuses mainnet prefixes, so prefix lookup cannot tell them apart.
        if addr.nettype.prefixes() != nettype.prefixes() {
            return Err(AddressError::WrongNetwork { expected: nettype, found: addr.nettype });
        }
        Ok(Address { nettype, ..addr })
    }
}

fn lookup_prefix(tag: u64) -> Option<(NetType, u8)> {
    [NetType::Mainnet, NetType::Testnet, NetType::Devnet].into_iter().find_map(|nt| {
        let p = nt.prefixes();
        match tag {
            t if t == p.standard => Some((nt, 0)),
            t if t == p.integrated => Some((nt, 1)),
            t if t == p.subaddress => Some((nt, 2)),
            _ => None,
        }
    })
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let (tag, data) = base58::decode_address(s)?;
        let (nettype, kind_tag) = lookup_prefix(tag).ok_or(AddressError::UnknownPrefix(tag))?;

        let expected = if kind_tag == 1 { 2 * KEY_SIZE + PAYMENT_ID_SIZE } else { 2 * KEY_SIZE };
        if data.len() != expected {
            return Err(AddressError::InvalidDataLength { expected, actual: data.len() });
        }

        let mut spend = [0u8; KEY_SIZE];
        let mut view = [0u8; KEY_SIZE];
        spend.copy_from_slice(&data[..KEY_SIZE]);
        view.copy_from_slice(&data[KEY_SIZE..2 * KEY_SIZE]);

        let kind = match kind_tag {
            0 => AddressKind::Standard,
            1 => {
                let mut pid = [0u8; PAYMENT_ID_SIZE];
                pid.copy_from_slice(&data[2 * KEY_SIZE..]);
                AddressKind::Integrated(pid)
            }
            _ => AddressKind::Subaddress,
        };

        Ok(Address { nettype, kind, spend, view })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefixes = self.nettype.prefixes();
        let mut data = Vec::with_capacity(2 * KEY_SIZE + PAYMENT_ID_SIZE);
        data.extend_from_slice(&self.spend);
        data.extend_from_slice(&self.view);
        let tag = match self.kind {
            AddressKind::Standard => prefixes.standard,
            AddressKind::Subaddress => prefixes.subaddress,
            AddressKind::Integrated(pid) => {
                data.extend_from_slice(&pid);
                prefixes.integrated
            }
        };
        f.write_str(&base58::encode_address(tag, &data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_standard_roundtrip() {
        let addr = Address::standard(NetType::Mainnet, [1u8; 32], [2u8; 32]);
        let text = addr.to_string();
        assert!(text.starts_with('L'), "mainnet addresses start with L: {text}");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn integrated_keeps_payment_id() {
        let addr = Address {
            nettype: NetType::Testnet,
            kind: AddressKind::Integrated([0xAA; 8]),
            spend: [0x11; 32],
            view: [0x22; 32],
        };
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed.payment_id(), Some([0xAA; 8]));
        assert_eq!(parsed.nettype, NetType::Testnet);
    }

    #[test]
    fn network_check() {
        let sub = Address::subaddress(NetType::Devnet, [3u8; 32], [4u8; 32]).to_string();
        assert!(Address::parse_for(NetType::Devnet, &sub).unwrap().is_subaddress());
        assert!(matches!(
            Address::parse_for(NetType::Mainnet, &sub),
            Err(AddressError::WrongNetwork { .. })
        ));
        let main = Address::standard(NetType::Mainnet, [3u8; 32], [4u8; 32]).to_string();
        assert_eq!(Address::parse_for(NetType::Fakechain, &main).unwrap().nettype, NetType::Fakechain);
    }
}
