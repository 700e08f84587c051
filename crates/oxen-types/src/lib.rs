//! Core types and constants shared by the Oxen wallet crates.
//!
//! Network identities, address prefixes, economy and fee constants, the
//! CryptoNote base58 codec and address parsing live here so that every
//! other crate agrees on them.

pub mod address;
pub mod base58;
pub mod constants;

pub use address::{Address, AddressKind};
pub use constants::NetType;
