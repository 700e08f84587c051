//! CryptoNote base58.
//!
//! Unlike Bitcoin's variant the input is cut into 8-byte blocks, each of
//! which always encodes to 11 characters; a short trailing block encodes to
//! the width given by [`ENCODED_BLOCK_SIZES`]. Addresses append the first
//! four bytes of a keccak-256 over `varint(tag) || payload`.

use crate::constants::CHECKSUM_SIZE;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const FULL_BLOCK_SIZE: usize = 8;
const FULL_ENCODED_BLOCK_SIZE: usize = 11;

/// Characters produced for a block of `n` bytes.
const ENCODED_BLOCK_SIZES: [usize; 9] = [0, 2, 3, 5, 6, 7, 9, 10, 11];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Base58Error {
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("invalid encoded block width {0}")]
    InvalidBlockWidth(usize),

    #[error("block {0} overflows its byte width")]
    Overflow(usize),

    #[error("payload too short ({0} bytes)")]
    TooShort(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed varint tag")]
    Varint,
}

const fn reverse_alphabet() -> [u8; 128] {
    let mut table = [0xFFu8; 128];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
}

static DIGITS: [u8; 128] = reverse_alphabet();

fn decoded_width(chars: usize) -> Option<usize> {
    ENCODED_BLOCK_SIZES.iter().position(|&w| w == chars)
}

fn encode_block(block: &[u8], out: &mut String) {
    let width = ENCODED_BLOCK_SIZES[block.len()];
    let mut num = block.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    let mut chars = vec![ALPHABET[0]; width];
    for slot in chars.iter_mut().rev() {
        if num == 0 {
            break;
        }
        *slot = ALPHABET[(num % 58) as usize];
        num /= 58;
    }
    out.extend(chars.into_iter().map(char::from));
}

fn decode_block(block: &[u8], index: usize, out: &mut Vec<u8>) -> Result<(), Base58Error> {
    let width = decoded_width(block.len()).ok_or(Base58Error::InvalidBlockWidth(block.len()))?;

    let mut num: u128 = 0;
    for &ch in block {
        let digit = DIGITS
            .get(ch as usize)
            .copied()
            .filter(|&d| d != 0xFF)
            .ok_or(Base58Error::InvalidCharacter(ch as char))?;
        num = num * 58 + digit as u128;
    }
    if num >> (8 * width) != 0 {
        return Err(Base58Error::Overflow(index));
    }
    let bytes = (num as u64).to_be_bytes();
    out.extend_from_slice(&bytes[FULL_BLOCK_SIZE - width..]);
    Ok(())
}

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() / FULL_BLOCK_SIZE * FULL_ENCODED_BLOCK_SIZE + 11);
    for block in data.chunks(FULL_BLOCK_SIZE) {
        encode_block(block, &mut out);
    }
    out
}

pub fn decode(encoded: &str) -> Result<Vec<u8>, Base58Error> {
    let mut out = Vec::with_capacity(encoded.len() * FULL_BLOCK_SIZE / FULL_ENCODED_BLOCK_SIZE + 8);
    for (i, block) in encoded.as_bytes().chunks(FULL_ENCODED_BLOCK_SIZE).enumerate() {
        decode_block(block, i, &mut out)?;
    }
    Ok(out)
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = Keccak::v256();
    let mut hash = [0u8; 32];
    hasher.update(payload);
    hasher.finalize(&mut hash);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&hash[..CHECKSUM_SIZE]);
    out
}

/// Varint (7-bit little-endian groups) as used by addresses and transactions.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Returns `(value, bytes consumed)`.
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(10) {
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn encode_address(tag: u64, data: &[u8]) -> String {
    let mut payload = Vec::with_capacity(data.len() + 10 + CHECKSUM_SIZE);
    write_varint(&mut payload, tag);
    payload.extend_from_slice(data);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    encode(&payload)
}

/// Returns the varint tag and the key material following it.
pub fn decode_address(address: &str) -> Result<(u64, Vec<u8>), Base58Error> {
    let decoded = decode(address)?;
    if decoded.len() <= CHECKSUM_SIZE {
        return Err(Base58Error::TooShort(decoded.len()));
    }
    let (payload, check) = decoded.split_at(decoded.len() - CHECKSUM_SIZE);
    if checksum(payload) != check {
        return Err(Base58Error::ChecksumMismatch);
    }
    let (tag, used) = read_varint(payload).ok_or(Base58Error::Varint)?;
    Ok((tag, payload[used..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_edges() {
        for value in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(read_varint(&buf), Some((value, buf.len())));
        }
        assert_eq!(read_varint(&[0x80]), None);
    }

    #[test]
    fn partial_blocks_roundtrip() {
        let data: Vec<u8> = (0..69u8).collect();
        let encoded = encode(&data);
        assert_eq!(encoded.len(), 8 * 11 + ENCODED_BLOCK_SIZES[5]);
        assert_eq!(decode(&encoded).unwrap(), data);
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn rejects_bad_block_width() {
        assert_eq!(decode("1111"), Err(Base58Error::InvalidBlockWidth(4)));
        assert!(matches!(decode("0"), Err(_)));
    }

    #[test]
    fn address_checksum_detects_corruption() {
        let encoded = encode_address(114, &[0xAB; 64]);
        assert_eq!(decode_address(&encoded).unwrap(), (114, vec![0xAB; 64]));

        let mut chars: Vec<char> = encoded.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '1' { '2' } else { '1' };
        let corrupted: String = chars.into_iter().collect();
        assert!(decode_address(&corrupted).is_err());
    }
}
