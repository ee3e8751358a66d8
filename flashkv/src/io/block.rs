//! Block framing
//!
//! The data file is a run of blocks with no header or footer. Each block starts with
//! an `i16` little-endian length `L` covering the whole block, header included:
//!
//! ```text
//! L > 0   used:  [L][bincode(key)][bincode(value)][slack...]
//! L < 0   free:  [L][-L - 2 bytes of stale data]
//! ```
//!
//! Keys and values use the crate's bincode options: fixed width integers are stored
//! little-endian at their natural width, strings and sequences as a `u64` length
//! followed by their contents. Anything after the value is slack and is ignored.

use std::io;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::file::Storage;
use crate::error::{KvError, Result};
use crate::BINCODER;

/// Bytes taken by the length prefix.
pub(crate) const HEADER_LEN: usize = 2;

/// Largest block the length prefix can describe.
pub(crate) const MAX_BLOCK_SIZE: usize = i16::MAX as usize;

/// Decoded length prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Header {
    Used(usize),
    Free(usize),
}

impl Header {
    /// `None` for prefixes no valid block can carry.
    pub(crate) fn parse(bytes: [u8; HEADER_LEN]) -> Option<Self> {
        let len = i16::from_le_bytes(bytes);
        let size = usize::from(len.unsigned_abs());
        if !(HEADER_LEN..=MAX_BLOCK_SIZE).contains(&size) {
            return None;
        }
        if len > 0 {
            Some(Header::Used(size))
        } else {
            Some(Header::Free(size))
        }
    }

    pub(crate) fn size(self) -> usize {
        match self {
            Header::Used(size) | Header::Free(size) => size,
        }
    }
}

/// Serialize an entry behind a placeholder header. The result is the exact number of
/// bytes the entry needs.
pub(crate) fn encode<K, V>(key: &K, value: &V) -> Result<Vec<u8>>
where
    K: Serialize,
    V: Serialize,
{
    let mut buf = vec![0; HEADER_LEN];
    BINCODER
        .serialize_into(&mut buf, key)
        .and_then(|_| BINCODER.serialize_into(&mut buf, value))
        .map_err(|e| {
            tracing::error!("could not serialize entry: {e}");
            KvError::BadAlloc
        })?;
    if buf.len() > MAX_BLOCK_SIZE {
        tracing::error!(
            "entry needs {} bytes, blocks hold at most {MAX_BLOCK_SIZE}",
            buf.len()
        );
        return Err(KvError::BadAlloc);
    }
    Ok(buf)
}

/// Stamp the block length into an encoded entry. Appended blocks are padded out to
/// their full size so the file length always matches the sum of its blocks.
pub(crate) fn frame(buf: &mut Vec<u8>, size: usize, pad: bool) {
    debug_assert!(buf.len() <= size && size <= MAX_BLOCK_SIZE);
    buf[..HEADER_LEN].copy_from_slice(&(size as i16).to_le_bytes());
    if pad {
        buf.resize(size, 0);
    }
}

/// The header marking a block of `size` bytes as free.
pub(crate) fn free_marker(size: usize) -> [u8; HEADER_LEN] {
    (-(size as i16)).to_le_bytes()
}

/// Block size to reserve for an entry of `data` bytes, with `percent_free` extra
/// room for growth.
pub(crate) fn reserve(data: usize, percent_free: u8) -> usize {
    let slack = data * usize::from(percent_free) / 100;
    (data + slack).min(MAX_BLOCK_SIZE)
}

pub(crate) fn read_header(file: &mut dyn Storage, offset: u64) -> io::Result<Option<Header>> {
    let mut bytes = [0; HEADER_LEN];
    file.read_exact_at(offset, &mut bytes)?;
    Ok(Header::parse(bytes))
}

/// Read a whole block, header included.
pub(crate) fn read_block(file: &mut dyn Storage, offset: u64, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; size];
    file.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

/// Decode the key of a used block.
pub(crate) fn decode_key<K>(block: &[u8]) -> Result<K>
where
    K: DeserializeOwned,
{
    let mut payload = block.get(HEADER_LEN..).ok_or(KvError::DataChanged)?;
    BINCODER.deserialize_from(&mut payload).map_err(|e| {
        tracing::error!("could not decode stored key: {e}");
        KvError::DataChanged
    })
}

/// Decode the key and value of a used block.
pub(crate) fn decode_entry<K, V>(block: &[u8]) -> Result<(K, V)>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let mut payload = block.get(HEADER_LEN..).ok_or(KvError::DataChanged)?;
    // Key and value are stored back to back, exactly as bincode lays out a pair
    BINCODER.deserialize_from(&mut payload).map_err(|e| {
        tracing::error!("could not decode stored entry: {e}");
        KvError::DataChanged
    })
}
