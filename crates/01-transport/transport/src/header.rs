//! Channel header written in front of every payload.
//!
//! Layout (little endian, [`HEADER_SIZE`] bytes):
//!
//! ```text
//! 0  u16 header_size   8  u64 data_size    16 u64 id
//! 24 u64 clock         32 i64 time         40 u64 hash
//! 48 u8  zero_copy     56 i64 ack_timeout_ms
//! ```

use crate::{TransportError, TransportResult};

/// Size of the encoded header; the payload starts right after it.
pub const HEADER_SIZE: usize = 64;

/// Metadata describing the payload currently stored in a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelHeader {
    pub data_size: u64,
    pub id: u64,
    pub clock: u64,
    pub time: i64,
    pub hash: u64,
    pub zero_copy: bool,
    pub ack_timeout_ms: i64,
}

impl ChannelHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        buf[8..16].copy_from_slice(&self.data_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.clock.to_le_bytes());
        buf[32..40].copy_from_slice(&self.time.to_le_bytes());
        buf[40..48].copy_from_slice(&self.hash.to_le_bytes());
        buf[48] = u8::from(self.zero_copy);
        buf[56..64].copy_from_slice(&self.ack_timeout_ms.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> TransportResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TransportError::InvalidLayout("header truncated"));
        }
        let header_size = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if header_size != HEADER_SIZE {
            return Err(TransportError::InvalidLayout("unexpected header size"));
        }
        Ok(Self {
            data_size: u64_at(bytes, 8),
            id: u64_at(bytes, 16),
            clock: u64_at(bytes, 24),
            time: u64_at(bytes, 32) as i64,
            hash: u64_at(bytes, 40),
            zero_copy: bytes[48] != 0,
            ack_timeout_ms: u64_at(bytes, 56) as i64,
        })
    }
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(word)
}
