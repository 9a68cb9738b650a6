/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Frame codec shared by every DA dialect.
//!
//! ```text
//! +----------+----------+----------+-----------+----------+
//! |  Magic   |  Opcode  |  Length  |  Payload  | Checksum |
//! +----------+----------+----------+-----------+----------+
//! | u32 (LE) | u32 (LE) | u32 (LE) |  Length   | 0/2 (LE) |
//! +----------+----------+----------+-----------+----------+
//! ```
//!
//! The checksum covers opcode, length and payload. Its kind is picked per
//! dialect, see [`ChecksumKind`].
pub mod checksum;

use thiserror::Error;

pub use checksum::ChecksumKind;

pub const HEADER_LEN: usize = 12;
/// Magic marker the MediaTek DA puts in front of every packet.
pub const DA_MAGIC: u32 = 0xFEEEEEEF;
/// Upper bound for a declared frame length. Anything bigger is a desync.
pub const MAX_FRAME_PAYLOAD: usize = 0x0100_0000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("bad magic 0x{0:08X}")]
    BadMagic(u32),
    #[error("bad checksum: expected 0x{expected:04X}, got 0x{actual:04X}")]
    BadChecksum { expected: u16, actual: u16 },
    #[error("declared length 0x{declared:X} does not match 0x{actual:X}")]
    BadLength { declared: usize, actual: usize },
    #[error("truncated frame: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u32,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    pub magic: u32,
    pub checksum: ChecksumKind,
    /// Largest payload put into a single frame when encoding.
    pub max_payload: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        FrameConfig { magic: DA_MAGIC, checksum: ChecksumKind::Additive16, max_payload: 0x8000 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Codec {
    config: FrameConfig,
}

impl Codec {
    pub fn new(config: FrameConfig) -> Self {
        Codec { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn trailer_len(&self) -> usize {
        self.config.checksum.width()
    }

    pub fn encode(&self, opcode: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + self.trailer_len());
        out.extend_from_slice(&self.config.magic.to_le_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);

        let checksum = self.config.checksum.compute(&out[4..]);
        out.extend_from_slice(&checksum.to_le_bytes()[..self.trailer_len()]);
        out
    }

    /// Splits `payload` into frames of at most `max_payload` bytes.
    /// The peer reassembles them in order. An empty payload still yields one frame.
    pub fn encode_chunks(&self, opcode: u32, payload: &[u8]) -> Vec<Vec<u8>> {
        if payload.is_empty() {
            return vec![self.encode(opcode, payload)];
        }

        let max = self.config.max_payload.max(1);
        payload.chunks(max).map(|chunk| self.encode(opcode, chunk)).collect()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Truncated { needed: HEADER_LEN, got: bytes.len() });
        }

        let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap_or([0u8; HEADER_LEN]);
        let (opcode, len) = self.parse_header(&header)?;

        let total = HEADER_LEN + len + self.trailer_len();
        if bytes.len() < total {
            return Err(FramingError::Truncated { needed: total, got: bytes.len() });
        }
        if bytes.len() > total {
            return Err(FramingError::BadLength { declared: len, actual: bytes.len() - HEADER_LEN - self.trailer_len() });
        }

        self.finish(opcode, &bytes[HEADER_LEN..HEADER_LEN + len], &bytes[HEADER_LEN + len..])
    }

    /// Validates the magic marker and returns `(opcode, payload length)`.
    pub fn parse_header(&self, header: &[u8; HEADER_LEN]) -> Result<(u32, usize), FramingError> {
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != self.config.magic {
            return Err(FramingError::BadMagic(magic));
        }

        let opcode = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(FramingError::BadLength { declared: len, actual: MAX_FRAME_PAYLOAD });
        }

        Ok((opcode, len))
    }

    /// Checks the trailer of a frame whose header was already parsed.
    pub fn finish(&self, opcode: u32, payload: &[u8], trailer: &[u8]) -> Result<Frame, FramingError> {
        let kind = self.config.checksum;
        if trailer.len() != kind.width() {
            return Err(FramingError::Truncated { needed: kind.width(), got: trailer.len() });
        }

        let mut covered = Vec::with_capacity(8 + payload.len());
        covered.extend_from_slice(&opcode.to_le_bytes());
        covered.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        covered.extend_from_slice(payload);
        let expected = kind.compute(&covered);

        let actual = match trailer {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        };

        if expected != actual {
            return Err(FramingError::BadChecksum { expected, actual });
        }

        Ok(Frame { opcode, payload: payload.to_vec(), checksum: actual })
    }
}
