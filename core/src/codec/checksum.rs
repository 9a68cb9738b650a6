/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

/// Checksum schemes spoken by the different boot stages.
///
/// - `Xor16`: XOR of little endian 16-bit words, used by BROM/Preloader
///   when acknowledging `SEND_DA` data.
/// - `Additive16`: sum of all bytes truncated to 16 bits. The DA uses it
///   for data chunks.
/// - `Crc16`: CRC-16/XMODEM (poly 0x1021, init 0), for dialects framing
///   with a real CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumKind {
    None,
    Xor16,
    #[default]
    Additive16,
    Crc16,
}

impl ChecksumKind {
    /// Number of bytes the checksum occupies on the wire.
    pub fn width(&self) -> usize {
        match self {
            ChecksumKind::None => 0,
            _ => 2,
        }
    }

    pub fn compute(&self, data: &[u8]) -> u16 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor16 => xor16(data),
            ChecksumKind::Additive16 => additive16(data),
            ChecksumKind::Crc16 => crc16_xmodem(data),
        }
    }
}

pub fn xor16(data: &[u8]) -> u16 {
    data.chunks(2).fold(0u16, |acc, word| {
        let value = match word {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            [lo] => *lo as u16,
            _ => 0,
        };
        acc ^ value
    })
}

// Just sum all bytes then AND with 0xFFFF.
pub fn additive16(data: &[u8]) -> u16 {
    (data.iter().fold(0u32, |total, &byte| total.wrapping_add(byte as u32)) & 0xFFFF) as u16
}

pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}
