/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Partition table interpreter.
//!
//! Two layouts are understood:
//!
//! * GPT: protective MBR in LBA 0, `EFI PART` header in LBA 1, then an
//!   array of 128-byte entries. Both CRC32s are checked.
//! * MTK PMT, as dumped by legacy DAs: a `PTv1` signature and entry count,
//!   followed by 88-byte records (name[64], size u64, offset u64, mask u64).
//!
//! Parsing is pure. The same blob always yields the same table.
use std::fmt;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::{le_u32, le_u64};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const PMT_SIGNATURE: &[u8; 4] = b"PTv1";
pub const GPT_ENTRY_SIZE: usize = 128;
pub const PMT_ENTRY_SIZE: usize = 88;
/// Sanity limit, real tables carry 128 entries at most.
pub const MAX_ENTRIES: usize = 1024;
/// Devices round their reported capacity. A table may end this many blocks
/// past it before being rejected.
pub const CAPACITY_TOLERANCE_BLOCKS: u64 = 2048;

/// Bytes to read from the start of the user area to cover the MBR, the GPT
/// header and a full 128-entry array.
pub fn gpt_probe_len(block_size: u32) -> usize {
    2 * block_size as usize + 128 * GPT_ENTRY_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Gpt,
    Pmt,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Gpt => write!(f, "GPT"),
            TableFormat::Pmt => write!(f, "PMT"),
        }
    }
}

/// How the end of the last partition compares to the reported capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityCheck {
    Exact,
    /// The table ends this many blocks past the capacity, within tolerance.
    Overrun(u64),
    /// The table leaves this many blocks unused.
    Underrun(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub start_lba: u64,
    pub blocks: u64,
    /// All zero for PMT entries.
    pub type_guid: [u8; 16],
    /// GPT attribute bits, or the PMT mask flags.
    pub attributes: u64,
}

impl PartitionEntry {
    /// First block past the partition.
    pub fn end_lba(&self) -> u64 {
        self.start_lba.saturating_add(self.blocks)
    }

    pub fn byte_len(&self, block_size: u32) -> u64 {
        self.blocks.saturating_mul(block_size as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: u32,
    /// Blocks of the user area. Zero skips the capacity check.
    pub capacity_blocks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub format: TableFormat,
    pub block_size: u32,
    pub capacity_blocks: u64,
    pub capacity_check: CapacityCheck,
    pub entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    pub fn find(&self, name: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses whichever table `blob` holds.
pub fn parse_partition_table(blob: &[u8], geometry: Geometry) -> Result<PartitionTable> {
    let bs = geometry.block_size as usize;
    if bs == 0 {
        return Err(Error::malformed("block size is zero"));
    }

    let (format, entries) = if blob.len() >= bs + 8 && &blob[bs..bs + 8] == GPT_SIGNATURE {
        (TableFormat::Gpt, parse_gpt(blob, bs)?)
    } else if blob.len() >= 8 && &blob[..4] == PMT_SIGNATURE {
        (TableFormat::Pmt, parse_pmt(blob, bs)?)
    } else {
        return Err(Error::malformed("no GPT or PMT signature found"));
    };

    check_overlaps(&entries)?;
    let capacity_check = check_capacity(&entries, geometry.capacity_blocks)?;

    debug!("Parsed {} table with {} entries ({:?})", format, entries.len(), capacity_check);

    Ok(PartitionTable {
        format,
        block_size: geometry.block_size,
        capacity_blocks: geometry.capacity_blocks,
        capacity_check,
        entries,
    })
}

fn parse_gpt(blob: &[u8], bs: usize) -> Result<Vec<PartitionEntry>> {
    if blob.len() >= 512 && blob[510..512] != [0x55, 0xAA] {
        debug!("No protective MBR boot signature in LBA 0");
    }

    let hdr = &blob[bs..];
    if hdr.len() < 92 {
        return Err(Error::malformed("GPT header truncated"));
    }

    let header_size = le_u32!(hdr, 12) as usize;
    if !(92..=bs).contains(&header_size) || header_size > hdr.len() {
        return Err(Error::malformed(format!("GPT header size {} is invalid", header_size)));
    }

    let stored_header_crc = le_u32!(hdr, 16);
    let mut header = hdr[..header_size].to_vec();
    header[16..20].fill(0);
    let header_crc = crc32fast::hash(&header);
    if header_crc != stored_header_crc {
        return Err(Error::malformed(format!(
            "GPT header CRC 0x{:08X} does not match stored 0x{:08X}",
            header_crc, stored_header_crc
        )));
    }

    let entries_lba = le_u64!(hdr, 72);
    let num_entries = le_u32!(hdr, 80) as usize;
    let entry_size = le_u32!(hdr, 84) as usize;
    let stored_entries_crc = le_u32!(hdr, 88);

    if entry_size < GPT_ENTRY_SIZE || num_entries > MAX_ENTRIES {
        return Err(Error::malformed(format!(
            "GPT declares {} entries of {} bytes",
            num_entries, entry_size
        )));
    }

    let start = usize::try_from(entries_lba)
        .ok()
        .and_then(|lba| lba.checked_mul(bs))
        .ok_or_else(|| Error::malformed("GPT entry array LBA out of range"))?;
    let end = num_entries
        .checked_mul(entry_size)
        .and_then(|len| start.checked_add(len))
        .ok_or_else(|| Error::malformed("GPT entry array range overflows"))?;
    if end > blob.len() {
        return Err(Error::malformed(format!(
            "GPT entry array ends at 0x{:X}, past the 0x{:X} bytes read",
            end,
            blob.len()
        )));
    }

    let array = &blob[start..end];
    let entries_crc = crc32fast::hash(array);
    if entries_crc != stored_entries_crc {
        return Err(Error::malformed(format!(
            "GPT entry array CRC 0x{:08X} does not match stored 0x{:08X}",
            entries_crc, stored_entries_crc
        )));
    }

    let mut entries = Vec::new();
    for raw in array.chunks_exact(entry_size) {
        let mut type_guid = [0u8; 16];
        type_guid.copy_from_slice(&raw[..16]);
        if type_guid == [0u8; 16] {
            break;
        }

        let first_lba = le_u64!(raw, 32);
        let last_lba = le_u64!(raw, 40);
        let attributes = le_u64!(raw, 48);
        let name = utf16_name(&raw[56..GPT_ENTRY_SIZE]);

        let blocks = last_lba
            .checked_add(1)
            .and_then(|end| end.checked_sub(first_lba))
            .filter(|&n| n > 0);
        let Some(blocks) = blocks else {
            return Err(Error::malformed(format!(
                "Partition '{}' spans LBA {} to {}, not a valid range",
                name, first_lba, last_lba
            )));
        };

        entries.push(PartitionEntry {
            name,
            start_lba: first_lba,
            blocks,
            type_guid,
            attributes,
        });
    }

    Ok(entries)
}

fn parse_pmt(blob: &[u8], bs: usize) -> Result<Vec<PartitionEntry>> {
    let count = le_u32!(blob, 4) as usize;
    if count > MAX_ENTRIES {
        return Err(Error::malformed(format!("PMT declares {} entries", count)));
    }

    let bs = bs as u64;
    let mut entries = Vec::new();
    for raw in blob[8..].chunks_exact(PMT_ENTRY_SIZE).take(count) {
        let name_bytes = &raw[..64];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(64);
        if name_len == 0 {
            break;
        }
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        let size = le_u64!(raw, 64);
        let offset = le_u64!(raw, 72);
        let attributes = le_u64!(raw, 80);

        if offset % bs != 0 {
            return Err(Error::malformed(format!(
                "Partition '{}' starts at 0x{:X}, not block aligned",
                name, offset
            )));
        }

        let (start_lba, blocks) = (offset / bs, size.div_ceil(bs));
        if start_lba.checked_add(blocks).is_none() {
            return Err(Error::malformed(format!(
                "Partition '{}' at 0x{:X} with size 0x{:X} runs past the LBA range",
                name, offset, size
            )));
        }

        entries.push(PartitionEntry {
            name,
            start_lba,
            blocks,
            type_guid: [0u8; 16],
            attributes,
        });
    }

    if entries.len() < count && blob.len() < 8 + count * PMT_ENTRY_SIZE {
        warn!("PMT declares {} entries but only {} fit in the blob", count, entries.len());
    }

    Ok(entries)
}

fn utf16_name(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn check_overlaps(entries: &[PartitionEntry]) -> Result<()> {
    let mut sorted: Vec<&PartitionEntry> = entries.iter().filter(|e| e.blocks > 0).collect();
    sorted.sort_by_key(|e| e.start_lba);

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.end_lba() > b.start_lba {
            return Err(Error::malformed(format!(
                "Partitions '{}' [{}..{}) and '{}' [{}..{}) overlap",
                a.name,
                a.start_lba,
                a.end_lba(),
                b.name,
                b.start_lba,
                b.end_lba()
            )));
        }
    }

    Ok(())
}

fn check_capacity(entries: &[PartitionEntry], capacity: u64) -> Result<CapacityCheck> {
    if capacity == 0 {
        return Ok(CapacityCheck::Exact);
    }

    let end = entries.iter().map(|e| e.end_lba()).max().unwrap_or(0);
    if end > capacity.saturating_add(CAPACITY_TOLERANCE_BLOCKS) {
        return Err(Error::malformed(format!(
            "Table ends at LBA {}, past the device capacity of {} blocks",
            end, capacity
        )));
    }

    Ok(match end.cmp(&capacity) {
        std::cmp::Ordering::Equal => CapacityCheck::Exact,
        std::cmp::Ordering::Greater => {
            warn!("Table overruns the reported capacity by {} blocks", end - capacity);
            CapacityCheck::Overrun(end - capacity)
        }
        std::cmp::Ordering::Less => CapacityCheck::Underrun(capacity - end),
    })
}
