/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;

use crate::core::partition::PartitionTable;
use crate::core::storage::{Section, StorageInfo};
use crate::error::{Error, Result};

/// What a read, write or erase targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRegion {
    /// A whole partition of the user area.
    Partition(String),
    /// `blocks` blocks starting `offset_blocks` into a partition.
    PartitionRange { name: String, offset_blocks: u64, blocks: u64 },
    /// A raw block range of a hardware section.
    Raw { section: Section, start_lba: u64, blocks: u64 },
}

impl StorageRegion {
    pub fn partition(name: impl Into<String>) -> Self {
        StorageRegion::Partition(name.into())
    }

    pub fn needs_table(&self) -> bool {
        !matches!(self, StorageRegion::Raw { .. })
    }

    /// Checks the region against the table and the storage geometry.
    /// Nothing is sent to the device until this succeeded.
    pub fn resolve(
        &self,
        table: Option<&PartitionTable>,
        storage: &StorageInfo,
    ) -> Result<ResolvedRegion> {
        match self {
            StorageRegion::Partition(name) => {
                let table = table.ok_or_else(|| Error::proto("Partition table not read yet"))?;
                let entry = table
                    .find(name)
                    .ok_or_else(|| Error::out_of_range(format!("No partition named '{}'", name)))?;

                within_user_area(
                    ResolvedRegion {
                        section: Section::User,
                        start_lba: entry.start_lba,
                        blocks: entry.blocks,
                        block_size: table.block_size,
                    },
                    storage,
                )
            }
            StorageRegion::PartitionRange { name, offset_blocks, blocks } => {
                let table = table.ok_or_else(|| Error::proto("Partition table not read yet"))?;
                let entry = table
                    .find(name)
                    .ok_or_else(|| Error::out_of_range(format!("No partition named '{}'", name)))?;

                let end = offset_blocks.checked_add(*blocks);
                if *blocks == 0 || end.is_none_or(|end| end > entry.blocks) {
                    return Err(Error::out_of_range(format!(
                        "Blocks {}+{} do not fit in '{}' ({} blocks)",
                        offset_blocks, blocks, name, entry.blocks
                    )));
                }

                within_user_area(
                    ResolvedRegion {
                        section: Section::User,
                        start_lba: entry.start_lba + offset_blocks,
                        blocks: *blocks,
                        block_size: table.block_size,
                    },
                    storage,
                )
            }
            StorageRegion::Raw { section, start_lba, blocks } => {
                let capacity = storage.section_blocks(*section);
                let end = start_lba.checked_add(*blocks);
                if *blocks == 0 || end.is_none_or(|end| end > capacity) {
                    return Err(Error::out_of_range(format!(
                        "LBA {}+{} is outside {} ({} blocks)",
                        start_lba, blocks, section, capacity
                    )));
                }

                Ok(ResolvedRegion {
                    section: *section,
                    start_lba: *start_lba,
                    blocks: *blocks,
                    block_size: storage.block_size,
                })
            }
        }
    }
}

// Tables may overrun the reported capacity a little. The blocks past it
// are never addressed.
fn within_user_area(region: ResolvedRegion, storage: &StorageInfo) -> Result<ResolvedRegion> {
    let capacity = storage.section_blocks(Section::User);
    let end = region.start_lba.saturating_add(region.blocks);
    if capacity != 0 && end > capacity {
        return Err(Error::out_of_range(format!(
            "LBA {}+{} runs past the user area ({} blocks)",
            region.start_lba, region.blocks, capacity
        )));
    }
    Ok(region)
}

impl fmt::Display for StorageRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageRegion::Partition(name) => write!(f, "{}", name),
            StorageRegion::PartitionRange { name, offset_blocks, blocks } => {
                write!(f, "{}[{}+{}]", name, offset_blocks, blocks)
            }
            StorageRegion::Raw { section, start_lba, blocks } => {
                write!(f, "{}@{}+{}", section, start_lba, blocks)
            }
        }
    }
}

/// A validated region, in device terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRegion {
    pub section: Section,
    pub start_lba: u64,
    pub blocks: u64,
    pub block_size: u32,
}

impl ResolvedRegion {
    pub fn byte_offset(&self) -> u64 {
        self.start_lba * self.block_size as u64
    }

    pub fn byte_len(&self) -> u64 {
        self.blocks * self.block_size as u64
    }

    /// `len` rounded up to whole blocks.
    pub fn padded_len(&self, len: usize) -> usize {
        let bs = self.block_size as usize;
        len.div_ceil(bs) * bs
    }
}
