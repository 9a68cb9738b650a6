/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use anyhow::{Result, anyhow, bail};
use clap::Args;
use clap_num::maybe_hex;
use mtkflash::{Section, StorageRegion};

/// Where a storage command operates.
///
/// `TARGET` is either a partition name, or `SECTION:START+BLOCKS` for a
/// raw block range of a hardware section (`user`, `boot1`, `boot2`).
#[derive(Args, Debug)]
pub struct RegionArgs {
    /// Partition name, or SECTION:START+BLOCKS
    #[arg(value_name = "TARGET")]
    pub target: String,
    /// First block inside the partition
    #[arg(long, value_parser = maybe_hex::<u64>, requires = "blocks")]
    pub start: Option<u64>,
    /// Number of blocks inside the partition
    #[arg(long, value_parser = maybe_hex::<u64>)]
    pub blocks: Option<u64>,
}

impl RegionArgs {
    pub fn region(&self) -> Result<StorageRegion> {
        if let Some((section, range)) = self.target.split_once(':') {
            if self.start.is_some() || self.blocks.is_some() {
                bail!("--start and --blocks only apply to partitions");
            }
            return parse_raw(section, range);
        }

        Ok(match self.blocks {
            Some(blocks) => StorageRegion::PartitionRange {
                name: self.target.clone(),
                offset_blocks: self.start.unwrap_or(0),
                blocks,
            },
            None => StorageRegion::partition(self.target.as_str()),
        })
    }
}

fn parse_raw(section: &str, range: &str) -> Result<StorageRegion> {
    let section: Section = section.parse()?;
    let (start, blocks) = range
        .split_once('+')
        .ok_or_else(|| anyhow!("Raw range '{}' is not START+BLOCKS", range))?;

    Ok(StorageRegion::Raw {
        section,
        start_lba: maybe_hex::<u64>(start).map_err(|e| anyhow!("Bad start block: {}", e))?,
        blocks: maybe_hex::<u64>(blocks).map_err(|e| anyhow!("Bad block count: {}", e))?,
    })
}

/// A trait for providing metadata for CLI commands.
/// This trait can be implemented by command structs to give additional info
pub trait CommandMetadata {
    fn aliases() -> &'static [&'static str] {
        &[]
    }
    fn visible_aliases() -> &'static [&'static str] {
        &[]
    }
    fn about() -> &'static str {
        ""
    }
    fn long_about() -> &'static str {
        ""
    }
    fn hide() -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: &str, start: Option<u64>, blocks: Option<u64>) -> RegionArgs {
        RegionArgs { target: target.into(), start, blocks }
    }

    #[test]
    fn partition_targets() {
        assert_eq!(args("boot", None, None).region().unwrap(), StorageRegion::partition("boot"));
        assert_eq!(
            args("boot", Some(2), Some(8)).region().unwrap(),
            StorageRegion::PartitionRange { name: "boot".into(), offset_blocks: 2, blocks: 8 }
        );
    }

    #[test]
    fn raw_targets() {
        assert_eq!(
            args("boot1:0x10+4", None, None).region().unwrap(),
            StorageRegion::Raw { section: Section::Boot1, start_lba: 0x10, blocks: 4 }
        );
        assert!(args("boot1:16", None, None).region().is_err());
        assert!(args("lun9:0+1", None, None).region().is_err());
        assert!(args("user:0+1", None, Some(1)).region().is_err());
    }
}
