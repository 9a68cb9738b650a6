/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use human_bytes::human_bytes;
use log::{info, warn};
use mtkflash::Device;
use mtkflash::core::partition::CapacityCheck;

use crate::cli::MtkCommand;
use crate::cli::common::CommandMetadata;

#[derive(Args, Debug)]
pub struct PgptArgs {
    /// Also save the raw table bytes to this file
    #[arg(long, value_name = "FILE")]
    pub dump: Option<PathBuf>,
}

impl CommandMetadata for PgptArgs {
    fn aliases() -> &'static [&'static str] {
        &["gpt", "partitions"]
    }

    fn about() -> &'static str {
        "Print the partition table."
    }
}

#[async_trait]
impl MtkCommand for PgptArgs {
    async fn run(&self, dev: &mut Device) -> Result<()> {
        let table = dev.list_partitions().await?;
        let bs = table.block_size;

        info!("Partition Table ({}, {} entries):", table.format, table.len());
        for p in &table.entries {
            let size = p.byte_len(bs);
            info!(
                "Name: {:<15} \t Start: 0x{:08X} \t Blocks: 0x{:08X} \t Size: 0x{:010X} ({})",
                p.name,
                p.start_lba,
                p.blocks,
                size,
                human_bytes(size as f64)
            );
        }

        match table.capacity_check {
            CapacityCheck::Exact => {}
            CapacityCheck::Overrun(blocks) => {
                warn!("Table ends {} blocks past the reported capacity", blocks)
            }
            CapacityCheck::Underrun(blocks) => info!("{} blocks after the last partition are unused", blocks),
        }

        if let Some(path) = &self.dump {
            let raw = dev.dump_partition_table().await?;
            tokio::fs::write(path, &raw).await?;
            info!("Saved {} bytes of raw table to {}", raw.len(), path.display());
        }

        Ok(())
    }
}
