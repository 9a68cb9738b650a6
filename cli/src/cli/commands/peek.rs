/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use clap_num::maybe_hex;
use log::info;
use mtkflash::Device;

use crate::cli::MtkCommand;
use crate::cli::common::CommandMetadata;

#[derive(Args, Debug)]
pub struct PeekArgs {
    /// The address to read from.
    #[clap(value_parser=maybe_hex::<u32>)]
    pub address: u32,
    /// The number of 32-bit words to read.
    #[clap(value_parser=maybe_hex::<u32>, default_value = "1")]
    pub count: u32,
    /// Also save the words (little endian) to this file.
    #[arg(long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,
}

impl CommandMetadata for PeekArgs {
    fn about() -> &'static str {
        "Peek memory."
    }

    fn long_about() -> &'static str {
        "Read 32-bit words through the BROM or Preloader. No DA is started for this command."
    }
}

#[async_trait]
impl MtkCommand for PeekArgs {
    fn needs_da(&self) -> bool {
        false
    }

    async fn run(&self, dev: &mut Device) -> Result<()> {
        info!("Reading {} words from 0x{:08X}...", self.count, self.address);
        let words = dev.read32(self.address, self.count).await?;

        for (i, word) in words.iter().enumerate() {
            let addr = self.address.wrapping_add(i as u32 * 4);
            info!("0x{:08X}: 0x{:08X}", addr, word);
        }

        if let Some(path) = &self.output_file {
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            tokio::fs::write(path, &bytes).await?;
            info!("Memory readback saved to {}", path.display());
        }

        Ok(())
    }
}
