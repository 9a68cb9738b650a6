/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use clap::Args;
use human_bytes::human_bytes;
use log::info;
use mtkflash::{Device, Section};

use crate::cli::MtkCommand;
use crate::cli::common::CommandMetadata;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Also start the DA and report the storage
    #[arg(long)]
    pub storage: bool,
}

impl CommandMetadata for InfoArgs {
    fn visible_aliases() -> &'static [&'static str] {
        &["i"]
    }

    fn about() -> &'static str {
        "Show what the device reports about itself."
    }

    fn long_about() -> &'static str {
        "Identify the chip through the BROM or Preloader. With --storage the DA is started and the storage geometry is printed too."
    }
}

#[async_trait]
impl MtkCommand for InfoArgs {
    fn needs_da(&self) -> bool {
        self.storage
    }

    async fn run(&self, dev: &mut Device) -> Result<()> {
        let chip = dev.chip_info().cloned().ok_or_else(|| anyhow!("Device was not identified"))?;

        info!("Boot stage:  {}", chip.boot_stage);
        info!("HW code:     0x{:04X}", chip.hw_code);
        info!("HW sub code: 0x{:04X}", chip.hw_sub_code);
        info!("HW version:  0x{:04X}", chip.hw_ver);
        info!("SW version:  0x{:04X}", chip.sw_ver);
        if let Some(config) = dev.dialects().lookup(chip.hw_code) {
            info!("Chip:        {} ({} DA)", config.name, config.dialect);
        }
        if !chip.soc_id.is_empty() {
            info!("SoC ID:      {}", chip.soc_id_hex());
        }
        if !chip.meid.is_empty() {
            info!("MEID:        {}", chip.meid_hex());
        }

        if self.storage {
            let storage = dev.storage_info().await?;
            info!("Storage:     {}, {} byte blocks", storage.kind, storage.block_size);
            for section in [Section::User, Section::Boot1, Section::Boot2] {
                let size = storage.section_size(section);
                info!("  {:<6} {:#X} ({})", section.to_string(), size, human_bytes(size as f64));
            }
            if let Ok(speed) = dev.usb_speed().await {
                info!("USB speed:   0x{:X}", speed);
            }
        }

        Ok(())
    }
}
