/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use log::info;
use mtkflash::Device;

use crate::cli::MtkCommand;
use crate::cli::common::{CommandMetadata, RegionArgs};
use crate::cli::helpers::FlashProgress;

#[derive(Args, Debug)]
pub struct EraseArgs {
    #[command(flatten)]
    pub region: RegionArgs,
}

impl CommandMetadata for EraseArgs {
    fn visible_aliases() -> &'static [&'static str] {
        &["e"]
    }

    fn about() -> &'static str {
        "Erase a partition."
    }
}

#[async_trait]
impl MtkCommand for EraseArgs {
    async fn run(&self, dev: &mut Device) -> Result<()> {
        let region = self.region.region()?;
        let pb = FlashProgress::new(0);
        let mut progress = pb.callback("Erasing flash", "Erase complete!");

        if let Err(e) = dev.erase_region(&region, &mut progress).await {
            pb.abandon("Erase failed!");
            return Err(e.into());
        }

        info!("Erased {}", region);
        Ok(())
    }
}
