/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use log::{info, warn};
use mtkflash::{Device, Error};

use crate::cli::MtkCommand;
use crate::cli::common::{CommandMetadata, RegionArgs};
use crate::cli::helpers::FlashProgress;

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub region: RegionArgs,
    /// The file to write
    pub file: PathBuf,
}

impl CommandMetadata for WriteArgs {
    fn visible_aliases() -> &'static [&'static str] {
        &["w"]
    }

    fn about() -> &'static str {
        "Write a file to a partition."
    }

    fn long_about() -> &'static str {
        "Write a file to the start of a partition or raw range. The data is zero padded to whole blocks."
    }
}

#[async_trait]
impl MtkCommand for WriteArgs {
    async fn run(&self, dev: &mut Device) -> Result<()> {
        let region = self.region.region()?;
        let data = tokio::fs::read(&self.file).await?;

        let pb = FlashProgress::new(data.len() as u64);
        let mut progress = pb.callback("Writing flash", "Write complete!");

        match dev.write_region(&region, &data, &mut progress).await {
            Ok(report) => {
                if report.padding > 0 {
                    info!("Padded with {} zero bytes to whole blocks", report.padding);
                }
                info!("Wrote {} bytes to {}", report.bytes_written, region);
                Ok(())
            }
            Err(e) => {
                pb.abandon("Write failed!");
                if let Error::WriteAborted { offset, .. } = e.root() {
                    warn!("The first {:#X} bytes are on the device", offset);
                }
                Err(e.into())
            }
        }
    }
}
