/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use clap::Args;
use log::info;
use mtkflash::Device;

use crate::cli::MtkCommand;
use crate::cli::common::{CommandMetadata, RegionArgs};
use crate::cli::helpers::FlashProgress;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub region: RegionArgs,
    /// The file the device contents are compared against
    pub file: PathBuf,
}

impl CommandMetadata for VerifyArgs {
    fn about() -> &'static str {
        "Compare a partition against a file."
    }
}

#[async_trait]
impl MtkCommand for VerifyArgs {
    async fn run(&self, dev: &mut Device) -> Result<()> {
        let region = self.region.region()?;
        let expected = tokio::fs::read(&self.file).await?;

        let pb = FlashProgress::new(expected.len() as u64);
        let mut progress = pb.callback("Verifying", "Readback complete!");

        let matches = match dev.verify_region(&region, &expected, &mut progress).await {
            Ok(matches) => matches,
            Err(e) => {
                pb.abandon("Verify failed!");
                return Err(e.into());
            }
        };

        if !matches {
            bail!("{} does not match {}", region, self.file.display());
        }
        info!("{} matches {}", region, self.file.display());
        Ok(())
    }
}
