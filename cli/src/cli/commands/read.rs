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
use crate::cli::common::{CommandMetadata, RegionArgs};
use crate::cli::helpers::FlashProgress;

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub region: RegionArgs,
    /// The destination file
    pub output_file: PathBuf,
    /// Read only this many bytes from the start of the target
    #[arg(long, value_parser = maybe_hex::<usize>)]
    pub length: Option<usize>,
}

impl CommandMetadata for ReadArgs {
    fn aliases() -> &'static [&'static str] {
        &["r"]
    }

    fn visible_aliases() -> &'static [&'static str] {
        &["r"]
    }

    fn about() -> &'static str {
        "Read a partition from the device and save it to a file."
    }

    fn long_about() -> &'static str {
        "Read a partition, a block range of it, or a raw section range and save it to the given file."
    }
}

#[async_trait]
impl MtkCommand for ReadArgs {
    async fn run(&self, dev: &mut Device) -> Result<()> {
        let region = self.region.region()?;
        let pb = FlashProgress::new(0);
        let mut progress = pb.callback("Reading flash", "Read complete!");

        let data = match dev.read_region(&region, self.length, &mut progress).await {
            Ok(data) => data,
            Err(e) => {
                pb.abandon("Read failed!");
                return Err(e.into());
            }
        };

        tokio::fs::write(&self.output_file, &data).await?;
        info!("Saved {} bytes of {} to {}", data.len(), region, self.output_file.display());
        Ok(())
    }
}
