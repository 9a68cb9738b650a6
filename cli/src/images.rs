/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use anyhow::{Context, Result};
use log::info;
use mtkflash::da::{DA, DAFile, NextStageProof, PayloadImage};
use mtkflash::{ChipInfo, ImageProvider};
use tokio::fs::read;

use crate::settings::Settings;

/// Word a payload sends back once it runs.
pub const PAYLOAD_ACK: u32 = 0xA1A2A3A4;

/// The DA file given on the command line plus an optional payload, used for
/// whatever chip answers.
#[derive(Debug)]
pub struct CliImages {
    da: DAFile,
    payload: Option<PayloadImage>,
}

impl CliImages {
    pub async fn load(settings: &Settings) -> Result<Self> {
        let da_path = settings
            .da
            .as_ref()
            .context("This command needs a DA file, pass --da or set `da` in the settings")?;
        let raw = read(da_path).await.with_context(|| format!("Failed to read {}", da_path.display()))?;
        let da = DAFile::parse_da(&raw)?;

        let payload = match &settings.payload {
            Some(path) => {
                let data = read(path).await.with_context(|| format!("Failed to read {}", path.display()))?;
                info!("Using payload {} ({} bytes) at 0x{:08X}", path.display(), data.len(), settings.payload_addr);
                Some(PayloadImage {
                    data,
                    addr: settings.payload_addr,
                    entry: settings.payload_addr,
                    proof: NextStageProof::AckWord(PAYLOAD_ACK),
                })
            }
            None => None,
        };

        Ok(CliImages { da, payload })
    }
}

impl ImageProvider for CliImages {
    fn payload(&self, _chip: &ChipInfo) -> Option<PayloadImage> {
        self.payload.clone()
    }

    fn download_agent(&self, chip: &ChipInfo) -> Option<DA> {
        self.da.download_agent(chip)
    }
}
