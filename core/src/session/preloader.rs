/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::info;

use crate::connection::Connection;
use crate::core::chipinfo::{BootStage, ChipInfo};
use crate::da::DAEntryRegion;
use crate::error::Result;
use crate::session::brom::upload_stage;
use crate::session::{IDENTIFY_RETRIES, identify, retry_timeout};

/// Session with a running Preloader. It only knows how to identify the
/// chip, peek memory and take a DA.
#[derive(Debug)]
pub struct PreloaderSession {
    conn: Connection,
    chip: ChipInfo,
}

impl PreloaderSession {
    pub fn new(conn: Connection, chip: ChipInfo) -> Self {
        info!("Preloader session opened");
        PreloaderSession { conn, chip }
    }

    pub fn chip_info(&self) -> &ChipInfo {
        &self.chip
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub async fn identify(&mut self) -> Result<ChipInfo> {
        let conn = &mut self.conn;
        let version = retry_timeout!(conn, IDENTIFY_RETRIES, "GetBlVer", conn.get_bl_ver())?;
        let chip = identify(&mut self.conn, BootStage::Preloader { version }).await?;
        self.chip = chip.clone();
        Ok(chip)
    }

    pub async fn read32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        self.conn.read32(address, count).await
    }

    /// Uploads the first DA stage in `packet_size` chunks and jumps to it.
    /// A bad chunk ack restarts the whole upload.
    pub async fn send_da(&mut self, stage: &DAEntryRegion, packet_size: usize) -> Result<()> {
        upload_stage(&mut self.conn, stage, packet_size).await
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}
