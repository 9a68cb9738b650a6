/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, info};

use crate::connection::Connection;
use crate::connection::port::ConnectionType;
use crate::core::cancel::CancelToken;
use crate::core::chipinfo::ChipInfo;
use crate::core::partition::gpt_probe_len;
use crate::core::storage::{Section, StorageInfo};
use crate::da::xflash::cmds::*;
use crate::da::xflash::storage::detect_storage;
use crate::da::xflash::{XFlash, flash};
use crate::da::{DA, DAProtocol};
use crate::error::{Error, Result};
use crate::{le_u16, le_u32};

#[async_trait::async_trait]
impl DAProtocol for XFlash {
    async fn activate(&mut self, da: &DA) -> Result<()> {
        self.sync_stage1().await?;
        self.conn.connection_type = ConnectionType::Da;

        // Let's get the packet length in DA1, so that we can have decent speeds
        flash::get_packet_length(self).await?;

        if let Some(da2) = da.get_da2() {
            let data = da2.unsigned_data().to_vec();
            self.boot_to(da2.addr, &data).await?;
            info!("Successfully uploaded and executed DA2");
            // DA2 operates on higher speeds
            flash::get_packet_length(self).await?;
        } else {
            debug!("DA has a single stage, no BOOT_TO needed");
        }

        self.storage = Some(detect_storage(self).await?);
        Ok(())
    }

    async fn identify(&mut self, chip: &ChipInfo) -> Result<ChipInfo> {
        let resp = self.devctrl(Cmd::GetChipId, None).await?;
        if resp.len() < 8 {
            return Err(Error::proto(format!("Chip id response of {} bytes", resp.len())));
        }

        Ok(ChipInfo {
            hw_code: le_u16!(resp, 0),
            hw_sub_code: le_u16!(resp, 2),
            hw_ver: le_u16!(resp, 4),
            sw_ver: le_u16!(resp, 6),
            ..chip.clone()
        })
    }

    fn storage(&self) -> Option<StorageInfo> {
        self.storage
    }

    async fn read_partition_blob(&mut self, storage: &StorageInfo) -> Result<Vec<u8>> {
        let len = (gpt_probe_len(storage.block_size) as u64).min(storage.user_size) as usize;
        let mut progress = |_: usize, _: usize| {};
        flash::read_flash(self, 0, len, Section::User, &mut progress).await
    }

    async fn read_flash(
        &mut self,
        addr: u64,
        size: usize,
        section: Section,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<u8>> {
        flash::read_flash(self, addr, size, section, progress).await
    }

    async fn write_flash(
        &mut self,
        addr: u64,
        data: &[u8],
        section: Section,
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        flash::write_flash(self, addr, data, section, cancel, progress).await
    }

    async fn erase_flash(
        &mut self,
        addr: u64,
        size: u64,
        section: Section,
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        flash::erase_flash(self, addr, size, section, cancel, progress).await
    }

    async fn get_usb_speed(&mut self) -> Result<u32> {
        let usb_speed = self.devctrl(Cmd::GetUsbSpeed, None).await?;
        debug!("USB Speed Data: {:?}", usb_speed);
        if usb_speed.len() < 4 {
            return Err(Error::proto("Short USB speed response"));
        }
        Ok(le_u32!(usb_speed, 0))
    }

    async fn shutdown(&mut self, reboot: bool) -> Result<()> {
        self.ensure_idle()?;
        info!("Sending {} to DA", if reboot { "reboot" } else { "shutdown" });

        // reset mode | async mode | boot mode | reserved | reserved
        let mut param = Vec::with_capacity(20);
        param.extend_from_slice(&(reboot as u32).to_le_bytes());
        param.extend_from_slice(&[0u8; 16]);

        self.send_cmd(Cmd::Shutdown).await?;
        self.send(&param).await
    }

    fn is_stranded(&self) -> bool {
        self.mid_transfer
    }

    fn get_connection(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
