/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Pre-XFlash download agents. There is no framing: commands are single
//! bytes with big endian parameters, data moves in raw packets each
//! followed by its additive checksum.
pub mod cmds;
pub mod flash;

use log::{debug, info, warn};

use crate::codec::checksum::additive16;
use crate::connection::Connection;
use crate::connection::port::ConnectionType;
use crate::core::cancel::CancelToken;
use crate::core::chipinfo::ChipInfo;
use crate::core::partition::{GPT_SIGNATURE, MAX_ENTRIES, PMT_ENTRY_SIZE, gpt_probe_len};
use crate::core::storage::{Section, StorageInfo, StorageKind};
use crate::da::legacy::cmds::*;
use crate::da::{DA, DAProtocol};
use crate::error::{DaStatus, Error, Result};

/// Sync byte the legacy DA sends once it runs.
pub const DA_SYNC_BYTE: u8 = 0xC0;
/// Bytes formatted per `FORMAT` command.
pub const FORMAT_CHUNK: u64 = 0x10_0000;
/// Signature, entry count and the largest table the parser accepts.
pub const MAX_PMT_LEN: usize = 8 + PMT_ENTRY_SIZE * MAX_ENTRIES;

#[derive(Debug)]
pub struct LegacyDa {
    pub conn: Connection,
    chip: ChipInfo,
    storage: Option<StorageInfo>,
    packet_size: usize,
    version: Option<(u8, u8)>,
}

impl LegacyDa {
    pub fn new(conn: Connection, chip: ChipInfo, packet_size: usize) -> Self {
        LegacyDa { conn, chip, storage: None, packet_size: packet_size.max(1), version: None }
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Major and minor version announced during the sync.
    pub fn version(&self) -> Option<(u8, u8)> {
        self.version
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    async fn send_cmd(&mut self, cmd: Cmd, kind: StorageKind, section: Section) -> Result<()> {
        debug!("[TX] Legacy command 0x{:02X} ({:?})", cmd as u8, cmd);
        self.conn.write(&[cmd as u8, kind.as_u32() as u8, section.as_u32(kind) as u8]).await
    }

    /// Reads the answer to a command: `ACK`, or `NACK` followed by a status word.
    async fn expect_ack(&mut self) -> Result<()> {
        match self.conn.read_u8().await? {
            ACK => Ok(()),
            NACK => {
                let status = self.conn.read_u32_be().await?;
                debug!("[RX] NACK with status 0x{:08X}", status);
                Err(Error::Status(DaStatus(status)))
            }
            other => Err(Error::proto(format!("Expected ACK, got 0x{:02X}", other))),
        }
    }

    /// Reads `len` bytes followed by their checksum. Returns the data and
    /// whether the checksum matched.
    async fn recv_checked(&mut self, len: usize) -> Result<(Vec<u8>, bool)> {
        let data = self.conn.read_exact(len).await?;
        let expected = self.conn.read_u16_be().await?;
        let actual = additive16(&data);
        if actual != expected {
            warn!("Packet checksum 0x{:04X} does not match 0x{:04X}", actual, expected);
        }
        Ok((data, actual == expected))
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        self.storage.ok_or_else(|| Error::proto("Storage was not reported yet"))
    }

    // kind u8 | block_size u32 | user u64 | boot1 u64 | boot2 u64
    async fn read_storage_report(&mut self) -> Result<StorageInfo> {
        let kind_code = self.conn.read_u8().await?;
        let block_size = self.conn.read_u32_be().await?;
        let mut sizes = [0u64; 3];
        for size in sizes.iter_mut() {
            let mut buf = [0u8; 8];
            self.conn.read_into(&mut buf).await?;
            *size = u64::from_be_bytes(buf);
        }

        let kind = StorageKind::from_u32(kind_code as u32)
            .ok_or_else(|| Error::proto(format!("Unknown storage kind 0x{:02X}", kind_code)))?;
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(Error::proto(format!("{} reports an invalid block size {}", kind, block_size)));
        }

        Ok(StorageInfo {
            kind,
            block_size,
            user_size: sizes[0],
            boot1_size: sizes[1],
            boot2_size: sizes[2],
        })
    }

    async fn read_pmt(&mut self) -> Result<Vec<u8>> {
        let storage = self.storage_info()?;
        self.send_cmd(Cmd::GetPartitionTable, storage.kind, Section::User).await?;
        self.expect_ack().await?;

        let len = self.conn.read_u32_be().await? as usize;
        if len > MAX_PMT_LEN {
            self.conn.write(&[ABORT]).await?;
            return Err(Error::proto(format!("DA announced a PMT of {:#X} bytes", len)));
        }
        let (blob, ok) = self.recv_checked(len).await?;
        if ok {
            self.conn.write(&[ACK]).await?;
            return Ok(blob);
        }

        self.conn.write(&[NACK]).await?;
        let (blob, ok) = self.recv_checked(len).await?;
        if !ok {
            self.conn.write(&[ABORT]).await?;
            return Err(Error::ReadIntegrity { offset: 0 });
        }
        self.conn.write(&[ACK]).await?;
        Ok(blob)
    }
}

#[async_trait::async_trait]
impl DAProtocol for LegacyDa {
    async fn activate(&mut self, da: &DA) -> Result<()> {
        let window = self.conn.timeouts.stage_confirm;
        let sync = match self.conn.read_u8_within(window).await {
            Ok(byte) => byte,
            Err(Error::Timeout(_)) => {
                return Err(Error::DeviceUnresponsive(format!(
                    "legacy DA sent no sync byte within {:?}",
                    window
                )));
            }
            Err(e) => return Err(e),
        };
        if sync != DA_SYNC_BYTE {
            return Err(Error::proto(format!("Incorrect sync byte 0x{:02X} received", sync)));
        }

        let major = self.conn.read_u8().await?;
        let minor = self.conn.read_u8().await?;
        self.version = Some((major, minor));
        self.conn.write(&[ACK]).await?;
        self.conn.connection_type = ConnectionType::Da;
        info!("Legacy DA v{}.{} is running", major, minor);

        if da.get_da2().is_some() {
            warn!("Legacy DA runs a single stage, ignoring the second one");
        }

        let storage = self.read_storage_report().await?;
        self.conn.write(&[ACK]).await?;
        info!("{} storage, block size {}", storage.kind, storage.block_size);
        self.storage = Some(storage);
        Ok(())
    }

    async fn identify(&mut self, chip: &ChipInfo) -> Result<ChipInfo> {
        // The legacy DA has no chip id query
        self.chip = chip.clone();
        Ok(self.chip.clone())
    }

    fn storage(&self) -> Option<StorageInfo> {
        self.storage
    }

    async fn read_partition_blob(&mut self, storage: &StorageInfo) -> Result<Vec<u8>> {
        let len = (gpt_probe_len(storage.block_size) as u64).min(storage.user_size) as usize;
        let mut progress = |_: usize, _: usize| {};
        let probe = flash::read_flash(self, 0, len, Section::User, &mut progress).await?;

        let bs = storage.block_size as usize;
        if probe.get(bs..bs + GPT_SIGNATURE.len()) == Some(&GPT_SIGNATURE[..]) {
            return Ok(probe);
        }

        debug!("No GPT on the user area, asking the DA for its PMT");
        self.read_pmt().await
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
        Err(Error::unsupported("Legacy DA does not report the USB speed"))
    }

    async fn shutdown(&mut self, reboot: bool) -> Result<()> {
        info!("Sending {} to DA", if reboot { "reboot" } else { "shutdown" });
        self.conn.write(&[Cmd::Shutdown as u8, reboot as u8]).await?;
        self.expect_ack().await
    }

    fn get_connection(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
