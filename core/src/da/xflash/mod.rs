/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#[macro_use]
mod macros;
pub mod cmds;
mod da_protocol;
pub mod flash;
mod storage;

use log::{debug, info, warn};

use crate::codec::{Codec, Frame, FrameConfig};
use crate::connection::Connection;
use crate::core::storage::StorageInfo;
use crate::da::xflash::cmds::*;
use crate::error::{DaStatus, Error, Result};
use crate::{le_u16, le_u32};

/// Sync byte DA1 sends right after the jump.
pub const DA_SYNC_BYTE: u8 = 0xC0;
/// Retransmissions asked for a corrupt control frame before giving up.
pub const MAX_FRAME_RETRIES: usize = 3;
/// Retransmissions asked for a corrupt read chunk.
pub const READ_RETRANSMITS: usize = 1;
/// Bytes formatted per `FORMAT` command.
pub const ERASE_CHUNK: u64 = 0x10_0000;

/// The V5 ("XFlash") DA dialect. Every host frame is answered by a status
/// frame, except the sync signal.
#[derive(Debug)]
pub struct XFlash {
    pub conn: Connection,
    codec: Codec,
    storage: Option<StorageInfo>,
    read_packet_length: Option<usize>,
    write_packet_length: Option<usize>,
    /// Set while the DA may still expect data of an unfinished transfer.
    mid_transfer: bool,
}

impl XFlash {
    pub fn new(conn: Connection, frame: FrameConfig) -> Self {
        XFlash {
            conn,
            codec: Codec::new(frame),
            storage: None,
            read_packet_length: None,
            write_packet_length: None,
            mid_transfer: false,
        }
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn packet_lengths(&self) -> (Option<usize>, Option<usize>) {
        (self.write_packet_length, self.read_packet_length)
    }

    async fn send_cmd(&mut self, cmd: Cmd) -> Result<()> {
        debug!("[TX] Sending Command: 0x{:08X} ({:?})", cmd as u32, cmd);
        self.send(&(cmd as u32).to_le_bytes()).await
    }

    /// Sends one payload and checks the status the DA answers with.
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.send_raw(data).await?;
        status_ok!(self);
        Ok(())
    }

    /// Sends one payload, split into as many frames as needed, without
    /// waiting for a status.
    async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.conn.write_frame(&self.codec, DataType::ProtocolFlow as u32, data).await
    }

    /// Reads a frame, asking for up to `retransmits` retransmissions when the
    /// checksum does not match.
    async fn recv_frame(&mut self, retransmits: usize) -> Result<Frame> {
        let mut attempt = 0;
        loop {
            match self.conn.read_frame(&self.codec).await {
                Err(Error::Framing(e)) if attempt < retransmits => {
                    attempt += 1;
                    warn!("Corrupt frame ({}), requesting retransmission {}/{}", e, attempt, retransmits);
                    self.conn
                        .write_frame(&self.codec, DataType::Retransmit as u32, &[])
                        .await?;
                }
                other => return other,
            }
        }
    }

    /// Reads a control frame. A frame that stays corrupt means the link
    /// can't be trusted anymore.
    async fn read_data(&mut self) -> Result<Vec<u8>> {
        match self.recv_frame(MAX_FRAME_RETRIES).await {
            Ok(frame) => Ok(frame.payload),
            Err(Error::Framing(e)) => Err(Error::io(format!(
                "Frame still corrupt after {} retransmissions: {}",
                MAX_FRAME_RETRIES, e
            ))),
            Err(e) => Err(e),
        }
    }

    async fn get_status(&mut self) -> Result<u32> {
        let data = self.read_data().await?;
        let status = match data.len() {
            2 => le_u16!(data, 0) as u32,
            4 => {
                let val = le_u32!(data, 0);
                if val == Cmd::Magic as u32 { 0 } else { val }
            }
            n if n > 4 => le_u32!(data, 0),
            n => return Err(Error::proto(format!("Status frame of {} bytes", n))),
        };

        debug!("[RX] Status: 0x{:08X}", status);
        match status {
            0 => Ok(status),
            sync if sync == Cmd::SyncSignal as u32 => Ok(status),
            _ => Err(Error::Status(DaStatus(status))),
        }
    }

    // With a parameter, the parameter is sent and nothing is read back.
    // Without one, the DA answers with a data frame followed by a status.
    async fn devctrl(&mut self, cmd: Cmd, param: Option<&[u8]>) -> Result<Vec<u8>> {
        self.send_cmd(Cmd::DeviceCtrl).await?;
        self.send_cmd(cmd).await?;

        if let Some(p) = param {
            self.send(p).await?;
            return Ok(Vec::new());
        }

        let data = self.read_data().await?;
        status_ok!(self);
        Ok(data)
    }

    /// Waits for DA1 to come up after the jump and sets up its environment.
    async fn sync_stage1(&mut self) -> Result<()> {
        let window = self.conn.timeouts.stage_confirm;
        let sync_byte = match self.conn.read_u8_within(window).await {
            Ok(byte) => byte,
            Err(Error::Timeout(_)) => {
                return Err(Error::DeviceUnresponsive(format!(
                    "DA1 sent no sync byte within {:?}",
                    window
                )));
            }
            Err(e) => return Err(e),
        };

        if sync_byte != DA_SYNC_BYTE {
            return Err(Error::proto(format!("Incorrect sync byte 0x{:02X} received", sync_byte)));
        }
        info!("Received DA1 sync byte");

        self.send_raw(&(Cmd::SyncSignal as u32).to_le_bytes()).await?;

        let mut env_param = Vec::new();
        env_param.extend_from_slice(&2u32.to_le_bytes()); // da_log_level = 2 (UART)
        env_param.extend_from_slice(&1u32.to_le_bytes()); // log_channel = 1
        env_param.extend_from_slice(&1u32.to_le_bytes()); // system_os = 1 (OS_LINUX)
        env_param.extend_from_slice(&0u32.to_le_bytes()); // ufs_provision = 0
        env_param.extend_from_slice(&0u32.to_le_bytes());

        self.send_cmd(Cmd::SetupEnvironment).await?;
        self.send(&env_param).await?;

        self.send_cmd(Cmd::SetupHwInitParams).await?;
        self.send(&[0u8; 4]).await?;

        status_any!(self, Cmd::SyncSignal as u32);

        info!("Received DA1 sync signal.");
        Ok(())
    }

    /// Uploads a later DA stage through the running one and waits for it to
    /// announce itself.
    async fn boot_to(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        info!("Sending BOOT_TO command to address 0x{:08X} with 0x{:X} bytes", addr, data.len());

        self.send_cmd(Cmd::BootTo).await?;

        // Addr (LE) | Length (LE)
        // 00000040000000002c83050000000000 -> addr=0x4000000, len=0x0005832c
        let mut param = Vec::new();
        param.extend_from_slice(&(addr as u64).to_le_bytes());
        param.extend_from_slice(&(data.len() as u64).to_le_bytes());

        self.send_raw(&param).await?;
        self.send_raw(data).await?;
        status_ok!(self);

        let window = self.conn.timeouts.stage_confirm;
        match tokio::time::timeout(window, self.get_status()).await {
            Ok(Ok(status)) if status == Cmd::SyncSignal as u32 => {}
            Ok(Ok(status)) => {
                return Err(Error::proto(format!("DA2 answered 0x{:08X} instead of sync", status)));
            }
            Ok(Err(Error::Timeout(_))) | Err(_) => {
                return Err(Error::DeviceUnresponsive("DA2 did not announce itself".into()));
            }
            Ok(Err(e)) => return Err(e),
        }

        info!("Successfully booted to DA2");
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.mid_transfer {
            return Err(Error::proto("DA is still inside an aborted transfer"));
        }
        Ok(())
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        self.storage.ok_or_else(|| Error::proto("Storage was not detected yet"))
    }
}
