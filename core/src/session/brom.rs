/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::sleep;

use crate::connection::Connection;
use crate::connection::command::{Command, HANDSHAKE_PROBE, HANDSHAKE_READY, HANDSHAKE_SEQ};
use crate::core::chipinfo::{BootStage, ChipInfo};
use crate::da::{DAEntryRegion, NextStageProof, PayloadImage};
use crate::error::{Error, Result};
use crate::session::preloader::PreloaderSession;
use crate::session::{IDENTIFY_RETRIES, identify, retry_timeout};

/// How many `0xA0` probes are sent before giving up on a handshake attempt.
pub const HANDSHAKE_PROBES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BromState {
    Disconnected,
    Handshaking,
    Identified,
    /// The payload was uploaded and jumped to, but nothing proved yet that it runs.
    PayloadSent,
    Escalated,
    Terminal,
}

/// Session with the Boot ROM, or with whatever answers the BROM handshake.
///
/// The handshake and the identify commands are the same for BROM and
/// Preloader; the BL version probe tells them apart, after which a
/// Preloader is handed over with [`BromSession::into_preloader`].
#[derive(Debug)]
pub struct BromSession {
    conn: Connection,
    state: BromState,
    handshaken: bool,
    chip: Option<ChipInfo>,
}

impl BromSession {
    pub fn new(conn: Connection) -> Self {
        BromSession { conn, state: BromState::Disconnected, handshaken: false, chip: None }
    }

    pub fn state(&self) -> BromState {
        self.state
    }

    pub fn chip_info(&self) -> Option<&ChipInfo> {
        self.chip.as_ref()
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Resets the link after a failed handshake attempt, so the next one
    /// starts from a clean buffer.
    pub async fn reset_link(&mut self) -> Result<()> {
        self.state = BromState::Disconnected;
        self.handshaken = false;
        self.conn.reset().await
    }

    /// Runs the start sequence. `delay` is waited before every byte of the
    /// sequence, some chips trip their watchdog when bytes arrive too fast.
    pub async fn handshake(&mut self, delay: Duration) -> Result<()> {
        self.state = BromState::Handshaking;
        info!("Waiting for device handshake...");

        if !self.probe(HANDSHAKE_PROBES, delay).await? {
            self.state = BromState::Disconnected;
            return Err(Error::HandshakeTimeout);
        }

        if let Err(e) = self.finish_handshake(delay).await {
            self.state = BromState::Disconnected;
            return Err(e);
        }

        self.handshaken = true;
        info!("Handshake completed!");
        Ok(())
    }

    async fn probe(&mut self, attempts: usize, delay: Duration) -> Result<bool> {
        let wait = self.conn.timeouts.probe;

        for _ in 0..attempts {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            self.conn.write(&[HANDSHAKE_PROBE]).await?;
            match self.conn.read_u8_within(wait).await {
                Ok(HANDSHAKE_READY) => return Ok(true),
                Ok(other) => debug!("[RX] Ignoring 0x{:02X} while probing", other),
                Err(Error::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(false)
    }

    async fn finish_handshake(&mut self, delay: Duration) -> Result<()> {
        let wait = self.conn.timeouts.probe;

        for byte in HANDSHAKE_SEQ {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            self.conn.write(&[byte]).await?;
            let reply = match self.conn.read_u8_within(wait).await {
                Ok(reply) => reply,
                Err(Error::Timeout(_)) => return Err(Error::HandshakeTimeout),
                Err(e) => return Err(e),
            };

            if reply != !byte {
                error!("Handshake byte 0x{:02X} answered with 0x{:02X}", byte, reply);
                return Err(Error::proto(format!(
                    "Handshake byte 0x{:02X} answered with 0x{:02X}, expected 0x{:02X}",
                    byte, reply, !byte
                )));
            }
        }

        Ok(())
    }

    /// Queries the identification registers. The BL version probe decides
    /// whether a BROM or a Preloader answered.
    pub async fn identify(&mut self) -> Result<ChipInfo> {
        if !self.handshaken {
            return Err(Error::proto("Identify issued before a completed handshake"));
        }

        let conn = &mut self.conn;
        let bl_ver = retry_timeout!(conn, IDENTIFY_RETRIES, "GetBlVer", conn.get_bl_ver())?;
        let boot_stage = if bl_ver == Command::GetBlVer as u8 {
            BootStage::Brom
        } else {
            BootStage::Preloader { version: bl_ver }
        };

        let chip = identify(&mut self.conn, boot_stage).await?;
        self.chip = Some(chip.clone());
        self.state = BromState::Identified;

        info!("Connected to {} (hw code 0x{:04X})", chip.boot_stage, chip.hw_code);
        Ok(chip)
    }

    pub async fn read32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        self.expect_state(&[BromState::Identified, BromState::Escalated])?;
        self.conn.read32(address, count).await
    }

    /// First half of the payload jump: upload and jump. The ROM gives no
    /// reliable execute acknowledgement, call [`BromSession::confirm_payload`]
    /// to wait for the payload to prove it runs.
    pub async fn send_payload(&mut self, payload: &PayloadImage, packet_size: usize) -> Result<()> {
        self.expect_state(&[BromState::Identified])?;

        info!(
            "Uploading payload ({} bytes) to 0x{:08X}, entry 0x{:08X}",
            payload.data.len(),
            payload.addr,
            payload.entry
        );

        self.conn.send_da(&payload.data, payload.addr, 0, packet_size).await?;
        self.conn.jump_da(payload.entry).await?;
        self.state = BromState::PayloadSent;

        Ok(())
    }

    /// Second half of the payload jump. Missing proof within the
    /// stage-confirm window leaves the session terminal.
    pub async fn confirm_payload(&mut self, proof: NextStageProof) -> Result<()> {
        self.expect_state(&[BromState::PayloadSent])?;

        let window = self.conn.timeouts.stage_confirm;
        let confirmed = match proof {
            NextStageProof::AckWord(word) => {
                let mut buf = [0u8; 4];
                match self.conn.read_into_within(&mut buf, window).await {
                    Ok(()) => {
                        let got = u32::from_be_bytes(buf);
                        if got != word {
                            warn!("Payload answered 0x{:08X}, expected 0x{:08X}", got, word);
                        }
                        got == word
                    }
                    Err(Error::Timeout(_)) => false,
                    Err(e) => return Err(self.terminal(e)),
                }
            }
            NextStageProof::SyncByte(sync) => {
                match self.conn.read_u8_within(window).await {
                    Ok(got) => got == sync,
                    Err(Error::Timeout(_)) => false,
                    Err(e) => return Err(self.terminal(e)),
                }
            }
            NextStageProof::Handshake => {
                let probe = self.conn.timeouts.probe.max(Duration::from_millis(1));
                let attempts = (window.as_millis() / probe.as_millis()).max(1) as usize;
                match self.probe(attempts, Duration::ZERO).await {
                    Ok(true) => match self.finish_handshake(Duration::ZERO).await {
                        Ok(()) => true,
                        Err(Error::HandshakeTimeout) => false,
                        Err(e) => return Err(self.terminal(e)),
                    },
                    Ok(false) => false,
                    Err(e) => return Err(self.terminal(e)),
                }
            }
        };

        if !confirmed {
            return Err(self.terminal(Error::DeviceUnresponsive(format!(
                "payload gave no proof of life ({:?}) within {:?}",
                proof, window
            ))));
        }

        info!("Payload confirmed running");
        self.state = BromState::Escalated;
        Ok(())
    }

    /// Uploads the first DA stage and jumps to it. The caller turns the
    /// connection into a DA session afterwards.
    pub async fn upload_da(&mut self, stage: &DAEntryRegion, packet_size: usize) -> Result<()> {
        self.expect_state(&[BromState::Identified, BromState::Escalated])?;
        upload_stage(&mut self.conn, stage, packet_size).await
    }

    /// Hands the connection to a [`PreloaderSession`]. The session comes
    /// back unchanged unless a Preloader was identified.
    pub fn into_preloader(self) -> std::result::Result<PreloaderSession, Self> {
        match &self.chip {
            Some(chip) if matches!(chip.boot_stage, BootStage::Preloader { .. }) => {
                let chip = chip.clone();
                Ok(PreloaderSession::new(self.conn, chip))
            }
            _ => Err(self),
        }
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn terminal(&mut self, e: Error) -> Error {
        self.state = BromState::Terminal;
        e
    }

    fn expect_state(&self, allowed: &[BromState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::proto(format!("Command not allowed in BROM state {:?}", self.state)))
        }
    }
}

pub(crate) async fn upload_stage(
    conn: &mut Connection,
    stage: &DAEntryRegion,
    packet_size: usize,
) -> Result<()> {
    info!("Uploading DA stage to 0x{:08X} ({} bytes)", stage.addr, stage.data.len());
    conn.send_da(&stage.data, stage.addr, stage.sig_len, packet_size).await?;
    info!("Sent DA stage, jumping to 0x{:08X}...", stage.addr);
    conn.jump_da(stage.addr).await
}
