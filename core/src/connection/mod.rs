/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod backend;
pub mod command;
pub mod port;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::time::Instant;

use crate::codec::checksum::xor16;
use crate::codec::{Codec, Frame, FramingError, HEADER_LEN};
use crate::connection::command::Command;
use crate::connection::port::{ConnectionType, MTKPort, Timeouts};
use crate::error::{Error, Result};

/// How many bytes may be thrown away while hunting for the next magic marker.
pub const MAX_RESYNC_BYTES: usize = 0x1000;
/// A `SEND_DA` whose chunk acknowledgements do not match is restarted from
/// scratch at most this many times.
pub const MAX_UPLOAD_ATTEMPTS: usize = 3;
/// Largest id blob (SoC id, ME id) a ROM is trusted to send.
pub const MAX_ID_LEN: usize = 0x400;
/// Words one `READ32` may ask for.
pub const MAX_READ32_WORDS: u32 = 0x4000;

#[derive(Debug)]
pub struct Connection {
    pub port: Box<dyn MTKPort>,
    pub connection_type: ConnectionType,
    pub timeouts: Timeouts,
}

impl Connection {
    pub fn new(port: Box<dyn MTKPort>) -> Self {
        Self::with_timeouts(port, Timeouts::default())
    }

    pub fn with_timeouts(port: Box<dyn MTKPort>, timeouts: Timeouts) -> Self {
        let connection_type = port.get_connection_type();
        Connection { port, connection_type, timeouts }
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.send(data).await
    }

    /// Fills `buf` completely, tolerating short reads, within the read timeout.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let timeout = self.timeouts.read;
        self.read_into_within(buf, timeout).await
    }

    pub async fn read_into_within(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }

            let n = self.port.recv(&mut buf[filled..], remaining).await?;
            if n == 0 {
                return Err(Error::io("Port closed while reading"));
            }
            filled += n;
        }

        Ok(())
    }

    pub async fn read_exact(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read_into(&mut buf).await?;
        Ok(buf)
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_u8_within(&mut self, timeout: Duration) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into_within(&mut buf, timeout).await?;
        Ok(buf[0])
    }

    pub async fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    pub async fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf).await?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn check(&self, data: &[u8], expected_data: &[u8]) -> Result<()> {
        if data == expected_data {
            Ok(())
        } else {
            error!("Data mismatch. Expected: {:x?}, Got: {:x?}", expected_data, data);
            Err(Error::conn("Data mismatch"))
        }
    }

    pub async fn echo(&mut self, data: &[u8]) -> Result<()> {
        self.write(data).await?;
        let buf = self.read_exact(data.len()).await?;
        self.check(&buf, data)
    }

    async fn status(&mut self, what: &str) -> Result<()> {
        let status = self.read_u16_be().await?;
        if status != 0 {
            error!("{} failed with status: 0x{:04X}", what, status);
            return Err(Error::conn(format!("{} failed with status 0x{:04X}", what, status)));
        }
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<()> {
        debug!("Resetting port {}", self.port.get_port_name());
        self.port.reset().await
    }

    pub async fn write_frame(&mut self, codec: &Codec, opcode: u32, payload: &[u8]) -> Result<()> {
        for frame in codec.encode_chunks(opcode, payload) {
            debug!("[TX] Frame opcode 0x{:X}, {} bytes", opcode, frame.len());
            self.write(&frame).await?;
        }
        Ok(())
    }

    /// Reads one frame. Garbage in front of the magic marker is skipped,
    /// up to [`MAX_RESYNC_BYTES`]. A bad checksum is returned as
    /// [`FramingError::BadChecksum`] once the whole frame was consumed, so the
    /// caller can ask for a retransmission.
    pub async fn read_frame(&mut self, codec: &Codec) -> Result<Frame> {
        let magic = codec.config().magic.to_le_bytes();
        let mut header = [0u8; HEADER_LEN];
        self.read_into(&mut header[..4]).await?;

        let mut skipped = 0;
        while header[..4] != magic {
            if skipped >= MAX_RESYNC_BYTES {
                return Err(Error::io(format!(
                    "Lost frame sync, discarded {} bytes without finding a magic marker",
                    skipped
                )));
            }
            header.copy_within(1..4, 0);
            self.read_into(&mut header[3..4]).await?;
            skipped += 1;
        }

        if skipped > 0 {
            warn!("Resynchronized frame stream after discarding {} bytes", skipped);
        }

        self.read_into(&mut header[4..]).await?;
        let (opcode, len) = match codec.parse_header(&header) {
            Ok(parsed) => parsed,
            Err(e) => return Err(Error::io(format!("Frame stream desynchronized: {}", e))),
        };

        let mut body = vec![0u8; len + codec.trailer_len()];
        self.read_into(&mut body).await?;
        debug!("[RX] Frame opcode 0x{:X}, {} bytes", opcode, len);

        match codec.finish(opcode, &body[..len], &body[len..]) {
            Ok(frame) => Ok(frame),
            Err(e @ FramingError::BadChecksum { .. }) => Err(Error::Framing(e)),
            Err(e) => Err(Error::io(format!("Frame stream desynchronized: {}", e))),
        }
    }

    pub async fn get_bl_ver(&mut self) -> Result<u8> {
        self.write(&[Command::GetBlVer as u8]).await?;
        self.read_u8().await
    }

    pub async fn get_hw_code(&mut self) -> Result<u16> {
        self.echo(&[Command::GetHwCode as u8]).await?;
        let hw_code = self.read_u16_be().await?;
        self.status("GetHwCode").await?;
        Ok(hw_code)
    }

    pub async fn get_hw_sw_ver(&mut self) -> Result<(u16, u16, u16)> {
        self.echo(&[Command::GetHwSwVer as u8]).await?;

        let hw_sub_code = self.read_u16_be().await?;
        let hw_ver = self.read_u16_be().await?;
        let sw_ver = self.read_u16_be().await?;
        self.status("GetHwSwVer").await?;

        Ok((hw_sub_code, hw_ver, sw_ver))
    }

    /// Returns the target configuration of the device.
    /// This configuration can be interpreted as follows:
    ///
    /// SBC = target_config & 0x1
    /// SLA = target_config & 0x2
    /// DAA = target_config & 0x4
    pub async fn get_target_config(&mut self) -> Result<u32> {
        self.echo(&[Command::GetTargetConfig as u8]).await?;
        let config = self.read_u32_be().await?;
        self.status("GetTargetConfig").await?;
        Ok(config)
    }

    pub async fn get_soc_id(&mut self) -> Result<Vec<u8>> {
        self.optional_blob(Command::GetSocId, "GetSocId").await
    }

    pub async fn get_meid(&mut self) -> Result<Vec<u8>> {
        self.optional_blob(Command::GetMeId, "GetMeId").await
    }

    // Older ROMs echo the command but never answer it.
    async fn optional_blob(&mut self, cmd: Command, what: &str) -> Result<Vec<u8>> {
        self.echo(&[cmd as u8]).await?;

        let mut length_bytes = [0u8; 4];
        let wait = self.timeouts.optional_reply;
        match self.read_into_within(&mut length_bytes, wait).await {
            Ok(()) => {}
            Err(Error::Timeout(_)) => {
                debug!("{} not supported by this device", what);
                return Ok(vec![]);
            }
            Err(e) => return Err(e),
        }

        let length = u32::from_be_bytes(length_bytes) as usize;
        if length > MAX_ID_LEN {
            return Err(Error::proto(format!("{} of {} bytes announced", what, length)));
        }
        let blob = self.read_exact(length).await?;
        self.status(what).await?;

        Ok(blob)
    }

    /// Reads `count` 32-bit words starting at `address`.
    pub async fn read32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        if count > MAX_READ32_WORDS {
            return Err(Error::out_of_range(format!(
                "{} words requested, at most {} per read",
                count, MAX_READ32_WORDS
            )));
        }

        self.echo(&[Command::Read32 as u8]).await?;
        self.echo(&address.to_be_bytes()).await?;
        self.echo(&count.to_be_bytes()).await?;
        self.status("Read32").await?;

        let mut words = Vec::with_capacity(count as usize);
        for _ in 0..count {
            words.push(self.read_u32_be().await?);
        }

        self.status("Read32").await?;
        Ok(words)
    }

    pub async fn jump_da(&mut self, address: u32) -> Result<()> {
        debug!("Jump to 0x{:08X}", address);

        self.echo(&[Command::JumpDa as u8]).await?;
        self.echo(&address.to_be_bytes()).await?;
        self.status("JumpDA").await
    }

    /// Uploads `data` to `address` in `packet_size` chunks. The device acks every
    /// chunk with its XOR16. If any ack disagrees, the transfer is finished and
    /// then restarted from the beginning, since a partially correct image
    /// can't be patched in place.
    pub async fn send_da(
        &mut self,
        data: &[u8],
        address: u32,
        sig_len: u32,
        packet_size: usize,
    ) -> Result<()> {
        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            if self.send_da_once(data, address, sig_len, packet_size).await? {
                debug!("DA sent!");
                return Ok(());
            }
            warn!("SendDA attempt {}/{} had a bad chunk ack, restarting", attempt, MAX_UPLOAD_ATTEMPTS);
        }

        Err(Error::proto(format!(
            "SendDA to 0x{:08X} failed: chunk acknowledgements did not match after {} attempts",
            address, MAX_UPLOAD_ATTEMPTS
        )))
    }

    async fn send_da_once(
        &mut self,
        data: &[u8],
        address: u32,
        sig_len: u32,
        packet_size: usize,
    ) -> Result<bool> {
        debug!("Sending DA, size: {}", data.len());
        self.echo(&[Command::SendDa as u8]).await?;
        self.echo(&address.to_be_bytes()).await?;
        self.echo(&(data.len() as u32).to_be_bytes()).await?;
        self.echo(&sig_len.to_be_bytes()).await?;
        self.status("SendDA").await?;

        let mut intact = true;
        for (index, chunk) in data.chunks(packet_size.max(1)).enumerate() {
            self.write(chunk).await?;
            let ack = self.read_u16_be().await?;
            let expected = xor16(chunk);
            if ack != expected {
                warn!("Chunk {} ack 0x{:04X} does not match 0x{:04X}", index, ack, expected);
                intact = false;
            }
        }

        self.status("SendDA data transfer").await?;
        Ok(intact)
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}
