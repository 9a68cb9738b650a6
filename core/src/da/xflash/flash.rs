/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, error, info, warn};

use crate::codec::checksum::additive16;
use crate::core::cancel::CancelToken;
use crate::core::storage::{Section, StorageKind};
use crate::da::xflash::cmds::*;
use crate::da::xflash::{ERASE_CHUNK, READ_RETRANSMITS, XFlash};
use crate::error::{Error, Result};

// Format:
// Storage Type (EMMC, UFS, NAND) u32
// PartType u32 (BOOT or USER for EMMC)
// Address u64
// Size u64
// Nand Specific
//
// 01000000 u32
// 08000000 u32
// 0000000000000000 u64
// 4400000000000000 u64
// 0000000000000000000000000000000000000000000000000000000000000000 8u32
// The payload above is sent when reading PGPT (addr: 0x0, size: 0x44)
fn flash_param(kind: StorageKind, section: Section, addr: u64, size: u64) -> Vec<u8> {
    let mut param = Vec::with_capacity(56);
    param.extend_from_slice(&kind.as_u32().to_le_bytes());
    param.extend_from_slice(&section.as_u32(kind).to_le_bytes());
    param.extend_from_slice(&addr.to_le_bytes());
    param.extend_from_slice(&size.to_le_bytes());
    // Nand specific, zero for other storage types
    param.extend_from_slice(&[0u8; 32]);
    param
}

pub async fn read_flash(
    xflash: &mut XFlash,
    addr: u64,
    size: usize,
    section: Section,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<Vec<u8>> {
    xflash.ensure_idle()?;
    let storage = xflash.storage_info()?;
    info!("Reading flash at address {:#X} with size {:#X}", addr, size);

    let param = flash_param(storage.kind, section, addr, size as u64);
    xflash.send_cmd(Cmd::ReadData).await?;
    xflash.send(&param).await?;

    let mut buffer = Vec::with_capacity(size);

    // Read chunk, send acknowledgment, status, repeat until profit
    while buffer.len() < size {
        let chunk = match xflash.recv_frame(READ_RETRANSMITS).await {
            Ok(frame) => frame.payload,
            Err(Error::Framing(e)) => {
                let offset = addr + buffer.len() as u64;
                error!("Chunk at {:#X} still corrupt after retransmission: {}", offset, e);
                xflash.send_raw(&READ_ABORT.to_le_bytes()).await?;
                if let Err(e) = xflash.get_status().await {
                    debug!("Read abort acknowledged with {}", e);
                }
                return Err(Error::ReadIntegrity { offset });
            }
            Err(e) => return Err(e),
        };

        if chunk.is_empty() {
            return Err(Error::proto(format!(
                "DA stopped sending data after {:#X} of {:#X} bytes",
                buffer.len(),
                size
            )));
        }
        buffer.extend_from_slice(&chunk);

        xflash.send(&0u32.to_le_bytes()).await?;

        progress(buffer.len().min(size), size);
        debug!("Read {}/{} bytes...", buffer.len(), size);
    }

    buffer.truncate(size);
    Ok(buffer)
}

pub async fn write_flash(
    xflash: &mut XFlash,
    addr: u64,
    data: &[u8],
    section: Section,
    cancel: &CancelToken,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<()> {
    xflash.ensure_idle()?;
    let storage = xflash.storage_info()?;
    info!("Writing flash at address {:#X} with size {:#X}", addr, data.len());

    let chunk_size = write_chunk_size(xflash);
    debug!("Using chunk size of {} bytes", chunk_size);

    let param = flash_param(storage.kind, section, addr, data.len() as u64);
    xflash.send_cmd(Cmd::WriteData).await?;
    xflash.send(&param).await?;

    xflash.mid_transfer = true;
    let mut committed = 0;

    for chunk in data.chunks(chunk_size) {
        if cancel.is_cancelled() {
            warn!("Write cancelled after {:#X} bytes", committed);
            return Err(Error::write_aborted(committed, Error::Cancelled));
        }

        // The DA wants three frames per chunk: a zero word, the additive
        // checksum of the chunk, then the chunk itself. Each one is acked.
        let checksum = additive16(chunk) as u32;
        let sent: Result<()> = async {
            xflash.send(&0u32.to_le_bytes()).await?;
            xflash.send(&checksum.to_le_bytes()).await?;
            xflash.send(chunk).await
        }
        .await;

        if let Err(e) = sent {
            error!("Chunk at {:#X} was not acknowledged: {}", addr + committed as u64, e);
            // A status error ends the command on the DA side
            if matches!(e, Error::Status(_)) {
                xflash.mid_transfer = false;
            }
            return Err(Error::write_aborted(committed, e));
        }

        committed += chunk.len();
        progress(committed, data.len());
        debug!("Written {}/{} bytes...", committed, data.len());
    }

    let finished: Result<()> = async {
        status_ok!(xflash);
        Ok(())
    }
    .await;
    xflash.mid_transfer = false;

    if let Err(e) = finished {
        error!("Device rejected the write after all chunks: {}", e);
        return Err(Error::write_aborted(committed, e));
    }

    info!("Flash write completed, {} bytes written.", committed);
    Ok(())
}

pub async fn erase_flash(
    xflash: &mut XFlash,
    addr: u64,
    size: u64,
    section: Section,
    cancel: &CancelToken,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<()> {
    xflash.ensure_idle()?;
    let storage = xflash.storage_info()?;
    info!("Erasing flash at address {:#X} with size {:#X}", addr, size);

    let mut erased = 0u64;
    while erased < size {
        if cancel.is_cancelled() {
            warn!("Erase cancelled after {:#X} bytes", erased);
            return Err(Error::write_aborted(erased as usize, Error::Cancelled));
        }

        let len = ERASE_CHUNK.min(size - erased);
        let param = flash_param(storage.kind, section, addr + erased, len);
        let done: Result<()> = async {
            xflash.send_cmd(Cmd::Format).await?;
            xflash.send(&param).await?;
            // Sent once the range is actually erased
            status_ok!(xflash);
            Ok(())
        }
        .await;

        if let Err(e) = done {
            error!("Erase of {:#X}+{:#X} failed: {}", addr + erased, len, e);
            return Err(Error::write_aborted(erased as usize, e));
        }

        erased += len;
        progress(erased as usize, size as usize);
    }

    Ok(())
}

pub(super) async fn get_packet_length(xflash: &mut XFlash) -> Result<(usize, usize)> {
    let packet_length = xflash.devctrl(Cmd::GetPacketLength, None).await?;
    if packet_length.len() < 8 {
        return Err(Error::proto("Received packet length is too short"));
    }

    let write_len = crate::le_u32!(packet_length, 0) as usize;
    let read_len = crate::le_u32!(packet_length, 4) as usize;
    debug!("Packet lengths: write {:#X}, read {:#X}", write_len, read_len);

    xflash.write_packet_length = Some(write_len);
    xflash.read_packet_length = Some(read_len);
    Ok((write_len, read_len))
}

// Chunks never span frames, the per-chunk checksum is computed over one frame.
fn write_chunk_size(xflash: &XFlash) -> usize {
    let max = xflash.codec.config().max_payload.max(1);
    xflash.write_packet_length.unwrap_or(max).clamp(1, max)
}
