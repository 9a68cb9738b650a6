/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, error, info, warn};

use crate::codec::checksum::additive16;
use crate::core::cancel::CancelToken;
use crate::core::storage::Section;
use crate::da::legacy::cmds::*;
use crate::da::legacy::{FORMAT_CHUNK, LegacyDa};
use crate::error::{Error, Result};

// cmd u8 | kind u8 | section u8 | addr u64 | size u64 [| packet u32]
fn range_param(addr: u64, size: u64) -> Vec<u8> {
    let mut param = Vec::with_capacity(16);
    param.extend_from_slice(&addr.to_be_bytes());
    param.extend_from_slice(&size.to_be_bytes());
    param
}

pub async fn read_flash(
    da: &mut LegacyDa,
    addr: u64,
    size: usize,
    section: Section,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<Vec<u8>> {
    let storage = da.storage_info()?;
    let packet = da.packet_size;
    info!("Reading flash at address {:#X} with size {:#X}", addr, size);

    let mut param = range_param(addr, size as u64);
    param.extend_from_slice(&(packet as u32).to_be_bytes());
    da.send_cmd(Cmd::ReadData, storage.kind, section).await?;
    da.conn.write(&param).await?;
    da.expect_ack().await?;

    let mut buffer = Vec::with_capacity(size);
    while buffer.len() < size {
        let len = packet.min(size - buffer.len());
        let (mut data, mut ok) = da.recv_checked(len).await?;

        if !ok {
            // One resend, then the data is not trusted anymore
            da.conn.write(&[NACK]).await?;
            (data, ok) = da.recv_checked(len).await?;
        }

        if !ok {
            let offset = addr + buffer.len() as u64;
            error!("Packet at {:#X} still corrupt after retransmission", offset);
            da.conn.write(&[ABORT]).await?;
            return Err(Error::ReadIntegrity { offset });
        }

        da.conn.write(&[ACK]).await?;
        buffer.extend_from_slice(&data);
        progress(buffer.len(), size);
        debug!("Read {}/{} bytes...", buffer.len(), size);
    }

    Ok(buffer)
}

pub async fn write_flash(
    da: &mut LegacyDa,
    addr: u64,
    data: &[u8],
    section: Section,
    cancel: &CancelToken,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<()> {
    let storage = da.storage_info()?;
    let packet = da.packet_size;
    info!("Writing flash at address {:#X} with size {:#X}", addr, data.len());

    let mut param = range_param(addr, data.len() as u64);
    param.extend_from_slice(&(packet as u32).to_be_bytes());
    da.send_cmd(Cmd::WriteData, storage.kind, section).await?;
    da.conn.write(&param).await?;
    da.expect_ack().await?;

    let mut committed = 0;
    for chunk in data.chunks(packet) {
        if cancel.is_cancelled() {
            warn!("Write cancelled after {:#X} bytes", committed);
            da.conn.write(&[ABORT]).await?;
            da.expect_ack().await?;
            return Err(Error::write_aborted(committed, Error::Cancelled));
        }

        let sent: Result<()> = async {
            da.conn.write(&[ACK]).await?;
            da.conn.write(chunk).await?;
            da.conn.write(&additive16(chunk).to_be_bytes()).await?;
            da.expect_ack().await
        }
        .await;

        if let Err(e) = sent {
            error!("Chunk at {:#X} was not acknowledged: {}", addr + committed as u64, e);
            return Err(Error::write_aborted(committed, e));
        }

        committed += chunk.len();
        progress(committed, data.len());
        debug!("Written {}/{} bytes...", committed, data.len());
    }

    // Final ack once everything is on the storage
    if let Err(e) = da.expect_ack().await {
        error!("Device rejected the write after all chunks: {}", e);
        return Err(Error::write_aborted(committed, e));
    }

    info!("Flash write completed, {} bytes written.", committed);
    Ok(())
}

pub async fn erase_flash(
    da: &mut LegacyDa,
    addr: u64,
    size: u64,
    section: Section,
    cancel: &CancelToken,
    progress: &mut (dyn FnMut(usize, usize) + Send),
) -> Result<()> {
    let storage = da.storage_info()?;
    info!("Erasing flash at address {:#X} with size {:#X}", addr, size);

    let mut erased = 0u64;
    while erased < size {
        if cancel.is_cancelled() {
            warn!("Erase cancelled after {:#X} bytes", erased);
            return Err(Error::write_aborted(erased as usize, Error::Cancelled));
        }

        let len = FORMAT_CHUNK.min(size - erased);
        let done: Result<()> = async {
            da.send_cmd(Cmd::Format, storage.kind, section).await?;
            da.conn.write(&range_param(addr + erased, len)).await?;
            da.expect_ack().await
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
