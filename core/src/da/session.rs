/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::borrow::Cow;

use log::{debug, info, warn};

use crate::connection::Connection;
use crate::core::cancel::CancelToken;
use crate::core::chipinfo::ChipInfo;
use crate::core::dialect::ChipConfig;
use crate::core::partition::{Geometry, PartitionTable, parse_partition_table};
use crate::core::region::{ResolvedRegion, StorageRegion};
use crate::core::storage::{Section, StorageInfo};
use crate::da::{DA, DAProtocol, DAType, LegacyDa, XFlash};
use crate::error::{Error, Result};

/// The DA dialects this crate speaks.
#[derive(Debug)]
pub enum Dialect {
    Legacy(LegacyDa),
    XFlash(XFlash),
}

impl Dialect {
    /// Checks that a DA of `da_type` can be driven with `config` before
    /// anything gets uploaded.
    pub fn check(da_type: DAType, config: &ChipConfig) -> Result<()> {
        match (da_type, config.dialect) {
            (DAType::V6, _) | (_, DAType::V6) => {
                Err(Error::unsupported(format!("{} download agents are not supported", DAType::V6)))
            }
            (found, wanted) if found != wanted => Err(Error::unsupported(format!(
                "{} is configured for a {} DA, got a {} one",
                config.name, wanted, found
            ))),
            _ => Ok(()),
        }
    }

    pub fn new(conn: Connection, da_type: DAType, config: &ChipConfig, chip: &ChipInfo) -> Self {
        match da_type {
            DAType::Legacy => {
                Dialect::Legacy(LegacyDa::new(conn, chip.clone(), config.da_packet_size))
            }
            DAType::V5 | DAType::V6 => Dialect::XFlash(XFlash::new(conn, config.frame)),
        }
    }

    pub fn da_type(&self) -> DAType {
        match self {
            Dialect::Legacy(_) => DAType::Legacy,
            Dialect::XFlash(_) => DAType::V5,
        }
    }

    pub fn protocol(&mut self) -> &mut dyn DAProtocol {
        match self {
            Dialect::Legacy(da) => da,
            Dialect::XFlash(da) => da,
        }
    }

    fn is_stranded(&self) -> bool {
        match self {
            Dialect::Legacy(da) => da.is_stranded(),
            Dialect::XFlash(da) => da.is_stranded(),
        }
    }

    fn storage(&self) -> Option<StorageInfo> {
        match self {
            Dialect::Legacy(da) => da.storage(),
            Dialect::XFlash(da) => da.storage(),
        }
    }

    pub fn into_connection(self) -> Connection {
        match self {
            Dialect::Legacy(da) => da.into_connection(),
            Dialect::XFlash(da) => da.into_connection(),
        }
    }
}

/// Outcome of a write. `padding` zero bytes were appended to reach a whole
/// block and written along with the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub bytes_written: usize,
    pub padding: usize,
}

/// Session with a running DA.
///
/// Regions are validated against the partition table and the storage
/// geometry before anything is sent, so a bad request never reaches the
/// device.
#[derive(Debug)]
pub struct DaSession {
    dialect: Dialect,
    chip: ChipInfo,
    table: Option<PartitionTable>,
    raw_table: Option<Vec<u8>>,
}

impl DaSession {
    pub fn new(conn: Connection, da_type: DAType, config: &ChipConfig, chip: ChipInfo) -> Self {
        let dialect = Dialect::new(conn, da_type, config, &chip);
        DaSession { dialect, chip, table: None, raw_table: None }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn chip_info(&self) -> &ChipInfo {
        &self.chip
    }

    /// Syncs with the freshly jumped DA, boots later stages and detects the storage.
    pub async fn activate(&mut self, da: &DA) -> Result<()> {
        self.dialect.protocol().activate(da).await?;
        info!("{} DA activated", self.dialect.da_type());
        Ok(())
    }

    pub async fn identify(&mut self) -> Result<ChipInfo> {
        let chip = self.dialect.protocol().identify(&self.chip).await?;
        self.chip = chip.clone();
        Ok(chip)
    }

    pub fn storage_info(&self) -> Result<StorageInfo> {
        self.dialect.storage().ok_or_else(|| Error::proto("DA did not report its storage"))
    }

    /// Reads and parses the partition table. The result is cached for the
    /// lifetime of the session.
    pub async fn read_partition_table(&mut self) -> Result<&PartitionTable> {
        if self.table.is_none() {
            let storage = self.storage_info()?;
            let blob = self.dialect.protocol().read_partition_blob(&storage).await?;

            let geometry = Geometry {
                block_size: storage.block_size,
                capacity_blocks: storage.section_blocks(Section::User),
            };
            let table = parse_partition_table(&blob, geometry)?;
            info!("Found {} partitions ({:?})", table.len(), table.format);

            self.table = Some(table);
            self.raw_table = Some(blob);
        }

        self.table.as_ref().ok_or_else(|| Error::proto("Partition table missing after read"))
    }

    /// The cached table, if it was read already.
    pub fn partition_table(&self) -> Option<&PartitionTable> {
        self.table.as_ref()
    }

    /// The raw bytes the partition table was parsed from.
    pub async fn dump_partition_table(&mut self) -> Result<Vec<u8>> {
        self.read_partition_table().await?;
        self.raw_table.clone().ok_or_else(|| Error::proto("Partition table missing after read"))
    }

    pub async fn resolve(&mut self, region: &StorageRegion) -> Result<ResolvedRegion> {
        if region.needs_table() {
            self.read_partition_table().await?;
        }
        let storage = self.storage_info()?;
        region.resolve(self.table.as_ref(), &storage)
    }

    /// Reads `length` bytes from the start of `region`, or all of it.
    pub async fn read(
        &mut self,
        region: &StorageRegion,
        length: Option<usize>,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<u8>> {
        let resolved = self.resolve(region).await?;
        let available = resolved.byte_len();
        let length = length.unwrap_or(available as usize);
        if length as u64 > available {
            return Err(Error::out_of_range(format!(
                "Cannot read {:#X} bytes from {} ({:#X} bytes)",
                length, region, available
            )));
        }
        if length == 0 {
            return Ok(Vec::new());
        }

        // The DA only moves whole blocks
        let request = resolved.padded_len(length);
        debug!("Reading {} as {:#X}+{:#X}", region, resolved.byte_offset(), request);
        let mut data = self
            .dialect
            .protocol()
            .read_flash(resolved.byte_offset(), request, resolved.section, progress)
            .await?;

        if data.len() < length {
            return Err(Error::proto(format!(
                "DA returned {:#X} bytes, {:#X} were requested",
                data.len(),
                length
            )));
        }
        data.truncate(length);
        Ok(data)
    }

    /// Writes `data` at the start of `region`, zero padded to whole blocks.
    pub async fn write(
        &mut self,
        region: &StorageRegion,
        data: &[u8],
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<WriteReport> {
        let resolved = self.resolve(region).await?;
        let available = resolved.byte_len();
        if data.len() as u64 > available {
            return Err(Error::out_of_range(format!(
                "{:#X} bytes do not fit in {} ({:#X} bytes)",
                data.len(),
                region,
                available
            )));
        }
        if data.is_empty() {
            return Ok(WriteReport { bytes_written: 0, padding: 0 });
        }

        let padded_len = resolved.padded_len(data.len());
        let padding = padded_len - data.len();
        let payload: Cow<[u8]> = if padding > 0 {
            warn!("Padding {} with {} zero bytes to a whole block", region, padding);
            let mut padded = data.to_vec();
            padded.resize(padded_len, 0);
            Cow::Owned(padded)
        } else {
            Cow::Borrowed(data)
        };

        self.dialect
            .protocol()
            .write_flash(resolved.byte_offset(), &payload, resolved.section, cancel, progress)
            .await?;

        Ok(WriteReport { bytes_written: padded_len, padding })
    }

    pub async fn erase(
        &mut self,
        region: &StorageRegion,
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        let resolved = self.resolve(region).await?;
        self.dialect
            .protocol()
            .erase_flash(resolved.byte_offset(), resolved.byte_len(), resolved.section, cancel, progress)
            .await
    }

    /// Reads back `expected.len()` bytes of `region` and compares them.
    pub async fn verify(
        &mut self,
        region: &StorageRegion,
        expected: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<bool> {
        let actual = self.read(region, Some(expected.len()), progress).await?;
        match actual.iter().zip(expected).position(|(a, e)| a != e) {
            Some(offset) => {
                warn!("{} differs at offset {:#X}", region, offset);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    pub async fn usb_speed(&mut self) -> Result<u32> {
        self.dialect.protocol().get_usb_speed().await
    }

    /// See [`DAProtocol::is_stranded`].
    pub fn is_stranded(&self) -> bool {
        self.dialect.is_stranded()
    }

    pub async fn shutdown(&mut self, reboot: bool) -> Result<()> {
        self.dialect.protocol().shutdown(reboot).await
    }

    pub fn into_connection(self) -> Connection {
        self.dialect.into_connection()
    }
}
