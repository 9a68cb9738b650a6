/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use crate::connection::Connection;
use crate::core::cancel::CancelToken;
use crate::core::chipinfo::ChipInfo;
use crate::core::storage::{Section, StorageInfo};
use crate::da::DA;
use crate::error::Result;

/// Wire level operations every DA dialect provides. Addresses and sizes are
/// in bytes and already validated by [`DaSession`](crate::da::DaSession).
#[async_trait::async_trait]
pub trait DAProtocol: Send {
    /// Brings up a DA whose first stage was just jumped to: sync, later
    /// stages, storage detection.
    async fn activate(&mut self, da: &DA) -> Result<()>;

    /// Chip identification as seen by the DA, `chip` fills what it can't report.
    async fn identify(&mut self, chip: &ChipInfo) -> Result<ChipInfo>;

    /// Storage geometry detected during activation.
    fn storage(&self) -> Option<StorageInfo>;

    /// Raw bytes holding the partition table (GPT probe or PMT dump).
    async fn read_partition_blob(&mut self, storage: &StorageInfo) -> Result<Vec<u8>>;

    async fn read_flash(
        &mut self,
        addr: u64,
        size: usize,
        section: Section,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<u8>>;

    /// `data` must already be padded to the block size.
    async fn write_flash(
        &mut self,
        addr: u64,
        data: &[u8],
        section: Section,
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()>;

    async fn erase_flash(
        &mut self,
        addr: u64,
        size: u64,
        section: Section,
        cancel: &CancelToken,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()>;

    async fn get_usb_speed(&mut self) -> Result<u32>;

    async fn shutdown(&mut self, reboot: bool) -> Result<()>;

    /// The DA is stuck inside a transfer it can't leave and won't take any
    /// command, shutdown included. Only a new connection gets past this.
    fn is_stranded(&self) -> bool {
        false
    }

    fn get_connection(&mut self) -> &mut Connection;
}
