/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, info};

use crate::core::storage::StorageInfo;
use crate::da::xflash::XFlash;
use crate::da::xflash::cmds::Cmd;
use crate::error::{Error, Result};

/// Asks for eMMC, UFS and NAND info in turn. The first one reporting
/// anything but zeros wins.
pub async fn detect_storage(xflash: &mut XFlash) -> Result<StorageInfo> {
    let queries: [(Cmd, fn(&[u8]) -> Result<StorageInfo>); 3] = [
        (Cmd::GetEmmcInfo, StorageInfo::from_emmc_response),
        (Cmd::GetUfsInfo, StorageInfo::from_ufs_response),
        (Cmd::GetNandInfo, StorageInfo::from_nand_response),
    ];

    for (cmd, parse) in queries {
        let resp = match xflash.devctrl(cmd, None).await {
            Ok(resp) => resp,
            Err(Error::Status(status)) => {
                debug!("{:?} not supported: {}", cmd, status);
                continue;
            }
            Err(e) => return Err(e),
        };

        if resp.iter().all(|&b| b == 0) {
            continue;
        }

        let storage = parse(&resp)?;
        info!(
            "{} storage detected: block size {}, user area {:#X} bytes",
            storage.kind, storage.block_size, storage.user_size
        );
        return Ok(storage);
    }

    Err(Error::unsupported("DA reported no eMMC, UFS or NAND storage"))
}
