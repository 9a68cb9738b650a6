/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;

use crate::error::{Error, Result};
use crate::{le_u32, le_u64};

/// Storage technology behind the DA. The discriminants are the storage
/// codes the DA expects in read/write parameters.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Emmc = 0x01,
    Nand = 0x10,
    Ufs = 0x30,
}

impl StorageKind {
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x01 => Some(StorageKind::Emmc),
            0x10 => Some(StorageKind::Nand),
            0x30 => Some(StorageKind::Ufs),
            _ => None,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Emmc => write!(f, "eMMC"),
            StorageKind::Nand => write!(f, "NAND"),
            StorageKind::Ufs => write!(f, "UFS"),
        }
    }
}

/// Hardware partition of the storage. Software partitions from the
/// partition table always live in `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    User,
    Boot1,
    Boot2,
}

impl Section {
    /// Section code for the DA: eMMC partition number, or UFS logical unit.
    pub fn as_u32(&self, kind: StorageKind) -> u32 {
        match (kind, self) {
            (StorageKind::Ufs, Section::Boot1) => 0,
            (StorageKind::Ufs, Section::Boot2) => 1,
            (StorageKind::Ufs, Section::User) => 2,
            (_, Section::Boot1) => 1,
            (_, Section::Boot2) => 2,
            (_, Section::User) => 8,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::User => write!(f, "user"),
            Section::Boot1 => write!(f, "boot1"),
            Section::Boot2 => write!(f, "boot2"),
        }
    }
}

impl std::str::FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Section::User),
            "boot1" | "lu0" => Ok(Section::Boot1),
            "boot2" | "lu1" => Ok(Section::Boot2),
            other => Err(Error::unsupported(format!("Unknown storage section '{}'", other))),
        }
    }
}

/// Geometry of the storage, as reported by the DA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    pub kind: StorageKind,
    pub block_size: u32,
    /// Sizes in bytes.
    pub user_size: u64,
    pub boot1_size: u64,
    pub boot2_size: u64,
}

impl StorageInfo {
    pub fn section_size(&self, section: Section) -> u64 {
        match section {
            Section::User => self.user_size,
            Section::Boot1 => self.boot1_size,
            Section::Boot2 => self.boot2_size,
        }
    }

    pub fn section_blocks(&self, section: Section) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.section_size(section) / self.block_size as u64
    }

    // type u32 | block_size u32 | boot1 u64 | boot2 u64 | rpmb u64 | gp[4] u64 | user u64
    pub fn from_emmc_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < 0x48 {
            return Err(Error::proto(format!("eMMC info too short ({} bytes)", resp.len())));
        }

        Self::checked(StorageInfo {
            kind: StorageKind::Emmc,
            block_size: le_u32!(resp, 0x04),
            boot1_size: le_u64!(resp, 0x08),
            boot2_size: le_u64!(resp, 0x10),
            user_size: le_u64!(resp, 0x40),
        })
    }

    // type u32 | block_size u32 | lu0 u64 | lu1 u64 | lu2 u64
    pub fn from_ufs_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < 0x20 {
            return Err(Error::proto(format!("UFS info too short ({} bytes)", resp.len())));
        }

        Self::checked(StorageInfo {
            kind: StorageKind::Ufs,
            block_size: le_u32!(resp, 0x04),
            boot1_size: le_u64!(resp, 0x08),
            boot2_size: le_u64!(resp, 0x10),
            user_size: le_u64!(resp, 0x18),
        })
    }

    // type u32 | page_size u32 | block_size u32 | spare u32 | total u64 | available u64
    pub fn from_nand_response(resp: &[u8]) -> Result<Self> {
        if resp.len() < 0x20 {
            return Err(Error::proto(format!("NAND info too short ({} bytes)", resp.len())));
        }

        Self::checked(StorageInfo {
            kind: StorageKind::Nand,
            block_size: le_u32!(resp, 0x04),
            boot1_size: 0,
            boot2_size: 0,
            user_size: le_u64!(resp, 0x10),
        })
    }

    fn checked(info: StorageInfo) -> Result<Self> {
        if info.block_size == 0 || !info.block_size.is_power_of_two() {
            return Err(Error::proto(format!(
                "{} reports an invalid block size {}",
                info.kind, info.block_size
            )));
        }
        Ok(info)
    }
}
