/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;

/// Which boot stage answered the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    Brom,
    Preloader { version: u8 },
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootStage::Brom => write!(f, "BROM"),
            BootStage::Preloader { version } => write!(f, "Preloader v{}", version),
        }
    }
}

/// Identification captured from the BROM or Preloader. Never changed after
/// it was read, a DA refresh yields a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub hw_code: u16,
    pub hw_sub_code: u16,
    pub hw_ver: u16,
    pub sw_ver: u16,
    pub target_config: u32,
    /// Empty when the ROM does not implement the query.
    pub soc_id: Vec<u8>,
    pub meid: Vec<u8>,
    pub boot_stage: BootStage,
}

impl ChipInfo {
    pub fn sbc_enabled(&self) -> bool {
        (self.target_config & 0x1) != 0
    }

    pub fn sla_enabled(&self) -> bool {
        (self.target_config & 0x2) != 0
    }

    pub fn daa_enabled(&self) -> bool {
        (self.target_config & 0x4) != 0
    }

    pub fn soc_id_hex(&self) -> String {
        hex::encode_upper(&self.soc_id)
    }

    pub fn meid_hex(&self) -> String {
        hex::encode_upper(&self.meid)
    }
}

impl fmt::Display for ChipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hw_code=0x{:04X} hw_sub_code=0x{:04X} hw_ver=0x{:04X} sw_ver=0x{:04X} \
             target_config=0x{:08X} ({})",
            self.hw_code, self.hw_sub_code, self.hw_ver, self.sw_ver, self.target_config, self.boot_stage
        )
    }
}
