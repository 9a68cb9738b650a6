/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod dafile;
pub mod legacy;
pub mod protocol;
pub mod session;
pub mod xflash;
use std::collections::HashMap;
use std::fmt;

pub use dafile::DAFile;
pub use legacy::LegacyDa;
pub use protocol::DAProtocol;
pub use session::{DaSession, Dialect, WriteReport};
pub use xflash::XFlash;

use crate::core::chipinfo::ChipInfo;

/// Protocol used by the DA
/// - Legacy: Old DA, used in old devices
/// - V5 (XFlash): Used mainly in early Dimensity devices and most Helio devices
/// - V6 (XML): Newest protocol, used in most recent Dimensity and Helio devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DAType {
    Legacy,
    V5,
    V6,
}

impl fmt::Display for DAType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DAType::Legacy => write!(f, "Legacy"),
            DAType::V5 => write!(f, "V5 (XFlash)"),
            DAType::V6 => write!(f, "V6 (XML)"),
        }
    }
}

/// Represents a loadable stage of a DA
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DAEntryRegion {
    /// Raw data of the region, including signature if any
    pub data: Vec<u8>,
    /// Address in which the region will be loaded in the device
    pub addr: u32,
    /// Length of the signature at the end of `data`, if any
    pub sig_len: u32,
}

impl DAEntryRegion {
    pub fn new(data: Vec<u8>, addr: u32, sig_len: u32) -> Self {
        DAEntryRegion { data, addr, sig_len }
    }

    /// The image without its trailing signature.
    pub fn unsigned_data(&self) -> &[u8] {
        let end = self.data.len().saturating_sub(self.sig_len as usize);
        &self.data[..end]
    }
}

/// A Download Agent for one SoC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DA {
    pub da_type: DAType,
    /// Loadable stages in boot order. Stage 1 goes through `SEND_DA`, later
    /// stages are booted by the running DA.
    pub regions: Vec<DAEntryRegion>,
    /// Hardware code the DA was built for. On XFlash DA files this is the
    /// "commercial" name of the SoC (e.g., 0x6768 for Helio G85)
    pub hw_code: u16,
    pub hw_sub_code: u16,
}

impl DA {
    pub fn new(da_type: DAType, hw_code: u16, regions: Vec<DAEntryRegion>) -> Self {
        DA { da_type, regions, hw_code, hw_sub_code: 0 }
    }

    pub fn get_da1(&self) -> Option<&DAEntryRegion> {
        self.regions.first()
    }

    pub fn get_da2(&self) -> Option<&DAEntryRegion> {
        self.regions.get(1)
    }
}

/// What the host waits for after jumping to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStageProof {
    /// The payload writes this big endian word once it runs.
    AckWord(u32),
    /// The payload writes a single sync byte.
    SyncByte(u8),
    /// The payload restarts the ROM command loop, a fresh handshake succeeds.
    Handshake,
}

/// Opaque code uploaded to the BROM before the DA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadImage {
    pub data: Vec<u8>,
    pub addr: u32,
    pub entry: u32,
    pub proof: NextStageProof,
}

/// Supplies payload and DA images for an identified chip.
pub trait ImageProvider: Send + Sync {
    fn payload(&self, chip: &ChipInfo) -> Option<PayloadImage>;
    fn download_agent(&self, chip: &ChipInfo) -> Option<DA>;
}

/// Images keyed by hardware code.
#[derive(Debug, Clone, Default)]
pub struct StaticImages {
    payloads: HashMap<u16, PayloadImage>,
    agents: HashMap<u16, DA>,
}

impl StaticImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, hw_code: u16, payload: PayloadImage) -> Self {
        self.payloads.insert(hw_code, payload);
        self
    }

    pub fn with_da(mut self, hw_code: u16, da: DA) -> Self {
        self.agents.insert(hw_code, da);
        self
    }
}

impl ImageProvider for StaticImages {
    fn payload(&self, chip: &ChipInfo) -> Option<PayloadImage> {
        self.payloads.get(&chip.hw_code).cloned()
    }

    fn download_agent(&self, chip: &ChipInfo) -> Option<DA> {
        self.agents.get(&chip.hw_code).cloned()
    }
}
