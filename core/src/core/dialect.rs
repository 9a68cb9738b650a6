/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::collections::HashMap;
use std::time::Duration;

use crate::codec::{ChecksumKind, FrameConfig};
use crate::da::DAType;

/// Per chip protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConfig {
    pub name: String,
    pub dialect: DAType,
    pub frame: FrameConfig,
    /// Chunk size for `SEND_DA` uploads through BROM or Preloader.
    pub packet_size: usize,
    /// Chunk size used by the legacy DA for reads and writes.
    pub da_packet_size: usize,
    /// Whether DA upload is expected to fail without a payload first.
    pub payload_required: bool,
}

impl ChipConfig {
    pub fn new(name: impl Into<String>, dialect: DAType) -> Self {
        ChipConfig {
            name: name.into(),
            dialect,
            frame: FrameConfig::default(),
            packet_size: 0x400,
            da_packet_size: 0x1000,
            payload_required: false,
        }
    }

    pub fn with_checksum(mut self, kind: ChecksumKind) -> Self {
        self.frame.checksum = kind;
        self
    }

    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_payload_required(mut self, required: bool) -> Self {
        self.payload_required = required;
        self
    }
}

/// Hardware code to [`ChipConfig`] map handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct DialectTable {
    chips: HashMap<u16, ChipConfig>,
    /// Delay before each handshake byte. The chip is unknown at that point,
    /// so this is table wide.
    pub handshake_delay: Duration,
}

impl DialectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chips whose protocol parameters are known to work.
    pub fn builtin() -> Self {
        let legacy = |name: &str| ChipConfig::new(name, DAType::Legacy);
        let xflash = |name: &str| {
            ChipConfig::new(name, DAType::V5).with_checksum(ChecksumKind::Additive16)
        };

        DialectTable::new()
            .with(0x6572, legacy("MT6572"))
            .with(0x6580, legacy("MT6580"))
            .with(0x0321, legacy("MT6735"))
            .with(0x0335, legacy("MT6737"))
            .with(0x0699, xflash("MT6739"))
            .with(0x0717, xflash("MT6761"))
            .with(0x0766, xflash("MT6765").with_payload_required(true))
            .with(0x0707, xflash("MT6768"))
            .with(0x0788, xflash("MT6771"))
            .with(0x0813, xflash("MT6785"))
            .with(0x0725, xflash("MT6779"))
    }

    pub fn with(mut self, hw_code: u16, config: ChipConfig) -> Self {
        self.insert(hw_code, config);
        self
    }

    pub fn insert(&mut self, hw_code: u16, config: ChipConfig) {
        self.chips.insert(hw_code, config);
    }

    pub fn lookup(&self, hw_code: u16) -> Option<&ChipConfig> {
        self.chips.get(&hw_code)
    }

    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }
}
