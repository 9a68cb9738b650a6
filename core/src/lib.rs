/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#[macro_use]
pub mod macros;
pub mod codec;
pub mod connection;
pub mod core;
pub mod da;
pub mod device;
pub mod error;
pub mod session;

#[cfg(feature = "serial")]
pub use connection::backend::SerialMTKPort;
pub use connection::port::{ConnectionType, MTKPort, Timeouts};
pub use crate::core::cancel::CancelToken;
pub use crate::core::chipinfo::{BootStage, ChipInfo};
pub use crate::core::dialect::{ChipConfig, DialectTable};
pub use crate::core::partition::{PartitionEntry, PartitionTable};
pub use crate::core::region::StorageRegion;
pub use crate::core::storage::{Section, StorageInfo, StorageKind};
pub use da::{DAFile, ImageProvider, StaticImages, WriteReport};
pub use device::{Device, DeviceBuilder};
pub use error::{Error, Result};
pub use session::{Stage, Step};
