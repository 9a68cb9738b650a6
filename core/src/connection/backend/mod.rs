/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#[cfg(feature = "serial")]
pub mod serial_backend;
#[cfg(feature = "serial")]
pub use serial_backend::SerialMTKPort;
