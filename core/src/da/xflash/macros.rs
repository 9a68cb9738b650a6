/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

/// Reads a status and fails unless it is 0.
macro_rules! status_ok {
    ($xflash:expr) => {{
        let status = $xflash.get_status().await?;
        if status != 0 {
            return Err($crate::error::Error::proto(format!(
                "Expected status 0, got 0x{:08X}",
                status
            )));
        }
    }};
}

/// Reads a status and fails unless it is one of the given values.
macro_rules! status_any {
    ($xflash:expr, $($expected:expr),+) => {{
        let status = $xflash.get_status().await?;
        if ![$($expected),+].contains(&status) {
            return Err($crate::error::Error::proto(format!(
                "Unexpected status 0x{:08X}",
                status
            )));
        }
    }};
}
