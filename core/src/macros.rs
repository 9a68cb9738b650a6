/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Little endian readers over byte slices. Callers check the slice length
//! first, these index directly.

#[macro_export]
macro_rules! le_u16 {
    ($buf:expr, $off:expr) => {
        u16::from_le_bytes([$buf[$off], $buf[$off + 1]])
    };
}

#[macro_export]
macro_rules! le_u32 {
    ($buf:expr, $off:expr) => {
        u32::from_le_bytes([$buf[$off], $buf[$off + 1], $buf[$off + 2], $buf[$off + 3]])
    };
}

#[macro_export]
macro_rules! le_u64 {
    ($buf:expr, $off:expr) => {
        u64::from_le_bytes([
            $buf[$off],
            $buf[$off + 1],
            $buf[$off + 2],
            $buf[$off + 3],
            $buf[$off + 4],
            $buf[$off + 5],
            $buf[$off + 6],
            $buf[$off + 7],
        ])
    };
}
