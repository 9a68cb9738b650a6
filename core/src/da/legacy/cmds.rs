/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
/// Single byte commands of the legacy DA. Every command is followed by its
/// big endian parameters and answered with [`ACK`] or [`NACK`] + status word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    WriteData = 0x62,
    GetPartitionTable = 0xD2,
    Format = 0xD4,
    ReadData = 0xD6,
    Shutdown = 0xD9,
}

pub const ACK: u8 = 0x5A;
pub const NACK: u8 = 0xA5;
/// Sent by the host instead of the next chunk (write) or reply (read) to
/// end a transfer early.
pub const ABORT: u8 = 0xEE;
