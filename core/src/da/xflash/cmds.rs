/*
    SPDX-License-Identifier: GPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy

    Derived from:
    https://github.com/bkerler/mtkclient/blob/main/mtkclient/Library/DA/xflash/xflash_param.py
    Original SPDX-License-Identifier: GPL-3.0-or-later
    Original SPDX-FileCopyrightText: 2018–2024 bkerler

    This file remains under the GPL-3.0-or-later license.
    However, as part of a larger project licensed under the AGPL-3.0-or-later,
    the combined work is subject to the networking terms of the AGPL-3.0-or-later,
    as for term 13 of the GPL-3.0-or-later license.
*/
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Magic = 0xFEEEEEEF,
    SyncSignal = 0x434E5953,

    Format = 0x010003,
    WriteData = 0x010004,
    ReadData = 0x010005,
    Shutdown = 0x010007,
    BootTo = 0x010008,
    DeviceCtrl = 0x010009,

    SetupEnvironment = 0x010100,
    SetupHwInitParams = 0x010101,

    GetEmmcInfo = 0x040001,
    GetNandInfo = 0x040002,
    GetUfsInfo = 0x040004,
    GetPacketLength = 0x040007,
    GetUsbSpeed = 0x04000B,
    GetChipId = 0x04000D,
}

/// Frame opcodes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    ProtocolFlow = 1,
    /// Empty frame asking the peer to send its last frame again.
    Retransmit = 3,
}

/// Read acknowledgement telling the DA to stop streaming.
pub const READ_ABORT: u32 = 1;
