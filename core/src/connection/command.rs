/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

/// Commands understood by both the BROM and the Preloader command loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetHwSwVer = 0xFC,
    GetHwCode = 0xFD,
    GetBlVer = 0xFE,

    Read32 = 0xD1,
    JumpDa = 0xD5,
    SendDa = 0xD7,
    GetTargetConfig = 0xD8,

    GetMeId = 0xE1,
    GetSocId = 0xE7,
}

/// First handshake probe, repeated until the ROM answers [`HANDSHAKE_READY`].
pub const HANDSHAKE_PROBE: u8 = 0xA0;
pub const HANDSHAKE_READY: u8 = 0x5F;
/// Remaining handshake bytes, each answered with its complement.
pub const HANDSHAKE_SEQ: [u8; 3] = [0x0A, 0x50, 0x05];
