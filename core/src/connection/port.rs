/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The boot stage the port was enumerated as, mirrored by the USB PIDs
/// MediaTek uses (0x0003 for BROM, 0x2000 for Preloader, 0x2001 for DA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Brom,
    Preloader,
    Da,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Brom => write!(f, "BROM"),
            ConnectionType::Preloader => write!(f, "Preloader"),
            ConnectionType::Da => write!(f, "DA"),
        }
    }
}

/// Byte-stream duplex channel to the device.
///
/// The engine only ever has one request in flight, so implementations do
/// not need to be re-entrant. `recv` may return fewer bytes than asked for;
/// [`Connection`](crate::connection::Connection) loops until it has enough.
#[async_trait]
pub trait MTKPort: Send + Debug {
    async fn open(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;

    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Reads at least one byte into `buf`, returning the count.
    /// Fails with [`Error::Timeout`](crate::error::Error::Timeout) when nothing
    /// arrives within `timeout`.
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drops buffered data and brings the link back to a clean state.
    async fn reset(&mut self) -> Result<()>;

    fn get_connection_type(&self) -> ConnectionType;
    fn get_port_name(&self) -> String;
}

/// Read/handshake timeouts used by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Single read while a command is in flight.
    pub read: Duration,
    /// Wait for a single handshake probe answer.
    pub probe: Duration,
    /// Wait for the next stage to prove it is alive after a jump.
    pub stage_confirm: Duration,
    /// Optional replies (SoC id, MEID) which older ROMs never send.
    pub optional_reply: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            read: Duration::from_secs(3),
            probe: Duration::from_millis(100),
            stage_confirm: Duration::from_secs(5),
            optional_reply: Duration::from_millis(500),
        }
    }
}
