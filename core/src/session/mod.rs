/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod brom;
pub mod preloader;
use std::fmt;

use log::debug;

pub use brom::{BromSession, BromState};
pub use preloader::PreloaderSession;

use crate::connection::Connection;
use crate::core::chipinfo::{BootStage, ChipInfo};
use crate::da::DaSession;
use crate::error::Result;

/// How often an identify command is re-issued after a timeout.
pub const IDENTIFY_RETRIES: usize = 3;

/// The stage of the boot chain a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Disconnected,
    Brom,
    Preloader,
    Da,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Disconnected => write!(f, "Disconnected"),
            Stage::Brom => write!(f, "BROM"),
            Stage::Preloader => write!(f, "Preloader"),
            Stage::Da => write!(f, "DA"),
        }
    }
}

/// Last step the orchestrator completed. Reported with every error so an
/// operator knows where to pick up by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    None,
    Handshake,
    Identify,
    PayloadSent,
    PayloadConfirmed,
    DaUploaded,
    DaActivated,
    Connected,
    PartitionTableRead,
    Read,
    Write,
    Erase,
    Verify,
    Shutdown,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::None => "none",
            Step::Handshake => "handshake",
            Step::Identify => "identify",
            Step::PayloadSent => "payload sent",
            Step::PayloadConfirmed => "payload confirmed",
            Step::DaUploaded => "DA uploaded",
            Step::DaActivated => "DA activated",
            Step::Connected => "connected",
            Step::PartitionTableRead => "partition table read",
            Step::Read => "read",
            Step::Write => "write",
            Step::Erase => "erase",
            Step::Verify => "verify",
            Step::Shutdown => "shutdown",
        };
        write!(f, "{}", name)
    }
}

/// The one live session of a device. Every variant owns the connection, so
/// moving from one to the next hands the transport over.
#[derive(Debug)]
pub enum Session {
    Brom(BromSession),
    Preloader(PreloaderSession),
    Da(DaSession),
}

impl Session {
    pub fn stage(&self) -> Stage {
        match self {
            Session::Brom(_) => Stage::Brom,
            Session::Preloader(_) => Stage::Preloader,
            Session::Da(_) => Stage::Da,
        }
    }

    pub fn into_connection(self) -> Connection {
        match self {
            Session::Brom(s) => s.into_connection(),
            Session::Preloader(s) => s.into_connection(),
            Session::Da(s) => s.into_connection(),
        }
    }
}

/// Re-runs `$op` when it times out, resetting the port in between. Gives up
/// with `DeviceUnresponsive` after `$retries` attempts.
macro_rules! retry_timeout {
    ($conn:expr, $retries:expr, $what:expr, $op:expr) => {{
        let mut attempt = 1;
        loop {
            match $op.await {
                Err($crate::error::Error::Timeout(t)) if attempt < $retries => {
                    log::warn!("{} timed out after {:?} (attempt {}/{})", $what, t, attempt, $retries);
                    $conn.reset().await?;
                    attempt += 1;
                }
                Err($crate::error::Error::Timeout(_)) => {
                    break Err($crate::error::Error::DeviceUnresponsive(format!(
                        "{} got no answer after {} attempts",
                        $what, $retries
                    )));
                }
                other => break other,
            }
        }
    }};
}

pub(crate) use retry_timeout;

/// Identification commands shared by BROM and Preloader.
pub(crate) async fn identify(conn: &mut Connection, boot_stage: BootStage) -> Result<ChipInfo> {
    let hw_code =
        retry_timeout!(conn, IDENTIFY_RETRIES, "GetHwCode", conn.get_hw_code())?;
    let (hw_sub_code, hw_ver, sw_ver) =
        retry_timeout!(conn, IDENTIFY_RETRIES, "GetHwSwVer", conn.get_hw_sw_ver())?;
    let target_config =
        retry_timeout!(conn, IDENTIFY_RETRIES, "GetTargetConfig", conn.get_target_config())?;
    let soc_id = conn.get_soc_id().await?;
    let meid = conn.get_meid().await?;

    let chip = ChipInfo {
        hw_code,
        hw_sub_code,
        hw_ver,
        sw_ver,
        target_config,
        soc_id,
        meid,
        boot_stage,
    };

    debug!("Identified: {}", chip);
    Ok(chip)
}
