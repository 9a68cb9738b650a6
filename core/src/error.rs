/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::time::Duration;

use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::codec::FramingError;
use crate::session::{Stage, Step};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Physical link failure. Fatal to the session.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Handshake timed out")]
    HandshakeTimeout,
    #[error("Device unresponsive: {0}")]
    DeviceUnresponsive(String),
    #[error("Malformed partition table: {0}")]
    MalformedTable(String),
    #[error("Region out of range: {0}")]
    OutOfRange(String),
    #[error("Read integrity error at offset {offset:#X}")]
    ReadIntegrity { offset: u64 },
    /// `offset` is the number of bytes the device acknowledged before the abort.
    #[error("Write aborted after {offset:#X} committed bytes: {cause}")]
    WriteAborted { offset: usize, cause: Box<Error> },
    #[error("Cancelled by caller")]
    Cancelled,
    #[error("Operation requires a {expected} session, but the current session is {actual}")]
    StateMismatch { expected: Stage, actual: Stage },
    #[error("Device returned status {0}")]
    Status(DaStatus),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("{stage} stage failed (last completed step: {last_step}): {source}")]
    Stage {
        stage: Stage,
        last_step: Step,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    pub fn conn(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    pub fn proto(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedTable(msg.into())
    }

    /// Attaches the stage and the last completed step, unless the error
    /// already carries that context.
    pub fn in_stage(self, stage: Stage, last_step: Step) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage { stage, last_step, source: Box::new(other) },
        }
    }

    /// The underlying error, with any stage context peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn write_aborted(offset: usize, cause: Error) -> Self {
        Error::WriteAborted { offset, cause: Box::new(cause) }
    }

    /// Errors after which the device state can no longer be trusted and the
    /// session has to be torn down.
    pub fn is_fatal(&self) -> bool {
        match self.root() {
            Error::Transport(_) | Error::Io(_) | Error::HandshakeTimeout | Error::DeviceUnresponsive(_) => {
                true
            }
            Error::WriteAborted { cause, .. } => cause.is_fatal(),
            _ => false,
        }
    }

    /// Errors the caller may retry without reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Error::Timeout(_) | Error::Framing(FramingError::BadChecksum { .. }))
    }
}

/// Known DA status words. Anything else is reported as a raw value.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum DaStatusCode {
    Error = 0xC0010001,
    Abort = 0xC0010002,
    UnsupportedCmd = 0xC0010003,
    UnsupportedCtrlCode = 0xC0010004,
    ProtocolErr = 0xC0010005,
    ProtocolBufferOverflow = 0xC0010006,
    InsufficientBuffer = 0xC0010007,
    UsbScanErr = 0xC0010008,
    InvalidHsession = 0xC0010009,
    InvalidSession = 0xC001000A,
    InvalidStage = 0xC001000B,
    NotImplemented = 0xC001000C,
    FileNotFound = 0xC001000D,
    OpenFileErr = 0xC001000E,
    WriteFileErr = 0xC001000F,
    ReadFileErr = 0xC0010010,
    CreateFileErr = 0xC0010011,
    ChecksumErr = 0xC0010012,
    RangeErr = 0xC0010013,
    SlaRequired = 0xC0010014,
    StorageNotReady = 0xC0030001,
    WriteProtected = 0xC0030003,
    PartitionNotFound = 0xC0030005,
    EraseFailed = 0xC0030008,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaStatus(pub u32);

impl DaStatus {
    pub fn code(&self) -> Option<DaStatusCode> {
        DaStatusCode::try_from(self.0).ok()
    }
}

impl fmt::Display for DaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "0x{:08X} ({:?})", self.0, code),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}
