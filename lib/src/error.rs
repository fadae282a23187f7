// Copyright (c) 2022-2023 The MobileCoin Foundation

use remote_dongle_apdu::Status;
use tokio::time::error::Elapsed;

/// Remote dongle API Error Type
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Task cancelled before completion
    #[error("Task cancelled")]
    CancelledTask,

    /// Invalid request parameters
    #[error("Invalid parameters")]
    InvalidParameters,

    /// Unexpected or malformed device response
    #[error("Invalid response")]
    InvalidResponse,

    /// Failed to connect to device
    #[error("Unable to connect")]
    UnableToConnect,

    /// Failed to subscribe to device notifications
    #[error("Unable to bind")]
    UnableToBind,

    /// Failed to read from device
    #[error("Unable to read")]
    UnableToRead,

    /// Failed to write to device
    #[error("Unable to write")]
    UnableToWrite,

    /// Device attestation failed
    #[error("Unable to authenticate device")]
    UnableToAuthentify,

    /// Peripheral does not match the expected GATT layout
    #[error("Wrong device")]
    WrongDevice,

    /// Device disconnected unexpectedly
    #[error("Remote disconnection")]
    RemoteDisconnection,

    /// Transfer or task timed out
    #[error("Transfer timeout")]
    TransferTimeout,

    /// No device connected
    #[error("Not connected")]
    NotConnected,

    /// A transfer is already in flight
    #[error("Transfer pending")]
    TransferPending,

    /// Device reported invalid length (`0x6700`)
    #[error("Invalid length")]
    InvalidLength,

    /// Device reported invalid access rights (`0x6982`)
    #[error("Invalid access rights")]
    InvalidAccessRights,

    /// Device reported invalid request (`0x6A80`)
    #[error("Invalid request")]
    InvalidRequest,

    /// Device reported file not found (`0x6A82`)
    #[error("File not found")]
    FileNotFound,

    /// Device reported instruction not implemented (`0x6D00`)
    #[error("Not implemented")]
    NotImplemented,

    /// Device reported a technical problem (`0x6Fxx`)
    #[error("Technical problem (0x{0:02x})")]
    TechnicalProblem(u8),

    /// Unrecognised status word
    #[error("Unknown status (0x{0:04x})")]
    UnknownStatus(u16),
}

impl From<Status> for Error {
    fn from(s: Status) -> Self {
        match s {
            // Success is never an error, treat as a protocol violation
            Status::Success => Error::InvalidResponse,
            Status::WrongPin { remaining } => Error::UnknownStatus(0x63c0 | remaining as u16),
            Status::InvalidLength => Error::InvalidLength,
            Status::InvalidAccessRights => Error::InvalidAccessRights,
            Status::InvalidRequest => Error::InvalidRequest,
            Status::FileNotFound => Error::FileNotFound,
            Status::InvalidParameters => Error::InvalidParameters,
            Status::NotImplemented => Error::NotImplemented,
            Status::TechnicalProblem(v) => Error::TechnicalProblem(v),
            Status::Unknown(v) => Error::UnknownStatus(v),
        }
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::TransferTimeout
    }
}
