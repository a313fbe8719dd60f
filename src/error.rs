//! Error types for floppy target operations

use thiserror::Error;

/// Command failures reported back to the host as SCSI sense data
///
/// A successful command is `Ok(())`; every other outcome is one of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FloppyError {
    #[error("Sector out of range")]
    SectorRange,

    #[error("Wrong media")]
    WrongMedia,

    #[error("Medium changed")]
    MediumChange,

    #[error("Media error")]
    Media,

    #[error("Media in use")]
    MediaInUse,

    #[error("No media present")]
    NoMedia,

    #[error("Invalid parameters")]
    InvalidParams,

    #[error("Unreadable media")]
    UnreadableMedia,

    #[error("Media removal prevented")]
    RemovalPrevented,

    #[error("Media is write protected")]
    WriteProtect,

    #[error("Unsupported command")]
    UnsupportedCommand,

    #[error("Device is already open")]
    DeviceAlreadyOpen,

    #[error("Device path is too long")]
    DevicePathTooLong,
}

/// Result type for SCSI command and session operations
pub type FloppyResult<T> = Result<T, FloppyError>;

/// Host-side target errors
///
/// These never reach the remote host as sense data; they describe problems
/// with the transport buffers or the target configuration itself.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Floppy(#[from] FloppyError),
}

/// Result type for target operations
pub type TargetResult<T> = Result<T, TargetError>;
