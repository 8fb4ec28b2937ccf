//! Error taxonomy (spec.md §7). `DeviceError` wraps whatever the driver's
//! associated error type reports; `FsError` is the stable, nominal kind set
//! surfaced to callers.

use core::fmt::Debug;

/// Errors produced by the flash I/O wrapper, independent of the driver's own
/// error type (spec.md §4.1 / §6 driver contract).
#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError<E: Debug> {
    #[error("driver error")]
    Driver(E),
    #[error("ECC could not correct the page")]
    EccUnrecoverable,
    #[error("write-verify readback mismatch")]
    VerifyFailed,
    #[error("block is marked bad")]
    BlockBad,
}

/// The stable error taxonomy of spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    #[error("no such file or directory")]
    NoEntry,
    #[error("bad file descriptor")]
    BadFd,
    #[error("too many open files")]
    TooManyOpen,
    #[error("out of memory")]
    NoMemory,
    #[error("invalid argument")]
    InvalidArg,
    #[error("no space left on device")]
    NoSpace,
    #[error("I/O error")]
    Io,
    #[error("unrecoverable ECC error")]
    EccUnrecoverable,
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("file exists")]
    Exists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("resource busy")]
    Busy,
}

impl<E: Debug> From<DeviceError<E>> for FsError {
    fn from(e: DeviceError<E>) -> Self {
        match e {
            DeviceError::Driver(_) => FsError::Io,
            DeviceError::EccUnrecoverable => FsError::EccUnrecoverable,
            DeviceError::VerifyFailed => FsError::Io,
            DeviceError::BlockBad => FsError::Io,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
