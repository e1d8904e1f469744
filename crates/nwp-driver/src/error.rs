//! Driver error taxonomy.
//!
//! Every API returns `DriverResult<T>`. [`DriverError::code`] maps an error
//! to the integer status used on the firmware-facing API: `0` is success,
//! negative values are raised by the driver, positive values are firmware
//! status codes passed through unchanged.

use nwp_mem::MemError;
use thiserror::Error;

use crate::subsystem::Subsystem;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("no response before the timeout")]
    ResponseTimeout,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("command given in wrong state")]
    WrongState,
    #[error("packet allocation failure")]
    PacketAllocationFailure,
    #[error("card ready not received before the timeout")]
    CardReadyTimeout,
    #[error("response of {needed} bytes does not fit a {available}-byte buffer")]
    InsufficientBuffer { needed: usize, available: usize },
    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },
    #[error("{0} subsystem is not enabled")]
    SubsystemDisabled(Subsystem),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("command aborted by driver deinit")]
    Aborted,
    #[error("firmware status {0:#06x}")]
    Firmware(u16),
}

impl DriverError {
    /// Integer status for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::ResponseTimeout => -1,
            Self::InvalidParam => -2,
            Self::WrongState => -3,
            Self::PacketAllocationFailure => -4,
            Self::CardReadyTimeout => -5,
            Self::InsufficientBuffer { .. } => -6,
            Self::BufferTooSmall { .. } => -7,
            Self::SubsystemDisabled(_) => -8,
            Self::Transport(_) => -9,
            Self::Frame(_) => -10,
            Self::Aborted => -11,
            Self::Firmware(status) => i32::from(*status),
        }
    }
}

impl From<MemError> for DriverError {
    fn from(err: MemError) -> Self {
        match err {
            MemError::BufferTooSmall { required, available } => Self::BufferTooSmall { required, available },
            MemError::InvalidBlockSize | MemError::PayloadTooLarge { .. } => Self::InvalidParam,
        }
    }
}

/// Integer status of an API result.
pub fn status_code<T>(result: &DriverResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("bus fault: {0}")]
    Bus(String),
    #[error("frame of {len} bytes exceeds the {capacity}-byte receive buffer")]
    FrameTooLarge { len: usize, capacity: usize },
    #[error("device not responding")]
    Disconnected,
}

/// Malformed frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame truncated to {0} bytes")]
    Truncated(usize),
    #[error("descriptor declares {declared} payload bytes, {actual} present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown queue number {0}")]
    UnknownQueue(u8),
    #[error("payload of {0} bytes does not fit")]
    PayloadTooLarge(usize),
}
