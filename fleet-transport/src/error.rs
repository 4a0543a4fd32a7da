//! Transport error types

use thiserror::Error;

/// Errors that can occur while driving a bus or a vendor tool
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command `{command}` failed with exit code {code:?}")]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Command `{0}` timed out")]
    Timeout(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid CAN UUID: {0}")]
    InvalidUuid(String),

    #[error("CAN interface {0} is down")]
    InterfaceDown(String),

    #[error("CAN error: {0}")]
    CanError(String),

    #[error("Serial error: {0}")]
    SerialError(String),

    #[error("DFU error: {0}")]
    DfuError(String),
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::SerialError(e.to_string())
    }
}
