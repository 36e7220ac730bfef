use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device not connected")]
    NotConnected,

    #[error("Channel failure: {0}")]
    ChannelFailure(#[source] std::io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Another request is already in flight")]
    Busy,

    #[error("Unexpected report id: {0:#04x}")]
    UnexpectedReportId(u8),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex file error: {0}")]
    HexFile(#[from] ihex::ReaderError),

    #[error("Firmware too large for device")]
    FirmwareTooLarge,
}

impl Error {
    /// Wraps an I/O error raised by the device channel itself.
    pub(crate) fn channel(err: std::io::Error) -> Self {
        Error::ChannelFailure(err)
    }

    /// Channel failures mean the session is gone and must be reopened.
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Error::ChannelFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
