use crate::context::DeviceKind;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::result::Result as StdResult;

/// Errors which can occur during device setup and card programming.
///
/// None of these are retried internally. Any of them leaves the card in an unspecified state
/// relative to the image being transferred, so the whole transfer has to be restarted.
#[derive(Debug)]
pub enum Error {
    /// A request was rejected by safety checks before anything was sent to the device (e.g. a
    /// block which is not exactly 4096 bytes long).
    InvalidArgument(&'static str),

    /// A logical page lies outside of the card's memory layout.
    PageOutOfRange(u16),

    /// No supported programmer is connected.
    DeviceNotFound,

    /// More than one programmer matched and no specific one was requested.
    TooManyMatches,

    /// The USB device is a known programmer variant, but this library cannot talk to it.
    UnsupportedDevice(DeviceKind),

    /// The device answered a command with something other than the expected bytes.
    UnexpectedResponse(Vec<u8>),

    /// No card is inserted, or the card was pulled out during an operation.
    CardMissing,

    /// The card reported an identifier with no known memory layout.
    UnknownCard(u32),

    /// The block with the given index read back differently from the source image.
    VerificationMismatch(usize),

    /// An error occurred during the raw USB communication.
    Usb(rusb::Error),

    /// Reading the source image or writing the destination image failed.
    Io(std::io::Error),
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Usb(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter) -> StdResult<(), std::fmt::Error> {
        match self {
            Error::InvalidArgument(reason) => write!(fmt, "Invalid argument: {}", reason),
            Error::PageOutOfRange(page) => write!(fmt, "Page {} is out of range", page),
            Error::DeviceNotFound => fmt.write_str("Device not found"),
            Error::TooManyMatches => fmt.write_str("Too many matches"),
            Error::UnsupportedDevice(kind) => write!(fmt, "Unsupported device: {}", kind),
            Error::UnexpectedResponse(response) => {
                write!(fmt, "Unexpected response: {:02x?}", response)
            }
            Error::CardMissing => fmt.write_str("Card is missing"),
            Error::UnknownCard(iid) => write!(fmt, "Unknown data card IID: 0x{:08x}", iid),
            Error::VerificationMismatch(block) => {
                write!(fmt, "Verification failed: block {} is incorrect", block)
            }
            Error::Usb(err) => write!(fmt, "USB error: {}", err),
            Error::Io(err) => write!(fmt, "I/O error: {}", err),
        }
    }
}

impl From<rusb::Error> for Error {
    fn from(error: rusb::Error) -> Self {
        Error::Usb(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

/// Shorthand for a Result with the crate's own Error type.
pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::UnknownCard(0x0100_ad01).to_string(),
            "Unknown data card IID: 0x0100ad01"
        );
        assert_eq!(
            Error::VerificationMismatch(17).to_string(),
            "Verification failed: block 17 is incorrect"
        );
        assert_eq!(
            Error::UnexpectedResponse(vec![0x04, 0x01]).to_string(),
            "Unexpected response: [04, 01]"
        );
    }

    #[test]
    fn test_source() {
        assert!(Error::Usb(rusb::Error::Timeout).source().is_some());
        assert!(Error::CardMissing.source().is_none());
    }
}
