use std::io;

use thiserror::Error;

use crate::boot::status_mnemonic;

/// All failure modes of the library.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error on the underlying device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A serial port configuration error.
    #[error("serial port error: {0}")]
    Serial(#[from] serial::Error),

    /// A read did not complete within its deadline.
    #[error("read timed out after {got} of {want} bytes")]
    Timeout { want: usize, got: usize },

    /// An operational frame failed the SOF/EOF/CRC checks.
    #[error("malformed frame: {0}")]
    BadFrame(&'static str),

    /// A bootloader response failed the shape checks (markers, length
    /// bounds, checksum, response code).
    #[error("unexpected response for {command}: {reason}")]
    BadPacket {
        command: &'static str,
        reason: &'static str,
    },

    /// The MCU answered with a non-OK status code.
    #[error("{command} failed: RES=0x{res:02x}, STS=0x{status:02x} ({mnemonic})")]
    Status {
        command: &'static str,
        res: u8,
        status: u8,
        mnemonic: &'static str,
    },

    /// An operation was invoked while the bootloader session is not ready.
    #[error("{op} invoked in wrong session state")]
    BadState { op: &'static str },

    /// A single-packet transfer was asked to move more than fits.
    #[error("requested transfer of {len} bytes exceeds the packet maximum of {max}")]
    TooBig { len: usize, max: usize },

    /// A magic pattern did not match.
    #[error("magic pattern mismatch")]
    BadMagic,

    /// A stored checksum did not match the recomputed one.
    #[error("CRC mismatch: stored 0x{stored:02x}, computed 0x{computed:02x}")]
    BadCrc { stored: u8, computed: u8 },

    /// The kernel GPIO interface reported an error.
    #[error("GPIO error: {0}")]
    Gpio(#[from] gpio_cdev::Error),

    /// A GPIO line name was not found on the chip.
    #[error("GPIO line '{name}' not found on '{chip}'")]
    LineNotFound { chip: String, name: String },

    /// A zero-length file cannot be flashed.
    #[error("file is empty (length is zero)")]
    EmptyFile,

    /// A file does not fit the selected flash area.
    #[error("file is too large (maximum possible size: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    /// A file size is not a multiple of the flash write unit.
    #[error("file size {size} must be divisible by {unit} without a remainder")]
    UnalignedFile { size: usize, unit: usize },

    /// A human-readable value could not be converted to its binary form.
    #[error("cannot convert '{input}' to a {what}")]
    ParseValue { what: &'static str, input: String },
}

impl Error {
    /// Builds a [`Error::Status`] with the mnemonic looked up; the numeric
    /// value stays in the message so unknown codes remain diagnosable.
    pub fn status(command: &'static str, res: u8, status: u8) -> Self {
        Error::Status {
            command,
            res,
            status,
            mnemonic: status_mnemonic(status),
        }
    }

    /// True for [`Error::Timeout`], the only error monitors may want to
    /// distinguish at the call site.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
