//! The bootloader protocol: checksummed command/response packets spoken
//! while the MCU is held in boot mode, used for flash inquiry, erase,
//! read and write.

pub mod client;
pub mod packet;
pub mod session;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Give the boot firmware some time to start up after reset, in ms.
pub const STARTUP_DELAY_MS: u64 = 500;

/// Gap between the two low-pulse bytes of the handshake, in ms.
pub const LOW_PULSE_DELAY_MS: u64 = 100;

/// Deadline for every response read, in ms.
pub const RESPONSE_TIMEOUT_MS: u64 = 500;

/// Settle time after switching the baud rate, in ms.
pub const BAUD_SETTLE_MS: u64 = 10;

/// The boot firmware always starts at this baud rate.
pub const BOOT_BAUD: u32 = 9600;

/// Baud rate the session is upgraded to after the handshake.
pub const FULL_BAUD: u32 = 115_200;

/// Handshake byte patterns.
pub const LOW_PULSE_PATTERN: u8 = 0x00;
pub const ACK_PATTERN: u8 = 0x00;
pub const GENERIC_CODE_PATTERN: u8 = 0x55;
pub const BOOT_CODE_PATTERN: u8 = 0xc3;

/// Command codes understood by the boot firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    Inquiry = 0x00,
    Erase = 0x12,
    Write = 0x13,
    Read = 0x15,
    BaudrateSetting = 0x34,
    SignatureRequest = 0x3a,
    AreaInformation = 0x3b,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Inquiry => "INQUIRY_CMD",
            Command::Erase => "ERASE_CMD",
            Command::Write => "WRITE_CMD",
            Command::Read => "READ_CMD",
            Command::BaudrateSetting => "BAUDRATE_SETTING_CMD",
            Command::SignatureRequest => "SIGNATURE_REQUEST_CMD",
            Command::AreaInformation => "AREA_INFORMATION_CMD",
        }
    }
}

/// Status codes of the response packets; non-zero means error.
pub const STATUSCODE_OK: u8 = 0x00;
pub const STATUSCODE_UNSUPPORTED_CMD: u8 = 0xc0;
pub const STATUSCODE_PACKET_ERROR: u8 = 0xc1;
pub const STATUSCODE_CHECKSUM_ERROR: u8 = 0xc2;
pub const STATUSCODE_FLOW_ERROR: u8 = 0xc3;
pub const STATUSCODE_ADDRESS_ERROR: u8 = 0xd0;
pub const STATUSCODE_BAUDRATE_MARGIN_ERROR: u8 = 0xd4;
pub const STATUSCODE_PROTECTION_ERROR: u8 = 0xda;
pub const STATUSCODE_ID_MISMATCH_ERROR: u8 = 0xdb;
pub const STATUSCODE_SERIAL_PROGRAMMING_DISABLE_ERROR: u8 = 0xdc;
pub const STATUSCODE_ERASE_ERROR: u8 = 0xe1;
pub const STATUSCODE_WRITE_ERROR: u8 = 0xe2;
pub const STATUSCODE_SEQUENCER_ERROR: u8 = 0xe7;

/// Mnemonic of a status code; the boot firmware may emit values this
/// table does not know, so callers always print the numeric value too.
pub fn status_mnemonic(status: u8) -> &'static str {
    match status {
        STATUSCODE_OK => "STATUSCODE_OK",
        STATUSCODE_UNSUPPORTED_CMD => "STATUSCODE_UNSUPPORTED_CMD",
        STATUSCODE_PACKET_ERROR => "STATUSCODE_PACKET_ERROR",
        STATUSCODE_CHECKSUM_ERROR => "STATUSCODE_CHECKSUM_ERROR",
        STATUSCODE_FLOW_ERROR => "STATUSCODE_FLOW_ERROR",
        STATUSCODE_ADDRESS_ERROR => "STATUSCODE_ADDRESS_ERROR",
        STATUSCODE_BAUDRATE_MARGIN_ERROR => "STATUSCODE_BAUDRATE_MARGIN_ERROR",
        STATUSCODE_PROTECTION_ERROR => "STATUSCODE_PROTECTION_ERROR",
        STATUSCODE_ID_MISMATCH_ERROR => "STATUSCODE_ID_MISMATCH_ERROR",
        STATUSCODE_SERIAL_PROGRAMMING_DISABLE_ERROR => "STATUSCODE_SERIAL_PROGRAMMING_DISABLE_ERROR",
        STATUSCODE_ERASE_ERROR => "STATUSCODE_ERASE_ERROR",
        STATUSCODE_WRITE_ERROR => "STATUSCODE_WRITE_ERROR",
        STATUSCODE_SEQUENCER_ERROR => "STATUSCODE_SEQUENCER_ERROR",
        _ => "UNKNOWN",
    }
}

/// Kind of flash area reported by the area information command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Koa {
    UserCode = 0x00,
    UserData = 0x01,
    Config = 0x02,
}

impl Koa {
    pub fn as_str(&self) -> &'static str {
        match self {
            Koa::UserCode => "user area in code flash",
            Koa::UserData => "user area in data flash",
            Koa::Config => "config area",
        }
    }
}
