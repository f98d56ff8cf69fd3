//! The operational protocol: periodic, bit-packed 12-byte frames
//! exchanged with the running MCU firmware.

pub mod frame;
pub mod monitor;
pub mod state;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The MCU is responsive to UART messages this long after releasing the
/// reset line, in ms.
pub const STARTUP_DELAY_MS: u64 = 300;

/// The MCU is expected to answer inquiry messages within this time, in ms.
pub const RESPONSE_TIMEOUT_MS: u64 = 30;

/// The MCU expects Charge Control messages with this periodicity, in ms.
pub const CHARGE_CONTROL_INTERVAL_MS: u64 = 100;

/// The MCU sends Charge State messages with this periodicity, in ms.
pub const CHARGE_STATE_INTERVAL_MS: u64 = 100;

/// We expect at least one frame from the free-running MCU within this
/// period, in ms.
pub const RECV_INTERVAL_MS: u64 = 1000;

/// When being async to the MCU, try at most this many times to get in
/// sync.
pub const MAX_SYNC_TRIALS: u32 = 3;

/// Values of the COM field of an operational frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Com {
    DigitalOutput = 0x00,
    DigitalInput = 0x01,
    AnalogInput01 = 0x02,
    AnalogInput02 = 0x03,
    AnalogInput03 = 0x04,
    AnalogInput04 = 0x05,
    ChargeControl = 0x06,
    ChargeState = 0x07,
    Pt1000State = 0x08,
    Diagnostic = 0x09,
    FwVersion = 0x0a,
    GitHash = 0x0b,
    ErrorMessage = 0x0e,
    ChargeState2 = 0x10,
    ChargeControl2 = 0x11,
    Diagnostic2 = 0x12,
    AnalogInput05 = 0x13,
    Inquiry = 0xff,
}

/// Size of the per-COM receive timestamp table; [`Com::Inquiry`] is
/// never recorded.
pub const COM_COUNT: usize = 0x14;

impl Com {
    pub fn name(&self) -> &'static str {
        match self {
            Com::DigitalOutput => "COM_DIGITAL_OUTPUT",
            Com::DigitalInput => "COM_DIGITAL_INPUT",
            Com::AnalogInput01 => "COM_ANALOG_INPUT_01",
            Com::AnalogInput02 => "COM_ANALOG_INPUT_02",
            Com::AnalogInput03 => "COM_ANALOG_INPUT_03",
            Com::AnalogInput04 => "COM_ANALOG_INPUT_04",
            Com::ChargeControl => "COM_CHARGE_CONTROL",
            Com::ChargeState => "COM_CHARGE_STATE",
            Com::Pt1000State => "COM_PT1000_STATE",
            Com::Diagnostic => "COM_DIAGNOSTIC",
            Com::FwVersion => "COM_FW_VERSION",
            Com::GitHash => "COM_GIT_HASH",
            Com::ErrorMessage => "COM_ERROR_MESSAGE",
            Com::ChargeState2 => "COM_CHARGE_STATE_2",
            Com::ChargeControl2 => "COM_CHARGE_CONTROL_2",
            Com::Diagnostic2 => "COM_DIAGNOSTIC_2",
            Com::AnalogInput05 => "COM_ANALOG_INPUT_05",
            Com::Inquiry => "COM_INQUIRY",
        }
    }
}
