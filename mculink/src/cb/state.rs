//! Live device state of the safety MCU and the bit layouts of its
//! state words.
//!
//! Every word is a bit-packed `u64`; the typed views below pin each
//! field's position. Charge State and Charge Control exist in two
//! layouts: the classic one (CS1/CC1) and the MCS one (CS2/CC2),
//! selected at runtime by the platform [`Mode`].

use std::fmt::Write as _;
use std::io::{self, Write};

use bitfield::bitfield;
use chrono::{DateTime, Local};
use num_enum::{FromPrimitive, IntoPrimitive};

use super::{Com, COM_COUNT};
use crate::{MAX_CONTACTORS, MAX_ESTOPS, MAX_PT1000S};

/// CP related bit flags.
pub const CP_SHORT_CIRCUIT: u8 = 0x1;
pub const CP_DIODE_FAULT: u8 = 0x2;

/// PT1000 related bit flags.
pub const PT1000_CHARGING_STOPPED: u8 = 0x1;
pub const PT1000_SELFTEST_FAILED: u8 = 0x2;

/// Magic value in the 14-bit temperature field marking an unused channel.
pub const PT1000_TEMPERATURE_UNUSED: u16 = 0x1fff;

/// Possible CP states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CpState {
    #[num_enum(default)]
    Unknown = 0x0,
    A,
    B,
    C,
    D,
    E,
    F,
    Invalid,
}

impl CpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpState::Unknown => "unknown",
            CpState::A => "A",
            CpState::B => "B",
            CpState::C => "C",
            CpState::D => "D",
            CpState::E => "E",
            CpState::F => "F",
            CpState::Invalid => "invalid",
        }
    }
}

/// Possible PP states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PpState {
    NoCable = 0x0,
    Amp13,
    Amp20,
    Amp32,
    Amp63To70,
    Type1Connected,
    Type1ConnectedButtonPressed,
    #[num_enum(default)]
    Invalid,
}

impl PpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PpState::NoCable => "no cable detected",
            PpState::Amp13 => "13 A",
            PpState::Amp20 => "20 A",
            PpState::Amp32 => "32 A",
            PpState::Amp63To70 => "63/70 A",
            PpState::Type1Connected => "connected",
            PpState::Type1ConnectedButtonPressed => "connected, button pressed",
            PpState::Invalid => "invalid",
        }
    }
}

/// Possible contactor states as reported by the MCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ContactorState {
    Open = 0x0,
    Closed = 0x1,
    Reserved = 0x2,
    #[num_enum(default)]
    Unused = 0x3,
}

impl ContactorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactorState::Open => "open",
            ContactorState::Closed => "CLOSED",
            ContactorState::Reserved => "reserved",
            ContactorState::Unused => "unused",
        }
    }
}

/// Possible emergency stop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum EstopState {
    NotTripped = 0x0,
    Tripped = 0x1,
    Reserved = 0x2,
    #[num_enum(default)]
    Unused = 0x3,
}

impl EstopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstopState::NotTripped => "not tripped",
            EstopState::Tripped => "TRIPPED",
            EstopState::Reserved => "reserved",
            EstopState::Unused => "unused",
        }
    }
}

/// SafeStateActive status in Charge State 1/2 frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum SafeStateActive {
    Normal = 0x0,
    SafeState = 0x1,
    #[num_enum(default)]
    Reserved = 0x2,
    Sna = 0x3,
}

impl SafeStateActive {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeStateActive::Normal => "normal",
            SafeStateActive::SafeState => "safe state",
            SafeStateActive::Reserved => "reserved",
            SafeStateActive::Sna => "SNA",
        }
    }
}

/// Safe state reasons of the Charge State 1 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum SafeStateReason {
    NoStop = 0x0,
    InternalError,
    ComTimeout,
    Temp1Malfunction,
    Temp2Malfunction,
    Temp3Malfunction,
    Temp4Malfunction,
    Temp1Overtemp,
    Temp2Overtemp,
    Temp3Overtemp,
    Temp4Overtemp,
    PpMalfunction,
    CpMalfunction,
    CpShortCircuit,
    CpDiodeFault,
    HvSwitchMalfunction,
    EmergencyInput1,
    EmergencyInput2,
    EmergencyInput3,
    #[num_enum(default)]
    Unknown = 0xff,
}

impl SafeStateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeStateReason::NoStop => "no safe state",
            SafeStateReason::InternalError => "internal error",
            SafeStateReason::ComTimeout => "communication timeout",
            SafeStateReason::Temp1Malfunction => "temperature 1 malfunction",
            SafeStateReason::Temp2Malfunction => "temperature 2 malfunction",
            SafeStateReason::Temp3Malfunction => "temperature 3 malfunction",
            SafeStateReason::Temp4Malfunction => "temperature 4 malfunction",
            SafeStateReason::Temp1Overtemp => "temperature 1 over-temperature",
            SafeStateReason::Temp2Overtemp => "temperature 2 over-temperature",
            SafeStateReason::Temp3Overtemp => "temperature 3 over-temperature",
            SafeStateReason::Temp4Overtemp => "temperature 4 over-temperature",
            SafeStateReason::PpMalfunction => "Proximity Pilot error",
            SafeStateReason::CpMalfunction => "Control Pilot error",
            SafeStateReason::CpShortCircuit => "Control Pilot short-circuit",
            SafeStateReason::CpDiodeFault => "Control Pilot diode not detected",
            SafeStateReason::HvSwitchMalfunction => "high-voltage switch malfunction",
            SafeStateReason::EmergencyInput1 => "emergency input 1",
            SafeStateReason::EmergencyInput2 => "emergency input 2",
            SafeStateReason::EmergencyInput3 => "emergency input 3",
            SafeStateReason::Unknown => "unknown",
        }
    }
}

/// CCS ready values of the Charge Control 2 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CcsReady {
    NotReady = 0x0,
    Ready = 0x1,
    EmergencyStop = 0x2,
    #[num_enum(default)]
    Invalid = 0xf,
}

impl CcsReady {
    pub fn as_str(&self) -> &'static str {
        match self {
            CcsReady::NotReady => "not ready",
            CcsReady::Ready => "ready",
            CcsReady::EmergencyStop => "emergency stop",
            CcsReady::Invalid => "undefined",
        }
    }
}

/// CE states of the Charge State 2 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CeState {
    Unknown = 0x0,
    A,
    B0,
    B,
    C,
    E,
    Ec,
    #[num_enum(default)]
    Invalid,
}

impl CeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CeState::Unknown => "unknown",
            CeState::A => "A",
            CeState::B0 => "B0",
            CeState::B => "B",
            CeState::C => "C",
            CeState::E => "E",
            CeState::Ec => "EC",
            CeState::Invalid => "invalid",
        }
    }
}

/// ID states of the Charge State 2 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum IdState {
    Unknown = 0x0,
    NotConnected,
    Connected,
    #[num_enum(default)]
    Invalid,
}

impl IdState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdState::Unknown => "unknown",
            IdState::NotConnected => "not connected",
            IdState::Connected => "connected",
            IdState::Invalid => "invalid",
        }
    }
}

/// Emergency stop reasons of the Charge State 2 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum EstopReason {
    NoStop = 0x0,
    InternalError,
    ComTimeout,
    Temp1Malfunction,
    Temp2Malfunction,
    Temp3Malfunction,
    Temp4Malfunction,
    Temp1Overtemp,
    Temp2Overtemp,
    Temp3Overtemp,
    Temp4Overtemp,
    IdMalfunction,
    CeMalfunction,
    HvReadyMalfunction,
    EmergencyInput,
    #[num_enum(default)]
    Unknown = 0xff,
}

impl EstopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstopReason::NoStop => "no estop reason",
            EstopReason::InternalError => "internal error",
            EstopReason::ComTimeout => "communication timeout",
            EstopReason::Temp1Malfunction => "temperature 1 malfunction",
            EstopReason::Temp2Malfunction => "temperature 2 malfunction",
            EstopReason::Temp3Malfunction => "temperature 3 malfunction",
            EstopReason::Temp4Malfunction => "temperature 4 malfunction",
            EstopReason::Temp1Overtemp => "temperature 1 over-temperature",
            EstopReason::Temp2Overtemp => "temperature 2 over-temperature",
            EstopReason::Temp3Overtemp => "temperature 3 over-temperature",
            EstopReason::Temp4Overtemp => "temperature 4 over-temperature",
            EstopReason::IdMalfunction => "ID malfunction",
            EstopReason::CeMalfunction => "CE malfunction",
            EstopReason::HvReadyMalfunction => "HV ready malfunction",
            EstopReason::EmergencyInput => "emergency input",
            EstopReason::Unknown => "unknown",
        }
    }
}

/// Firmware platform types of the FW Version frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PlatformType {
    #[num_enum(default)]
    Unknown = 0x00,
    ChargeSom = 0x81,
    Ccy = 0x82,
    Unspecified = 0xff,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Unspecified => "unspecified",
            PlatformType::Unknown => "unknown",
            PlatformType::ChargeSom => "Charge SOM",
            PlatformType::Ccy => "Charge Control Y",
        }
    }
}

/// Firmware application types of the FW Version frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ApplicationType {
    #[num_enum(default)]
    Unknown = 0x0,
    Firmware = 0x3,
    Eol = 0x4,
    Qualification = 0x5,
}

impl ApplicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationType::Unknown => "unknown",
            ApplicationType::Firmware => "firmware",
            ApplicationType::Eol => "eol",
            ApplicationType::Qualification => "qualification",
        }
    }
}

/// Modules that can raise an Error Message frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ErrmsgModule {
    Default = 0,
    AppTask,
    AppComm,
    AppSafety,
    AppCpPp,
    AppTemp,
    AppSystem,
    MwAdc,
    MwI2c,
    MwPin,
    MwPwm,
    MwUart,
    MwParam,
    #[num_enum(default)]
    Unknown = 0xff,
}

impl ErrmsgModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrmsgModule::Default => "DEFAULT",
            ErrmsgModule::AppTask => "APP_TASK",
            ErrmsgModule::AppComm => "APP_COMM",
            ErrmsgModule::AppSafety => "APP_SAFETY",
            ErrmsgModule::AppCpPp => "APP_CP_PP",
            ErrmsgModule::AppTemp => "APP_TEMP",
            ErrmsgModule::AppSystem => "APP_SYSTEM",
            ErrmsgModule::MwAdc => "MW_ADC",
            ErrmsgModule::MwI2c => "MW_I2C",
            ErrmsgModule::MwPin => "MW_PIN",
            ErrmsgModule::MwPwm => "MW_PWM",
            ErrmsgModule::MwUart => "MW_UART",
            ErrmsgModule::MwParam => "MW_PARAM",
            ErrmsgModule::Unknown => "unknown",
        }
    }

    /// Human rendering of this module's reason codes; square brackets
    /// describe the two additional data words.
    pub fn reason_str(&self, reason: u16) -> &'static str {
        let reasons: &[&'static str] = match self {
            ErrmsgModule::Default => &["default"],
            ErrmsgModule::AppTask => &["default", "task was not executed in time [task id, -]"],
            ErrmsgModule::AppComm => &[
                "default",
                "safety message timeouted [message id, last timestamp]",
            ],
            ErrmsgModule::AppSafety => &[
                "default",
                "safety state mismatch [active safety fault, inverted safety fault]",
                "CP safety fault [CP pos voltage, CP neg voltage]",
            ],
            ErrmsgModule::AppCpPp => &[
                "default",
                "[CP pos voltage, CP neg voltage]",
                "[PP voltage, -]",
            ],
            ErrmsgModule::AppTemp => &[
                "default",
                "short to battery [raw current, index]",
                "short to ground [raw current, index:4 | raw voltage:12]",
                "open load [raw current, index:4 | raw voltage:12]",
                "temperature over limit [raw temp, index]",
                "temperature under limit [raw temp, index]",
                "resistance too high [resistance/10000, index]",
                "resistance negative [abs(resistance), index]",
                "invalid evaluation state [state, -]",
            ],
            ErrmsgModule::AppSystem => &[
                "default",
                "watchdog error [watchdog state, -]",
                "application initial selftests failed [-, -]",
                "application CRC mismatch [calculated CRC, stored CRC]",
                "application initial ADC test error [-, -]",
                "CPU test error [-, -]",
                "RAM test error [-, -]",
                "clock test error [-, -]",
                "clock stop error [-, -]",
                "ROM test error [-, -]",
                "ADC test error [-, -]",
                "voltage test error [-, -]",
                "temperature error [-, -]",
                "other test failed [-, -]",
            ],
            ErrmsgModule::MwAdc => &[
                "default",
                "ELC initialization failed [FSP error code, -]",
                "ADC initialization failed [FSP error code, -]",
                "ADC scan configuration failed [FSP error code, -]",
                "ELC enable failed [FSP error code, -]",
                "ADC scan start failed [FSP error code, -]",
                "GPT initialization failed [FSP error code, -]",
                "GPT start failed [FSP error code, -]",
                "ADC read failed [group, FSP error code]",
                "invalid parameter for adcif_get_value [value, average_size]",
            ],
            ErrmsgModule::MwI2c => &["default"],
            ErrmsgModule::MwPin => &["default"],
            ErrmsgModule::MwPwm => &[
                "default",
                "GPT initialization failed [FSP error code, -]",
                "GPT start failed [FSP error code, -]",
                "setting duty cycle failed [dutycycle, FSP error code]",
            ],
            ErrmsgModule::MwUart => &[
                "default",
                "UART initialization failed [FSP error code, -]",
                "UART RX buffer overflow [packet type, buffer index]",
                "UART TX buffer overflow [packet type, buffer index]",
                "UART TX failed [packet type, FSP error code]",
                "no TX packet set [ -, -]",
            ],
            ErrmsgModule::MwParam => &[
                "default",
                "parameter not found in memory, defaults will be used",
                "CRC mismatch, defaults will be used ",
                "index out of bounds [index, [1= temp, 2=hv connector, 3=emergency in]]",
            ],
            ErrmsgModule::Unknown => &[],
        };

        reasons.get(reason as usize).copied().unwrap_or("unknown")
    }
}

bitfield! {
    /// Outgoing control word. The classic layout (CC1) carries PWM,
    /// duty cycle and contactor requests; the MCS layout (CC2) only the
    /// CCS-ready field in the top nibble.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ChargeControl(u64);
    impl Debug;
    pub pwm_active, set_pwm_active: 63;
    pub u16, duty_cycle, set_duty_cycle_raw: 57, 48;
    pub u8, contactor_bit, set_contactor_bit: 40, 40, 2;
    u8, ccs_ready_raw, set_ccs_ready_raw: 63, 60;
}

impl ChargeControl {
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Requested duty cycle in tenths of percent, clamped to 0..=1000.
    pub fn set_duty_cycle(&mut self, duty: u16) {
        self.set_duty_cycle_raw(duty.min(1000));
    }

    pub fn target_contactor(&self, contactor: usize) -> bool {
        self.contactor_bit(contactor) != 0
    }

    pub fn set_contactor(&mut self, contactor: usize, close: bool) {
        self.set_contactor_bit(contactor, close as u8);
    }

    pub fn ccs_ready(&self) -> CcsReady {
        CcsReady::from(self.ccs_ready_raw())
    }

    pub fn set_ccs_ready(&mut self, ready: bool) {
        self.set_ccs_ready_raw(if ready {
            CcsReady::Ready.into()
        } else {
            CcsReady::NotReady.into()
        });
    }

    pub fn set_estop(&mut self, estop: bool) {
        self.set_ccs_ready_raw(if estop {
            CcsReady::EmergencyStop.into()
        } else {
            CcsReady::NotReady.into()
        });
    }
}

bitfield! {
    /// Received state word, classic layout (CS1).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ChargeState(u64);
    impl Debug;
    pub pwm_active, _: 63;
    pub u16, duty_cycle, _: 57, 48;
    u8, cp_state_raw, _: 42, 40;
    pub u8, cp_errors, _: 44, 43;
    u8, pp_state_raw, _: 34, 32;
    pub hv_ready, _: 30;
    u8, contactor_raw, _: 25, 24, 2;
    u8, estop_raw, _: 17, 16, 3;
    u8, safestate_reason_raw, _: 15, 8;
    u8, safe_state_active_raw, _: 59, 58;
}

impl ChargeState {
    pub fn cp_state(&self) -> CpState {
        CpState::from(self.cp_state_raw())
    }

    pub fn pp_state(&self) -> PpState {
        PpState::from(self.pp_state_raw())
    }

    pub fn contactor_state(&self, contactor: usize) -> ContactorState {
        ContactorState::from(self.contactor_raw(contactor))
    }

    pub fn estop_state(&self, estop: usize) -> EstopState {
        EstopState::from(self.estop_raw(estop))
    }

    pub fn safestate_reason(&self) -> SafeStateReason {
        SafeStateReason::from(self.safestate_reason_raw())
    }

    pub fn safe_state_active(&self) -> SafeStateActive {
        SafeStateActive::from(self.safe_state_active_raw())
    }
}

bitfield! {
    /// Received state word, MCS layout (CS2). Contactor, e-stop and HV
    /// fields keep their classic positions and are read through
    /// [`ChargeState`].
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ChargeState2(u64);
    impl Debug;
    u8, id_state_raw, _: 59, 56;
    u8, ce_state_raw, _: 63, 60;
    u8, estop_reason_raw, _: 55, 48;
    u8, safe_state_active_raw, _: 47, 46;
}

impl ChargeState2 {
    pub fn id_state(&self) -> IdState {
        IdState::from(self.id_state_raw())
    }

    pub fn ce_state(&self) -> CeState {
        CeState::from(self.ce_state_raw())
    }

    pub fn estop_reason(&self) -> EstopReason {
        EstopReason::from(self.estop_reason_raw())
    }

    pub fn safe_state_active(&self) -> SafeStateActive {
        SafeStateActive::from(self.safe_state_active_raw())
    }
}

bitfield! {
    /// Temperature word: four 16-bit channels, channel 0 topmost.
    /// Within a channel the top 14 bits are a signed temperature in
    /// 0.1 °C steps (arithmetic right-shift by two), the bottom 2 bits
    /// are error flags.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Pt1000(u64);
    impl Debug;
    u16, wire_channel, _: 15, 0, 4;
}

impl Pt1000 {
    fn channel(&self, channel: usize) -> u16 {
        self.wire_channel(MAX_PT1000S - 1 - channel)
    }

    pub fn is_active(&self, channel: usize) -> bool {
        (self.channel(channel) >> 2) != PT1000_TEMPERATURE_UNUSED
    }

    /// Temperature in °C; access the whole 16 bits so the sign shifts
    /// correctly.
    pub fn temperature(&self, channel: usize) -> f64 {
        ((self.channel(channel) as i16) >> 2) as f64 / 10.0
    }

    pub fn errors(&self, channel: usize) -> u8 {
        (self.channel(channel) & 0x3) as u8
    }

    pub fn have_errors(&self) -> bool {
        const MASK: u64 = 0x3 | 0x3 << 16 | 0x3 << 32 | 0x3 << 48;
        self.0 & MASK != 0
    }
}

bitfield! {
    /// FW Version frame payload.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct FwVersion(u64);
    impl Debug;
    pub u8, major, _: 63, 56;
    pub u8, minor, _: 55, 48;
    pub u8, build, _: 47, 40;
    u8, platform_raw, _: 39, 32;
    u8, application_raw, _: 31, 24;
    pub u16, param_version, _: 23, 8;
}

impl FwVersion {
    pub fn platform(&self) -> PlatformType {
        PlatformType::from(self.platform_raw())
    }

    pub fn application(&self) -> ApplicationType {
        ApplicationType::from(self.application_raw())
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major(), self.minor(), self.build())
    }
}

bitfield! {
    /// Error Message frame payload.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct ErrorMessage(u64);
    impl Debug;
    pub active, _: 63;
    u16, module_raw, _: 62, 48;
    pub u16, reason, _: 47, 32;
    pub u16, additional_data_1, _: 31, 16;
    pub u16, additional_data_2, _: 15, 0;
}

impl ErrorMessage {
    pub fn module(&self) -> ErrmsgModule {
        let raw = self.module_raw();
        if raw > u8::MAX as u16 {
            ErrmsgModule::Unknown
        } else {
            ErrmsgModule::from(raw as u8)
        }
    }
}

/// Which frame set the MCU speaks. Advances from classic to MCS once
/// within a session, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Classic,
    Mcs,
}

/// The current MCU state as projected from received frames plus the
/// outgoing control word.
///
/// Received words default to zero; their bit fields are meaningful only
/// once the matching frame arrived at least once (tracked by the per-COM
/// timestamps, and by the words themselves for the one-shot values).
pub struct SafetyController {
    /// Latest control word to send.
    pub charge_control: ChargeControl,

    /// The latest received words.
    charge_state: u64,
    pt1000: Pt1000,
    fw_version: FwVersion,
    error_message: ErrorMessage,

    /// Git hash is special: handled as a byte stream, kept in the host
    /// byte order the frame decoder produced and re-reversed for
    /// rendering.
    git_hash: u64,

    mode: Mode,

    /// Receive timestamp of the latest frame for each packet type.
    ts_recv: [Option<DateTime<Local>>; COM_COUNT],
}

impl Default for SafetyController {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyController {
    pub fn new() -> Self {
        SafetyController {
            charge_control: ChargeControl::default(),
            charge_state: 0,
            pt1000: Pt1000::default(),
            fw_version: FwVersion::default(),
            error_message: ErrorMessage::default(),
            git_hash: 0,
            mode: Mode::Classic,
            ts_recv: [None; COM_COUNT],
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_mcs(&self) -> bool {
        self.mode == Mode::Mcs
    }

    /// Switches to the MCS frame set. The mode only ever advances within
    /// a session.
    pub fn promote_to_mcs(&mut self) {
        self.mode = Mode::Mcs;
    }

    /// Classic view of the latest state word.
    pub fn charge_state(&self) -> ChargeState {
        ChargeState(self.charge_state)
    }

    /// MCS view of the latest state word.
    pub fn charge_state2(&self) -> ChargeState2 {
        ChargeState2(self.charge_state)
    }

    pub fn pt1000(&self) -> &Pt1000 {
        &self.pt1000
    }

    pub fn fw_version(&self) -> &FwVersion {
        &self.fw_version
    }

    pub fn has_fw_version(&self) -> bool {
        self.fw_version.0 != 0
    }

    pub fn error_message(&self) -> &ErrorMessage {
        &self.error_message
    }

    pub fn has_error_message(&self) -> bool {
        self.error_message.0 != 0
    }

    pub fn has_git_hash(&self) -> bool {
        self.git_hash != 0
    }

    /// Hex rendering of the git hash: the eight wire bytes in received
    /// order.
    pub fn git_hash_string(&self) -> String {
        let mut s = String::with_capacity(16);
        for b in self.git_hash.to_be_bytes() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Enables/disables PWM and sets the duty cycle in one go.
    pub fn set_pwm(&mut self, enable: bool, duty: u16) {
        self.charge_control.set_duty_cycle(duty);
        self.charge_control.set_pwm_active(enable);
    }

    pub fn set_pwm_active(&mut self, active: bool) {
        self.charge_control.set_pwm_active(active);
    }

    pub fn set_duty_cycle(&mut self, duty: u16) {
        self.charge_control.set_duty_cycle(duty);
    }

    pub fn target_duty_cycle(&self) -> u16 {
        self.charge_control.duty_cycle()
    }

    pub fn set_contactor(&mut self, contactor: usize, close: bool) {
        self.charge_control.set_contactor(contactor, close);
    }

    pub fn set_ccs_ready(&mut self, ready: bool) {
        self.charge_control.set_ccs_ready(ready);
    }

    pub fn set_estop(&mut self, estop: bool) {
        self.charge_control.set_estop(estop);
    }

    pub fn contactor_is_enabled(&self, contactor: usize) -> bool {
        self.charge_state().contactor_state(contactor) != ContactorState::Unused
    }

    pub fn contactor_is_closed(&self, contactor: usize) -> bool {
        self.charge_state().contactor_state(contactor) == ContactorState::Closed
    }

    /// Currently a global HV-switch flag: the MCU does not report
    /// per-contactor error bits, so the channel index is ignored.
    pub fn contactor_has_error(&self, _contactor: usize) -> bool {
        self.charge_state().safestate_reason() == SafeStateReason::HvSwitchMalfunction
    }

    pub fn contactors_have_errors(&self) -> bool {
        (0..MAX_CONTACTORS).any(|i| self.contactor_is_enabled(i) && self.contactor_has_error(i))
    }

    pub fn estop_is_enabled(&self, estop: usize) -> bool {
        matches!(
            self.charge_state().estop_state(estop),
            EstopState::NotTripped | EstopState::Tripped
        )
    }

    pub fn estop_is_tripped(&self, estop: usize) -> bool {
        self.charge_state().estop_state(estop) == EstopState::Tripped
    }

    pub fn estop_any_tripped(&self) -> bool {
        (0..MAX_ESTOPS).any(|i| self.estop_is_enabled(i) && self.estop_is_tripped(i))
    }

    pub fn is_cp_short_circuit(&self) -> bool {
        self.charge_state().cp_errors() & CP_SHORT_CIRCUIT != 0
    }

    pub fn is_diode_fault(&self) -> bool {
        self.charge_state().cp_errors() & CP_DIODE_FAULT != 0
    }

    /// SafeStateActive lives at different offsets in CS1 and CS2.
    pub fn safe_state_active(&self) -> SafeStateActive {
        if self.is_mcs() {
            self.charge_state2().safe_state_active()
        } else {
            self.charge_state().safe_state_active()
        }
    }

    /// Records the moment a frame of the given type was handled.
    pub fn record_timestamp(&mut self, com: Com) {
        let idx = u8::from(com) as usize;
        if idx < COM_COUNT {
            self.ts_recv[idx] = Some(Local::now());
        }
    }

    pub fn timestamp(&self, com: Com) -> Option<&DateTime<Local>> {
        let idx = u8::from(com) as usize;
        self.ts_recv.get(idx).and_then(|ts| ts.as_ref())
    }

    /// Applies one received frame to the model.
    ///
    /// The platform is derived on the fly: a FW Version frame revealing
    /// the CCY platform, or any Charge State 2 frame (we may attach to an
    /// already running firmware before our inquiry answer arrives),
    /// switches the session to MCS.
    pub fn apply_frame(&mut self, com: Com, data: u64) {
        self.record_timestamp(com);

        match com {
            Com::ChargeState2 => {
                self.promote_to_mcs();
                self.charge_state = data;
            }
            Com::ChargeState => self.charge_state = data,
            Com::Pt1000State => self.pt1000 = Pt1000(data),
            Com::FwVersion => {
                self.fw_version = FwVersion(data);
                if self.fw_version.platform() == PlatformType::Ccy {
                    self.promote_to_mcs();
                }
            }
            Com::GitHash => self.git_hash = data,
            Com::ErrorMessage => self.error_message = ErrorMessage(data),
            _ => {}
        }
    }

    /// Writes the full human-readable state dump. Lines end in CRLF
    /// because the monitor runs with the terminal in raw mode.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let cs = self.charge_state();

        if !self.is_mcs() {
            writeln!(w, "== Various ==\r")?;

            let cp_errors = cs.cp_errors();
            writeln!(
                w,
                "Control Pilot:   {} ({}{}{}{})\r",
                cs.cp_state().as_str(),
                if cp_errors == 0 { "-no flags set-" } else { "" },
                if cp_errors & CP_DIODE_FAULT != 0 {
                    "diode fault"
                } else {
                    ""
                },
                if cp_errors & CP_DIODE_FAULT != 0 && cp_errors & CP_SHORT_CIRCUIT != 0 {
                    ","
                } else {
                    ""
                },
                if cp_errors & CP_SHORT_CIRCUIT != 0 {
                    "short circuit"
                } else {
                    ""
                },
            )?;

            writeln!(w, "Proximity Pilot: {}\r", cs.pp_state().as_str())?;

            write!(w, "Emergency Stop Tripped:")?;
            for i in 0..MAX_ESTOPS {
                write!(w, " ESTOP{}={:<11} ", i + 1, cs.estop_state(i).as_str())?;
            }
            writeln!(w, "\r")?;

            writeln!(w, "HV Ready: {}\r", cs.hv_ready() as u8)?;
            writeln!(
                w,
                "Safe State Active: {:<11} Reason: {}\r",
                self.safe_state_active().as_str(),
                cs.safestate_reason().as_str()
            )?;

            writeln!(w, "\r")?;
            writeln!(w, "== PWM ==\r")?;
            writeln!(
                w,
                "Enable:               {:<3}      Is Enabled:         {:<3}\r",
                if self.charge_control.pwm_active() {
                    "yes"
                } else {
                    "no"
                },
                if cs.pwm_active() { "yes" } else { "no" },
            )?;
            writeln!(
                w,
                "Requested Duty Cycle: {:5.1}%   Current Duty Cycle: {:5.1}%\r",
                self.charge_control.duty_cycle() as f64 / 10.0,
                cs.duty_cycle() as f64 / 10.0,
            )?;

            writeln!(w, "\r")?;
            writeln!(w, "== Contactor ==\r")?;
            for i in 0..MAX_CONTACTORS {
                writeln!(
                    w,
                    "Contactor {}: requested={:<5}   actual={:<9}   {}\r",
                    i + 1,
                    if self.charge_control.target_contactor(i) {
                        "CLOSE"
                    } else {
                        "open"
                    },
                    cs.contactor_state(i).as_str(),
                    if self.contactor_has_error(i) {
                        "ERROR"
                    } else {
                        "no error"
                    },
                )?;
            }
        } else {
            let cs2 = self.charge_state2();

            writeln!(w, "\r")?;
            writeln!(w, "== MCS ==\r")?;
            writeln!(w, "ID State: {}\r", cs2.id_state().as_str())?;
            writeln!(w, "CE State: {}\r", cs2.ce_state().as_str())?;
            writeln!(
                w,
                "Safe State Active: {:<11} Reason: {}\r",
                self.safe_state_active().as_str(),
                cs2.estop_reason().as_str()
            )?;

            writeln!(w, "\r")?;
            writeln!(
                w,
                "CCS Ready: {:<3}\r",
                self.charge_control.ccs_ready().as_str()
            )?;
        }

        writeln!(w, "\r")?;
        writeln!(w, "== Temperatures ==\r")?;
        for i in 0..MAX_PT1000S {
            let enabled = self.pt1000.is_active(i);
            let errors = self.pt1000.errors(i);

            write!(
                w,
                "Channel {}: enabled={:<3} temperature=",
                i + 1,
                if enabled { "yes" } else { "no" }
            )?;
            if enabled {
                write!(w, "{:5.1} °C", self.pt1000.temperature(i))?;
            } else {
                write!(w, "-n/a- °C")?;
            }
            writeln!(
                w,
                " ({}{}{}{})\r",
                if errors == 0 { "-no flags set-" } else { "" },
                if errors & PT1000_SELFTEST_FAILED != 0 {
                    "selftest failed"
                } else {
                    ""
                },
                if errors & PT1000_SELFTEST_FAILED != 0 && errors & PT1000_CHARGING_STOPPED != 0 {
                    ","
                } else {
                    ""
                },
                if errors & PT1000_CHARGING_STOPPED != 0 {
                    "charging stop cause"
                } else {
                    ""
                },
            )?;
        }

        writeln!(w, "\r")?;
        writeln!(w, "== Firmware Info ==\r")?;
        writeln!(
            w,
            "Version: {} ({}, {}, Parameter Version: {})\r",
            if self.has_fw_version() {
                self.fw_version.version_string()
            } else {
                "unknown".to_string()
            },
            self.fw_version.platform().as_str(),
            self.fw_version.application().as_str(),
            self.fw_version.param_version(),
        )?;
        writeln!(
            w,
            "Git Hash: {}\r",
            if self.has_git_hash() {
                self.git_hash_string()
            } else {
                "unknown".to_string()
            }
        )?;

        writeln!(w, "\r")?;
        writeln!(w, "== Latest Error Message ==\r")?;
        if self.has_error_message() {
            let msg = &self.error_message;
            let module = msg.module();

            writeln!(
                w,
                "Active: {:<8} Module: {:<15} Reason: {}\r",
                if msg.active() { "yes" } else { "no" },
                module.as_str(),
                module.reason_str(msg.reason()),
            )?;
            writeln!(
                w,
                "Additional Data: 0x{:04x} 0x{:04x}\r",
                msg.additional_data_1(),
                msg.additional_data_2(),
            )?;
        } else {
            writeln!(w, "None\r")?;
        }

        writeln!(w, "\r")?;
        writeln!(w, "== Timestamps ==\r")?;
        for idx in 0..COM_COUNT {
            if let Some(ts) = &self.ts_recv[idx] {
                let name = Com::try_from(idx as u8)
                    .map(|c| c.name())
                    .unwrap_or("UNKNOWN");
                writeln!(
                    w,
                    "{:<29}: {}\r",
                    name,
                    ts.format("%Y-%m-%d %H:%M:%S%.3f")
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_control_bit_positions() {
        let mut cc = ChargeControl::default();

        cc.set_pwm_active(true);
        assert_eq!(cc.raw(), 1 << 63);

        cc.set_pwm_active(false);
        cc.set_duty_cycle(1);
        assert_eq!(cc.raw(), 1 << 48);

        cc.set_duty_cycle(0);
        cc.set_contactor(0, true);
        assert_eq!(cc.raw(), 1 << 40);
        cc.set_contactor(1, true);
        assert_eq!(cc.raw(), 0x3 << 40);
    }

    #[test]
    fn duty_cycle_clamps_to_1000() {
        let mut cc = ChargeControl::default();
        cc.set_duty_cycle(1500);
        assert_eq!(cc.duty_cycle(), 1000);
        cc.set_duty_cycle(999);
        assert_eq!(cc.duty_cycle(), 999);
    }

    #[test]
    fn duty_clamp_and_compose_scenario() {
        // set_pwm(on, 1500) must clamp and produce 0x83e8... on the wire
        let mut ctx = SafetyController::new();
        ctx.set_pwm(true, 1500);
        assert_eq!(ctx.charge_control.raw(), 0x83e8_0000_0000_0000);
    }

    #[test]
    fn setting_one_field_preserves_the_others() {
        let mut cc = ChargeControl::default();
        cc.set_pwm_active(true);
        cc.set_contactor(1, true);
        cc.set_duty_cycle(555);

        let before = cc.raw();
        cc.set_duty_cycle(556);
        cc.set_duty_cycle(555);
        assert_eq!(cc.raw(), before);

        cc.set_contactor(0, true);
        cc.set_contactor(0, false);
        assert_eq!(cc.raw(), before);
    }

    #[test]
    fn ccs_ready_occupies_top_nibble() {
        let mut cc = ChargeControl::default();
        cc.set_ccs_ready(true);
        assert_eq!(cc.raw(), 0x1u64 << 60);
        assert_eq!(cc.ccs_ready(), CcsReady::Ready);

        cc.set_estop(true);
        assert_eq!(cc.raw(), 0x2u64 << 60);
        assert_eq!(cc.ccs_ready(), CcsReady::EmergencyStop);

        cc.set_estop(false);
        assert_eq!(cc.raw(), 0);
    }

    #[test]
    fn charge_state_cp_decode_scenario() {
        // wire word 0x8005000000000000: PWM active, duty 0x005
        let cs = ChargeState(0x8005_0000_0000_0000);

        assert!(cs.pwm_active());
        assert_eq!(cs.duty_cycle(), 5);
        assert_eq!(cs.cp_state(), CpState::Unknown);
        assert_eq!(cs.pp_state(), PpState::NoCable);
        assert_eq!(cs.cp_errors(), 0);
        assert!(!cs.hv_ready());
        for i in 0..MAX_CONTACTORS {
            assert_eq!(cs.contactor_state(i), ContactorState::Open);
        }
        for i in 0..MAX_ESTOPS {
            assert_eq!(cs.estop_state(i), EstopState::NotTripped);
        }
    }

    #[test]
    fn charge_state_field_positions() {
        let cs = ChargeState(0x5u64 << 40);
        assert_eq!(cs.cp_state(), CpState::E);

        let cs = ChargeState(0x3u64 << 43);
        assert_eq!(cs.cp_errors(), 0x3);

        let cs = ChargeState(0x2u64 << 32);
        assert_eq!(cs.pp_state(), PpState::Amp20);

        let cs = ChargeState(1u64 << 30);
        assert!(cs.hv_ready());

        let cs = ChargeState(0x1u64 << 26);
        assert_eq!(cs.contactor_state(1), ContactorState::Closed);

        let cs = ChargeState(0x1u64 << 20);
        assert_eq!(cs.estop_state(2), EstopState::Tripped);

        let cs = ChargeState(0x0fu64 << 8);
        assert_eq!(cs.safestate_reason(), SafeStateReason::HvSwitchMalfunction);

        let cs = ChargeState(0x1u64 << 58);
        assert_eq!(cs.safe_state_active(), SafeStateActive::SafeState);
    }

    #[test]
    fn charge_state2_field_positions() {
        let cs2 = ChargeState2(0x2u64 << 56);
        assert_eq!(cs2.id_state(), IdState::Connected);

        let cs2 = ChargeState2(0x4u64 << 60);
        assert_eq!(cs2.ce_state(), CeState::C);

        let cs2 = ChargeState2(0x0eu64 << 48);
        assert_eq!(cs2.estop_reason(), EstopReason::EmergencyInput);

        let cs2 = ChargeState2(0x3u64 << 46);
        assert_eq!(cs2.safe_state_active(), SafeStateActive::Sna);
    }

    #[test]
    fn pt1000_decode_scenario() {
        // ch0 = 25.0 °C, ch1 = 24.8 °C, ch2 carries the unused sentinel
        // (0x1fff in the 14-bit field), ch3 = 0.0 °C
        let pt = Pt1000(0x03e8_03e0_7ffc_0000);

        assert!(pt.is_active(0));
        assert_eq!(pt.temperature(0), 25.0);
        assert_eq!(pt.errors(0), 0);

        assert!(pt.is_active(1));
        assert_eq!(pt.temperature(1), 24.8);
        assert_eq!(pt.errors(1), 0);

        assert!(!pt.is_active(2));

        assert!(pt.is_active(3));
        assert_eq!(pt.temperature(3), 0.0);

        assert!(!pt.have_errors());
    }

    #[test]
    fn pt1000_negative_temperature_and_flags() {
        // -10.0 °C is -100 tenths; shifted left two plus selftest flag
        let raw = (((-100i16) << 2) as u16 as u64 | PT1000_SELFTEST_FAILED as u64) << 48;
        let pt = Pt1000(raw);

        assert_eq!(pt.temperature(0), -10.0);
        assert_eq!(pt.errors(0), PT1000_SELFTEST_FAILED);
        assert!(pt.have_errors());
    }

    #[test]
    fn fw_version_fields() {
        // 1.2.3, CCY platform, firmware application, parameter version 7
        let word: u64 = 1 << 56 | 2 << 48 | 3 << 40 | 0x82 << 32 | 0x03 << 24 | 7 << 8;
        let fw = FwVersion(word);

        assert_eq!(fw.major(), 1);
        assert_eq!(fw.minor(), 2);
        assert_eq!(fw.build(), 3);
        assert_eq!(fw.platform(), PlatformType::Ccy);
        assert_eq!(fw.application(), ApplicationType::Firmware);
        assert_eq!(fw.param_version(), 7);
        assert_eq!(fw.version_string(), "1.2.3");
    }

    #[test]
    fn error_message_fields() {
        let word: u64 = 1 << 63 | (ErrmsgModule::MwUart as u64) << 48 | 2 << 32 | 0xabcd << 16 | 0x1234;
        let msg = ErrorMessage(word);

        assert!(msg.active());
        assert_eq!(msg.module(), ErrmsgModule::MwUart);
        assert_eq!(msg.reason(), 2);
        assert_eq!(msg.additional_data_1(), 0xabcd);
        assert_eq!(msg.additional_data_2(), 0x1234);
        assert_eq!(
            msg.module().reason_str(msg.reason()),
            "UART RX buffer overflow [packet type, buffer index]"
        );
    }

    #[test]
    fn mode_advances_on_ccy_fw_version() {
        let mut ctx = SafetyController::new();
        assert!(!ctx.is_mcs());

        let word: u64 = 0x82 << 32;
        ctx.apply_frame(Com::FwVersion, word);
        assert!(ctx.is_mcs());
    }

    #[test]
    fn mode_advances_on_charge_state2() {
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::ChargeState2, 0);
        assert!(ctx.is_mcs());

        // never back to classic
        ctx.apply_frame(Com::ChargeState, 0);
        assert!(ctx.is_mcs());
    }

    #[test]
    fn classic_fw_version_keeps_classic_mode() {
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::FwVersion, 0x81u64 << 32);
        assert!(!ctx.is_mcs());
    }

    #[test]
    fn git_hash_renders_wire_bytes_in_order(){
        let mut ctx = SafetyController::new();
        // frame decoder yields the BE word, i.e. wire bytes MSB-first
        ctx.apply_frame(Com::GitHash, 0xa965_3ba5_c34e_eba8);
        assert_eq!(ctx.git_hash_string(), "a9653ba5c34eeba8");
    }

    #[test]
    fn apply_frame_records_timestamps() {
        let mut ctx = SafetyController::new();
        assert!(ctx.timestamp(Com::ChargeState).is_none());

        ctx.apply_frame(Com::ChargeState, 0);
        assert!(ctx.timestamp(Com::ChargeState).is_some());
        assert!(ctx.timestamp(Com::Pt1000State).is_none());
    }

    #[test]
    fn estop_predicates() {
        // estop1 tripped, estop2 not tripped, estop3 unused
        let word = (0x1u64 << 16) | (0x0u64 << 18) | (0x3u64 << 20);
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::ChargeState, word);

        assert!(ctx.estop_is_enabled(0));
        assert!(ctx.estop_is_tripped(0));
        assert!(ctx.estop_is_enabled(1));
        assert!(!ctx.estop_is_tripped(1));
        assert!(!ctx.estop_is_enabled(2));
        assert!(ctx.estop_any_tripped());
    }

    #[test]
    fn contactor_error_is_global_hv_switch_flag() {
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::ChargeState, 0x0fu64 << 8);

        assert!(ctx.contactor_has_error(0));
        assert!(ctx.contactor_has_error(1));
    }

    #[test]
    fn dump_renders_classic_sections() {
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::ChargeState, 0x8005_0000_0000_0000);

        let mut out = Vec::new();
        ctx.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("== Various =="));
        assert!(text.contains("== PWM =="));
        assert!(text.contains("== Contactor =="));
        assert!(text.contains("Current Duty Cycle:   0.5%"));
        assert!(text.contains("== Timestamps =="));
        assert!(text.contains("COM_CHARGE_STATE"));
    }

    #[test]
    fn dump_renders_mcs_sections() {
        let mut ctx = SafetyController::new();
        ctx.apply_frame(Com::ChargeState2, 0x2u64 << 56);

        let mut out = Vec::new();
        ctx.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("== MCS =="));
        assert!(text.contains("ID State: connected"));
        assert!(!text.contains("== Contactor =="));
    }
}
