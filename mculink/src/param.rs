//! The binary parameter block holding per-device safety configuration.
//!
//! The versioned record is 36 bytes: magic, version word, four abort
//! temperatures, four resistance offsets, two contactor configurations
//! with their switching times, three e-stop configurations, magic again,
//! CRC-8. The pre-versioned legacy record (22 bytes) lacks the version
//! word, the offsets and the switching times; it is detected by its
//! trailing magic sitting at the legacy offset and migrated on load.

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::checksum::crc8_param;
use crate::error::{Error, Result};
use crate::{MAX_CONTACTORS, MAX_ESTOPS, MAX_PT1000S};

/// Magic pattern framing the record.
pub const PARAM_MAGIC: u32 = 0xc001_f00d;

/// Version word of the current layout.
pub const CURRENT_VERSION: u16 = 1;

/// Temperature value marking a disabled channel.
pub const CHANNEL_DISABLE_VALUE: i16 = 0x1fff;

/// Older firmware versions used another disable sentinel.
pub const OLD_CHANNEL_DISABLE_VALUE: i16 = i16::MIN;

/// Sizes of the two record layouts on disk.
pub const LEGACY_LEN: usize = 22;
pub const VERSIONED_LEN: usize = 36;

/// High-voltage contactor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ContactorType {
    Disabled = 0,
    WithoutFeedback = 1,
    /// Deprecated encoding, only found in legacy records; migrated to
    /// [`ContactorType::WithFeedbackNormallyClosed`] on load.
    WithFeedbackNormallyOpen = 2,
    WithFeedbackNormallyClosed = 3,
}

impl ContactorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactorType::Disabled => "disabled",
            ContactorType::WithoutFeedback => "without-feedback",
            ContactorType::WithFeedbackNormallyOpen => "with-feedback-normally-open",
            ContactorType::WithFeedbackNormallyClosed => "with-feedback-normally-closed",
        }
    }
}

/// Emergency stop input configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum EstopType {
    Disabled = 0,
    ActiveLow = 1,
}

impl EstopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstopType::Disabled => "disabled",
            EstopType::ActiveLow => "active-low",
        }
    }
}

/// Parses a contactor configuration; the legacy spelling
/// `with-feedback` maps to the normally-closed variant.
pub fn parse_contactor_type(s: &str) -> Result<ContactorType> {
    let parse_err = || Error::ParseValue {
        what: "contactor configuration",
        input: s.to_string(),
    };

    if s.eq_ignore_ascii_case("disabled") || s.eq_ignore_ascii_case("none") {
        Ok(ContactorType::Disabled)
    } else if s.eq_ignore_ascii_case("without-feedback") {
        Ok(ContactorType::WithoutFeedback)
    } else if s.eq_ignore_ascii_case("with-feedback-normally-open") {
        Ok(ContactorType::WithFeedbackNormallyOpen)
    } else if s.eq_ignore_ascii_case("with-feedback-normally-closed")
        || s.eq_ignore_ascii_case("with-feedback")
    {
        Ok(ContactorType::WithFeedbackNormallyClosed)
    } else {
        Err(parse_err())
    }
}

pub fn parse_estop_type(s: &str) -> Result<EstopType> {
    if s.eq_ignore_ascii_case("disabled")
        || s.eq_ignore_ascii_case("none")
        || s.eq_ignore_ascii_case("off")
    {
        Ok(EstopType::Disabled)
    } else if s.eq_ignore_ascii_case("active-low") {
        Ok(EstopType::ActiveLow)
    } else {
        Err(Error::ParseValue {
            what: "estop configuration",
            input: s.to_string(),
        })
    }
}

/// Parses an abort temperature: the disable words, or a float with a
/// `°C` suffix (one optional space). Stored in 0.1 °C steps, silently
/// clamped to -80.0 °C … 200.0 °C.
pub fn parse_temperature(s: &str) -> Result<i16> {
    let parse_err = || Error::ParseValue {
        what: "temperature value",
        input: s.to_string(),
    };

    if ["disable", "disabled", "none", "off"]
        .iter()
        .any(|w| s.eq_ignore_ascii_case(w))
    {
        return Ok(CHANNEL_DISABLE_VALUE);
    }

    // we expect UTF-8 input, so compare the suffix byte-exact
    let num = s.strip_suffix("°C").ok_or_else(parse_err)?;
    let num = num.strip_suffix(' ').unwrap_or(num);

    let val: f32 = num.trim_start().parse().map_err(|_| parse_err())?;

    let tenths = (val * 10.0).round() as i32;
    Ok(tenths.clamp(-800, 2000) as i16)
}

pub fn temperature_to_string(temperature: i16) -> String {
    if temperature == CHANNEL_DISABLE_VALUE || temperature == OLD_CHANNEL_DISABLE_VALUE {
        return "disabled".to_string();
    }

    format!("{:.1} °C", temperature as f32 / 10.0)
}

/// Parses a resistance offset: a float with an `Ω` suffix (one optional
/// space). Stored in 0.001 Ω steps, clamped to ±32 Ω.
pub fn parse_resistance_offset(s: &str) -> Result<i16> {
    let parse_err = || Error::ParseValue {
        what: "resistance offset",
        input: s.to_string(),
    };

    let num = s.strip_suffix('Ω').ok_or_else(parse_err)?;
    let num = num.strip_suffix(' ').unwrap_or(num);

    let val: f32 = num.trim_start().parse().map_err(|_| parse_err())?;

    let milliohm = (val * 1000.0).round() as i32;
    Ok(milliohm.clamp(-32_000, 32_000) as i16)
}

pub fn resistance_offset_to_string(offset: i16) -> String {
    format!("{:.3} Ω", offset as f32 / 1000.0)
}

/// Parses a contactor switching time: an unsigned integer with a `ms`
/// suffix (one optional space). Stored in 10 ms units, clamped to the
/// byte range.
pub fn parse_switch_time(s: &str) -> Result<u8> {
    let parse_err = || Error::ParseValue {
        what: "switching time",
        input: s.to_string(),
    };

    let num = s.strip_suffix("ms").ok_or_else(parse_err)?;
    let num = num.strip_suffix(' ').unwrap_or(num);

    let ms: u32 = num.trim_start().parse().map_err(|_| parse_err())?;

    Ok(((ms + 5) / 10).min(255) as u8)
}

pub fn switch_time_to_string(units: u8) -> String {
    format!("{} ms", units as u32 * 10)
}

/// Outcome of the CRC check on a loaded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Valid,
    Mismatch { stored: u8, computed: u8 },
}

impl CrcStatus {
    fn check(covered: &[u8], stored: u8) -> Self {
        let computed = crc8_param(covered);
        if computed == stored {
            CrcStatus::Valid
        } else {
            CrcStatus::Mismatch { stored, computed }
        }
    }

    pub fn is_valid(&self) -> bool {
        *self == CrcStatus::Valid
    }
}

/// The in-memory representation of a parameter block, always the
/// current layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBlock {
    pub version: u16,
    /// Abort temperatures, 0.1 °C.
    pub temperatures: [i16; MAX_PT1000S],
    /// Sensor lead resistance offsets, 0.001 Ω.
    pub resistance_offsets: [i16; MAX_PT1000S],
    pub contactors: [ContactorType; MAX_CONTACTORS],
    /// Contactor switching times, 10 ms units.
    pub contactor_close_times: [u8; MAX_CONTACTORS],
    pub contactor_open_times: [u8; MAX_CONTACTORS],
    pub estops: [EstopType; MAX_ESTOPS],
}

impl Default for ParamBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamBlock {
    /// A block with everything disabled.
    pub fn new() -> Self {
        ParamBlock {
            version: CURRENT_VERSION,
            temperatures: [CHANNEL_DISABLE_VALUE; MAX_PT1000S],
            resistance_offsets: [0; MAX_PT1000S],
            contactors: [ContactorType::Disabled; MAX_CONTACTORS],
            contactor_close_times: [0; MAX_CONTACTORS],
            contactor_open_times: [0; MAX_CONTACTORS],
            estops: [EstopType::Disabled; MAX_ESTOPS],
        }
    }

    /// Reads a block, auto-detecting the layout.
    ///
    /// A CRC mismatch is an error here; use [`ParamBlock::read_lenient`]
    /// when the decoded fields are still wanted for diagnostics.
    pub fn read<R: Read>(r: &mut R) -> Result<ParamBlock> {
        let (block, crc) = Self::read_lenient(r)?;

        match crc {
            CrcStatus::Valid => Ok(block),
            CrcStatus::Mismatch { stored, computed } => Err(Error::BadCrc { stored, computed }),
        }
    }

    /// Reads a block, auto-detecting the layout, but tolerating a wrong
    /// CRC: the fields decode fine without it, and dump-style tools want
    /// to show them anyway.
    ///
    /// The legacy record is read first; if the trailing magic already
    /// sits at the legacy offset the record is a legacy one and gets
    /// migrated, otherwise the remainder of the versioned record is
    /// appended and checked. No look-ahead beyond the record sizes.
    pub fn read_lenient<R: Read>(r: &mut R) -> Result<(ParamBlock, CrcStatus)> {
        let mut head = [0u8; LEGACY_LEN];
        r.read_exact(&mut head)?;

        if LittleEndian::read_u32(&head[0..4]) != PARAM_MAGIC {
            return Err(Error::BadMagic);
        }

        if LittleEndian::read_u32(&head[17..21]) == PARAM_MAGIC {
            return Self::parse_legacy(&head);
        }

        let mut full = [0u8; VERSIONED_LEN];
        full[..LEGACY_LEN].copy_from_slice(&head);
        r.read_exact(&mut full[LEGACY_LEN..])?;

        Self::parse_versioned(&full)
    }

    fn parse_legacy(raw: &[u8; LEGACY_LEN]) -> Result<(ParamBlock, CrcStatus)> {
        let mut block = ParamBlock::new();

        for (i, temp) in block.temperatures.iter_mut().enumerate() {
            *temp = LittleEndian::read_i16(&raw[4 + 2 * i..6 + 2 * i]);
        }

        for (i, contactor) in block.contactors.iter_mut().enumerate() {
            *contactor = contactor_from_byte(raw[12 + i])?;
        }

        for (i, estop) in block.estops.iter_mut().enumerate() {
            *estop = estop_from_byte(raw[14 + i])?;
        }

        block.migrate_deprecated_contactors();

        Ok((block, CrcStatus::check(&raw[..LEGACY_LEN - 1], raw[21])))
    }

    fn parse_versioned(raw: &[u8; VERSIONED_LEN]) -> Result<(ParamBlock, CrcStatus)> {
        if LittleEndian::read_u32(&raw[31..35]) != PARAM_MAGIC {
            return Err(Error::BadMagic);
        }

        let mut block = ParamBlock::new();
        block.version = LittleEndian::read_u16(&raw[4..6]);

        for (i, temp) in block.temperatures.iter_mut().enumerate() {
            *temp = LittleEndian::read_i16(&raw[6 + 2 * i..8 + 2 * i]);
        }
        for (i, offset) in block.resistance_offsets.iter_mut().enumerate() {
            *offset = LittleEndian::read_i16(&raw[14 + 2 * i..16 + 2 * i]);
        }
        for (i, contactor) in block.contactors.iter_mut().enumerate() {
            *contactor = contactor_from_byte(raw[22 + i])?;
        }
        block.contactor_close_times.copy_from_slice(&raw[24..26]);
        block.contactor_open_times.copy_from_slice(&raw[26..28]);
        for (i, estop) in block.estops.iter_mut().enumerate() {
            *estop = estop_from_byte(raw[28 + i])?;
        }

        Ok((
            block,
            CrcStatus::check(&raw[..VERSIONED_LEN - 1], raw[35]),
        ))
    }

    /// The deprecated normally-open feedback encoding is remapped to
    /// normally-closed; the firmware never distinguished them.
    fn migrate_deprecated_contactors(&mut self) {
        for contactor in self.contactors.iter_mut() {
            if *contactor == ContactorType::WithFeedbackNormallyOpen {
                *contactor = ContactorType::WithFeedbackNormallyClosed;
            }
        }
    }

    /// Serializes the versioned record with a freshly computed CRC.
    pub fn to_bytes(&self) -> [u8; VERSIONED_LEN] {
        let mut raw = [0u8; VERSIONED_LEN];

        LittleEndian::write_u32(&mut raw[0..4], PARAM_MAGIC);
        LittleEndian::write_u16(&mut raw[4..6], self.version);
        for (i, temp) in self.temperatures.iter().enumerate() {
            LittleEndian::write_i16(&mut raw[6 + 2 * i..8 + 2 * i], *temp);
        }
        for (i, offset) in self.resistance_offsets.iter().enumerate() {
            LittleEndian::write_i16(&mut raw[14 + 2 * i..16 + 2 * i], *offset);
        }
        for (i, contactor) in self.contactors.iter().enumerate() {
            raw[22 + i] = (*contactor).into();
        }
        raw[24..26].copy_from_slice(&self.contactor_close_times);
        raw[26..28].copy_from_slice(&self.contactor_open_times);
        for (i, estop) in self.estops.iter().enumerate() {
            raw[28 + i] = (*estop).into();
        }
        LittleEndian::write_u32(&mut raw[31..35], PARAM_MAGIC);
        raw[35] = crc8_param(&raw[..VERSIONED_LEN - 1]);

        raw
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Writes the YAML rendering used by the dump tool.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "version: {}", self.version)?;
        writeln!(w)?;

        writeln!(w, "pt1000s:")?;
        for i in 0..MAX_PT1000S {
            writeln!(
                w,
                "  - abort-temperature: {}",
                temperature_to_string(self.temperatures[i])
            )?;
            writeln!(
                w,
                "    resistance-offset: {}",
                resistance_offset_to_string(self.resistance_offsets[i])
            )?;
        }
        writeln!(w)?;

        writeln!(w, "contactors:")?;
        for i in 0..MAX_CONTACTORS {
            writeln!(w, "  - type: {}", self.contactors[i].as_str())?;
            writeln!(
                w,
                "    close-time: {}",
                switch_time_to_string(self.contactor_close_times[i])
            )?;
            writeln!(
                w,
                "    open-time: {}",
                switch_time_to_string(self.contactor_open_times[i])
            )?;
        }
        writeln!(w)?;

        writeln!(w, "estops:")?;
        for estop in &self.estops {
            writeln!(w, "  - {}", estop.as_str())?;
        }

        Ok(())
    }
}

fn contactor_from_byte(byte: u8) -> Result<ContactorType> {
    ContactorType::try_from(byte).map_err(|_| Error::ParseValue {
        what: "contactor configuration",
        input: format!("0x{byte:02x}"),
    })
}

fn estop_from_byte(byte: u8) -> Result<EstopType> {
    EstopType::try_from(byte).map_err(|_| Error::ParseValue {
        what: "estop configuration",
        input: format!("0x{byte:02x}"),
    })
}
