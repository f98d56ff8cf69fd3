//! The firmware info block embedded in every application image.
//!
//! A 32-byte little-endian record at flash offset 0x3E0, framed by a
//! magic pattern on both ends. It carries everything needed to decide
//! whether the application in flash is valid and what it is.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::cb::state::{ApplicationType, PlatformType};
use crate::error::{Error, Result};

/// Value of both magic pattern fields.
pub const INFO_MAGIC_PATTERN: u32 = 0xcafe_babe;

/// Location of the info block inside the image/flash.
pub const INFOBLOCK_OFFSET: u32 = 0x0000_03e0;

/// Size of the info block on flash (0x3E0..=0x3FF).
pub const INFOBLOCK_LEN: usize = 32;

/// The application validation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwInfoBlock {
    pub start_magic_pattern: u32,
    /// Size of the application, bytes.
    pub application_size: u32,
    /// CRC-32 over the application.
    pub application_checksum: u32,
    pub sw_major_version: u8,
    pub sw_minor_version: u8,
    pub sw_build_version: u8,
    /// Git hash of the HEAD used to build the firmware.
    pub git_hash: u64,
    pub sw_platform_type: u8,
    pub sw_application_type: u8,
    /// Parameter file version the firmware expects.
    pub parameter_version: u16,
    pub reserved: u8,
    pub end_magic_pattern: u32,
}

impl FwInfoBlock {
    /// Converts the raw little-endian record to host values. Validity is
    /// a separate question, see [`FwInfoBlock::is_valid`].
    pub fn parse(raw: &[u8; INFOBLOCK_LEN]) -> Self {
        FwInfoBlock {
            start_magic_pattern: LittleEndian::read_u32(&raw[0..4]),
            application_size: LittleEndian::read_u32(&raw[4..8]),
            application_checksum: LittleEndian::read_u32(&raw[8..12]),
            sw_major_version: raw[12],
            sw_minor_version: raw[13],
            sw_build_version: raw[14],
            git_hash: LittleEndian::read_u64(&raw[15..23]),
            sw_platform_type: raw[23],
            sw_application_type: raw[24],
            parameter_version: LittleEndian::read_u16(&raw[25..27]),
            reserved: raw[27],
            end_magic_pattern: LittleEndian::read_u32(&raw[28..32]),
        }
    }

    /// Extracts the info block from a firmware image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read(path)?;

        let start = INFOBLOCK_OFFSET as usize;
        let end = start + INFOBLOCK_LEN;
        if content.len() < end {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file too short for an info block",
            )));
        }

        let mut raw = [0u8; INFOBLOCK_LEN];
        raw.copy_from_slice(&content[start..end]);
        Ok(Self::parse(&raw))
    }

    /// Valid iff both magic patterns match.
    pub fn is_valid(&self) -> bool {
        self.start_magic_pattern == INFO_MAGIC_PATTERN
            && self.end_magic_pattern == INFO_MAGIC_PATTERN
    }

    pub fn platform(&self) -> PlatformType {
        PlatformType::from(self.sw_platform_type)
    }

    pub fn application(&self) -> ApplicationType {
        ApplicationType::from(self.sw_application_type)
    }

    /// Writes the plain field dump.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Start Magic Pattern:       0x{:08x}", self.start_magic_pattern)?;
        writeln!(
            w,
            "Firmware Size:             {} (0x{:0width$x})",
            self.application_size,
            self.application_size,
            width = if self.application_size > 0xffff { 8 } else { 4 },
        )?;
        writeln!(
            w,
            "Firmware Checksum (CRC32): 0x{:08x}",
            self.application_checksum
        )?;
        writeln!(
            w,
            "Firmware Version:          {}.{}.{}",
            self.sw_major_version, self.sw_minor_version, self.sw_build_version
        )?;
        writeln!(w, "Git Hash:                  {:016x}", self.git_hash)?;
        writeln!(
            w,
            "Platform Type:             {} (0x{:02x})",
            self.platform().as_str(),
            self.sw_platform_type
        )?;
        writeln!(
            w,
            "Application Type:          {} (0x{:02x})",
            self.application().as_str(),
            self.sw_application_type
        )?;
        writeln!(w, "Parameter Version:         {}", self.parameter_version)?;
        writeln!(w, "End Magic Pattern:         0x{:08x}", self.end_magic_pattern)?;
        Ok(())
    }

    /// Writes the framed dump with a header line and a trailing validity
    /// verdict; returns whether the block is valid.
    pub fn print_amended<W: Write>(&self, w: &mut W, header: &str) -> io::Result<bool> {
        const PADDING: &str = "===========================================";
        let is_valid = self.is_valid();

        let pad = PADDING.len().saturating_sub(6 + header.len());
        writeln!(w, "==[ {} ]{}", header, &PADDING[..pad])?;

        self.dump(w)?;

        let verdict = if is_valid { "VALID" } else { "INVALID" };
        let pad = PADDING.len().saturating_sub(verdict.len() + 6);
        writeln!(w, "{}[ {} ]==", &PADDING[..pad], verdict)?;

        Ok(is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> [u8; INFOBLOCK_LEN] {
        let mut raw = [0u8; INFOBLOCK_LEN];
        raw[0..4].copy_from_slice(&INFO_MAGIC_PATTERN.to_le_bytes());
        raw[4..8].copy_from_slice(&23248u32.to_le_bytes());
        raw[8..12].copy_from_slice(&0xb6ca_0819u32.to_le_bytes());
        raw[12] = 0; // major
        raw[13] = 1; // minor
        raw[14] = 0; // build
        raw[15..23].copy_from_slice(&0xa965_3ba5_c34e_eba8u64.to_le_bytes());
        raw[23] = 0x81; // platform
        raw[24] = 0x03; // application
        raw[25..27].copy_from_slice(&2u16.to_le_bytes());
        raw[28..32].copy_from_slice(&INFO_MAGIC_PATTERN.to_le_bytes());
        raw
    }

    #[test]
    fn parse_converts_little_endian_fields() {
        let block = FwInfoBlock::parse(&sample_raw());

        assert_eq!(block.start_magic_pattern, INFO_MAGIC_PATTERN);
        assert_eq!(block.application_size, 23248);
        assert_eq!(block.application_checksum, 0xb6ca_0819);
        assert_eq!(block.sw_major_version, 0);
        assert_eq!(block.sw_minor_version, 1);
        assert_eq!(block.sw_build_version, 0);
        assert_eq!(block.git_hash, 0xa965_3ba5_c34e_eba8);
        assert_eq!(block.platform(), PlatformType::ChargeSom);
        assert_eq!(block.application(), ApplicationType::Firmware);
        assert_eq!(block.parameter_version, 2);
        assert!(block.is_valid());
    }

    #[test]
    fn erased_flash_is_invalid() {
        let block = FwInfoBlock::parse(&[0xff; INFOBLOCK_LEN]);
        assert!(!block.is_valid());
        assert_eq!(block.platform(), PlatformType::Unspecified);
    }

    #[test]
    fn single_wrong_magic_is_invalid() {
        let mut raw = sample_raw();
        raw[28] ^= 0x01;
        assert!(!FwInfoBlock::parse(&raw).is_valid());

        let mut raw = sample_raw();
        raw[0] ^= 0x01;
        assert!(!FwInfoBlock::parse(&raw).is_valid());
    }

    #[test]
    fn amended_dump_carries_the_verdict() {
        let block = FwInfoBlock::parse(&sample_raw());

        let mut out = Vec::new();
        let valid = block.print_amended(&mut out, "firmware.bin").unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(valid);
        assert!(text.starts_with("==[ firmware.bin ]="));
        assert!(text.contains("Firmware Version:          0.1.0"));
        assert!(text.contains("Git Hash:                  a9653ba5c34eeba8"));
        assert!(text.trim_end().ends_with("[ VALID ]=="));
    }
}
