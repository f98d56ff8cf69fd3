//! Wire format of the bootloader packets.
//!
//! Command packets: `[SOH][LEN: u16 BE][COM][ARGS…][SUM][ETX]`, LEN
//! counting COM plus ARGS. Data packets and status responses:
//! `[SOD][LEN: u16 BE][RES][DATA…][SUM][ETX]`, LEN counting RES plus
//! DATA. SUM is the two's-complement byte over LEN through the byte
//! before SUM.

use byteorder::{BigEndian, ByteOrder};

use super::Command;
use crate::checksum::{boot_sum, boot_sum_valid};
use crate::error::{Error, Result};

pub const SOH: u8 = 0x01;
pub const SOD: u8 = 0x81;
pub const ETX: u8 = 0x03;

/// A data packet carries at most this many payload bytes.
pub const MAX_DATA_PAYLOAD: usize = 1024;

/// RES carries this bit when the command failed.
pub const RES_ERR_MASK: u8 = 0x80;

/// Total size of a status response on the wire.
pub const STATUS_PACKET_LEN: usize = 7;

/// LEN value of a status response.
pub const STATUS_RSP_LEN: u16 = 0x0002;

/// LEN value and total size of a signature response.
pub const SIGNATURE_RSP_LEN: u16 = 0x000d;
pub const SIGNATURE_PACKET_LEN: usize = SIGNATURE_RSP_LEN as usize + 5;

/// LEN value and total size of an area information response.
pub const AREA_INFO_RSP_LEN: u16 = 0x0012;
pub const AREA_INFO_PACKET_LEN: usize = AREA_INFO_RSP_LEN as usize + 5;

/// Builds a command packet from the command code and its argument bytes.
pub fn command(com: Command, args: &[u8]) -> Vec<u8> {
    let len = (1 + args.len()) as u16;
    let mut pkt = Vec::with_capacity(6 + args.len());

    pkt.push(SOH);
    pkt.extend_from_slice(&len.to_be_bytes());
    pkt.push(com.into());
    pkt.extend_from_slice(args);
    // checksum without SOH, SUM itself and without ETX
    pkt.push(boot_sum(&pkt[1..]));
    pkt.push(ETX);

    pkt
}

/// INQUIRY carries no arguments.
pub fn inquiry_command() -> Vec<u8> {
    command(Command::Inquiry, &[])
}

/// BAUDRATE_SETTING carries the target rate as BE u32.
pub fn baudrate_command(baud: u32) -> Vec<u8> {
    command(Command::BaudrateSetting, &baud.to_be_bytes())
}

pub fn signature_command() -> Vec<u8> {
    command(Command::SignatureRequest, &[])
}

pub fn area_info_command(num: u8) -> Vec<u8> {
    command(Command::AreaInformation, &[num])
}

/// Read, write and erase share one argument layout: start and end
/// address as BE u32.
pub fn rwe_command(com: Command, start_addr: u32, end_addr: u32) -> Vec<u8> {
    let mut args = [0u8; 8];
    BigEndian::write_u32(&mut args[0..4], start_addr);
    BigEndian::write_u32(&mut args[4..8], end_addr);
    command(com, &args)
}

/// Builds a data packet around `payload`; `res` is the originating
/// command code.
pub fn data_packet(res: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_DATA_PAYLOAD);

    let len = (1 + payload.len()) as u16;
    let mut pkt = Vec::with_capacity(6 + payload.len());

    pkt.push(SOD);
    pkt.extend_from_slice(&len.to_be_bytes());
    pkt.push(res);
    pkt.extend_from_slice(payload);
    pkt.push(boot_sum(&pkt[1..]));
    pkt.push(ETX);

    pkt
}

/// Builds a status response; the host only ever sends this as the
/// optional read confirmation.
pub fn status_packet(res: u8, status: u8) -> Vec<u8> {
    data_packet(res, &[status])
}

/// RES and STS of a validated status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub res: u8,
    pub sts: u8,
}

impl Status {
    /// Whether RES still names the expected command (no error bit) and
    /// the status code signals success.
    pub fn is_ok_for(&self, com: Command) -> bool {
        self.res == u8::from(com) && self.sts == super::STATUSCODE_OK
    }
}

/// Validates the shape of a status response: markers, LEN, RES matching
/// the expected command (error bit tolerated), checksum.
pub fn decode_status(pkt: &[u8; STATUS_PACKET_LEN], expected: Command) -> Result<Status> {
    let com = u8::from(expected);
    let bad = |reason| Error::BadPacket {
        command: expected.name(),
        reason,
    };

    if pkt[0] != SOD {
        return Err(bad("invalid SOD"));
    }
    if pkt[6] != ETX {
        return Err(bad("invalid ETX"));
    }
    if BigEndian::read_u16(&pkt[1..3]) != STATUS_RSP_LEN {
        return Err(bad("invalid length"));
    }
    if pkt[3] != com && pkt[3] != (com | RES_ERR_MASK) {
        return Err(bad("response code mismatch"));
    }
    if !boot_sum_valid(&pkt[1..5], pkt[5]) {
        return Err(bad("checksum mismatch"));
    }

    Ok(Status {
        res: pkt[3],
        sts: pkt[4],
    })
}

/// Validates a data packet and returns its payload (the bytes after
/// RES).
pub fn decode_data<'a>(pkt: &'a [u8], expected: Command) -> Result<&'a [u8]> {
    let com = u8::from(expected);
    let bad = |reason| Error::BadPacket {
        command: expected.name(),
        reason,
    };

    if pkt.len() < STATUS_PACKET_LEN {
        return Err(bad("packet too short"));
    }
    if pkt[0] != SOD {
        return Err(bad("invalid SOD"));
    }

    let len = BigEndian::read_u16(&pkt[1..3]) as usize;
    if len == 0 || len > MAX_DATA_PAYLOAD + 1 {
        return Err(bad("invalid length"));
    }
    if pkt[3] != com && pkt[3] != (com | RES_ERR_MASK) {
        return Err(bad("response code mismatch"));
    }

    let etx_pos = 4 + len;
    if etx_pos + 1 != pkt.len() {
        return Err(bad("length does not match packet"));
    }
    if pkt[etx_pos] != ETX {
        return Err(bad("wrong byte at calculated ETX position"));
    }
    // checksum covers LEN (2 bytes), RES and the payload
    if !boot_sum_valid(&pkt[1..3 + len], pkt[3 + len]) {
        return Err(bad("checksum mismatch"));
    }

    Ok(&pkt[4..3 + len])
}

/// Contents of the signature response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Serial communication interface speed, Hz.
    pub sci: u32,
    /// Recommended maximum baud rate, Hz.
    pub rmb: u32,
    /// Number of flash areas.
    pub noa: u8,
    /// Device type code.
    pub typ: u8,
    /// Boot firmware version, major and minor byte.
    pub boot_fw: (u8, u8),
}

pub fn decode_signature(pkt: &[u8; SIGNATURE_PACKET_LEN]) -> Result<Signature> {
    let len = BigEndian::read_u16(&pkt[1..3]);
    if len != SIGNATURE_RSP_LEN {
        return Err(Error::BadPacket {
            command: Command::SignatureRequest.name(),
            reason: "invalid length",
        });
    }

    let payload = decode_data(pkt, Command::SignatureRequest)?;

    Ok(Signature {
        sci: BigEndian::read_u32(&payload[0..4]),
        rmb: BigEndian::read_u32(&payload[4..8]),
        noa: payload[8],
        typ: payload[9],
        boot_fw: (payload[10], payload[11]),
    })
}

/// Contents of one area information response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaInfo {
    /// Raw kind-of-area byte; decode with [`super::Koa::try_from`].
    pub koa: u8,
    /// First and last address of the area.
    pub start_address: u32,
    pub end_address: u32,
    /// Erase and write unit sizes, bytes.
    pub erase_unit_size: u32,
    pub write_unit_size: u32,
}

impl AreaInfo {
    pub fn size(&self) -> usize {
        (self.end_address - self.start_address) as usize + 1
    }
}

pub fn decode_area_info(pkt: &[u8; AREA_INFO_PACKET_LEN]) -> Result<AreaInfo> {
    let len = BigEndian::read_u16(&pkt[1..3]);
    if len != AREA_INFO_RSP_LEN {
        return Err(Error::BadPacket {
            command: Command::AreaInformation.name(),
            reason: "invalid length",
        });
    }

    let payload = decode_data(pkt, Command::AreaInformation)?;

    Ok(AreaInfo {
        koa: payload[0],
        start_address: BigEndian::read_u32(&payload[1..5]),
        end_address: BigEndian::read_u32(&payload[5..9]),
        erase_unit_size: BigEndian::read_u32(&payload[9..13]),
        write_unit_size: BigEndian::read_u32(&payload[13..17]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn inquiry_command_golden_bytes() {
        assert_eq!(inquiry_command(), hex!("010001 00 ff03"));
    }

    #[test]
    fn baudrate_command_golden_bytes() {
        // 115200 = 0x0001c200
        assert_eq!(baudrate_command(115_200), hex!("010005 34 0001c200 04 03"));
    }

    #[test]
    fn rwe_command_layout() {
        let pkt = rwe_command(Command::Write, 0, 0x0a27);

        assert_eq!(pkt.len(), 14);
        assert_eq!(pkt[0], SOH);
        assert_eq!(&pkt[1..3], &[0x00, 0x09]);
        assert_eq!(pkt[3], 0x13);
        assert_eq!(&pkt[4..8], &[0, 0, 0, 0]);
        assert_eq!(&pkt[8..12], &[0, 0, 0x0a, 0x27]);
        assert_eq!(pkt[13], ETX);
    }

    #[test]
    fn every_command_satisfies_the_checksum_law() {
        for pkt in [
            inquiry_command(),
            baudrate_command(9600),
            signature_command(),
            area_info_command(3),
            rwe_command(Command::Erase, 0x100, 0x1fff),
            data_packet(0x13, &[1, 2, 3, 4, 5]),
            status_packet(0x15, 0x00),
        ] {
            let end = pkt.len() - 2;
            let total = pkt[1..=end]
                .iter()
                .fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(total, 0, "packet {pkt:02x?}");
        }
    }

    #[test]
    fn read_ack_status_golden_bytes() {
        assert_eq!(status_packet(0x15, 0x00), hex!("810002 15 00 e9 03"));
    }

    #[test]
    fn decode_status_accepts_ok_response() {
        let pkt = hex!("810002 00 00 fe03");
        let status = decode_status(&pkt, Command::Inquiry).unwrap();
        assert_eq!(status, Status { res: 0x00, sts: 0x00 });
        assert!(status.is_ok_for(Command::Inquiry));
    }

    #[test]
    fn decode_status_accepts_error_bit_in_res() {
        // ERASE failed with ERASE_ERROR
        let mut pkt = [SOD, 0x00, 0x02, 0x92, 0xe1, 0x00, ETX];
        pkt[5] = crate::checksum::boot_sum(&pkt[1..5]);

        let status = decode_status(&pkt, Command::Erase).unwrap();
        assert_eq!(status.res, 0x92);
        assert_eq!(status.sts, 0xe1);
        assert!(!status.is_ok_for(Command::Erase));
    }

    #[test]
    fn decode_status_rejects_malformed_packets() {
        let good = hex!("810002 00 00 fe03");

        let mut bad = good;
        bad[0] = 0x01;
        assert!(decode_status(&bad, Command::Inquiry).is_err());

        let mut bad = good;
        bad[6] = 0x00;
        assert!(decode_status(&bad, Command::Inquiry).is_err());

        let mut bad = good;
        bad[2] = 0x03;
        assert!(decode_status(&bad, Command::Inquiry).is_err());

        let mut bad = good;
        bad[3] = 0x15; // response for a different command
        assert!(decode_status(&bad, Command::Inquiry).is_err());

        let mut bad = good;
        bad[5] ^= 0x01;
        assert!(decode_status(&bad, Command::Inquiry).is_err());
    }

    #[test]
    fn data_packet_roundtrip() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let pkt = data_packet(u8::from(Command::Read), &payload);

        assert_eq!(decode_data(&pkt, Command::Read).unwrap(), &payload[..]);
    }

    #[test]
    fn decode_data_rejects_bad_length_bounds() {
        let mut pkt = data_packet(u8::from(Command::Read), &[0xaa; 4]);

        pkt[1] = 0x08; // claim 0x0805 bytes
        assert!(decode_data(&pkt, Command::Read).is_err());

        let mut pkt = data_packet(u8::from(Command::Read), &[0xaa; 4]);
        pkt[2] = 0x00;
        pkt[1] = 0x00; // zero length
        assert!(decode_data(&pkt, Command::Read).is_err());
    }

    #[test]
    fn decode_signature_parses_fields() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&9_600_000u32.to_be_bytes());
        payload.extend_from_slice(&1_000_000u32.to_be_bytes());
        payload.push(3); // NOA
        payload.push(0x02); // TYP
        payload.push(1); // boot fw major
        payload.push(4); // boot fw minor

        let pkt = data_packet(u8::from(Command::SignatureRequest), &payload);
        let mut fixed = [0u8; SIGNATURE_PACKET_LEN];
        fixed.copy_from_slice(&pkt);

        let sig = decode_signature(&fixed).unwrap();
        assert_eq!(sig.sci, 9_600_000);
        assert_eq!(sig.rmb, 1_000_000);
        assert_eq!(sig.noa, 3);
        assert_eq!(sig.typ, 0x02);
        assert_eq!(sig.boot_fw, (1, 4));
    }

    #[test]
    fn decode_area_info_parses_fields() {
        let mut payload = Vec::new();
        payload.push(0x00); // KOA: user code
        payload.extend_from_slice(&0x0000_0000u32.to_be_bytes());
        payload.extend_from_slice(&0x0003_ffffu32.to_be_bytes());
        payload.extend_from_slice(&0x2000u32.to_be_bytes());
        payload.extend_from_slice(&0x80u32.to_be_bytes());

        let pkt = data_packet(u8::from(Command::AreaInformation), &payload);
        let mut fixed = [0u8; AREA_INFO_PACKET_LEN];
        fixed.copy_from_slice(&pkt);

        let area = decode_area_info(&fixed).unwrap();
        assert_eq!(area.koa, 0x00);
        assert_eq!(area.start_address, 0x0000_0000);
        assert_eq!(area.end_address, 0x0003_ffff);
        assert_eq!(area.erase_unit_size, 0x2000);
        assert_eq!(area.write_unit_size, 0x80);
        assert_eq!(area.size(), 0x0004_0000);
    }
}
