//! Framing of the 12-byte operational frame:
//! `[SOF][COM][PAYLOAD: u64 BE][CRC-8/J1850][EOF]`, CRC computed over
//! COM and PAYLOAD.

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, error};

use super::{Com, MAX_SYNC_TRIALS, RECV_INTERVAL_MS};
use crate::checksum::crc8_j1850;
use crate::error::{Error, Result};
use crate::uart::SerialLink;

pub const SOF: u8 = 0xa5;
pub const EOF: u8 = 0x03;

/// Total size of an operational frame on the wire.
pub const FRAME_LEN: usize = 12;

/// Deadline for one frame: the send period plus half of it as safety
/// margin, since we are usually async to the MCU's interval.
fn recv_timeout() -> Duration {
    Duration::from_millis(RECV_INTERVAL_MS + RECV_INTERVAL_MS / 2)
}

/// Packs `com` and `data` into wire representation.
pub fn encode(com: Com, data: u64) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];

    frame[0] = SOF;
    frame[1] = com.into();
    BigEndian::write_u64(&mut frame[2..10], data);
    frame[10] = crc8_j1850(&frame[1..10]);
    frame[11] = EOF;

    frame
}

/// Unpacks a wire frame, verifying SOF, EOF and CRC. The COM byte is
/// returned raw: an unknown code in an otherwise valid frame is not a
/// framing error.
pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<(u8, u64)> {
    if frame[0] != SOF {
        error!(
            "SOF pattern mismatch: expected 0x{:02x}, got 0x{:02x}",
            SOF, frame[0]
        );
        return Err(Error::BadFrame("SOF pattern mismatch"));
    }
    if frame[11] != EOF {
        error!(
            "EOF pattern mismatch: expected 0x{:02x}, got 0x{:02x}",
            EOF, frame[11]
        );
        return Err(Error::BadFrame("EOF pattern mismatch"));
    }

    let crc = crc8_j1850(&frame[1..10]);
    if crc != frame[10] {
        error!(
            "CRC mismatch: expected 0x{:02x}, got 0x{:02x}",
            crc, frame[10]
        );
        return Err(Error::BadFrame("CRC mismatch"));
    }

    Ok((frame[1], BigEndian::read_u64(&frame[2..10])))
}

/// Sends one frame and waits until it is drained to the wire.
pub fn send<L: SerialLink>(link: &mut L, com: Com, data: u64) -> Result<()> {
    let frame = encode(com, data);

    if com == Com::Inquiry {
        debug!(
            "sending frame: {} (0x{:02x})",
            com.name(),
            (data >> 56) as u8
        );
    } else {
        debug!("sending frame: {}", com.name());
    }

    link.write_drain(&frame)
}

/// Sends an inquiry frame requesting a one-shot value; the requested COM
/// rides in the top payload byte.
pub fn send_inquiry<L: SerialLink>(link: &mut L, com: Com) -> Result<()> {
    send(link, Com::Inquiry, (u8::from(com) as u64) << 56)
}

/// Receives and decodes exactly one frame.
pub fn recv<L: SerialLink>(link: &mut L) -> Result<(u8, u64)> {
    let mut frame = [0u8; FRAME_LEN];
    link.read_exact_timeout(&mut frame, recv_timeout())?;

    let (com, data) = decode(&frame)?;

    debug!("received frame looks valid (SOF, EOF, CRC)");

    Ok((com, data))
}

/// Receives one frame, resynchronizing on desync.
///
/// The MCU sends free-running; connecting mid-frame makes us decode at
/// the wrong offsets. Flushing the input queue at a frame-period
/// boundary realigns us, so on a framing error flush and retry, at most
/// [`MAX_SYNC_TRIALS`] times.
pub fn recv_with_sync<L: SerialLink>(link: &mut L) -> Result<(u8, u64)> {
    let mut trial = MAX_SYNC_TRIALS;

    loop {
        trial -= 1;

        match recv(link) {
            Err(Error::BadFrame(reason)) => {
                link.flush_input()?;

                if trial == 0 {
                    return Err(Error::BadFrame(reason));
                }
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::testing::MockLink;
    use hex_literal::hex;

    #[test]
    fn encode_charge_control_word() {
        // PWM enabled at 100.0% duty: bit 63 plus 0x3e8 in bits 48..57
        let frame = encode(Com::ChargeControl, 0x83e8_0000_0000_0000);
        assert_eq!(frame[0], SOF);
        assert_eq!(frame[1], 0x06);
        assert_eq!(&frame[2..10], &hex!("83e8000000000000")[..]);
        assert_eq!(frame[11], EOF);
    }

    #[test]
    fn roundtrip_all_defined_coms() {
        let words = [0u64, 1, 0x8005_0000_0000_0000, u64::MAX, 0x0102_0304_0506_0708];

        for com in [
            Com::DigitalOutput,
            Com::ChargeControl,
            Com::ChargeState,
            Com::Pt1000State,
            Com::FwVersion,
            Com::GitHash,
            Com::ErrorMessage,
            Com::ChargeState2,
            Com::ChargeControl2,
            Com::AnalogInput05,
            Com::Inquiry,
        ] {
            for word in words {
                let (c, w) = decode(&encode(com, word)).unwrap();
                assert_eq!(c, u8::from(com));
                assert_eq!(w, word);
            }
        }
    }

    #[test]
    fn decode_rejects_bad_markers_and_crc() {
        let good = encode(Com::ChargeState, 0xdead_beef);

        let mut bad = good;
        bad[0] = 0x00;
        assert!(matches!(decode(&bad), Err(Error::BadFrame(_))));

        let mut bad = good;
        bad[11] = 0x42;
        assert!(matches!(decode(&bad), Err(Error::BadFrame(_))));

        for bit in 0..8 {
            let mut bad = good;
            bad[10] ^= 1 << bit;
            assert!(matches!(decode(&bad), Err(Error::BadFrame(_))));
        }
    }

    #[test]
    fn payload_is_big_endian_on_the_wire() {
        let frame = encode(Com::ChargeState, 0x0102_0304_0506_0708);
        assert_eq!(&frame[2..10], &hex!("0102030405060708")[..]);
    }

    #[test]
    fn recv_with_sync_recovers_from_garbage_prefix() {
        let frame_a = encode(Com::ChargeState, 0x1111);
        let frame_b = encode(Com::ChargeState, 0x2222);

        for garbage_len in 1..=11usize {
            let mut link = MockLink::new();

            // connector fell mid-stream: garbage, then a frame we will
            // misalign on; after the flush the stream is frame-aligned
            let mut seg = vec![0xeeu8; garbage_len];
            seg.extend_from_slice(&frame_a);
            link.push_segment(seg);
            link.push_segment(frame_b);

            let (com, data) = recv_with_sync(&mut link).unwrap();
            assert_eq!(com, u8::from(Com::ChargeState));
            assert_eq!(data, 0x2222);
            assert_eq!(link.flushes, 1);
        }
    }

    #[test]
    fn recv_with_sync_aligned_stream_needs_no_flush() {
        let mut link = MockLink::new();
        link.push_segment(encode(Com::Pt1000State, 0x42));

        let (com, data) = recv_with_sync(&mut link).unwrap();
        assert_eq!(com, u8::from(Com::Pt1000State));
        assert_eq!(data, 0x42);
        assert_eq!(link.flushes, 0);
    }

    #[test]
    fn recv_with_sync_gives_up_after_three_trials() {
        let mut link = MockLink::new();
        for _ in 0..4 {
            link.push_segment([0xee; FRAME_LEN]);
        }

        assert!(matches!(
            recv_with_sync(&mut link),
            Err(Error::BadFrame(_))
        ));
        assert_eq!(link.flushes, MAX_SYNC_TRIALS as usize);
    }

    #[test]
    fn inquiry_carries_target_com_in_top_byte() {
        let mut link = MockLink::new();
        send_inquiry(&mut link, Com::FwVersion).unwrap();

        assert_eq!(link.tx.len(), FRAME_LEN);
        assert_eq!(link.tx[0], SOF);
        assert_eq!(link.tx[1], 0xff);
        assert_eq!(link.tx[2], 0x0a);
        assert_eq!(&link.tx[3..10], &[0u8; 7]);
    }
}
