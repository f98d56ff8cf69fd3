//! The bootloader session state machine.
//!
//! A session starts with the low-pulse handshake and the generic→boot
//! code exchange, upgrades the baud rate, and is then ready for
//! signature/area discovery and the erase/read/write commands. Commands
//! are strictly serialized: each one waits for its full response before
//! the next is issued. Any failure moves the session to `Failed`; the
//! remaining recovery is a fresh reset into boot mode.

use std::thread;
use std::time::Duration;

use log::{debug, error};

use super::packet::{self, AreaInfo, Signature, Status};
use super::{
    Command, Koa, ACK_PATTERN, BAUD_SETTLE_MS, BOOT_CODE_PATTERN, FULL_BAUD,
    GENERIC_CODE_PATTERN, LOW_PULSE_DELAY_MS, LOW_PULSE_PATTERN, RESPONSE_TIMEOUT_MS,
    STARTUP_DELAY_MS,
};
use crate::error::{Error, Result};
use crate::uart::{hexdump_lines, Direction, SerialLink};

/// Read deadline for the second half of a dual-length response: the
/// trailing bytes are already buffered locally, so this is a formality.
const UPGRADE_READ_TIMEOUT_MS: u64 = 5;

/// Session phases; terminal are `Ready` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PreHandshake,
    WaitAck,
    PostHandshake,
    Ready,
    Failed,
}

/// The flash layout relevant for updates: where user code and user data
/// live.
#[derive(Debug, Clone, Copy)]
pub struct ChipInfo {
    pub signature: Signature,
    pub code: AreaInfo,
    pub data: AreaInfo,
}

/// Driver of one bootloader session over a serial link.
pub struct BootClient<L: SerialLink> {
    link: L,
    state: SessionState,
}

impl<L: SerialLink> BootClient<L> {
    pub fn new(link: L) -> Self {
        BootClient {
            link,
            state: SessionState::PreHandshake,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    fn ensure_ready(&self, op: &'static str) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(Error::BadState { op });
        }
        Ok(())
    }

    /// Runs `f`; any failure is terminal for the session.
    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(RESPONSE_TIMEOUT_MS)
    }

    /// Reads and validates a status response, requiring STATUSCODE_OK.
    fn expect_ok_status(&mut self, command: Command) -> Result<()> {
        let mut pkt = [0u8; packet::STATUS_PACKET_LEN];
        self.link
            .read_exact_timeout(&mut pkt, self.response_timeout())?;

        let status = match packet::decode_status(&pkt, command) {
            Ok(status) => status,
            Err(e) => {
                error!("unexpected response for {}", command.name());
                dump_packet(&pkt);
                return Err(e);
            }
        };

        if !status.is_ok_for(command) {
            return Err(Error::status(command.name(), status.res, status.sts));
        }

        debug!("{} succeeded", command.name());
        Ok(())
    }

    /// Establishes the session: low-pulse handshake, boot-code exchange,
    /// inquiry, baud-rate upgrade, inquiry again.
    pub fn handshake(&mut self) -> Result<()> {
        if self.state != SessionState::PreHandshake {
            return Err(Error::BadState { op: "handshake" });
        }

        self.guard(|c| c.run_handshake()).map(|()| {
            self.state = SessionState::Ready;
        })
    }

    fn run_handshake(&mut self) -> Result<()> {
        // give the CPU some time to start up
        thread::sleep(Duration::from_millis(STARTUP_DELAY_MS));

        // drop possible accumulated noise and ensure the input queue is
        // empty
        self.link.flush_input()?;

        debug!("sending 0x00 to setup communication");

        self.link.write_drain(&[LOW_PULSE_PATTERN])?;
        thread::sleep(Duration::from_millis(LOW_PULSE_DELAY_MS));
        self.link.write_drain(&[LOW_PULSE_PATTERN])?;

        debug!("receiving ACK pattern");

        let mut byte = [0u8; 1];
        self.link
            .read_exact_timeout(&mut byte, self.response_timeout())?;
        if byte[0] != ACK_PATTERN {
            error!(
                "ACK pattern mismatch: expected 0x{:02x}, got 0x{:02x}",
                ACK_PATTERN, byte[0]
            );
            return Err(Error::BadPacket {
                command: "handshake",
                reason: "ACK pattern mismatch",
            });
        }

        self.state = SessionState::WaitAck;

        debug!("sending generic code");

        self.link.write_drain(&[GENERIC_CODE_PATTERN])?;

        self.link
            .read_exact_timeout(&mut byte, self.response_timeout())?;
        if byte[0] != BOOT_CODE_PATTERN {
            error!(
                "boot code pattern mismatch: expected 0x{:02x}, got 0x{:02x}",
                BOOT_CODE_PATTERN, byte[0]
            );
            return Err(Error::BadPacket {
                command: "handshake",
                reason: "boot code pattern mismatch",
            });
        }

        self.state = SessionState::PostHandshake;
        debug!("MCU is now accepting commands");

        // the manual proposes an inquiry now, then the baud upgrade,
        // then an inquiry again to verify the new rate
        self.inquiry()?;
        self.set_baudrate(FULL_BAUD)?;

        self.link.reconfigure_baud(FULL_BAUD)?;
        thread::sleep(Duration::from_millis(BAUD_SETTLE_MS));

        self.inquiry()?;

        Ok(())
    }

    fn inquiry(&mut self) -> Result<()> {
        debug!("sending INQUIRY_CMD");
        self.link.write_drain(&packet::inquiry_command())?;
        self.expect_ok_status(Command::Inquiry)
    }

    fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        debug!("sending BAUDRATE_SETTING_CMD ({baud})");
        self.link.write_drain(&packet::baudrate_command(baud))?;
        self.expect_ok_status(Command::BaudrateSetting)
    }

    /// Receives a dual-length response: the short status shape first; if
    /// that validates, the MCU reported an error (or an impossible OK);
    /// otherwise the remainder of the long packet is collected with a
    /// token deadline.
    fn read_upgraded<const N: usize>(&mut self, command: Command) -> Result<[u8; N]> {
        let mut pkt = [0u8; N];

        self.link.read_exact_timeout(
            &mut pkt[..packet::STATUS_PACKET_LEN],
            self.response_timeout(),
        )?;

        let mut short = [0u8; packet::STATUS_PACKET_LEN];
        short.copy_from_slice(&pkt[..packet::STATUS_PACKET_LEN]);

        if let Ok(Status { res, sts }) = packet::decode_status(&short, command) {
            if res != u8::from(command) || sts != super::STATUSCODE_OK {
                return Err(Error::status(command.name(), res, sts));
            }

            // a valid OK status where data belongs is equally wrong
            error!("unexpected response for {}", command.name());
            dump_packet(&short);
            return Err(Error::BadPacket {
                command: command.name(),
                reason: "status response instead of data",
            });
        }

        self.link.read_exact_timeout(
            &mut pkt[packet::STATUS_PACKET_LEN..],
            Duration::from_millis(UPGRADE_READ_TIMEOUT_MS),
        )?;

        Ok(pkt)
    }

    /// Queries the boot firmware signature.
    pub fn signature(&mut self) -> Result<Signature> {
        self.ensure_ready("signature")?;
        self.guard(|c| {
            debug!("sending SIGNATURE_REQUEST_CMD");
            c.link.write_drain(&packet::signature_command())?;

            let pkt =
                c.read_upgraded::<{ packet::SIGNATURE_PACKET_LEN }>(Command::SignatureRequest)?;

            packet::decode_signature(&pkt).map_err(|e| {
                error!("unexpected response while trying to get signature");
                dump_packet(&pkt);
                e
            })
        })
    }

    /// Queries one flash area descriptor.
    pub fn area_info(&mut self, num: u8) -> Result<AreaInfo> {
        self.ensure_ready("area_info")?;
        self.guard(|c| {
            debug!("sending AREA_INFORMATION_CMD ({num})");
            c.link.write_drain(&packet::area_info_command(num))?;

            let pkt =
                c.read_upgraded::<{ packet::AREA_INFO_PACKET_LEN }>(Command::AreaInformation)?;

            packet::decode_area_info(&pkt).map_err(|e| {
                error!("unexpected response while trying to get area info");
                dump_packet(&pkt);
                e
            })
        })
    }

    /// Walks the area table until both the user code and the user data
    /// area are known.
    pub fn chipinfo(&mut self) -> Result<ChipInfo> {
        let signature = self.signature()?;

        let mut code = None;
        let mut data = None;

        for num in 0..signature.noa {
            let area = self.area_info(num)?;

            match Koa::try_from(area.koa) {
                Ok(Koa::UserCode) => code = Some(area),
                Ok(Koa::UserData) => data = Some(area),
                Ok(Koa::Config) => {}
                Err(_) => debug!("area {num} has unknown kind 0x{:02x}", area.koa),
            }

            if code.is_some() && data.is_some() {
                break;
            }
        }

        match (code, data) {
            (Some(code), Some(data)) => Ok(ChipInfo {
                signature,
                code,
                data,
            }),
            _ => {
                self.state = SessionState::Failed;
                Err(Error::BadPacket {
                    command: Command::AreaInformation.name(),
                    reason: "user code or user data area not reported",
                })
            }
        }
    }

    /// Erases the address range; the boot firmware only accepts whole
    /// erase units.
    pub fn erase(&mut self, start_addr: u32, end_addr: u32) -> Result<()> {
        self.ensure_ready("erase")?;
        self.guard(|c| {
            debug!("sending ERASE_CMD [0x{start_addr:08x}-0x{end_addr:08x}]");
            c.link
                .write_drain(&packet::rwe_command(Command::Erase, start_addr, end_addr))?;
            c.expect_ok_status(Command::Erase)
        })
    }

    /// Reads `buf.len()` bytes starting at `start_addr`. The MCU answers
    /// a read command with a data packet directly, no status first. Only
    /// the single-packet case is supported; `ack` sends the optional
    /// confirmation status afterwards.
    pub fn read(&mut self, start_addr: u32, buf: &mut [u8], ack: bool) -> Result<()> {
        self.ensure_ready("read")?;

        if buf.len() > packet::MAX_DATA_PAYLOAD {
            return Err(Error::TooBig {
                len: buf.len(),
                max: packet::MAX_DATA_PAYLOAD,
            });
        }

        self.guard(|c| {
            let end_addr = start_addr + buf.len() as u32 - 1;
            debug!("sending READ_CMD [0x{start_addr:08x}-0x{end_addr:08x}]");
            c.link
                .write_drain(&packet::rwe_command(Command::Read, start_addr, end_addr))?;

            debug!("waiting for data packet");

            let mut pkt = vec![0u8; buf.len() + 6];
            c.link
                .read_exact_timeout(&mut pkt, c.response_timeout())?;

            let payload = match packet::decode_data(&pkt, Command::Read) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("unexpected response for data packet");
                    dump_packet(&pkt);
                    return Err(e);
                }
            };

            if pkt[3] != u8::from(Command::Read) {
                // an error status wearing the data marker
                return Err(Error::status(Command::Read.name(), pkt[3], payload[0]));
            }

            buf.copy_from_slice(payload);

            if ack {
                debug!("sending data packet status (confirmation)");
                c.link.write_drain(&packet::status_packet(
                    Command::Read.into(),
                    super::STATUSCODE_OK,
                ))?;
            }

            debug!("successfully received a data packet");
            Ok(())
        })
    }

    /// Writes `image` starting at `start_addr`, chunked into data
    /// packets of up to 1024 bytes, each acknowledged by the MCU. The
    /// first non-OK status fails the whole write.
    pub fn write(&mut self, start_addr: u32, image: &[u8]) -> Result<()> {
        self.ensure_ready("write")?;
        self.guard(|c| {
            let end_addr = start_addr + image.len() as u32 - 1;
            debug!("sending WRITE_CMD [0x{start_addr:08x}-0x{end_addr:08x}]");
            c.link
                .write_drain(&packet::rwe_command(Command::Write, start_addr, end_addr))?;
            c.expect_ok_status(Command::Write)?;

            for (i, chunk) in image.chunks(packet::MAX_DATA_PAYLOAD).enumerate() {
                let chunk_addr = start_addr + (i * packet::MAX_DATA_PAYLOAD) as u32;
                debug!(
                    "writing 0x{chunk_addr:08x}-0x{:08x}",
                    chunk_addr + chunk.len() as u32 - 1
                );

                c.link
                    .write_drain(&packet::data_packet(Command::Write.into(), chunk))?;
                c.expect_ok_status(Command::Write)?;
            }

            Ok(())
        })
    }
}

fn dump_packet(pkt: &[u8]) {
    for line in hexdump_lines(Direction::Rx, pkt) {
        error!("{line}");
    }
}
