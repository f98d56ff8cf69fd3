//! Blocking, framed byte I/O over a serial line.
//!
//! The MCU protocols are strictly request/response or fixed-period, so a
//! plain blocking transport with per-read deadlines is all that is needed:
//! no worker threads, no queues. [`SerialTransport`] owns the descriptor
//! exclusively for the lifetime of a session; the protocol engines talk to
//! it through the [`SerialLink`] trait so their state machines can be
//! exercised against an in-memory double.

use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use serial::core::{
    BaudRate, CharSize, FlowControl, Parity, SerialDevice, SerialPortSettings, StopBits,
};

use crate::error::{Error, Result};

/// Transfer direction of a traced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

/// Sink for byte-level frame traces.
///
/// Injected at transport construction; the default does nothing, so
/// callers never have to check for presence.
pub trait FrameTracer {
    fn frame(&mut self, dir: Direction, bytes: &[u8]);
}

/// The default tracer: discards everything.
pub struct NopTracer;

impl FrameTracer for NopTracer {
    fn frame(&mut self, _dir: Direction, _bytes: &[u8]) {}
}

/// Tracer that renders classic 16-byte hex + ASCII gutter rows.
pub struct HexTracer<W: Write> {
    out: W,
}

impl<W: Write> HexTracer<W> {
    pub fn new(out: W) -> Self {
        HexTracer { out }
    }
}

impl<W: Write> FrameTracer for HexTracer<W> {
    fn frame(&mut self, dir: Direction, bytes: &[u8]) {
        for line in hexdump_lines(dir, bytes) {
            let _ = writeln!(self.out, "{line}\r");
        }
    }
}

/// Renders `bytes` as 16-byte hex rows with an ASCII gutter, each row
/// prefixed with the transfer direction.
pub fn hexdump_lines(dir: Direction, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .map(|row| {
            let mut hex = String::with_capacity(3 * 16);
            for b in row {
                hex.push_str(&format!("{b:02x} "));
            }
            let ascii: String = row
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{} {:<48} |{}|", dir.as_str(), hex, ascii)
        })
        .collect()
}

/// The seam between the protocol engines and the physical port.
pub trait SerialLink {
    /// Writes all bytes and blocks until the kernel has drained them to
    /// the wire.
    fn write_drain(&mut self, buf: &[u8]) -> Result<()>;

    /// Fills `buf` completely or fails. Partial reads are retried
    /// internally until the overall deadline passes, so on success the
    /// caller always holds a full fixed-size frame.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()>;

    /// Discards all queued input bytes.
    fn flush_input(&mut self) -> Result<()>;

    /// Applies a new baud rate to the open descriptor without reopening.
    fn reconfigure_baud(&mut self, baud: u32) -> Result<()>;
}

fn baud_rate(baud: u32) -> BaudRate {
    match baud {
        9600 => BaudRate::Baud9600,
        19200 => BaudRate::Baud19200,
        38400 => BaudRate::Baud38400,
        57600 => BaudRate::Baud57600,
        115200 => BaudRate::Baud115200,
        other => BaudRate::BaudOther(other as usize),
    }
}

/// A serial device opened for one protocol session: 8N1, no flow control.
pub struct SerialTransport {
    port: serial::SystemPort,
    tracer: Box<dyn FrameTracer>,
    trace: bool,
}

impl SerialTransport {
    /// Opens `path` at `baud`. Fails immediately on a missing device or
    /// denied access; there are no retries.
    pub fn open<P: AsRef<Path>>(path: P, baud: u32) -> Result<Self> {
        let mut port = serial::open(path.as_ref())?;

        let mut settings = port.read_settings()?;
        settings.set_baud_rate(baud_rate(baud))?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_parity(Parity::ParityNone);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_flow_control(FlowControl::FlowNone);
        port.write_settings(&settings)?;

        Ok(SerialTransport {
            port,
            tracer: Box::new(NopTracer),
            trace: false,
        })
    }

    /// Installs the trace sink used while tracing is enabled.
    pub fn set_tracer(&mut self, tracer: Box<dyn FrameTracer>) {
        self.tracer = tracer;
    }

    /// Enables or disables byte-level tracing of all transfers.
    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    /// The raw descriptor, for readiness waits in the caller's loop.
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.port.as_raw_fd()
    }
}

impl SerialLink for SerialTransport {
    fn write_drain(&mut self, buf: &[u8]) -> Result<()> {
        if self.trace {
            self.tracer.frame(Direction::Tx, buf);
        }

        self.port.write_all(buf)?;

        if unsafe { libc::tcdrain(self.port.as_raw_fd()) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(())
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut got = 0;

        while got < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    want: buf.len(),
                    got,
                });
            }

            self.port.set_timeout(remaining)?;

            match self.port.read(&mut buf[got..]) {
                Ok(0) => continue,
                Ok(n) => got += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(Error::Timeout {
                        want: buf.len(),
                        got,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.trace {
            self.tracer.frame(Direction::Rx, buf);
        }

        Ok(())
    }

    fn flush_input(&mut self) -> Result<()> {
        if unsafe { libc::tcflush(self.port.as_raw_fd(), libc::TCIFLUSH) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn reconfigure_baud(&mut self, baud: u32) -> Result<()> {
        let mut settings = self.port.read_settings()?;
        settings.set_baud_rate(baud_rate(baud))?;
        self.port.write_settings(&settings)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory double of [`SerialLink`].
    ///
    /// Incoming bytes are organised as *segments*: a read may span
    /// segment boundaries (more data "arrives"), while `flush_input`
    /// discards only the remainder of the current segment, which is what
    /// flushing at a frame-period boundary looks like on the device.
    pub struct MockLink {
        pub segments: VecDeque<VecDeque<u8>>,
        pub tx: Vec<u8>,
        pub flushes: usize,
        pub baud_changes: Vec<u32>,
    }

    impl MockLink {
        pub fn new() -> Self {
            MockLink {
                segments: VecDeque::new(),
                tx: Vec::new(),
                flushes: 0,
                baud_changes: Vec::new(),
            }
        }

        pub fn push_segment<B: AsRef<[u8]>>(&mut self, bytes: B) {
            self.segments
                .push_back(bytes.as_ref().iter().copied().collect());
        }
    }

    impl SerialLink for MockLink {
        fn write_drain(&mut self, buf: &[u8]) -> Result<()> {
            self.tx.extend_from_slice(buf);
            Ok(())
        }

        fn read_exact_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<()> {
            let mut got = 0;
            while got < buf.len() {
                match self.segments.front_mut() {
                    Some(seg) => match seg.pop_front() {
                        Some(b) => {
                            buf[got] = b;
                            got += 1;
                        }
                        None => {
                            self.segments.pop_front();
                        }
                    },
                    None => {
                        return Err(Error::Timeout {
                            want: buf.len(),
                            got,
                        })
                    }
                }
            }
            Ok(())
        }

        fn flush_input(&mut self) -> Result<()> {
            self.flushes += 1;
            // drop the remainder of the current segment only
            self.segments.pop_front();
            Ok(())
        }

        fn reconfigure_baud(&mut self, baud: u32) -> Result<()> {
            self.baud_changes.push(baud);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexdump_renders_direction_and_gutter() {
        let lines = hexdump_lines(Direction::Rx, &[0xa5, 0x06, b'A', b'Z']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("RX a5 06 41 5a"));
        assert!(lines[0].ends_with("|..AZ|"));
    }

    #[test]
    fn hexdump_splits_rows_at_sixteen_bytes() {
        let lines = hexdump_lines(Direction::Tx, &[0u8; 20]);
        assert_eq!(lines.len(), 2);
    }
}
