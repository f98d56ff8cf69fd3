//! GPIO-driven reset/mode sequencing for the safety MCU.
//!
//! Two output lines control the MCU: RESET (low holds the device in
//! reset) and MD (low selects the bootloader, high the normal firmware).
//! Lines are requested by *name* from a named gpiochip and are released
//! again when the [`GpioResetter`] is dropped, so parallel tools can
//! acquire them afterwards.

use std::thread;
use std::time::Duration;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::defaults;
use crate::error::{Error, Result};

const RESET_ACTIVE: u8 = 1; // device runs
const RESET_HELD: u8 = 0;

const MD_NORMAL: u8 = 1;
const MD_BOOTLOADER: u8 = 0;

/// Looks up a line offset by its name in the chip's line table.
fn find_line(chip: &mut Chip, chip_path: &str, name: &str) -> Result<u32> {
    for offset in 0..chip.num_lines() {
        let line = chip.get_line(offset)?;
        if line.info()?.name() == Some(name) {
            return Ok(offset);
        }
    }

    Err(Error::LineNotFound {
        chip: chip_path.to_string(),
        name: name.to_string(),
    })
}

/// Owner of the RESET and MD lines.
pub struct GpioResetter {
    reset: LineHandle,
    md: LineHandle,
    reset_duration: Duration,
}

impl GpioResetter {
    /// Acquires both lines as outputs, initially released (device runs,
    /// normal mode selected).
    pub fn new(gpiochip: &str, reset_name: &str, md_name: &str) -> Result<Self> {
        let mut chip = Chip::new(gpiochip)?;

        let reset_offset = find_line(&mut chip, gpiochip, reset_name)?;
        let md_offset = find_line(&mut chip, gpiochip, md_name)?;

        let consumer = std::env::args()
            .next()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

        let reset = chip
            .get_line(reset_offset)?
            .request(LineRequestFlags::OUTPUT, RESET_ACTIVE, &consumer)?;
        let md = chip
            .get_line(md_offset)?
            .request(LineRequestFlags::OUTPUT, MD_NORMAL, &consumer)?;

        Ok(GpioResetter {
            reset,
            md,
            reset_duration: Duration::from_millis(defaults::RESET_DURATION_MS),
        })
    }

    /// Overrides the duration the RESET line is held low.
    pub fn set_reset_duration(&mut self, duration: Duration) {
        self.reset_duration = duration;
    }

    fn reset_with_bootmode(&mut self, bootloader: bool, hold_until_signal: bool) -> Result<()> {
        self.reset.set_value(RESET_HELD)?;

        self.md
            .set_value(if bootloader { MD_BOOTLOADER } else { MD_NORMAL })?;

        if hold_until_signal {
            // blocks until any signal interrupts us, then release
            unsafe {
                libc::pause();
            }
        } else {
            thread::sleep(self.reset_duration);
        }

        self.reset.set_value(RESET_ACTIVE)?;

        Ok(())
    }

    /// Pulses RESET with MD selecting the normal firmware.
    pub fn reset_to_normal(&mut self) -> Result<()> {
        self.reset_with_bootmode(false, false)
    }

    /// Pulses RESET with MD selecting the bootloader.
    pub fn reset_to_bootloader(&mut self) -> Result<()> {
        self.reset_with_bootmode(true, false)
    }

    /// Holds the MCU in reset until a process-level signal arrives, then
    /// releases it into normal mode.
    pub fn hold_reset(&mut self) -> Result<()> {
        self.reset_with_bootmode(false, true)
    }
}
