//! The update workflow: bring-up and tear-down of a bootloader session
//! and the flash-level operations composed from it.

use std::thread;
use std::time::Duration;

use log::debug;

use super::client::{BootClient, ChipInfo};
use super::packet::AreaInfo;
use crate::cb;
use crate::error::{Error, Result};
use crate::fwinfo::{FwInfoBlock, INFOBLOCK_LEN, INFOBLOCK_OFFSET};
use crate::gpio::GpioResetter;
use crate::uart::SerialLink;

/// Forces the MCU into boot mode and establishes a command session over
/// `link`, which must be opened at [`super::BOOT_BAUD`].
pub fn establish<L: SerialLink>(gpio: &mut GpioResetter, link: L) -> Result<BootClient<L>> {
    gpio.reset_to_bootloader()?;

    let mut client = BootClient::new(link);
    client.handshake()?;

    Ok(client)
}

/// Returns the MCU to normal mode and waits until the firmware is
/// responsive again.
pub fn finish(gpio: &mut GpioResetter) -> Result<()> {
    gpio.reset_to_normal()?;
    thread::sleep(Duration::from_millis(cb::STARTUP_DELAY_MS));
    Ok(())
}

/// Reads the firmware info block embedded in the flash-resident
/// application image.
pub fn read_infoblock<L: SerialLink>(
    client: &mut BootClient<L>,
    chipinfo: &ChipInfo,
) -> Result<FwInfoBlock> {
    let mut raw = [0u8; INFOBLOCK_LEN];
    client.read(
        chipinfo.code.start_address + INFOBLOCK_OFFSET,
        &mut raw,
        false,
    )?;

    Ok(FwInfoBlock::parse(&raw))
}

/// Validates `image` against the target area's constraints.
pub fn check_image(area: &AreaInfo, image: &[u8]) -> Result<()> {
    if image.is_empty() {
        return Err(Error::EmptyFile);
    }
    if image.len() > area.size() {
        return Err(Error::FileTooLarge {
            size: image.len(),
            max: area.size(),
        });
    }
    if image.len() % area.write_unit_size as usize != 0 {
        return Err(Error::UnalignedFile {
            size: image.len(),
            unit: area.write_unit_size as usize,
        });
    }

    Ok(())
}

/// Erases the whole area.
pub fn erase_area<L: SerialLink>(client: &mut BootClient<L>, area: &AreaInfo) -> Result<()> {
    client.erase(area.start_address, area.end_address)
}

/// Flashes `image` into `area`: size checks, whole-area erase, chunked
/// write.
pub fn flash_image<L: SerialLink>(
    client: &mut BootClient<L>,
    area: &AreaInfo,
    image: &[u8],
) -> Result<()> {
    check_image(area, image)?;

    debug!("erasing area 0x{:08x}-0x{:08x}", area.start_address, area.end_address);
    erase_area(client, area)?;

    client.write(area.start_address, image)
}
