//! Bootloader-side tool: reset control, chip discovery, flash erase and
//! firmware update of the safety MCU.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use log::error;
use structopt::StructOpt;

use mculink::boot::client::{BootClient, ChipInfo};
use mculink::boot::{session, Koa, BOOT_BAUD};
use mculink::defaults;
use mculink::fwinfo::FwInfoBlock;
use mculink::gpio::GpioResetter;
use mculink::uart::{HexTracer, SerialTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashArea {
    Code,
    Data,
}

impl FromStr for FlashArea {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.eq_ignore_ascii_case("code") {
            Ok(FlashArea::Code)
        } else if s.eq_ignore_ascii_case("data") {
            Ok(FlashArea::Data)
        } else {
            bail!("unknown flash-area '{s}'")
        }
    }
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// reset MCU and exit
    Reset,
    /// reset MCU, hold reset until Ctrl+C is pressed, then release reset and exit
    HoldInReset,
    /// reset MCU and force bootloader mode
    Bootloader,
    /// print firmware info (if the optional filename is given, read the info from this file)
    #[structopt(name = "fw_info")]
    FwInfo {
        #[structopt(parse(from_os_str))]
        file: Option<PathBuf>,
    },
    /// print chip info
    Chipinfo,
    /// erase MCU's flash
    Erase,
    /// write given filename to MCU's flash
    Flash {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "update",
    about = "Command line tool to control the safety MCU's bootloader"
)]
struct Opt {
    /// GPIO chip device (default: /dev/gpiochip2)
    #[structopt(short = "c", long = "gpiochip")]
    gpiochip: Option<String>,

    /// GPIO name for controlling RESET pin of MCU (default: nSAFETY_RESET_INT)
    #[structopt(short = "r", long = "reset-gpio")]
    reset_gpio: Option<String>,

    /// GPIO name for controlling MD pin of MCU (default: SAFETY_BOOTMODE_SET)
    #[structopt(short = "m", long = "md-gpio")]
    md_gpio: Option<String>,

    /// UART interface (default: /dev/ttyLP2, or SAFETY_MCU_UART)
    #[structopt(short = "d", long = "uart")]
    uart: Option<String>,

    /// reset duration (in ms)
    #[structopt(short = "p", long = "reset-period", default_value = "500")]
    reset_period: u64,

    /// target flash area (code or data)
    #[structopt(short = "a", long = "flash-area", default_value = "code")]
    flash_area: FlashArea,

    /// verbose operation
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Cmd,
}

fn print_chipinfo<W: Write>(w: &mut W, info: &ChipInfo) -> io::Result<()> {
    let sig = &info.signature;
    writeln!(
        w,
        "Boot Firmware:  {}.{}  (device type 0x{:02x})",
        sig.boot_fw.0, sig.boot_fw.1, sig.typ
    )?;
    writeln!(w, "SCI Clock:      {} Hz", sig.sci)?;
    writeln!(w, "Max Baudrate:   {} Hz", sig.rmb)?;
    writeln!(w, "Flash Areas:    {}", sig.noa)?;

    for (koa, area) in [(Koa::UserCode, &info.code), (Koa::UserData, &info.data)] {
        writeln!(w, "{}:", koa.as_str())?;
        writeln!(
            w,
            "  address range:   0x{:08x}-0x{:08x} ({} bytes)",
            area.start_address,
            area.end_address,
            area.size()
        )?;
        writeln!(w, "  erase unit size: {} bytes", area.erase_unit_size)?;
        writeln!(w, "  write unit size: {} bytes", area.write_unit_size)?;
    }

    Ok(())
}

/// Everything that needs an established bootloader session.
fn run_session_cmd(
    opt: &Opt,
    gpio: &mut GpioResetter,
    uart_device: &str,
) -> anyhow::Result<()> {
    let mut transport = SerialTransport::open(uart_device, BOOT_BAUD)
        .with_context(|| format!("opening '{uart_device}' failed"))?;

    if opt.verbose {
        transport.set_tracer(Box::new(HexTracer::new(io::stderr())));
        transport.set_trace(true);
    }

    let mut client: BootClient<SerialTransport> = session::establish(gpio, transport)
        .context("communication setup with MCU failed")?;

    let chipinfo = client.chipinfo().context("chip discovery failed")?;

    let area = match opt.flash_area {
        FlashArea::Code => &chipinfo.code,
        FlashArea::Data => &chipinfo.data,
    };

    match &opt.cmd {
        Cmd::FwInfo { .. } => {
            let block = session::read_infoblock(&mut client, &chipinfo)
                .context("reading version app infoblock failed")?;

            let valid = block.print_amended(&mut io::stdout(), "Current MCU Firmware")?;
            if !valid {
                bail!("the firmware info block is invalid");
            }
        }
        Cmd::Chipinfo => {
            print_chipinfo(&mut io::stdout(), &chipinfo)?;
        }
        Cmd::Erase => {
            session::erase_area(&mut client, area)
                .context("erasing the MCU's flash memory failed")?;
        }
        Cmd::Flash { file } => {
            let image = fs::read(file)
                .with_context(|| format!("could not open '{}'", file.display()))?;

            session::flash_image(&mut client, area, &image)
                .context("flashing the file failed")?;
        }
        _ => unreachable!("command needs no session"),
    }

    Ok(())
}

fn run(opt: Opt) -> anyhow::Result<()> {
    // printing the info block of a local file needs neither GPIO nor
    // UART
    if let Cmd::FwInfo { file: Some(file) } = &opt.cmd {
        let block = FwInfoBlock::from_file(file)
            .with_context(|| format!("could not open '{}'", file.display()))?;

        let valid = block.print_amended(&mut io::stdout(), &file.display().to_string())?;
        if !valid {
            bail!("the firmware info block is invalid");
        }
        return Ok(());
    }

    let gpiochip = opt.gpiochip.clone().unwrap_or_else(defaults::gpiochip);
    let reset_name = opt.reset_gpio.clone().unwrap_or_else(defaults::reset_gpio);
    let md_name = opt.md_gpio.clone().unwrap_or_else(defaults::md_gpio);
    let uart_device = opt.uart.clone().unwrap_or_else(defaults::uart_device);

    let mut gpio =
        GpioResetter::new(&gpiochip, &reset_name, &md_name).context("could not acquire GPIOs")?;
    gpio.set_reset_duration(Duration::from_millis(opt.reset_period));

    match &opt.cmd {
        Cmd::Reset => {
            gpio.reset_to_normal().context("reset failed")?;
        }
        Cmd::HoldInReset => {
            gpio.hold_reset().context("reset failed")?;
        }
        Cmd::Bootloader => {
            gpio.reset_to_bootloader()
                .context("forcing into bootloader failed")?;
        }
        _ => {
            let result = run_session_cmd(&opt, &mut gpio, &uart_device);

            // whatever happened, hand the MCU back to its firmware
            if let Err(e) = session::finish(&mut gpio) {
                error!("resetting into normal mode failed: {e}");
            }

            return result;
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    pretty_env_logger::formatted_builder()
        .filter_level(if opt.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Error
        })
        .init();

    run(opt)
}
