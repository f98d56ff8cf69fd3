//! Interactive monitor for the safety MCU's operational protocol.
//!
//! Multiplexes stdin and the serial line in one poll loop: received
//! frames update the device model and are dumped to the screen,
//! keyboard commands mutate the outgoing Charge Control word.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, Context};
use crossterm::terminal;
use log::error;
use structopt::StructOpt;

use mculink::cb::monitor::Monitor;
use mculink::cb::state::SafetyController;
use mculink::cb::{frame, STARTUP_DELAY_MS};
use mculink::defaults;
use mculink::gpio::GpioResetter;
use mculink::uart::{hexdump_lines, Direction, HexTracer, SerialLink, SerialTransport};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "raw",
    about = "Command line tool to retrieve raw values of the safety MCU"
)]
struct Opt {
    /// UART interface (default: /dev/ttyLP2, or SAFETY_MCU_UART)
    #[structopt(short = "d", long = "uart")]
    uart: Option<String>,

    /// initial receive sync (default: send packet first)
    #[structopt(short = "S", long = "sync")]
    sync: bool,

    /// don't dump data (useful only in verbose mode to print only received frames)
    #[structopt(short = "D", long = "no-dump")]
    no_dump: bool,

    /// don't send Charge Control frames automatically
    #[structopt(short = "C", long = "no-charge-control")]
    no_charge_control: bool,

    /// GPIO chip device (default: /dev/gpiochip2)
    #[structopt(short = "c", long = "gpiochip")]
    gpiochip: Option<String>,

    /// GPIO name for controlling RESET pin of MCU (default: nSAFETY_RESET_INT)
    #[structopt(short = "r", long = "reset-gpio")]
    reset_gpio: Option<String>,

    /// GPIO name for controlling MD pin of MCU (default: SAFETY_BOOTMODE_SET)
    #[structopt(short = "m", long = "md-gpio")]
    md_gpio: Option<String>,

    /// reset duration (in ms)
    #[structopt(short = "p", long = "reset-period", default_value = "500")]
    reset_period: u64,

    /// don't reset the safety controller before starting UART communication
    #[structopt(short = "R", long = "no-reset")]
    no_reset: bool,

    /// verbose operation
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

/// Puts the terminal into raw mode so poll reacts on single keys, and
/// restores it again on every exit path.
struct RawMode;

impl RawMode {
    fn enter() -> anyhow::Result<RawMode> {
        terminal::enable_raw_mode().context("could not switch terminal to raw mode")?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Waits for readiness on stdin and/or the serial descriptor.
fn wait_input(uart_fd: i32) -> anyhow::Result<(bool, bool)> {
    let mut fds = [
        libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: uart_fd,
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    let rv = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
    if rv == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            // a signal asked us to leave
            return Ok((false, false));
        }
        return Err(err).context("poll() failed");
    }

    Ok((
        fds[0].revents & libc::POLLIN != 0,
        fds[1].revents & libc::POLLIN != 0,
    ))
}

fn read_key() -> anyhow::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    let n = unsafe { libc::read(libc::STDIN_FILENO, byte.as_mut_ptr().cast(), 1) };
    if n < 0 {
        return Err(io::Error::last_os_error()).context("could not read command from stdin");
    }
    Ok((n == 1).then_some(byte[0]))
}

fn print_help<W: Write>(w: &mut W, ctx: &SafetyController, monitor: &Monitor) -> io::Result<()> {
    writeln!(w, "== Available commands ==\r")?;
    if !ctx.is_mcs() {
        writeln!(w, "  e -- enable PWM                   E -- disable PWM\r")?;
        writeln!(
            w,
            "  r -- enable PWM with 5%           t -- enable PWM with 10%          z -- enable PWM with 100%\r"
        )?;
        writeln!(
            w,
            "  0 -- set PWM duty cycle to 0%     5 -- set PWM duty cycle to 5%     9 -- set PWM duty cycle to 100%\r"
        )?;
        writeln!(
            w,
            "  - -- decrease PWM value by 1%     + -- increase PWM value by 1%     6 -- set PWM duty cycle to 10%\r"
        )?;
        writeln!(w, "  1 -- toggle contactor 1           2 -- toggle contactor 2\r")?;
    } else {
        writeln!(
            w,
            "  r -- set CCS Ready to Ready       R -- set CCS Ready to Not Ready\r"
        )?;
        writeln!(w, "  e -- set CCS Ready to Emergency Stop\r")?;
    }
    writeln!(w, "  c -- (manually) send a Charge Control frame\r")?;
    writeln!(
        w,
        "  s -- toggle auto sending of Charge Control frames (auto-sending: {})\r",
        if monitor.auto_send { "on" } else { "off" }
    )?;
    writeln!(w, "  q -- quit the program\r")?;
    Ok(())
}

/// Handles one key; returns false when the program should quit.
fn handle_key(
    key: u8,
    link: &mut SerialTransport,
    ctx: &mut SafetyController,
    monitor: &mut Monitor,
) -> anyhow::Result<bool> {
    // shared keys first
    match key {
        b'q' | 0x03 => return Ok(false),
        b'\r' | b'\n' => {
            print!("\r\n");
            return Ok(true);
        }
        b's' => {
            monitor.toggle_auto_send();
            return Ok(true);
        }
        b'c' => {
            monitor
                .send_charge_control(link, ctx)
                .context("error while sending charge control frame")?;
            return Ok(true);
        }
        _ => {}
    }

    if !ctx.is_mcs() {
        match key {
            b'e' => ctx.set_pwm_active(true),
            b'E' => ctx.set_pwm_active(false),
            b'r' => ctx.set_pwm(true, 50),
            b't' => ctx.set_pwm(true, 100),
            b'z' => ctx.set_pwm(true, 1000),
            b'1' => ctx.set_contactor(0, !ctx.charge_control.target_contactor(0)),
            b'2' => ctx.set_contactor(1, !ctx.charge_control.target_contactor(1)),
            b'0' => ctx.set_duty_cycle(0),
            b'5' => ctx.set_duty_cycle(50),
            b'6' => ctx.set_duty_cycle(100),
            b'9' => ctx.set_duty_cycle(1000),
            b'-' => {
                let duty = ctx.target_duty_cycle().saturating_sub(10);
                ctx.set_duty_cycle(duty);
            }
            b'+' => {
                // overflow is clamped by the model
                ctx.set_duty_cycle(ctx.target_duty_cycle() + 10);
            }
            _ => unknown_key(key),
        }
    } else {
        match key {
            b'r' => ctx.set_ccs_ready(true),
            b'R' => ctx.set_ccs_ready(false),
            b'e' => ctx.set_estop(true),
            _ => unknown_key(key),
        }
    }

    Ok(true)
}

fn unknown_key(key: u8) {
    // printable per isprint(3): space through tilde
    if (0x20..=0x7e).contains(&key) {
        error!(
            "Unknown command '{}', use 'h' or '?' to show available commands.",
            key as char
        );
    } else {
        error!("Unknown command '0x{key:02x}', use 'h' or '?' to show available commands.");
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let uart_device = opt.uart.clone().unwrap_or_else(defaults::uart_device);

    // the baudrate of the MCU with running firmware is fixed
    let mut uart = SerialTransport::open(&uart_device, 115_200)
        .with_context(|| format!("opening '{uart_device}' failed"))?;

    if opt.verbose {
        uart.set_tracer(Box::new(HexTracer::new(io::stderr())));
        uart.set_trace(true);
    }

    // unless not desired, reset the safety controller via GPIO; the
    // lines are released immediately afterwards so parallel tools can
    // acquire them
    if !opt.no_reset {
        let gpiochip = opt.gpiochip.clone().unwrap_or_else(defaults::gpiochip);
        let reset_name = opt.reset_gpio.clone().unwrap_or_else(defaults::reset_gpio);
        let md_name = opt.md_gpio.clone().unwrap_or_else(defaults::md_gpio);

        let mut gpio = GpioResetter::new(&gpiochip, &reset_name, &md_name)
            .context("could not acquire GPIOs")?;
        gpio.set_reset_duration(Duration::from_millis(opt.reset_period));
        gpio.reset_to_normal()
            .context("resetting safety controller failed")?;
        drop(gpio);

        std::thread::sleep(Duration::from_millis(STARTUP_DELAY_MS));
    }

    let mut ctx = SafetyController::new();
    let mut monitor = Monitor::new(!opt.no_charge_control);

    if opt.sync {
        let (com, data) = frame::recv_with_sync(&mut uart)
            .context("could not synchronize to the safety controller")?;
        monitor.handle_frame(&mut ctx, com, data);
    }

    // raw mode: otherwise poll only reacts on <Enter>
    let _raw_mode = RawMode::enter()?;
    let mut stdout = io::stdout();

    loop {
        monitor.pump(&mut uart, &mut ctx)?;

        let (stdin_ready, uart_ready) = wait_input(uart.raw_fd())?;
        if !stdin_ready && !uart_ready {
            return Ok(());
        }

        if stdin_ready {
            if let Some(key) = read_key()? {
                if !handle_key(key, &mut uart, &mut ctx, &mut monitor)? {
                    return Ok(());
                }
            }
        }

        if uart_ready {
            match frame::recv(&mut uart) {
                Ok((com, data)) => monitor.handle_frame(&mut ctx, com, data),
                Err(e) => {
                    error!("error while receiving frame from the safety controller: {e}");

                    // show whatever is left in the input queue to ease
                    // debugging, then give up
                    let mut tail = [0u8; 64];
                    let got = match uart.read_exact_timeout(&mut tail, Duration::from_millis(10)) {
                        Ok(()) => tail.len(),
                        Err(mculink::Error::Timeout { got, .. }) => got,
                        Err(_) => 0,
                    };
                    if got > 0 {
                        error!("unprocessed data in input buffer follows ({got} bytes):");
                        for line in hexdump_lines(Direction::Rx, &tail[..got]) {
                            error!("{line}");
                        }
                    }

                    return Err(anyhow!(e));
                }
            }
        }

        // clear screen (pointless in verbose mode, the trace would
        // scroll it away anyway)
        if !opt.verbose {
            write!(stdout, "\x1b[H\x1b[J")?;
        }

        if !opt.no_dump {
            ctx.dump(&mut stdout)?;
            writeln!(stdout, "\r")?;
            print_help(&mut stdout, &ctx, &monitor)?;
        }

        stdout.flush()?;
    }
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
