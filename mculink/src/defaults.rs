//! Compiled-in device defaults and their environment overrides.
//!
//! Resolution order everywhere: compiled-in default, overridden by the
//! environment variable, overridden by the command line.

use std::env;

/// The default UART device the safety MCU is wired to.
pub const UART_DEVICE: &str = "/dev/ttyLP2";

/// The default gpiochip device carrying the reset and mode lines.
pub const GPIOCHIP: &str = "/dev/gpiochip2";

/// The default GPIO line name of the MCU reset pin.
pub const RESET_GPIO: &str = "nSAFETY_RESET_INT";

/// The default GPIO line name toggling the MCU boot mode.
pub const MD_GPIO: &str = "SAFETY_BOOTMODE_SET";

/// Default reset pulse duration, in ms.
pub const RESET_DURATION_MS: u64 = 500;

pub const GETENV_UART_KEY: &str = "SAFETY_MCU_UART";
pub const GETENV_GPIOCHIP_KEY: &str = "SAFETY_MCU_GPIOCHIP";
pub const GETENV_RESET_PIN_KEY: &str = "SAFETY_MCU_RESET_GPIO";
pub const GETENV_MD_PIN_KEY: &str = "SAFETY_MCU_MD_GPIO";

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

pub fn uart_device() -> String {
    env_or(GETENV_UART_KEY, UART_DEVICE)
}

pub fn gpiochip() -> String {
    env_or(GETENV_GPIOCHIP_KEY, GPIOCHIP)
}

pub fn reset_gpio() -> String {
    env_or(GETENV_RESET_PIN_KEY, RESET_GPIO)
}

pub fn md_gpio() -> String {
    env_or(GETENV_MD_PIN_KEY, MD_GPIO)
}
