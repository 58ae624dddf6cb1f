//! Well-known paths.

/// Default path of the `autoboot.txt` boot configuration.
pub const DEFAULT_AUTOBOOT_PATH: &str = "/boot/firmware/autoboot.txt";
