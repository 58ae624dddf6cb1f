//! Raspberry Pi-specific functionality.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use xscript::{run, Run};

/// Directory with the boot properties exposed by the firmware.
pub const BOOTLOADER_PROPERTIES_DIR: &str = "/sys/firmware/devicetree/base/chosen/bootloader";

/// Helper binary for issuing firmware mailbox property requests.
const VCMAILBOX: &str = "vcmailbox";

/// Mailbox tag for setting the firmware's reboot flags.
///
/// The tag Set Reboot Flags is undocumented, however, it is used by the
/// Raspberry Pi Linux firmware driver:
/// <https://github.com/raspberrypi/linux/commit/777a6a08bcf8f5f0a0086358dc66d>
const SET_REBOOT_FLAGS_TAG: &str = "0x00038064";

/// Error reading a firmware boot property.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("unable to open file {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to read integer from file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error running the firmware mailbox helper.
#[derive(Debug, Error)]
#[error("unable to run `vcmailbox`")]
pub struct MailboxError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

/// Read a boot property exposed by the firmware under `dir`.
///
/// Properties are device-tree cells, exactly four big-endian bytes. Shorter
/// files are an error, there is no partial-value tolerance.
pub fn read_bootloader_property(dir: &Path, property: &str) -> Result<u32, PropertyError> {
    let path = dir.join(property);
    let mut file = File::open(&path).map_err(|source| PropertyError::Open {
        path: path.clone(),
        source,
    })?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)
        .map_err(|source| PropertyError::Read { path, source })?;
    Ok(u32::from_be_bytes(buf))
}

/// Set or clear the firmware's tryboot reboot flag via `vcmailbox`.
///
/// This is a one-shot request, the firmware honors it for exactly the next
/// boot attempt and then resets the flag on its own. The call blocks until
/// the helper exits.
pub fn set_reboot_flag(enable: bool) -> Result<(), MailboxError> {
    run!([
        VCMAILBOX,
        SET_REBOOT_FLAGS_TAG,
        "4",
        "0",
        if enable { "1" } else { "0" }
    ])
    .map_err(|error| MailboxError {
        source: error.into(),
    })?;
    Ok(())
}
