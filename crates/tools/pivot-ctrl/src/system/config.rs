//! System configuration.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use reportify::ResultExt;
use serde::{Deserialize, Serialize};

use super::paths::DEFAULT_AUTOBOOT_PATH;
use super::SystemResult;

/// Path of the system configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/pivot/system.toml";

/// Load the system configuration.
pub fn load_system_config() -> SystemResult<SystemConfig> {
    Ok(if Path::new(SYSTEM_CONFIG_PATH).exists() {
        toml::from_str(
            &fs::read_to_string(SYSTEM_CONFIG_PATH)
                .whatever("unable to read system configuration file")?,
        )
        .whatever("unable to parse system configuration file")?
    } else {
        SystemConfig::default()
    })
}

/// System configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemConfig {
    /// Boot chooser backend to use.
    pub boot_chooser: Option<BootChooserConfig>,
    /// Path of the `autoboot.txt` boot configuration.
    pub autoboot_path: Option<PathBuf>,
    /// Slots of the system.
    pub slots: Option<IndexMap<String, SlotConfig>>,
}

impl SystemConfig {
    /// Effective path of the `autoboot.txt` boot configuration.
    pub fn autoboot_path(&self) -> &Path {
        self.autoboot_path
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_AUTOBOOT_PATH))
    }
}

/// Configured boot chooser backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BootChooserConfig {
    Tryboot,
}

/// Configuration of a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SlotConfig {
    /// Block device holding the slot.
    pub device: Option<PathBuf>,
    /// Name under which the bootloader knows the slot's boot partition.
    pub bootname: Option<String>,
}
