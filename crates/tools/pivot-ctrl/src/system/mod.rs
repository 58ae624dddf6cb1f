//! System model threaded through every boot chooser operation.

use reportify::Report;

use boot_choosers::BootChooser;
use config::{load_system_config, SystemConfig};
use slots::SystemSlots;

pub mod boot_choosers;
pub mod config;
pub mod paths;
pub mod slots;

reportify::new_whatever_type! {
    SystemError
}

pub type SystemResult<T> = Result<T, Report<SystemError>>;

/// A system with its slot registry and the active boot chooser.
pub struct System {
    config: SystemConfig,
    slots: SystemSlots,
    boot_chooser: Box<dyn BootChooser>,
}

impl System {
    /// Initialize the system from the on-disk configuration.
    pub fn initialize() -> SystemResult<Self> {
        let config = load_system_config()?;
        let slots = SystemSlots::from_config(config.slots.as_ref())?;
        let boot_chooser = boot_choosers::from_config(&config)?;
        Ok(Self {
            config,
            slots,
            boot_chooser,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn slots(&self) -> &SystemSlots {
        &self.slots
    }

    pub fn boot_chooser(&self) -> &dyn BootChooser {
        &*self.boot_chooser
    }
}
