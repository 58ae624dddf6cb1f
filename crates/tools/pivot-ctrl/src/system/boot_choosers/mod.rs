//! Boot choosers for atomic system updates.
//!
//! A boot chooser knows which slot the firmware booted, which slot it will
//! boot next, and how to switch between slots without ever leaving the
//! device unbootable. Switching is two-phase: a reversible trial of the new
//! slot first, then an explicit persistent commit once the orchestrator has
//! validated it.

use std::fmt::{self, Debug};

use reportify::bail;
use thiserror::Error;
use tracing::info;

use pivot_common::devices::rpi::PropertyError;
use pivot_common::fsx::WriteError;

use self::tryboot::TrybootChooser;
use super::config::{BootChooserConfig, SystemConfig};
use super::slots::{SlotIdx, SystemSlots};
use super::SystemResult;

pub mod tryboot;

/// Kind of a boot chooser operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ChooserErrorKind {
    /// A firmware fact was unreadable or an expected slot could not be
    /// resolved.
    #[error("parse failed")]
    ParseFailed,
    /// An I/O operation on the persistent boot configuration failed.
    #[error("input/output error")]
    Io,
    /// A firmware helper process failed to start or exited with an error.
    #[error("subprocess failed")]
    Subprocess,
}

/// Error produced by a boot chooser operation.
///
/// Keeps the kind of the original failure while collecting one line of
/// context per layer it bubbles through.
#[derive(Debug)]
pub struct ChooserError {
    kind: ChooserErrorKind,
    context: Vec<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ChooserError {
    /// Create a `ParseFailed` error with the given message.
    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ChooserErrorKind::ParseFailed,
            context: vec![message.into()],
            source: None,
        }
    }

    /// Create a `Subprocess` error from a helper invocation failure.
    pub fn subprocess(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            kind: ChooserErrorKind::Subprocess,
            context: Vec::new(),
            source: Some(source.into()),
        }
    }

    /// Kind of the original failure.
    pub fn kind(&self) -> ChooserErrorKind {
        self.kind
    }

    /// Prepend a line of context, keeping the kind.
    pub fn context(mut self, message: impl Into<String>) -> Self {
        self.context.insert(0, message.into());
        self
    }
}

impl fmt::Display for ChooserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for message in &self.context {
            if !first {
                f.write_str(": ")?;
            }
            first = false;
            f.write_str(message)?;
        }
        if let Some(source) = &self.source {
            if !first {
                f.write_str(": ")?;
            }
            write!(f, "{source}")?;
        } else if first {
            write!(f, "{}", self.kind)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChooserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

impl From<PropertyError> for ChooserError {
    fn from(error: PropertyError) -> Self {
        Self {
            kind: ChooserErrorKind::ParseFailed,
            context: Vec::new(),
            source: Some(error.into()),
        }
    }
}

impl From<WriteError> for ChooserError {
    fn from(error: WriteError) -> Self {
        Self {
            kind: ChooserErrorKind::Io,
            context: Vec::new(),
            source: Some(error.into()),
        }
    }
}

pub type ChooserResult<T> = Result<T, ChooserError>;

/// Extension trait for adding context to chooser results.
pub trait ResultContext<T> {
    /// Prepend a line of context to the error, keeping its kind.
    fn context(self, message: impl Into<String>) -> ChooserResult<T>;
}

impl<T> ResultContext<T> for ChooserResult<T> {
    fn context(self, message: impl Into<String>) -> ChooserResult<T> {
        self.map_err(|error| error.context(message))
    }
}

/// Boot status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// Slot is bootable and working as far as the bootloader is concerned.
    Good,
    /// Slot should not be booted.
    Bad,
}

impl SlotStatus {
    pub fn is_good(self) -> bool {
        matches!(self, SlotStatus::Good)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotStatus::Good => "good",
            SlotStatus::Bad => "bad",
        })
    }
}

/// Implementation of a boot chooser backend.
///
/// Operations read the boot facts fresh from the firmware on every call,
/// nothing is cached across calls. None of the operations retries on
/// failure, retry and rollback policy belongs to the caller.
pub trait BootChooser: Debug {
    /// Name of the boot chooser.
    fn name(&self) -> &str;

    /// Bootname of the slot the firmware booted this session.
    fn get_current_bootname(&self) -> ChooserResult<String>;

    /// Slot that will be used on the next normal boot.
    fn get_primary(&self, slots: &SystemSlots) -> ChooserResult<SlotIdx>;

    /// Make `slot` the slot used on the next boot.
    ///
    /// If `slot` is already the primary, this is a no-op. Otherwise the
    /// switch is two-phase: outside of a trial boot, it only arms a
    /// reversible one-shot boot into the alternate slot; during a trial
    /// boot, it persistently commits the trialed slot as the new primary.
    fn set_primary(&self, slots: &SystemSlots, slot: SlotIdx) -> ChooserResult<()>;

    /// Health of `slot` as recorded by the bootloader.
    fn get_state(&self, slots: &SystemSlots, slot: SlotIdx) -> ChooserResult<SlotStatus>;

    /// Record `slot` as good or bad.
    fn set_state(&self, slots: &SystemSlots, slot: SlotIdx, status: SlotStatus)
        -> ChooserResult<()>;
}

/// Create the boot chooser selected by the system configuration.
///
/// Without an explicit selection, the chooser is detected from the boot
/// configuration files present on the system.
pub fn from_config(config: &SystemConfig) -> SystemResult<Box<dyn BootChooser>> {
    let autoboot_path = config.autoboot_path().to_owned();
    if let Some(chooser) = &config.boot_chooser {
        return Ok(match chooser {
            BootChooserConfig::Tryboot => Box::new(TrybootChooser::new(autoboot_path)),
        });
    }
    if autoboot_path.exists() {
        info!("detected tryboot boot chooser");
        Ok(Box::new(TrybootChooser::new(autoboot_path)))
    } else {
        bail!("unable to detect boot chooser");
    }
}
