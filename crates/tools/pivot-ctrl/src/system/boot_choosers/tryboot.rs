//! Boot chooser for the tryboot scheme of Raspberry Pi-family firmware.
//!
//! The firmware exposes which partition it booted and whether this session
//! came up through the one-shot tryboot path. Switching the primary slot is
//! two-phase: first a reversible trial, armed via the firmware's reboot
//! flag and booting the partition named in the `[tryboot]` section of
//! `autoboot.txt`; then, from within the trial boot, a persistent commit
//! that atomically rewrites `autoboot.txt` with the roles of the two slots
//! swapped. A crash or power loss at any point leaves either the old or the
//! new configuration in place, both of which boot.

use std::fmt::Debug;
use std::path::PathBuf;

use pivot_common::boot::tryboot::render_autoboot;
use pivot_common::devices::rpi;
use pivot_common::fsx;

use super::super::slots::{Slot, SlotIdx, SystemSlots};
use super::{BootChooser, ChooserError, ChooserResult, ResultContext, SlotStatus};

/// Firmware interface used by the tryboot chooser.
pub trait Firmware: Debug {
    /// Partition the firmware booted from this session.
    fn get_partition(&self) -> ChooserResult<u32>;

    /// Whether this session came up through the tryboot path.
    fn get_tryboot(&self) -> ChooserResult<bool>;

    /// Arm or disarm the one-shot tryboot flag for the next boot.
    fn set_tryboot_flag(&self, enable: bool) -> ChooserResult<()>;
}

/// Firmware access via the device tree and the `vcmailbox` helper.
#[derive(Debug)]
pub struct VideoCoreFirmware {
    properties_dir: PathBuf,
}

impl VideoCoreFirmware {
    pub fn new() -> Self {
        Self {
            properties_dir: rpi::BOOTLOADER_PROPERTIES_DIR.into(),
        }
    }
}

impl Firmware for VideoCoreFirmware {
    fn get_partition(&self) -> ChooserResult<u32> {
        Ok(rpi::read_bootloader_property(
            &self.properties_dir,
            "partition",
        )?)
    }

    fn get_tryboot(&self) -> ChooserResult<bool> {
        Ok(rpi::read_bootloader_property(&self.properties_dir, "tryboot")? != 0)
    }

    fn set_tryboot_flag(&self, enable: bool) -> ChooserResult<()> {
        rpi::set_reboot_flag(enable).map_err(ChooserError::subprocess)
    }
}

/// Boot chooser using the firmware's tryboot mechanism.
#[derive(Debug)]
pub struct TrybootChooser<F = VideoCoreFirmware> {
    firmware: F,
    autoboot_path: PathBuf,
}

impl TrybootChooser {
    pub fn new(autoboot_path: PathBuf) -> Self {
        Self::with_firmware(VideoCoreFirmware::new(), autoboot_path)
    }
}

impl<F: Firmware> TrybootChooser<F> {
    pub fn with_firmware(firmware: F, autoboot_path: PathBuf) -> Self {
        Self {
            firmware,
            autoboot_path,
        }
    }

    /// Resolve a firmware partition number against the slot registry.
    fn find_by_boot_partition(slots: &SystemSlots, partition: u32) -> Option<(SlotIdx, &Slot)> {
        slots.find_by_bootname(&partition.to_string())
    }

    fn bootname_of<'s>(slots: &'s SystemSlots, slot: SlotIdx) -> ChooserResult<&'s str> {
        slots[slot].bootname().ok_or_else(|| {
            ChooserError::parse_failed(format!("slot {:?} has no bootname", slots[slot].name()))
        })
    }

    /// Arm the one-shot reboot flag so that the firmware runs tryboot at the
    /// next reboot.
    ///
    /// The firmware will boot the partition named in the `[tryboot]` section
    /// of `autoboot.txt`. The persistent configuration is left untouched, so
    /// a failed boot falls back to the current primary.
    fn set_other_temporary(&self) -> ChooserResult<()> {
        self.firmware
            .set_tryboot_flag(true)
            .context("failed to set reboot flag")
    }

    /// Rewrite `autoboot.txt` with `other` as the boot partition in the
    /// `[all]` section and `primary` as the boot partition in the
    /// `[tryboot]` section.
    fn set_other_persistent(
        &self,
        slots: &SystemSlots,
        primary: SlotIdx,
        other: SlotIdx,
    ) -> ChooserResult<()> {
        let content = render_autoboot(
            Self::bootname_of(slots, other)?,
            Self::bootname_of(slots, primary)?,
        );
        fsx::write_atomic(&self.autoboot_path, &content)?;
        Ok(())
    }
}

impl<F: Firmware> BootChooser for TrybootChooser<F> {
    fn name(&self) -> &str {
        "tryboot"
    }

    fn get_current_bootname(&self) -> ChooserResult<String> {
        let partition = self
            .firmware
            .get_partition()
            .context("failed to get bootloader partition property")?;
        Ok(partition.to_string())
    }

    fn get_primary(&self, slots: &SystemSlots) -> ChooserResult<SlotIdx> {
        let partition = self
            .firmware
            .get_partition()
            .context("failed to get bootloader partition property")?;
        let tryboot = self
            .firmware
            .get_tryboot()
            .context("failed to get bootloader tryboot property")?;
        let Some((booted, _)) = Self::find_by_boot_partition(slots, partition) else {
            return Err(ChooserError::parse_failed(format!(
                "no slot found with partition {partition}"
            )));
        };
        if !tryboot {
            return Ok(booted);
        }
        // During a trial boot the persistent configuration still names the
        // previous primary. This assumes exactly two bootable slots; with
        // more, the first match wins.
        for (idx, slot) in slots.iter() {
            if idx == booted {
                continue;
            }
            if slot.bootname().is_none() {
                continue;
            }
            return Ok(idx);
        }
        Err(ChooserError::parse_failed("no slot found"))
    }

    fn set_primary(&self, slots: &SystemSlots, slot: SlotIdx) -> ChooserResult<()> {
        let primary = self.get_primary(slots).context("failed to get primary")?;
        if slot == primary {
            return Ok(());
        }
        let tryboot = self
            .firmware
            .get_tryboot()
            .context("failed to get bootloader tryboot property")?;
        if !tryboot {
            return self
                .set_other_temporary()
                .context("failed to set other temporary");
        }
        self.set_other_persistent(slots, primary, slot)
            .context("failed to set other persistent")
    }

    fn get_state(&self, slots: &SystemSlots, slot: SlotIdx) -> ChooserResult<SlotStatus> {
        let partition = self
            .firmware
            .get_partition()
            .context("failed to get bootloader partition property")?;
        let tryboot = self
            .firmware
            .get_tryboot()
            .context("failed to get bootloader tryboot property")?;
        let Some((booted, _)) = Self::find_by_boot_partition(slots, partition) else {
            return Err(ChooserError::parse_failed(format!(
                "no slot found with partition {partition}"
            )));
        };
        // While a trial is outstanding, the health of the non-booted slot is
        // undecided, not negative.
        Ok(if booted == slot || tryboot {
            SlotStatus::Good
        } else {
            SlotStatus::Bad
        })
    }

    fn set_state(
        &self,
        slots: &SystemSlots,
        slot: SlotIdx,
        status: SlotStatus,
    ) -> ChooserResult<()> {
        let primary = self.get_primary(slots).context("failed to get primary")?;
        let good = status.is_good();
        if (slot != primary && good) || (slot == primary && !good) {
            // In the demotion case `slot == primary`, so both sections end
            // up naming the same partition. Kept exactly like this until the
            // intended demotion behavior is clarified.
            self.set_other_persistent(slots, primary, slot)
                .context("failed to set other persistent")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::path::Path;

    use indexmap::IndexMap;

    use pivot_common::boot::tryboot::parse_autoboot;

    use super::super::super::config::SlotConfig;
    use super::super::ChooserErrorKind;
    use super::*;

    /// In-memory firmware double.
    ///
    /// Setting the reboot flag is only recorded; like on real hardware, the
    /// `tryboot` property flips on the next (simulated) reboot, not when the
    /// flag is armed.
    #[derive(Debug)]
    struct FakeFirmware {
        partition: Cell<u32>,
        tryboot: Cell<bool>,
        armed: RefCell<Vec<bool>>,
    }

    impl FakeFirmware {
        fn new(partition: u32, tryboot: bool) -> Self {
            Self {
                partition: Cell::new(partition),
                tryboot: Cell::new(tryboot),
                armed: RefCell::new(Vec::new()),
            }
        }
    }

    impl Firmware for FakeFirmware {
        fn get_partition(&self) -> ChooserResult<u32> {
            Ok(self.partition.get())
        }

        fn get_tryboot(&self) -> ChooserResult<bool> {
            Ok(self.tryboot.get())
        }

        fn set_tryboot_flag(&self, enable: bool) -> ChooserResult<()> {
            self.armed.borrow_mut().push(enable);
            Ok(())
        }
    }

    fn test_slots() -> SystemSlots {
        let mut config = IndexMap::new();
        for (name, bootname) in [("system-a", "2"), ("system-b", "3")] {
            config.insert(
                name.to_owned(),
                SlotConfig {
                    device: None,
                    bootname: Some(bootname.to_owned()),
                },
            );
        }
        SystemSlots::from_config(Some(&config)).unwrap()
    }

    fn slot(slots: &SystemSlots, name: &str) -> SlotIdx {
        slots.find_by_name(name).unwrap().0
    }

    fn chooser(
        dir: &Path,
        partition: u32,
        tryboot: bool,
    ) -> TrybootChooser<FakeFirmware> {
        let autoboot_path = dir.join("autoboot.txt");
        fs::write(&autoboot_path, render_autoboot("2", "3")).unwrap();
        TrybootChooser::with_firmware(FakeFirmware::new(partition, tryboot), autoboot_path)
    }

    #[test]
    fn test_current_bootname() {
        let tempdir = tempfile::tempdir().unwrap();
        let chooser = chooser(tempdir.path(), 2, false);
        assert_eq!(chooser.get_current_bootname().unwrap(), "2");
    }

    #[test]
    fn test_primary_normal_boot() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        assert_eq!(chooser.get_primary(&slots).unwrap(), slot(&slots, "system-a"));
    }

    #[test]
    fn test_primary_trial_boot_is_the_other_slot() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 3, true);
        assert_eq!(chooser.get_primary(&slots).unwrap(), slot(&slots, "system-a"));
    }

    #[test]
    fn test_set_primary_is_idempotent() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        let before = fs::read_to_string(&chooser.autoboot_path).unwrap();
        chooser.set_primary(&slots, slot(&slots, "system-a")).unwrap();
        // Neither the firmware flag nor the persistent configuration moved.
        assert!(chooser.firmware.armed.borrow().is_empty());
        assert_eq!(fs::read_to_string(&chooser.autoboot_path).unwrap(), before);
    }

    #[test]
    fn test_set_primary_normal_arms_reversible_boot() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        let before = fs::read_to_string(&chooser.autoboot_path).unwrap();
        chooser.set_primary(&slots, slot(&slots, "system-b")).unwrap();
        assert_eq!(*chooser.firmware.armed.borrow(), [true]);
        assert_eq!(fs::read_to_string(&chooser.autoboot_path).unwrap(), before);
    }

    #[test]
    fn test_set_primary_trial_commits_persistently() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        // Trial boot of system-b; primary is still system-a.
        let chooser = chooser(tempdir.path(), 3, true);
        chooser.set_primary(&slots, slot(&slots, "system-b")).unwrap();
        assert!(chooser.firmware.armed.borrow().is_empty());
        let autoboot =
            parse_autoboot(&fs::read_to_string(&chooser.autoboot_path).unwrap()).unwrap();
        assert_eq!(autoboot.all, 3);
        assert_eq!(autoboot.tryboot, Some(2));
    }

    #[test]
    fn test_get_state_normal_is_strict() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        assert_eq!(
            chooser.get_state(&slots, slot(&slots, "system-a")).unwrap(),
            SlotStatus::Good
        );
        assert_eq!(
            chooser.get_state(&slots, slot(&slots, "system-b")).unwrap(),
            SlotStatus::Bad
        );
    }

    #[test]
    fn test_get_state_trial_is_optimistic() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, true);
        for name in ["system-a", "system-b"] {
            assert_eq!(
                chooser.get_state(&slots, slot(&slots, name)).unwrap(),
                SlotStatus::Good
            );
        }
    }

    #[test]
    fn test_set_state_promotes_non_primary() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        chooser
            .set_state(&slots, slot(&slots, "system-b"), SlotStatus::Good)
            .unwrap();
        let autoboot =
            parse_autoboot(&fs::read_to_string(&chooser.autoboot_path).unwrap()).unwrap();
        assert_eq!(autoboot.all, 3);
        assert_eq!(autoboot.tryboot, Some(2));
    }

    #[test]
    fn test_set_state_demotes_primary_self_referentially() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        chooser
            .set_state(&slots, slot(&slots, "system-a"), SlotStatus::Bad)
            .unwrap();
        let autoboot =
            parse_autoboot(&fs::read_to_string(&chooser.autoboot_path).unwrap()).unwrap();
        assert_eq!(autoboot.all, 2);
        assert_eq!(autoboot.tryboot, Some(2));
    }

    #[test]
    fn test_set_state_no_op_combinations() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 2, false);
        let before = fs::read_to_string(&chooser.autoboot_path).unwrap();
        chooser
            .set_state(&slots, slot(&slots, "system-a"), SlotStatus::Good)
            .unwrap();
        chooser
            .set_state(&slots, slot(&slots, "system-b"), SlotStatus::Bad)
            .unwrap();
        assert_eq!(fs::read_to_string(&chooser.autoboot_path).unwrap(), before);
    }

    #[test]
    fn test_unresolvable_partition_fails_without_mutation() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let chooser = chooser(tempdir.path(), 9, false);
        let before = fs::read_to_string(&chooser.autoboot_path).unwrap();
        let target = slot(&slots, "system-b");
        let error = chooser.get_primary(&slots).unwrap_err();
        assert_eq!(error.kind(), ChooserErrorKind::ParseFailed);
        assert!(error.to_string().contains("no slot found with partition 9"));
        let error = chooser.get_state(&slots, target).unwrap_err();
        assert_eq!(error.kind(), ChooserErrorKind::ParseFailed);
        let error = chooser
            .set_state(&slots, target, SlotStatus::Good)
            .unwrap_err();
        assert_eq!(error.kind(), ChooserErrorKind::ParseFailed);
        assert!(error
            .to_string()
            .starts_with("failed to get primary"));
        assert!(chooser.firmware.armed.borrow().is_empty());
        assert_eq!(fs::read_to_string(&chooser.autoboot_path).unwrap(), before);
    }

    #[test]
    fn test_property_error_keeps_kind_and_context() {
        let tempdir = tempfile::tempdir().unwrap();
        // No property files, so every read fails with `ParseFailed`.
        let firmware = VideoCoreFirmware {
            properties_dir: tempdir.path().join("bootloader"),
        };
        let chooser =
            TrybootChooser::with_firmware(firmware, tempdir.path().join("autoboot.txt"));
        let error = chooser.get_current_bootname().unwrap_err();
        assert_eq!(error.kind(), ChooserErrorKind::ParseFailed);
        assert!(error
            .to_string()
            .starts_with("failed to get bootloader partition property"));
    }

    #[test]
    fn test_update_scenario_end_to_end() {
        let tempdir = tempfile::tempdir().unwrap();
        let slots = test_slots();
        let system_a = slot(&slots, "system-a");
        let system_b = slot(&slots, "system-b");
        // Normal boot of system-a.
        let chooser = chooser(tempdir.path(), 2, false);
        assert_eq!(chooser.get_primary(&slots).unwrap(), system_a);
        // Switch to system-b: arms the reversible boot, no file write.
        chooser.set_primary(&slots, system_b).unwrap();
        assert_eq!(*chooser.firmware.armed.borrow(), [true]);
        let autoboot =
            parse_autoboot(&fs::read_to_string(&chooser.autoboot_path).unwrap()).unwrap();
        assert_eq!(autoboot.all, 2);
        // Reboot: firmware runs the tryboot path into system-b.
        chooser.firmware.partition.set(3);
        chooser.firmware.tryboot.set(true);
        assert_eq!(chooser.get_primary(&slots).unwrap(), system_a);
        assert_eq!(
            chooser.get_state(&slots, system_b).unwrap(),
            SlotStatus::Good
        );
        // The orchestrator validated system-b, commit it as the new primary.
        chooser
            .set_state(&slots, system_b, SlotStatus::Good)
            .unwrap();
        let autoboot =
            parse_autoboot(&fs::read_to_string(&chooser.autoboot_path).unwrap()).unwrap();
        assert_eq!(autoboot.all, 3);
        assert_eq!(autoboot.tryboot, Some(2));
    }
}
