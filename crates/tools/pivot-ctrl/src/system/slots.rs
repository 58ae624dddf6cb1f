use std::ops::Index;
use std::path::PathBuf;

use indexmap::IndexMap;
use reportify::bail;

use super::config::SlotConfig;
use super::SystemResult;

/// Unique index of a slot of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIdx {
    /// Index into the slot vector.
    idx: usize,
}

/// Slots of a system.
#[derive(Debug)]
pub struct SystemSlots {
    /// Slots of the system.
    slots: Vec<Slot>,
}

impl SystemSlots {
    pub fn from_config(config: Option<&IndexMap<String, SlotConfig>>) -> SystemResult<Self> {
        let Some(config) = config else {
            bail!("no slots have been configured");
        };
        let mut slots: Vec<Slot> = Vec::new();
        for (name, config) in config.iter() {
            if let Some(bootname) = &config.bootname {
                if bootname.is_empty() {
                    bail!("empty bootname for slot {name:?}");
                }
                if slots
                    .iter()
                    .any(|slot| slot.bootname() == Some(bootname.as_str()))
                {
                    bail!("duplicate bootname {bootname:?} for slot {name:?}");
                }
            }
            slots.push(Slot {
                name: name.to_owned(),
                bootname: config.bootname.clone(),
                device: config.device.clone(),
            });
        }
        Ok(Self { slots })
    }

    /// Find a slot by its name.
    pub fn find_by_name(&self, name: &str) -> Option<(SlotIdx, &Slot)> {
        // There are only a few slots, so we can get away with linear search.
        self.iter().find(|(_, slot)| slot.name == name)
    }

    /// Find a slot by the name the bootloader knows it under.
    pub fn find_by_bootname(&self, bootname: &str) -> Option<(SlotIdx, &Slot)> {
        self.iter()
            .find(|(_, slot)| slot.bootname.as_deref() == Some(bootname))
    }

    /// Iterator over the slots.
    pub fn iter(&self) -> impl Iterator<Item = (SlotIdx, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (SlotIdx { idx }, slot))
    }
}

impl Index<SlotIdx> for SystemSlots {
    type Output = Slot;

    fn index(&self, index: SlotIdx) -> &Self::Output {
        &self.slots[index.idx]
    }
}

/// A slot of a system.
///
/// Slots are owned by [`SystemSlots`] and referred to by [`SlotIdx`], two
/// indices are equal exactly if they refer to the same slot.
#[derive(Debug)]
pub struct Slot {
    name: String,
    bootname: Option<String>,
    device: Option<PathBuf>,
}

impl Slot {
    /// Name of the slot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name under which the bootloader knows the slot, if it is bootable.
    pub fn bootname(&self) -> Option<&str> {
        self.bootname.as_deref()
    }

    /// Block device holding the slot.
    pub fn device(&self) -> Option<&PathBuf> {
        self.device.as_ref()
    }
}
