//! Device instance table
//!
//! A host addresses each virtual floppy by a small instance number. The
//! registry hands those numbers out and owns the targets behind them.

use crate::error::{TargetError, TargetResult};
use crate::image::{FsMedia, MediaProvider};
use crate::target::FloppyTarget;

/// Bounded table of floppy targets indexed by instance number
pub struct DeviceRegistry<P: MediaProvider = FsMedia> {
    slots: Vec<Option<FloppyTarget<P>>>,
}

impl<P: MediaProvider> DeviceRegistry<P> {
    pub fn new(max_instances: u8) -> Self {
        DeviceRegistry {
            slots: (0..max_instances).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `target` in the lowest free slot and return its instance number
    pub fn register(&mut self, target: FloppyTarget<P>) -> TargetResult<u8> {
        let Some(instance) = self.slots.iter().position(Option::is_none) else {
            return Err(TargetError::Config(format!(
                "all {} device instances are in use",
                self.slots.len()
            )));
        };

        log::info!("Registered {} as instance {}", target.name(), instance);
        self.slots[instance] = Some(target);
        Ok(instance as u8)
    }

    pub fn get(&self, instance: u8) -> Option<&FloppyTarget<P>> {
        self.slots.get(instance as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, instance: u8) -> Option<&mut FloppyTarget<P>> {
        self.slots.get_mut(instance as usize)?.as_mut()
    }

    /// Remove a target, closing its image, and free the instance number
    pub fn release(&mut self, instance: u8) -> Option<FloppyTarget<P>> {
        let mut target = self.slots.get_mut(instance as usize)?.take()?;
        // closing cannot fail
        let _ = target.close_floppy_image();
        log::info!("Released instance {} ({})", instance, target.name());
        Some(target)
    }

    /// Iterate over registered targets with their instance numbers
    pub fn iter(&self) -> impl Iterator<Item = (u8, &FloppyTarget<P>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|target| (i as u8, target)))
    }
}
