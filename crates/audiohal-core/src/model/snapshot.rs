//! Point-in-time device lists

use super::device::Device;

/// Ordered, immutable list of devices produced by one enumeration
///
/// Devices inside a snapshot are never mutated; only their shared activity
/// cells change while sessions run. A snapshot can be dropped while
/// sessions are active: each session keeps its own copy of the device.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    devices: Vec<Device>,
    generation: u64,
}

impl DeviceSnapshot {
    pub(crate) fn new(devices: Vec<Device>, generation: u64) -> Self {
        Self {
            devices,
            generation,
        }
    }

    /// Device at `index`, `None` past the end (also on an empty snapshot)
    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }

    /// Sequence number of the enumeration that produced this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_name == name)
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_uid == uid)
    }
}

impl<'a> IntoIterator for &'a DeviceSnapshot {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Release a snapshot; `None` is a no-op
pub fn free(snapshot: Option<DeviceSnapshot>) {
    if let Some(snapshot) = snapshot {
        log::trace!(
            "Freeing snapshot #{} ({} devices)",
            snapshot.generation,
            snapshot.len()
        );
        drop(snapshot);
    }
}
