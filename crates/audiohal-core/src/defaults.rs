//! Default device selection and direction-support queries
//!
//! Both entry points accept anything convertible into a `Direction`, so raw
//! direction codes coming from a binding are checked here: any code other
//! than Output (0) or Input (1) is rejected with `false`.

use std::sync::{Mutex, PoisonError};

use crate::model::{Device, Direction};

/// True iff `device` has a stream in `direction`
///
/// `None` and unknown direction codes give `false`, so this is safe to call
/// speculatively.
pub fn supports_direction<D>(device: Option<&Device>, direction: D) -> bool
where
    D: TryInto<Direction>,
{
    let Some(device) = device else {
        log::trace!("supports_direction: no device");
        return false;
    };
    let Ok(direction) = direction.try_into() else {
        log::trace!("supports_direction: unknown direction code for '{}'", device.device_name);
        return false;
    };
    let supported = device.supports_direction(direction);
    log::trace!(
        "supports_direction: '{}' {} -> {}",
        device.device_name,
        direction,
        supported
    );
    supported
}

/// Per-direction default device
#[derive(Debug, Default)]
pub struct DefaultDeviceManager {
    defaults: Mutex<[Option<Device>; 2]>,
}

impl DefaultDeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `device` the default for `direction`
    ///
    /// Returns `false` for a missing device, an unknown direction code, or a
    /// device with no stream in that direction.
    pub fn set_default<D>(&self, device: Option<&Device>, direction: D) -> bool
    where
        D: TryInto<Direction>,
    {
        let Some(device) = device else {
            log::error!("set_default: no device given");
            return false;
        };
        let Ok(direction) = direction.try_into() else {
            log::error!("set_default: unknown direction code for '{}'", device.device_name);
            return false;
        };
        if !device.supports_direction(direction) {
            log::error!(
                "set_default: '{}' has no {} stream",
                device.device_name,
                direction
            );
            return false;
        }

        let mut defaults = self.defaults.lock().unwrap_or_else(PoisonError::into_inner);
        defaults[direction.code() as usize] = Some(device.clone());
        log::info!("Default {} device: {}", direction, device.device_name);
        true
    }

    /// Device pinned for `direction`, if any
    pub fn default_device(&self, direction: Direction) -> Option<Device> {
        self.defaults.lock().unwrap_or_else(PoisonError::into_inner)[direction.code() as usize].clone()
    }

    /// Forget the default for `direction`
    pub fn clear(&self, direction: Direction) {
        self.defaults.lock().unwrap_or_else(PoisonError::into_inner)[direction.code() as usize] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioBackend, MemoryBackend, MemoryDevice};
    use crate::model::DeviceSnapshot;
    use crate::registry::DeviceRegistry;
    use std::sync::Arc;

    fn snapshot() -> DeviceSnapshot {
        let backend: Arc<dyn AudioBackend> = Arc::new(
            MemoryBackend::new("Memory")
                .with_device(MemoryDevice::duplex("Loopback"))
                .with_device(MemoryDevice::input_only("Mic"))
                .with_device(MemoryDevice::output_only("Speakers")),
        );
        DeviceRegistry::new(vec![backend]).enumerate()
    }

    #[test]
    fn test_supports_direction() {
        let snapshot = snapshot();
        let mic = snapshot.find_by_name("Mic");
        let speakers = snapshot.find_by_name("Speakers");

        assert!(supports_direction(mic, Direction::Input));
        assert!(!supports_direction(mic, Direction::Output));
        assert!(supports_direction(speakers, 0u32));
        assert!(!supports_direction(speakers, 1u32));
        assert!(!supports_direction(None, Direction::Input));
        assert!(!supports_direction(mic, 2));
        assert!(!supports_direction(mic, 20));
        assert!(!supports_direction(mic, -1));
    }

    #[test]
    fn test_supports_direction_agrees_with_streams() {
        let snapshot = snapshot();
        for device in &snapshot {
            for direction in Direction::ALL {
                let expected = device.device_streams.iter().any(|s| s.direction == direction);
                assert_eq!(supports_direction(Some(device), direction), expected);
            }
        }
    }

    #[test]
    fn test_set_default() {
        let snapshot = snapshot();
        let manager = DefaultDeviceManager::new();
        let loopback = snapshot.find_by_name("Loopback");
        let mic = snapshot.find_by_name("Mic");

        assert!(!manager.set_default(None, Direction::Input));
        assert!(!manager.set_default(loopback, 2));
        assert!(!manager.set_default(loopback, 20));
        assert!(!manager.set_default(mic, Direction::Output));
        assert!(manager.default_device(Direction::Output).is_none());

        assert!(manager.set_default(mic, 1));
        assert!(manager.set_default(loopback, Direction::Output));
        assert_eq!(manager.default_device(Direction::Input).unwrap().device_name, "Mic");
        assert_eq!(manager.default_device(Direction::Output).unwrap().device_name, "Loopback");

        manager.clear(Direction::Input);
        assert!(manager.default_device(Direction::Input).is_none());
    }
}
