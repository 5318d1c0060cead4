//! Device registry
//!
//! Queries every backend and merges the results into one `DeviceSnapshot`.
//! Handles are assigned from a single counter per snapshot, so device and
//! stream handles never collide within it.
//!
//! A backend that cannot be queried contributes no devices; the failure is
//! logged and enumeration carries on with the next backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::backend::{AudioBackend, RawDevice, RawStream};
use crate::model::{Device, DeviceActivity, DeviceSnapshot, DeviceStream, Handle};

/// Builds snapshots from a fixed set of backends
pub struct DeviceRegistry {
    backends: Vec<Arc<dyn AudioBackend>>,
    /// Activity cell of every device some snapshot or session still holds
    activity: Mutex<HashMap<String, Weak<DeviceActivity>>>,
    generation: AtomicU64,
}

impl DeviceRegistry {
    pub fn new(backends: Vec<Arc<dyn AudioBackend>>) -> Self {
        Self {
            backends,
            activity: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn backends(&self) -> &[Arc<dyn AudioBackend>] {
        &self.backends
    }

    /// Take a snapshot of every device on every backend
    pub fn enumerate(&self) -> DeviceSnapshot {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.retain(|_, cell| cell.strong_count() > 0);

        let mut next_handle: Handle = 1;
        let mut devices: Vec<Device> = Vec::new();

        for backend in &self.backends {
            let raw_devices = match backend.enumerate() {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("Backend {} contributed no devices: {}", backend.name(), e);
                    continue;
                }
            };

            for raw in raw_devices {
                let uid = format!("{}:{}", backend.name(), raw.native_id);
                if devices.iter().any(|d| d.device_uid == uid) {
                    log::warn!("Skipping duplicate device {}", uid);
                    continue;
                }
                let existing = activity.get(&uid).and_then(Weak::upgrade);
                let cell = match existing {
                    Some(cell) => cell,
                    None => {
                        let cell = Arc::new(DeviceActivity::default());
                        activity.insert(uid.clone(), Arc::downgrade(&cell));
                        cell
                    }
                };
                devices.push(build_device(backend.name(), uid, raw, cell, &mut next_handle));
            }
        }

        log::info!(
            "Enumerated {} audio devices from {} backends (snapshot #{})",
            devices.len(),
            self.backends.len(),
            generation
        );
        DeviceSnapshot::new(devices, generation)
    }

    /// Release a snapshot; `None` is a no-op
    pub fn free(&self, snapshot: Option<DeviceSnapshot>) {
        crate::model::free(snapshot);
    }
}

fn next(handle: &mut Handle) -> Handle {
    let current = *handle;
    *handle += 1;
    current
}

fn build_device(
    host: &str,
    uid: String,
    raw: RawDevice,
    activity: Arc<DeviceActivity>,
    next_handle: &mut Handle,
) -> Device {
    let handle = next(next_handle);
    let device_streams = raw
        .streams
        .into_iter()
        .filter_map(|stream| build_stream(&raw.name, stream, next_handle))
        .collect();

    Device {
        handle,
        device_name: raw.name,
        model: raw.model,
        manufacturer: raw.manufacturer,
        serial_number: raw.serial_number,
        version: raw.version,
        device_uid: uid,
        model_uid: raw.model_uid,
        preferred_sample_rate: raw.preferred_sample_rate,
        preferred_number_of_channels: raw.preferred_channels,
        is_alive: raw.is_alive,
        supported_sample_rates: raw.sample_rates,
        device_streams,
        host: host.to_string(),
        native_id: raw.native_id,
        activity,
    }
}

/// Keep valid formats only; a stream left without any is dropped
fn build_stream(device_name: &str, raw: RawStream, next_handle: &mut Handle) -> Option<DeviceStream> {
    let total = raw.formats.len();
    let formats: Vec<_> = raw
        .formats
        .into_iter()
        .filter(|format| match format.validate() {
            Ok(()) => true,
            Err(e) => {
                log::debug!("'{}': dropping {} format: {}", device_name, raw.direction, e);
                false
            }
        })
        .collect();

    let first = match formats.first() {
        Some(first) => first.clone(),
        None => {
            log::warn!(
                "'{}': {} stream has no usable formats (of {}), skipping",
                device_name,
                raw.direction,
                total
            );
            return None;
        }
    };
    let preferred_format = raw
        .preferred_format
        .filter(|format| format.validate().is_ok())
        .unwrap_or(first);

    Some(DeviceStream {
        handle: next(next_handle),
        direction: raw.direction,
        preferred_format,
        supported_formats: formats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryDevice};
    use crate::model::{AudioFormatDescription, Direction, FormatFlags, SampleRateRange};

    fn registry(backends: Vec<MemoryBackend>) -> DeviceRegistry {
        DeviceRegistry::new(
            backends
                .into_iter()
                .map(|b| Arc::new(b) as Arc<dyn AudioBackend>)
                .collect(),
        )
    }

    #[test]
    fn test_merges_backends_with_unique_handles() {
        let registry = registry(vec![
            MemoryBackend::new("A")
                .with_device(MemoryDevice::duplex("Loopback"))
                .with_device(MemoryDevice::input_only("Mic")),
            MemoryBackend::new("B").with_device(MemoryDevice::duplex("Loopback")),
        ]);
        let snapshot = registry.enumerate();
        assert_eq!(snapshot.len(), 3);

        let mut handles = Vec::new();
        for device in &snapshot {
            handles.push(device.handle);
            handles.extend(device.device_streams.iter().map(|s| s.handle));
        }
        let count = handles.len();
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), count);

        assert!(snapshot.find_by_uid("A:Loopback").is_some());
        assert!(snapshot.find_by_uid("B:Loopback").is_some());
        assert_eq!(snapshot.get(2).unwrap().host, "B");
        assert!(snapshot.get(3).is_none());
        assert!(snapshot.get(usize::MAX).is_none());
    }

    #[test]
    fn test_failing_backend_contributes_nothing() {
        let registry = registry(vec![
            MemoryBackend::new("Dead").failing_enumerate(),
            MemoryBackend::new("Alive").with_device(MemoryDevice::output_only("Speakers")),
        ]);
        let snapshot = registry.enumerate();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(0).unwrap().device_name, "Speakers");
    }

    #[test]
    fn test_empty_registry_gives_empty_snapshot() {
        let registry = DeviceRegistry::new(Vec::new());
        let snapshot = registry.enumerate();
        assert!(snapshot.is_empty());
        assert!(snapshot.get(0).is_none());
    }

    #[test]
    fn test_repeated_enumerate_free_cycles() {
        let registry = registry(vec![MemoryBackend::new("Memory")
            .with_device(MemoryDevice::duplex("Loopback"))
            .with_device(MemoryDevice::output_only("Speakers"))]);
        let first = registry.enumerate();
        let expected: Vec<String> = first.iter().map(|d| d.device_uid.clone()).collect();
        registry.free(Some(first));

        for _ in 0..100 {
            let snapshot = registry.enumerate();
            let uids: Vec<String> = snapshot.iter().map(|d| d.device_uid.clone()).collect();
            assert_eq!(uids, expected);
            registry.free(Some(snapshot));
        }
        registry.free(None);

        // Only live cells are tracked
        let live = registry.activity.lock().unwrap();
        assert!(live.values().all(|cell| cell.strong_count() == 0));
        assert!(live.len() <= expected.len());
        drop(live);
        assert_eq!(registry.enumerate().generation(), 102);
    }

    #[test]
    fn test_activity_is_shared_across_snapshots() {
        let registry = registry(vec![MemoryBackend::new("Memory").with_device(MemoryDevice::duplex("Loopback"))]);
        let first = registry.enumerate();
        let second = registry.enumerate();
        first.get(0).unwrap().activity.set(Direction::Input, true);
        assert!(second.get(0).unwrap().is_running());
        first.get(0).unwrap().activity.set(Direction::Input, false);
        assert!(!second.get(0).unwrap().is_running());
    }

    #[test]
    fn test_invalid_formats_are_dropped() {
        let range = SampleRateRange::new(44100.0, 48000.0).unwrap();
        let good = AudioFormatDescription::linear_pcm(2, 16, range, FormatFlags::SIGNED_INTEGER).unwrap();
        let mut bad = good.clone();
        bad.number_of_channels = 0;
        let mut inconsistent = good.clone();
        inconsistent.flags = FormatFlags::FLOAT | FormatFlags::SIGNED_INTEGER;

        let registry = registry(vec![
            MemoryBackend::new("Memory")
                .with_device(MemoryDevice::duplex("Mixed").with_formats(vec![bad.clone(), good.clone()]))
                .with_device(MemoryDevice::output_only("Unusable").with_formats(vec![bad, inconsistent])),
        ]);
        let snapshot = registry.enumerate();

        let mixed = snapshot.find_by_name("Mixed").unwrap();
        assert_eq!(mixed.device_streams.len(), 2);
        for stream in &mixed.device_streams {
            assert_eq!(stream.supported_formats, vec![good.clone()]);
            assert_eq!(stream.preferred_format, good);
            assert!(stream.format(1).is_none());
        }

        let unusable = snapshot.find_by_name("Unusable").unwrap();
        assert!(unusable.device_streams.is_empty());
        assert!(!unusable.supports_direction(Direction::Output));
    }
}
