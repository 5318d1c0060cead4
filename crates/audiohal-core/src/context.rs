//! Lifecycle and log context
//!
//! Constructing a `Context` initializes the layer: it applies the configured
//! log level, connects the backends and sets up the registry, default-device
//! manager and streaming engine. Dropping it (or calling `terminate`) stops
//! every session and releases the backends. Everything else hangs off it:
//!
//! ```ignore
//! let ctx = Context::initialize();
//! let snapshot = ctx.enumerate();
//! let mic = snapshot.get(0);
//! if ctx.supports_direction(mic, Direction::Input) {
//!     let request = FormatRequest::linear_pcm(2, 44100, 16, FormatFlags::SIGNED_INTEGER);
//!     ctx.start_recording(mic, &request, |_device, data| {
//!         sink.extend_from_slice(data);
//!         true
//!     });
//!     // ...
//!     ctx.stop_recording();
//! }
//! ctx.terminate();
//! ```

use std::sync::Arc;

use crate::backend::{create_backends, AudioBackend};
use crate::config::{HalConfig, LogLevel};
use crate::defaults::{self, DefaultDeviceManager};
use crate::engine::{FormatRequest, SessionState, StreamingEngine};
use crate::model::{Device, DeviceSnapshot, Direction};
use crate::registry::DeviceRegistry;

/// Where a context is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotInitialized,
    Initialized,
    Terminated,
}

/// Set the process-wide diagnostic verbosity
///
/// Takes effect for the next log call on any thread. Concurrent writers
/// race; the last one wins.
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.to_level_filter());
}

/// An initialized abstraction layer
pub struct Context {
    config: HalConfig,
    registry: DeviceRegistry,
    defaults: DefaultDeviceManager,
    engine: StreamingEngine,
    state: LifecycleState,
}

impl Context {
    /// Initialize with the default config and the platform backends
    pub fn initialize() -> Self {
        Self::with_config(HalConfig::default())
    }

    /// Initialize with `config` and the platform backends it selects
    pub fn with_config(config: HalConfig) -> Self {
        let backends = create_backends(&config);
        Self::with_backends(config, backends)
    }

    /// Initialize with an explicit set of backends
    pub fn with_backends(config: HalConfig, backends: Vec<Arc<dyn AudioBackend>>) -> Self {
        set_log_level(config.log_level);
        let mut context = Self {
            registry: DeviceRegistry::new(backends.clone()),
            defaults: DefaultDeviceManager::new(),
            engine: StreamingEngine::new(&config, backends),
            config,
            state: LifecycleState::NotInitialized,
        };
        context.transition(LifecycleState::Initialized);
        context
    }

    fn transition(&mut self, next: LifecycleState) {
        log::info!(
            "{}: {:?} -> {:?}",
            crate::get_version_string(),
            self.state,
            next
        );
        self.state = next;
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &StreamingEngine {
        &self.engine
    }

    /// Change the diagnostic verbosity
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.config.log_level = level;
        set_log_level(level);
    }

    /// Take a snapshot of every device
    pub fn enumerate(&self) -> DeviceSnapshot {
        self.registry.enumerate()
    }

    /// Release a snapshot; `None` is a no-op
    pub fn free(&self, snapshot: Option<DeviceSnapshot>) {
        self.registry.free(snapshot);
    }

    pub fn supports_direction<D>(&self, device: Option<&Device>, direction: D) -> bool
    where
        D: TryInto<Direction>,
    {
        defaults::supports_direction(device, direction)
    }

    pub fn set_default<D>(&self, device: Option<&Device>, direction: D) -> bool
    where
        D: TryInto<Direction>,
    {
        self.defaults.set_default(device, direction)
    }

    pub fn default_device(&self, direction: Direction) -> Option<Device> {
        self.defaults.default_device(direction)
    }

    fn target(&self, device: Option<&Device>, direction: Direction) -> Option<Device> {
        let target = device.cloned().or_else(|| self.defaults.default_device(direction));
        if target.is_none() {
            log::error!("No device given and no default {} device set", direction);
        }
        target
    }

    /// Start playback on `device`, or on the default output when `None`
    pub fn start_playback<F>(&self, device: Option<&Device>, request: &FormatRequest, callback: F) -> bool
    where
        F: FnMut(&Device, usize) -> Vec<u8> + Send + 'static,
    {
        match self.target(device, Direction::Output) {
            Some(device) => self.engine.start_playback(&device, request, callback),
            None => false,
        }
    }

    /// Start recording from `device`, or from the default input when `None`
    pub fn start_recording<F>(&self, device: Option<&Device>, request: &FormatRequest, callback: F) -> bool
    where
        F: FnMut(&Device, &[u8]) -> bool + Send + 'static,
    {
        match self.target(device, Direction::Input) {
            Some(device) => self.engine.start_recording(&device, request, callback),
            None => false,
        }
    }

    pub fn stop(&self, direction: Direction) {
        self.engine.stop(direction);
    }

    pub fn stop_playback(&self) {
        self.engine.stop_playback();
    }

    pub fn stop_recording(&self) {
        self.engine.stop_recording();
    }

    pub fn session_state(&self, device: &Device, direction: Direction) -> SessionState {
        self.engine.session_state(device, direction)
    }

    /// Stop every session and tear the layer down
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.state != LifecycleState::Initialized {
            return;
        }
        self.engine.stop_all();
        self.defaults.clear(Direction::Output);
        self.defaults.clear(Direction::Input);
        self.transition(LifecycleState::Terminated);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
