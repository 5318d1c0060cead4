//! Session I/O thread
//!
//! Dedicated thread per active session. Opens the backend stream, reports
//! the outcome to `start`, then exchanges buffers with the caller's callback
//! until the shutdown flag is raised or the backend fails.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};

use super::StreamFormat;
use crate::backend::{AudioBackend, BackendStream, OpenRequest};
use crate::error::{HalError, HalResult};
use crate::model::{Device, Direction, Handle};

/// Playback callback: given the device and the requested byte count,
/// return the bytes to play. Short buffers are padded with silence.
pub type PlaybackCallback = Box<dyn FnMut(&Device, usize) -> Vec<u8> + Send + 'static>;

/// Recording callback: receives each captured buffer. The return value
/// only affects logging.
pub type RecordingCallback = Box<dyn FnMut(&Device, &[u8]) -> bool + Send + 'static>;

/// Lifecycle of a session
///
/// ```text
/// Idle → Starting → Running → Stopping → Idle
///           │          │
///           └──────────┴──► Failed → Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Failed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            4 => SessionState::Failed,
            _ => SessionState::Idle,
        }
    }

    /// Starting, Running and Stopping sessions occupy their (device, direction)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }
}

/// Session state shared with the I/O thread
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from` → `to`; leaves other states untouched
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) enum Exchange {
    Playback(PlaybackCallback),
    Recording(RecordingCallback),
}

/// Handle to one session's I/O thread
///
/// Owns the thread join handle and the shutdown flag.
/// When dropped, signals the thread to stop and waits for it.
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) device: Device,
    pub(crate) direction: Direction,
    pub(crate) stream_handle: Handle,
    pub(crate) format: StreamFormat,
    pub(crate) buffer_count: usize,
    pub(crate) buffer_bytes: usize,
    state: Arc<StateCell>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Session {
    /// Spawn the I/O thread; the receiver yields the backend open result
    pub(crate) fn spawn(
        id: u64,
        device: Device,
        stream_handle: Handle,
        backend: Arc<dyn AudioBackend>,
        request: OpenRequest,
        exchange: Exchange,
    ) -> HalResult<(Self, Receiver<HalResult<()>>)> {
        let state = Arc::new(StateCell::new(SessionState::Starting));
        let state_clone = state.clone();
        let shutdown = request.cancel.clone();
        let (ready_tx, ready_rx) = bounded(1);

        let direction = request.direction;
        let format = request.format;
        let buffer_count = request.buffer_count;
        let buffer_bytes = request.buffer_bytes;
        let thread_device = device.clone();

        let handle = thread::Builder::new()
            .name(format!("audio-{}-{}", direction, device.handle))
            .spawn(move || {
                Self::io_loop(thread_device, backend, request, exchange, &state_clone, ready_tx);
            })
            .map_err(|e| HalError::ThreadSpawn(e.to_string()))?;

        Ok((
            Self {
                id,
                device,
                direction,
                stream_handle,
                format,
                buffer_count,
                buffer_bytes,
                state,
                shutdown,
                handle: Some(handle),
            },
            ready_rx,
        ))
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.get()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.handle.is_some() && self.state().is_active()
    }

    /// Signal the thread and wait for it to exit. No-op once stopped.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !self.state.transition(SessionState::Running, SessionState::Stopping) {
            self.state.transition(SessionState::Starting, SessionState::Stopping);
        }
        self.shutdown.store(true, Ordering::Relaxed);

        if handle.join().is_err() {
            log::error!(
                "[{} {}] I/O thread panicked",
                self.direction,
                self.device.device_name
            );
            self.device.activity.set(self.direction, false);
        }
        self.state.set(SessionState::Idle);
    }

    /// Main loop running on the dedicated thread
    fn io_loop(
        device: Device,
        backend: Arc<dyn AudioBackend>,
        request: OpenRequest,
        exchange: Exchange,
        state: &StateCell,
        ready: Sender<HalResult<()>>,
    ) {
        let label = format!("{} {}", request.direction, device.device_name);

        let mut stream = match backend.open(&request) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("[{}] Failed to open stream: {}", label, e);
                state.set(SessionState::Failed);
                let _ = ready.send(Err(e));
                state.set(SessionState::Idle);
                return;
            }
        };

        if !state.transition(SessionState::Starting, SessionState::Running) {
            log::info!("[{}] Stopped while opening", label);
            if let Err(e) = stream.close() {
                log::warn!("[{}] Failed to close stream: {}", label, e);
            }
            let _ = ready.send(Err(HalError::StartCancelled {
                device: device.device_name.clone(),
                direction: request.direction,
            }));
            state.set(SessionState::Idle);
            return;
        }
        device.activity.set(request.direction, true);
        log::info!("[{}] I/O thread started ({})", label, request.format);
        let _ = ready.send(Ok(()));

        let pumped = panic::catch_unwind(AssertUnwindSafe(|| match exchange {
            Exchange::Playback(callback) => {
                pump_playback(&device, stream.as_mut(), callback, &request)
            }
            Exchange::Recording(callback) => {
                pump_recording(&device, stream.as_mut(), callback, &request, &label)
            }
        }));

        let result = match pumped {
            Ok(result) => result,
            Err(_) => Err(HalError::Stream("callback panicked".into())),
        };
        if let Err(e) = &result {
            log::error!("[{}] Session failed: {}", label, e);
            state.set(SessionState::Failed);
        }

        if let Err(e) = stream.close() {
            log::warn!("[{}] Failed to close stream: {}", label, e);
        }
        device.activity.set(request.direction, false);
        state.set(SessionState::Idle);
        log::info!("[{}] I/O thread stopped", label);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_playback(
    device: &Device,
    stream: &mut dyn BackendStream,
    mut callback: PlaybackCallback,
    request: &OpenRequest,
) -> HalResult<()> {
    let requested = request.buffer_bytes;
    while !request.is_cancelled() {
        let mut buffer = callback(device, requested);
        let filled = buffer.len();
        if filled < requested {
            log::trace!("Playback callback returned {} of {} bytes, padding", filled, requested);
            buffer.resize(requested, 0);
            request.format.fill_silence(&mut buffer[filled..], filled);
        }
        stream.write(&buffer)?;
    }
    Ok(())
}

fn pump_recording(
    device: &Device,
    stream: &mut dyn BackendStream,
    mut callback: RecordingCallback,
    request: &OpenRequest,
    label: &str,
) -> HalResult<()> {
    let mut buffer = vec![0u8; request.buffer_bytes];
    while !request.is_cancelled() {
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            continue;
        }
        if !callback(device, &buffer[..n]) {
            log::debug!("[{}] Recording callback rejected a buffer", label);
        }
    }
    Ok(())
}
