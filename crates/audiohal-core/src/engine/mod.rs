//! Streaming engine
//!
//! Starts and stops playback/recording sessions. Each session runs on its own
//! I/O thread and is keyed by (device uid, direction), so a device can play
//! and record at the same time but never run two sessions in one direction.
//!
//! ```text
//!  start_playback()                          I/O thread
//!  ────────────────                          ──────────
//!  validate + negotiate
//!  spawn ───────────────────────────────────► backend.open()
//!  wait ◄──────────── open result ─────────── │
//!  return true/false                          loop {
//!                                               bytes = callback(device, len)
//!                                               pad with silence if short
//!                                               stream.write(bytes)
//!  stop_playback()                            }
//!  raise shutdown ──────────────────────────► loop exits, stream.close()
//!  join ◄──────────────────────────────────── thread ends
//! ```
//!
//! Callbacks run on the I/O thread and must return promptly: `stop` waits for
//! the in-flight callback. A callback must not stop its own session.

mod request;
mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use request::{FormatRequest, StreamFormat};
pub use session::{PlaybackCallback, RecordingCallback, SessionState};

use self::session::{Exchange, Session};
use crate::backend::{AudioBackend, OpenRequest};
use crate::config::HalConfig;
use crate::error::{HalError, HalResult};
use crate::model::{Device, Direction, Handle};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    device_uid: String,
    direction: Direction,
}

impl SessionKey {
    fn new(device: &Device, direction: Direction) -> Self {
        Self {
            device_uid: device.device_uid.clone(),
            direction,
        }
    }
}

/// Snapshot of one session for introspection
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub device_name: String,
    pub device_uid: String,
    pub direction: Direction,
    pub stream_handle: Handle,
    pub format: StreamFormat,
    pub buffer_count: usize,
    pub buffer_bytes: usize,
    pub state: SessionState,
}

/// Owns every streaming session
pub struct StreamingEngine {
    backends: Vec<Arc<dyn AudioBackend>>,
    sessions: Mutex<HashMap<SessionKey, Session>>,
    next_id: AtomicU64,
    buffer_duration: Duration,
    default_buffer_count: usize,
    stall_timeout: Duration,
}

impl StreamingEngine {
    pub fn new(config: &HalConfig, backends: Vec<Arc<dyn AudioBackend>>) -> Self {
        Self {
            backends,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_duration: config.buffer_duration(),
            default_buffer_count: config.default_buffer_count.max(1) as usize,
            stall_timeout: config.stall_timeout(),
        }
    }

    /// Start playing to `device`; `callback` supplies every buffer
    ///
    /// Returns `false` (and logs why) if the device has no output stream,
    /// the request is invalid, an output session is already active on the
    /// device, or the backend refuses to open.
    pub fn start_playback<F>(&self, device: &Device, request: &FormatRequest, callback: F) -> bool
    where
        F: FnMut(&Device, usize) -> Vec<u8> + Send + 'static,
    {
        self.start(device, Direction::Output, request, Exchange::Playback(Box::new(callback)))
    }

    /// Start recording from `device`; `callback` receives every buffer
    pub fn start_recording<F>(&self, device: &Device, request: &FormatRequest, callback: F) -> bool
    where
        F: FnMut(&Device, &[u8]) -> bool + Send + 'static,
    {
        self.start(device, Direction::Input, request, Exchange::Recording(Box::new(callback)))
    }

    fn start(&self, device: &Device, direction: Direction, request: &FormatRequest, exchange: Exchange) -> bool {
        match self.try_start(device, direction, request, exchange) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Could not start {} session on '{}': {}",
                    direction,
                    device.device_name,
                    e
                );
                false
            }
        }
    }

    fn try_start(
        &self,
        device: &Device,
        direction: Direction,
        request: &FormatRequest,
        exchange: Exchange,
    ) -> HalResult<()> {
        let stream = device
            .stream_for(direction)
            .ok_or_else(|| HalError::UnsupportedDirection {
                device: device.device_name.clone(),
                direction,
            })?;
        let format = request.negotiate(stream)?;
        let backend = self.backend(&device.host)?;

        let buffer_count = match request.buffer_count {
            0 => self.default_buffer_count,
            n => n as usize,
        };
        let buffer_bytes = format.buffer_bytes(self.buffer_duration);
        let open = OpenRequest {
            native_id: device.native_id.clone(),
            device_name: device.device_name.clone(),
            direction,
            format,
            buffer_bytes,
            buffer_count,
            stall_timeout: self.stall_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        let key = SessionKey::new(device, direction);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let ready = loop {
            let mut sessions = self.lock_sessions();
            if sessions.get(&key).is_some_and(Session::is_active) {
                return Err(HalError::SessionActive {
                    device: device.device_name.clone(),
                    direction,
                });
            }
            // A failed session may still be closing its stream; join it
            // outside the lock before the new one opens
            if let Some(finished) = sessions.remove(&key) {
                drop(sessions);
                drop(finished);
                continue;
            }
            let (session, ready) =
                Session::spawn(id, device.clone(), stream.handle, backend, open, exchange)?;
            sessions.insert(key.clone(), session);
            break ready;
        };

        let outcome = ready
            .recv()
            .unwrap_or_else(|_| Err(HalError::Stream("I/O thread exited during start".into())));
        // A concurrent stop removes the session from the table while it opens
        let outcome = outcome.and_then(|()| {
            let still_present = self.lock_sessions().get(&key).is_some_and(|s| s.id == id);
            if still_present {
                Ok(())
            } else {
                Err(HalError::StartCancelled {
                    device: device.device_name.clone(),
                    direction,
                })
            }
        });

        match outcome {
            Ok(()) => {
                log::info!(
                    "Started {} session on '{}': {}, {} x {} byte buffers",
                    direction,
                    device.device_name,
                    format,
                    buffer_count,
                    buffer_bytes
                );
                Ok(())
            }
            Err(e) => {
                let failed = {
                    let mut sessions = self.lock_sessions();
                    if sessions.get(&key).is_some_and(|s| s.id == id) {
                        sessions.remove(&key)
                    } else {
                        None
                    }
                };
                drop(failed);
                Err(e)
            }
        }
    }

    /// Stop every session in `direction`, blocking until their threads exit
    pub fn stop(&self, direction: Direction) {
        self.stop_matching(|key| key.direction == direction);
    }

    pub fn stop_playback(&self) {
        self.stop(Direction::Output);
    }

    pub fn stop_recording(&self) {
        self.stop(Direction::Input);
    }

    /// Stop the session on one device in one direction
    pub fn stop_device(&self, device: &Device, direction: Direction) {
        let target = SessionKey::new(device, direction);
        self.stop_matching(|key| *key == target);
    }

    /// Stop every session
    pub fn stop_all(&self) {
        self.stop_matching(|_| true);
    }

    fn stop_matching<P>(&self, predicate: P)
    where
        P: Fn(&SessionKey) -> bool,
    {
        let stopping: Vec<Session> = {
            let mut sessions = self.lock_sessions();
            let keys: Vec<SessionKey> = sessions.keys().filter(|k| predicate(k)).cloned().collect();
            keys.iter().filter_map(|k| sessions.remove(k)).collect()
        };

        for mut session in stopping {
            let was = session.state();
            session.stop();
            log::info!(
                "Stopped {} session on '{}' (was {:?})",
                session.direction,
                session.device.device_name,
                was
            );
        }
    }

    /// Current state of the session on (device, direction)
    pub fn session_state(&self, device: &Device, direction: Direction) -> SessionState {
        self.lock_sessions()
            .get(&SessionKey::new(device, direction))
            .map(Session::state)
            .unwrap_or(SessionState::Idle)
    }

    /// Every session currently known to the engine
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.lock_sessions()
            .values()
            .map(|s| SessionInfo {
                device_name: s.device.device_name.clone(),
                device_uid: s.device.device_uid.clone(),
                direction: s.direction,
                stream_handle: s.stream_handle,
                format: s.format,
                buffer_count: s.buffer_count,
                buffer_bytes: s.buffer_bytes,
                state: s.state(),
            })
            .collect()
    }

    fn backend(&self, host: &str) -> HalResult<Arc<dyn AudioBackend>> {
        self.backends
            .iter()
            .find(|b| b.name() == host)
            .cloned()
            .ok_or_else(|| HalError::BackendUnavailable(host.to_string()))
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}
