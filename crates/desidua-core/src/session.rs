use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::call_access::RoomToken;
use crate::errors::DesiduaError;
use crate::events::{CallEvent, CallEventListener, CallNotice, EventEmitter, NoticeKind};
use crate::room::{
    AudioSession, ConnectOptions, Connection, RoomConnector, RoomFeed, RoomHandle, RoomSignal,
    RoomSnapshot,
};

/// Upper bound on a single disconnect attempt during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Local publish state, only meaningful while connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub microphone: bool,
    pub camera: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected(LocalMedia),
    Disconnecting,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn media(&self) -> Option<LocalMedia> {
        match self {
            Self::Connected(media) => Some(*media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Device {
    Microphone,
    Camera,
}

struct ActiveRoom<H> {
    id: u64,
    handle: Arc<H>,
    signals: Option<JoinHandle<()>>,
}

struct Slot<H> {
    active: Option<ActiveRoom<H>>,
    audio_held: bool,
    last_id: u64,
}

struct Shared<C: RoomConnector> {
    connector: C,
    audio: Arc<dyn AudioSession>,
    server_url: String,
    options: ConnectOptions,
    /// Held for the whole of every begin/end so transitions never overlap.
    slot: Mutex<Slot<C::Handle>>,
    state: watch::Sender<SessionState>,
    snapshot: watch::Sender<RoomSnapshot>,
    /// Bumped by `end` to abandon a connect that is still in flight.
    cancel_epoch: watch::Sender<u64>,
    emitter: EventEmitter,
    mic_busy: AtomicBool,
    camera_busy: AtomicBool,
}

/// Owns the single room handle of a call screen.
///
/// `begin` and `end` are serialized; `end` is safe to call any number of
/// times and from any state. The platform audio session is started by
/// `begin` and released exactly once on the way back to `Idle`.
pub struct SessionController<C: RoomConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: RoomConnector> Clone for SessionController<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: RoomConnector> SessionController<C> {
    pub fn new(
        connector: C,
        audio: Arc<dyn AudioSession>,
        server_url: &str,
        options: ConnectOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (snapshot, _) = watch::channel(RoomSnapshot::default());
        let (cancel_epoch, _) = watch::channel(0u64);
        Self {
            shared: Arc::new(Shared {
                connector,
                audio,
                server_url: server_url.to_string(),
                options,
                slot: Mutex::new(Slot {
                    active: None,
                    audio_held: false,
                    last_id: 0,
                }),
                state,
                snapshot,
                cancel_epoch,
                emitter: EventEmitter::new(),
                mic_busy: AtomicBool::new(false),
                camera_busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Join the room with a resolved call token.
    ///
    /// Without a token this is a no-op that reports `TokenUnavailable`.
    /// Returns once the connect request has settled; the switch to
    /// `Connected` follows the room's own connected notification.
    pub async fn begin(&self, token: Option<&RoomToken>) -> Result<(), DesiduaError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::warn!("join requested without a call token");
            let err = DesiduaError::TokenUnavailable;
            self.shared.notify(NoticeKind::TokenUnavailable, &err);
            return Err(err);
        };

        let epoch = *self.shared.cancel_epoch.borrow();
        let mut slot = self.shared.slot.lock().await;
        if *self.shared.cancel_epoch.borrow() != epoch {
            tracing::info!("join superseded by leave before it started");
            return Err(DesiduaError::Cancelled);
        }
        if slot.active.is_some() {
            tracing::debug!("join ignored, room already active");
            return Ok(());
        }

        slot.last_id += 1;
        let session_id = slot.last_id;
        tracing::info!("session {session_id}: connecting to {}", self.shared.server_url);
        self.shared.set_state(SessionState::Connecting);

        if !slot.audio_held {
            match self.shared.audio.start() {
                Ok(()) => slot.audio_held = true,
                Err(e) => tracing::warn!("audio session failed to start: {e}"),
            }
        }

        let cancelled = wait_for_cancel(self.shared.cancel_epoch.subscribe(), epoch);
        let connect = self
            .shared
            .connector
            .connect(&self.shared.server_url, token.as_str(), self.shared.options);
        let outcome = tokio::select! {
            biased;
            res = connect => Some(res),
            _ = cancelled => None,
        };

        match outcome {
            None => {
                tracing::info!("session {session_id}: connect abandoned, screen closed");
                self.shared.teardown(&mut slot, true).await;
                Err(DesiduaError::Cancelled)
            }
            Some(Err(e)) => {
                tracing::warn!("session {session_id}: connect failed: {e}");
                self.shared.teardown(&mut slot, true).await;
                self.shared.notify(NoticeKind::Connection, &e);
                Err(e)
            }
            Some(Ok(Connection { handle, signals })) => {
                let task = tokio::spawn(signal_loop(
                    Arc::downgrade(&self.shared),
                    session_id,
                    signals,
                ));
                slot.active = Some(ActiveRoom {
                    id: session_id,
                    handle: Arc::new(handle),
                    signals: Some(task),
                });
                Ok(())
            }
        }
    }

    /// Leave the room and release hardware. Never fails.
    pub async fn end(&self) {
        self.shared
            .cancel_epoch
            .send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        let mut slot = self.shared.slot.lock().await;
        self.shared.teardown(&mut slot, true).await;
    }

    /// Flip the microphone. Returns the new flag, or `None` when the toggle
    /// was ignored or failed.
    pub async fn toggle_microphone(&self) -> Option<bool> {
        self.toggle(Device::Microphone).await
    }

    /// Flip the camera. Returns the new flag, or `None` when the toggle was
    /// ignored or failed.
    pub async fn toggle_camera(&self) -> Option<bool> {
        self.toggle(Device::Camera).await
    }

    async fn toggle(&self, device: Device) -> Option<bool> {
        let busy = match device {
            Device::Microphone => &self.shared.mic_busy,
            Device::Camera => &self.shared.camera_busy,
        };
        let Some(_guard) = InFlight::acquire(busy) else {
            tracing::debug!("{device:?} toggle already in flight, ignoring");
            return None;
        };

        let connected = self.shared.state.borrow().is_connected();
        if !connected {
            tracing::debug!("{device:?} toggle ignored, not connected");
            return None;
        }
        let (room_id, handle) = {
            let slot = self.shared.slot.lock().await;
            let active = slot.active.as_ref()?;
            (active.id, active.handle.clone())
        };

        let current = match device {
            Device::Microphone => handle.microphone_enabled(),
            Device::Camera => handle.camera_enabled(),
        };
        let Some(current) = current else {
            tracing::debug!("{device:?} toggle ignored, local participant unavailable");
            return None;
        };

        let target = !current;
        let result = match device {
            Device::Microphone => handle.set_microphone_enabled(target).await,
            Device::Camera => handle.set_camera_enabled(target).await,
        };

        // The room may have been left, or replaced, while the device settled.
        let slot = self.shared.slot.lock().await;
        if slot.active.as_ref().map(|a| a.id) != Some(room_id) {
            tracing::debug!("session {room_id}: {device:?} toggle settled after the room closed");
            return None;
        }
        if let Err(e) = result {
            drop(slot);
            tracing::warn!("{device:?} toggle failed: {e}");
            self.shared.notify(NoticeKind::Device, &e);
            return None;
        }

        tracing::info!("{device:?} enabled: {target}");
        let changed = self.shared.state.send_if_modified(|state| match state {
            SessionState::Connected(media) => {
                match device {
                    Device::Microphone => media.microphone = target,
                    Device::Camera => media.camera = target,
                }
                true
            }
            _ => false,
        });
        drop(slot);
        if changed {
            self.shared.emit_state();
        }
        Some(target)
    }
}

impl<C: RoomConnector> RoomFeed for SessionController<C> {
    fn snapshots(&self) -> watch::Receiver<RoomSnapshot> {
        self.shared.snapshot.subscribe()
    }

    fn states(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }
}

impl<C: RoomConnector> Shared<C> {
    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            self.emit_state();
        }
    }

    fn emit_state(&self) {
        let state = self.state.borrow().clone();
        tracing::debug!("session state: {state:?}");
        self.emitter.emit(CallEvent::SessionStateChanged(state));
    }

    fn notify(&self, kind: NoticeKind, error: &DesiduaError) {
        self.emitter.emit(CallEvent::Notice(CallNotice::new(kind, error)));
    }

    /// Return to `Idle`, disconnecting whatever room is held.
    ///
    /// Disconnect failures are absorbed. `abort_signals` is false when called
    /// from the signal task itself.
    async fn teardown(&self, slot: &mut Slot<C::Handle>, abort_signals: bool) {
        if let Some(active) = slot.active.take() {
            self.set_state(SessionState::Disconnecting);
            match tokio::time::timeout(DISCONNECT_TIMEOUT, active.handle.disconnect()).await {
                Ok(Ok(())) => tracing::info!("session {}: disconnected", active.id),
                Ok(Err(e)) => tracing::debug!("session {}: disconnect error ignored: {e}", active.id),
                Err(_) => tracing::warn!("session {}: disconnect timed out", active.id),
            }
            if abort_signals {
                if let Some(task) = active.signals {
                    task.abort();
                }
            }
        }
        if slot.audio_held {
            self.audio.stop();
            slot.audio_held = false;
            tracing::debug!("audio session released");
        }
        self.snapshot.send_replace(RoomSnapshot::default());
        self.set_state(SessionState::Idle);
    }

    async fn on_signal(&self, session_id: u64, signal: RoomSignal) -> bool {
        let mut slot = self.slot.lock().await;
        let Some(active) = slot.active.as_ref().filter(|a| a.id == session_id) else {
            tracing::debug!("session {session_id}: stale signal dropped");
            return false;
        };

        match signal {
            RoomSignal::Connected => {
                let connecting = *self.state.borrow() == SessionState::Connecting;
                if connecting {
                    let media = LocalMedia {
                        microphone: active.handle.microphone_enabled().unwrap_or(false),
                        camera: active.handle.camera_enabled().unwrap_or(false),
                    };
                    tracing::info!("session {session_id}: connected");
                    self.set_state(SessionState::Connected(media));
                }
                true
            }
            RoomSignal::Snapshot(snapshot) => {
                self.snapshot.send_replace(snapshot.clone());
                self.emitter.emit(CallEvent::RoomChanged(snapshot));
                true
            }
            RoomSignal::Disconnected { reason } => {
                tracing::info!("session {session_id}: room disconnected: {reason}");
                self.teardown(&mut slot, false).await;
                false
            }
            RoomSignal::Failed(msg) => {
                tracing::warn!("session {session_id}: room error: {msg}");
                self.teardown(&mut slot, false).await;
                self.notify(NoticeKind::Connection, &DesiduaError::Connection(msg));
                false
            }
        }
    }
}

async fn signal_loop<C: RoomConnector>(
    shared: Weak<Shared<C>>,
    session_id: u64,
    mut signals: mpsc::UnboundedReceiver<RoomSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.on_signal(session_id, signal).await {
            break;
        }
    }
    tracing::debug!("session {session_id}: signal loop ended");
}

async fn wait_for_cancel(mut epochs: watch::Receiver<u64>, start: u64) {
    loop {
        let current = *epochs.borrow_and_update();
        if current != start {
            return;
        }
        if epochs.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Clears a per-control busy flag when the toggle settles.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
