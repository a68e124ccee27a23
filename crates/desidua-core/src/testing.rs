//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc, oneshot};

use crate::credentials::CredentialProvider;
use crate::errors::DesiduaError;
use crate::events::{CallEvent, CallEventListener, NoticeKind};
use crate::room::{
    AudioSession, ConnectOptions, Connection, ParticipantState, RoomConnector, RoomHandle,
    RoomSignal, RoomSnapshot, TrackRef, TrackSource,
};
use crate::session::{SessionController, SessionState};

pub(crate) struct StaticCredential(pub Option<String>);

impl CredentialProvider for StaticCredential {
    fn current(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────

pub(crate) struct TestServer {
    pub base_url: String,
    captured: oneshot::Receiver<String>,
}

impl TestServer {
    /// The raw request the server received.
    pub async fn request(self) -> String {
        self.captured.await.unwrap_or_default()
    }
}

/// Accept a single connection and answer it with `status` and `body`.
pub(crate) async fn serve_once(status: u16, body: &str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let request = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            reason(status),
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        let _ = tx.send(request);
    });

    TestServer {
        base_url: format!("http://{addr}"),
        captured: rx,
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ── Room ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    connect_calls: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    last_token: Mutex<Option<String>>,
    connect_error: Mutex<Option<String>>,
    hold_connects: AtomicBool,
    connect_gate: Notify,
    signals: Mutex<Option<mpsc::UnboundedSender<RoomSignal>>>,
    local_hidden: AtomicBool,
    microphone: AtomicBool,
    camera: AtomicBool,
    set_calls: AtomicUsize,
    hold_toggles: AtomicBool,
    toggle_gate: Notify,
    fail_toggles: AtomicBool,
    fail_disconnects: AtomicBool,
}

/// Scriptable stand-in for the media client.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn max_live_handles(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.last_token.lock().unwrap().clone()
    }

    pub fn fail_connects(&self, msg: &str) {
        *self.state.connect_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn succeed_connects(&self) {
        *self.state.connect_error.lock().unwrap() = None;
    }

    /// Connects never complete; only cancellation ends them.
    pub fn hold_connects(&self) {
        self.state.hold_connects.store(true, Ordering::SeqCst);
    }

    pub fn signal(&self, signal: RoomSignal) {
        let tx = self.state.signals.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(signal);
        }
    }

    pub fn take_signal_sender(&self) -> mpsc::UnboundedSender<RoomSignal> {
        self.state
            .signals
            .lock()
            .unwrap()
            .clone()
            .expect("no room connected")
    }

    pub fn hide_local_participant(&self) {
        self.state.local_hidden.store(true, Ordering::SeqCst);
    }

    pub fn microphone(&self) -> Option<bool> {
        (!self.state.local_hidden.load(Ordering::SeqCst))
            .then(|| self.state.microphone.load(Ordering::SeqCst))
    }

    pub fn set_calls(&self) -> usize {
        self.state.set_calls.load(Ordering::SeqCst)
    }

    pub fn hold_toggles(&self) {
        self.state.hold_toggles.store(true, Ordering::SeqCst);
    }

    pub fn release_toggles(&self) {
        self.state.hold_toggles.store(false, Ordering::SeqCst);
        self.state.toggle_gate.notify_one();
    }

    pub fn fail_toggles(&self) {
        self.state.fail_toggles.store(true, Ordering::SeqCst);
    }

    pub fn fail_disconnects(&self) {
        self.state.fail_disconnects.store(true, Ordering::SeqCst);
    }
}

impl RoomConnector for FakeConnector {
    type Handle = FakeRoom;

    async fn connect(
        &self,
        _url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<Connection<FakeRoom>, DesiduaError> {
        let state = self.state.clone();
        state.connect_calls.fetch_add(1, Ordering::SeqCst);
        *state.last_token.lock().unwrap() = Some(token.to_string());

        if state.hold_connects.load(Ordering::SeqCst) {
            state.connect_gate.notified().await;
        }
        let error = state.connect_error.lock().unwrap().clone();
        if let Some(msg) = error {
            return Err(DesiduaError::Connection(msg));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *state.signals.lock().unwrap() = Some(tx);
        state.microphone.store(options.audio, Ordering::SeqCst);
        state.camera.store(options.video, Ordering::SeqCst);
        let live = state.live.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Connection {
            handle: FakeRoom {
                state,
                closed: AtomicBool::new(false),
            },
            signals: rx,
        })
    }
}

pub(crate) struct FakeRoom {
    state: Arc<FakeState>,
    closed: AtomicBool,
}

impl FakeRoom {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn flag(&self, flag: &AtomicBool) -> Option<bool> {
        (!self.state.local_hidden.load(Ordering::SeqCst)).then(|| flag.load(Ordering::SeqCst))
    }

    async fn set_flag(&self, camera: bool, enabled: bool) -> Result<(), DesiduaError> {
        self.state.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.hold_toggles.load(Ordering::SeqCst) {
            self.state.toggle_gate.notified().await;
        }
        if self.state.fail_toggles.load(Ordering::SeqCst) {
            return Err(DesiduaError::Device("hardware busy".into()));
        }
        let flag = if camera {
            &self.state.camera
        } else {
            &self.state.microphone
        };
        flag.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeRoom {
    fn drop(&mut self) {
        self.close();
    }
}

impl RoomHandle for FakeRoom {
    async fn disconnect(&self) -> Result<(), DesiduaError> {
        let was_closed = self.closed.load(Ordering::SeqCst);
        self.close();
        if was_closed || self.state.fail_disconnects.load(Ordering::SeqCst) {
            return Err(DesiduaError::Connection("room already closed".into()));
        }
        Ok(())
    }

    fn microphone_enabled(&self) -> Option<bool> {
        self.flag(&self.state.microphone)
    }

    fn camera_enabled(&self) -> Option<bool> {
        self.flag(&self.state.camera)
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), DesiduaError> {
        self.set_flag(false, enabled).await
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), DesiduaError> {
        self.set_flag(true, enabled).await
    }
}

#[derive(Default)]
pub(crate) struct FakeAudio {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeAudio {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioSession for FakeAudio {
    fn start(&self) -> Result<(), DesiduaError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingListener {
    pub fn attach<C: RoomConnector>(session: &SessionController<C>) -> Arc<Self> {
        let listener = Arc::new(Self::default());
        session.add_listener(listener.clone());
        listener
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::SessionStateChanged(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<NoticeKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                CallEvent::Notice(n) => Some(n.kind),
                _ => None,
            })
            .collect()
    }
}

impl CallEventListener for RecordingListener {
    fn on_event(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────

pub(crate) fn participant(sid: &str, identity: &str, is_local: bool) -> ParticipantState {
    ParticipantState {
        sid: sid.to_string(),
        identity: identity.to_string(),
        name: None,
        is_local,
        microphone_enabled: true,
        camera_enabled: false,
        is_speaking: false,
    }
}

/// One local doctor and two remote patients: one on camera, one without a track.
pub(crate) fn sample_snapshot() -> RoomSnapshot {
    let mut doctor = participant("PA_local", "dr-sari", true);
    doctor.camera_enabled = true;
    let mut patient = participant("PA_p1", "patient-budi", false);
    patient.camera_enabled = true;
    patient.is_speaking = true;
    let mut relative = participant("PA_p2", "relative-ani", false);
    relative.microphone_enabled = false;

    RoomSnapshot {
        participants: vec![doctor, patient, relative],
        tracks: vec![
            TrackRef::published("PA_local", TrackSource::Camera, "TR_local_cam"),
            TrackRef::published("PA_p1", TrackSource::Camera, "TR_p1_cam"),
            TrackRef::placeholder("PA_p2"),
        ],
    }
}
