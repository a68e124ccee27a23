//! UniFFI bindings for desidua-core.
//!
//! Provides a DesiduaClient object that wraps login, the clinic back
//! office services, the call session and its media hooks into a single
//! FFI-safe interface.

use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use desidua_core::{
    self, AuthService, BackendClient, BlockedTimeService, BookingService, CallAccessResolver,
    ConfigStore, ConnectOptions, CredentialStore, GalleryLayout, LiveKitConnector, MediaBridge,
    MedicalRecordService, RevenueService, RoomToken, ScheduleService, SessionController,
    SpeakerLayout, StoredCredential,
    layout::{THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH},
};

uniffi::include_scaffolding!("desidua");

// ── Android WebRTC initialization ────────────────────────────────────
//
// Must be called from Kotlin after System.loadLibrary and before join().
// webrtc::InitAndroid needs the application class loader, which is not
// available inside JNI_OnLoad.

#[cfg(target_os = "android")]
#[unsafe(no_mangle)]
pub extern "C" fn Java_id_desidua_doctor_DesiduaApplication_nativeInitWebrtc(
    env: *mut std::ffi::c_void,
    _class: *mut std::ffi::c_void,
) {
    let env = match unsafe { jni::JNIEnv::from_raw(env as *mut jni::sys::JNIEnv) } {
        Ok(env) => env,
        Err(e) => {
            tracing::error!("nativeInitWebrtc: invalid JNIEnv: {e}");
            return;
        }
    };
    let jvm = match env.get_java_vm() {
        Ok(jvm) => jvm,
        Err(e) => {
            tracing::error!("nativeInitWebrtc: no JavaVM: {e}");
            return;
        }
    };

    libwebrtc::android::initialize_android(&jvm);

    // Dropping would call DestroyJavaVM.
    std::mem::forget(jvm);
    tracing::info!("WebRTC initialized for Android");
}

// ── Platform log sink ────────────────────────────────────────────────
//
// Mobile processes discard stderr, so formatted lines go to logcat on
// Android and to syslog on iOS.

fn log_text(buf: &[u8]) -> CString {
    let line = String::from_utf8_lossy(buf);
    let bytes: Vec<u8> = line.trim_end().bytes().filter(|b| *b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

fn platform_log(text: &CString) {
    #[cfg(target_os = "android")]
    {
        unsafe extern "C" {
            fn __android_log_write(
                prio: i32,
                tag: *const std::ffi::c_char,
                text: *const std::ffi::c_char,
            ) -> i32;
        }
        unsafe {
            __android_log_write(4 /* INFO */, c"desidua".as_ptr(), text.as_ptr());
        }
    }
    #[cfg(target_os = "ios")]
    {
        unsafe extern "C" {
            fn syslog(priority: i32, message: *const std::ffi::c_char, ...);
        }
        unsafe {
            syslog(6 /* LOG_INFO */, c"%s".as_ptr(), text.as_ptr());
        }
    }
    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    eprintln!("{}", text.to_string_lossy());
}

/// `fmt` writer that hands each formatted event to [`platform_log`].
struct PlatformLog;

impl std::io::Write for PlatformLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        platform_log(&log_text(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for PlatformLog {
    type Writer = PlatformLog;

    fn make_writer(&'a self) -> Self::Writer {
        PlatformLog
    }
}

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using DesiduaClient.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "desidua_core=debug,desidua_ffi=debug".parse().unwrap()),
            )
            .with_ansi(false)
            .with_writer(PlatformLog)
            .init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected { microphone: bool, camera: bool },
    Disconnecting,
}

impl From<desidua_core::SessionState> for SessionState {
    fn from(s: desidua_core::SessionState) -> Self {
        match s {
            desidua_core::SessionState::Idle => Self::Idle,
            desidua_core::SessionState::Connecting => Self::Connecting,
            desidua_core::SessionState::Connected(media) => Self::Connected {
                microphone: media.microphone,
                camera: media.camera,
            },
            desidua_core::SessionState::Disconnecting => Self::Disconnecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    TokenUnavailable,
    Connection,
    Device,
}

impl From<desidua_core::NoticeKind> for NoticeKind {
    fn from(k: desidua_core::NoticeKind) -> Self {
        match k {
            desidua_core::NoticeKind::TokenUnavailable => Self::TokenUnavailable,
            desidua_core::NoticeKind::Connection => Self::Connection,
            desidua_core::NoticeKind::Device => Self::Device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotice {
    pub id: String,
    pub kind: NoticeKind,
    pub message: String,
}

impl From<desidua_core::CallNotice> for CallNotice {
    fn from(n: desidua_core::CallNotice) -> Self {
        Self {
            id: n.id,
            kind: n.kind.into(),
            message: n.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    SessionStateChanged { state: SessionState },
    RoomChanged { participant_count: u32 },
    Notice { notice: CallNotice },
}

impl From<desidua_core::CallEvent> for CallEvent {
    fn from(e: desidua_core::CallEvent) -> Self {
        match e {
            desidua_core::CallEvent::SessionStateChanged(s) => {
                Self::SessionStateChanged { state: s.into() }
            }
            desidua_core::CallEvent::RoomChanged(snapshot) => Self::RoomChanged {
                participant_count: snapshot.participants.len() as u32,
            },
            desidua_core::CallEvent::Notice(n) => Self::Notice { notice: n.into() },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    Camera,
    ScreenShare,
}

impl From<desidua_core::TrackSource> for TileSource {
    fn from(s: desidua_core::TrackSource) -> Self {
        match s {
            desidua_core::TrackSource::Camera => Self::Camera,
            desidua_core::TrackSource::ScreenShare => Self::ScreenShare,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub key: String,
    pub participant_sid: String,
    pub track_sid: Option<String>,
    pub source: TileSource,
    pub display_name: String,
    pub initial: String,
    pub is_local: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
    pub is_placeholder: bool,
}

impl From<desidua_core::Tile> for Tile {
    fn from(t: desidua_core::Tile) -> Self {
        Self {
            is_placeholder: t.is_placeholder(),
            key: t.key,
            participant_sid: t.participant_sid,
            track_sid: t.track_sid,
            source: t.source.into(),
            display_name: t.display_name,
            initial: t.initial,
            is_local: t.is_local,
            is_muted: t.is_muted,
            is_speaking: t.is_speaking,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub sid: String,
    pub identity: String,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub is_local: bool,
}

impl From<desidua_core::RosterEntry> for RosterEntry {
    fn from(e: desidua_core::RosterEntry) -> Self {
        Self {
            sid: e.sid,
            identity: e.identity,
            microphone_enabled: e.microphone_enabled,
            camera_enabled: e.camera_enabled,
            is_local: e.is_local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Gallery,
    Speaker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallLayout {
    Gallery {
        columns: u32,
        tile_width: u32,
        tile_height: u32,
        tiles: Vec<Tile>,
    },
    Speaker {
        main: Option<Tile>,
        thumbnails: Vec<Tile>,
        thumbnail_width: u32,
        thumbnail_height: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPresence {
    pub participant_count: u32,
    pub roster: Vec<RosterEntry>,
    pub layout: CallLayout,
}

impl CallPresence {
    fn build(view: desidua_core::PresenceView, viewport_width: u32, mode: ViewMode) -> Self {
        let layout = match mode {
            ViewMode::Gallery => {
                let grid = GalleryLayout::compute(view.tiles.len(), viewport_width);
                CallLayout::Gallery {
                    columns: grid.columns,
                    tile_width: grid.tile_width,
                    tile_height: grid.tile_height,
                    tiles: view.tiles.into_iter().map(Tile::from).collect(),
                }
            }
            ViewMode::Speaker => {
                let split = SpeakerLayout::split(&view.tiles);
                CallLayout::Speaker {
                    main: split.main.map(Tile::from),
                    thumbnails: split.thumbnails.into_iter().map(Tile::from).collect(),
                    thumbnail_width: THUMBNAIL_WIDTH,
                    thumbnail_height: THUMBNAIL_HEIGHT,
                }
            }
        };
        Self {
            participant_count: view.participant_count as u32,
            roster: view.roster.into_iter().map(RosterEntry::from).collect(),
            layout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Unknown,
}

impl From<desidua_core::BookingStatus> for BookingStatus {
    fn from(s: desidua_core::BookingStatus) -> Self {
        match s {
            desidua_core::BookingStatus::Pending => Self::Pending,
            desidua_core::BookingStatus::Confirmed => Self::Confirmed,
            desidua_core::BookingStatus::Cancelled => Self::Cancelled,
            desidua_core::BookingStatus::Completed => Self::Completed,
            desidua_core::BookingStatus::Unknown => Self::Unknown,
        }
    }
}

impl From<BookingStatus> for desidua_core::BookingStatus {
    fn from(s: BookingStatus) -> Self {
        match s {
            BookingStatus::Pending => Self::Pending,
            BookingStatus::Confirmed => Self::Confirmed,
            BookingStatus::Cancelled => Self::Cancelled,
            BookingStatus::Completed => Self::Completed,
            BookingStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    Unknown,
}

impl From<desidua_core::PaymentStatus> for PaymentStatus {
    fn from(s: desidua_core::PaymentStatus) -> Self {
        match s {
            desidua_core::PaymentStatus::Paid => Self::Paid,
            desidua_core::PaymentStatus::Unpaid => Self::Unpaid,
            desidua_core::PaymentStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: String,
    pub booking_code: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub patient_name: Option<String>,
    pub service_name: Option<String>,
    pub doctor_name: Option<String>,
    pub date: Option<String>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub next_actions: Vec<BookingStatus>,
}

impl From<desidua_core::Booking> for Booking {
    fn from(b: desidua_core::Booking) -> Self {
        Self {
            next_actions: b
                .status
                .next_actions()
                .into_iter()
                .map(BookingStatus::from)
                .collect(),
            patient_name: b.patient_name().map(str::to_string),
            service_name: b.service.and_then(|s| s.name),
            doctor_name: b.doctor.and_then(|d| d.name),
            id: b.id,
            booking_code: b.booking_code,
            status: b.status.into(),
            payment_status: b.payment_status.into(),
            date: b.date,
            time_start: b.time_start,
            time_end: b.time_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub request_timeout_secs: u64,
    pub publish_audio_on_join: bool,
    pub publish_video_on_join: bool,
}

impl From<desidua_core::Config> for Config {
    fn from(c: desidua_core::Config) -> Self {
        Self {
            api_url: c.api_url,
            ws_url: c.ws_url,
            request_timeout_secs: c.request_timeout_secs,
            publish_audio_on_join: c.publish_audio_on_join,
            publish_video_on_join: c.publish_video_on_join,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueLine {
    pub booking_code: String,
    pub service_name: Option<String>,
    pub is_live: bool,
    pub price: f64,
    pub doctor_income: f64,
}

impl From<desidua_core::RevenueLine> for RevenueLine {
    fn from(l: desidua_core::RevenueLine) -> Self {
        Self {
            booking_code: l.booking_code,
            service_name: l.service_name,
            is_live: l.is_live,
            price: l.price,
            doctor_income: l.doctor_income,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueSummary {
    pub total_doctor_income: f64,
    pub total_app_income: f64,
    pub total_booking: u32,
    pub live_income: f64,
    pub detail: Vec<RevenueLine>,
}

impl From<desidua_core::RevenueSummary> for RevenueSummary {
    fn from(r: desidua_core::RevenueSummary) -> Self {
        Self {
            live_income: r.live_income(),
            total_doctor_income: r.total_doctor_income,
            total_app_income: r.total_app_income,
            total_booking: r.total_booking,
            detail: r.detail.into_iter().map(RevenueLine::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

impl From<desidua_core::SoapNote> for SoapNote {
    fn from(n: desidua_core::SoapNote) -> Self {
        Self {
            subjective: n.subjective,
            objective: n.objective,
            assessment: n.assessment,
            plan: n.plan,
        }
    }
}

impl From<SoapNote> for desidua_core::SoapNote {
    fn from(n: SoapNote) -> Self {
        Self {
            subjective: n.subjective,
            objective: n.objective,
            assessment: n.assessment,
            plan: n.plan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub consultation_date: Option<String>,
    pub note: SoapNote,
    /// S, O, A, P order.
    pub filled_sections: Vec<bool>,
}

impl From<&desidua_core::MedicalRecord> for MedicalRecord {
    fn from(r: &desidua_core::MedicalRecord) -> Self {
        Self {
            id: r.id.clone(),
            patient_id: r.patient_id.clone(),
            patient_name: r.patient_name().map(str::to_string),
            consultation_date: r.consultation_date.clone(),
            note: r.soap().into(),
            filled_sections: r.filled_sections().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctor {
    pub id: String,
    pub name: Option<String>,
}

impl From<desidua_core::Doctor> for Doctor {
    fn from(d: desidua_core::Doctor) -> Self {
        Self {
            id: d.id,
            name: d.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorSchedule {
    pub id: String,
    pub doctor_id: String,
    pub doctor_name: Option<String>,
    pub day_of_week: u8,
    pub day_name: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
}

impl From<desidua_core::DoctorSchedule> for DoctorSchedule {
    fn from(s: desidua_core::DoctorSchedule) -> Self {
        Self {
            day_name: s.day_name().map(str::to_string),
            doctor_name: s.doctor.and_then(|d| d.name),
            id: s.id,
            doctor_id: s.doctor_id,
            day_of_week: s.day_of_week,
            start_time: s.start_time,
            end_time: s.end_time,
            break_start: s.break_start,
            break_end: s.break_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDraft {
    pub doctor_id: String,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub break_start: Option<String>,
    pub break_end: Option<String>,
}

impl From<ScheduleDraft> for desidua_core::ScheduleDraft {
    fn from(d: ScheduleDraft) -> Self {
        Self {
            doctor_id: d.doctor_id,
            day_of_week: d.day_of_week,
            start_time: d.start_time,
            end_time: d.end_time,
            break_start: d.break_start,
            break_end: d.break_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTime {
    pub id: String,
    pub doctor_id: Option<String>,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
}

impl From<desidua_core::BlockedTime> for BlockedTime {
    fn from(b: desidua_core::BlockedTime) -> Self {
        Self {
            id: b.id,
            doctor_id: b.doctor_id,
            date: b.date,
            time_start: b.time_start,
            time_end: b.time_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTimeDraft {
    pub doctor_id: Option<String>,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
}

impl From<BlockedTimeDraft> for desidua_core::BlockedTimeDraft {
    fn from(d: BlockedTimeDraft) -> Self {
        Self {
            doctor_id: d.doctor_id,
            date: d.date,
            time_start: d.time_start,
            time_end: d.time_end,
        }
    }
}

/// Planar YUV 4:2:0 frame crossing the boundary in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    pub rotation: u32,
    pub y: Vec<u8>,
    pub stride_y: u32,
    pub u: Vec<u8>,
    pub stride_u: u32,
    pub v: Vec<u8>,
    pub stride_v: u32,
}

impl From<desidua_core::I420Frame> for I420Frame {
    fn from(f: desidua_core::I420Frame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            rotation: f.rotation,
            y: f.y,
            stride_y: f.stride_y,
            u: f.u,
            stride_u: f.stride_u,
            v: f.v,
            stride_v: f.stride_v,
        }
    }
}

impl From<I420Frame> for desidua_core::I420Frame {
    fn from(f: I420Frame) -> Self {
        Self {
            width: f.width,
            height: f.height,
            rotation: f.rotation,
            y: f.y,
            stride_y: f.stride_y,
            u: f.u,
            stride_u: f.stride_u,
            v: f.v,
            stride_v: f.stride_v,
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DesiduaError {
    #[error("Network error: {msg}")]
    Network { msg: String },
    #[error("Timeout: {msg}")]
    Timeout { msg: String },
    #[error("Unauthorized: {msg}")]
    Unauthorized { msg: String },
    #[error("Not found: {msg}")]
    NotFound { msg: String },
    #[error("HTTP status {status}")]
    Http { status: u16 },
    #[error("Malformed response: {msg}")]
    MalformedResponse { msg: String },
    #[error("Invalid input: {msg}")]
    InvalidInput { msg: String },
    #[error("Call token unavailable")]
    TokenUnavailable,
    #[error("Connection error: {msg}")]
    Connection { msg: String },
    #[error("Device error: {msg}")]
    Device { msg: String },
    #[error("Cancelled")]
    Cancelled,
    #[error("Storage error: {msg}")]
    Storage { msg: String },
    #[error("Booking error: {msg}")]
    Booking { msg: String },
}

impl From<desidua_core::DesiduaError> for DesiduaError {
    fn from(e: desidua_core::DesiduaError) -> Self {
        use desidua_core::DesiduaError as Core;
        tracing::error!("DesiduaError: {e}");
        match e {
            Core::Network(msg) => Self::Network { msg },
            Core::Timeout(msg) => Self::Timeout { msg },
            Core::Unauthorized(msg) => Self::Unauthorized { msg },
            Core::NotFound(msg) => Self::NotFound { msg },
            Core::Http { status } => Self::Http { status },
            Core::MalformedResponse(msg) => Self::MalformedResponse { msg },
            Core::InvalidInput(msg) => Self::InvalidInput { msg },
            Core::TokenUnavailable => Self::TokenUnavailable,
            Core::Connection(msg) => Self::Connection { msg },
            Core::Device(msg) => Self::Device { msg },
            Core::Cancelled => Self::Cancelled,
            Core::Storage(msg) => Self::Storage { msg },
            Core::Booking(msg) => Self::Booking { msg },
        }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Platform audio routing (AVAudioSession category, Android audio focus).
pub trait AudioRouting: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// Receives decoded frames of a remote video track for display.
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, track_sid: String, frame: I420Frame);
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn CallEventListener>,
}

impl desidua_core::CallEventListener for BridgeListener {
    fn on_event(&self, event: desidua_core::CallEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

struct BridgeSink {
    ffi_sink: Box<dyn VideoSink>,
}

impl desidua_core::VideoSink for BridgeSink {
    fn on_frame(&self, track_sid: &str, frame: desidua_core::I420Frame) {
        self.ffi_sink.on_frame(track_sid.to_string(), frame.into());
    }
}

/// Audio session handed to the core; forwards to whatever routing the host
/// registered, if any.
#[derive(Default)]
struct HostAudio {
    routing: StdMutex<Option<Arc<dyn AudioRouting>>>,
}

impl HostAudio {
    fn routing(&self) -> Option<Arc<dyn AudioRouting>> {
        self.routing.lock().unwrap().clone()
    }
}

impl desidua_core::AudioSession for HostAudio {
    fn start(&self) -> Result<(), desidua_core::DesiduaError> {
        if let Some(routing) = self.routing() {
            routing.start();
        }
        Ok(())
    }

    fn stop(&self) {
        if let Some(routing) = self.routing() {
            routing.stop();
        }
    }
}

// ── DesiduaClient: main FFI object ────────────────────────────────────

/// Backend services bound to one API base URL.
struct Backend {
    auth: AuthService,
    bookings: BookingService,
    calls: CallAccessResolver,
    revenue: RevenueService,
    records: MedicalRecordService,
    schedules: ScheduleService,
    blocked: BlockedTimeService,
}

impl Backend {
    fn new(
        config: &desidua_core::Config,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, desidua_core::DesiduaError> {
        let client = BackendClient::new(config, Arc::new(StoredCredential::new(store.clone())))?;
        Ok(Self {
            auth: AuthService::new(client.clone(), store),
            bookings: BookingService::new(client.clone()),
            calls: CallAccessResolver::new(client.clone()),
            revenue: RevenueService::new(client.clone()),
            records: MedicalRecordService::new(client.clone()),
            schedules: ScheduleService::new(client.clone()),
            blocked: BlockedTimeService::new(client),
        })
    }
}

type Session = SessionController<LiveKitConnector>;

fn build_session(
    config: &desidua_core::Config,
    audio: Arc<HostAudio>,
    media: Arc<MediaBridge>,
) -> Session {
    SessionController::new(
        LiveKitConnector::new(media),
        audio,
        &config.ws_url,
        ConnectOptions::from(config),
    )
}

/// Counts `join` calls between picking up the session and settling, so a
/// config change cannot swap the session out from under them.
struct JoinInFlight<'a>(&'a AtomicUsize);

impl<'a> JoinInFlight<'a> {
    fn enter(joins: &'a AtomicUsize) -> Self {
        joins.fetch_add(1, Ordering::SeqCst);
        Self(joins)
    }
}

impl Drop for JoinInFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
fn credential_store(_data_dir: &str) -> Arc<dyn CredentialStore> {
    Arc::new(desidua_core::KeyringStore::new("desidua"))
}

#[cfg(any(target_os = "android", target_os = "ios"))]
fn credential_store(data_dir: &str) -> Arc<dyn CredentialStore> {
    Arc::new(desidua_core::LocalStorage::new(data_dir))
}

pub struct DesiduaClient {
    config: ConfigStore,
    store: Arc<dyn CredentialStore>,
    audio: Arc<HostAudio>,
    media: Arc<MediaBridge>,
    backend: RwLock<Arc<Backend>>,
    session: RwLock<Session>,
    joins: AtomicUsize,
    listeners: StdMutex<Vec<Arc<BridgeListener>>>,
    rt: tokio::runtime::Runtime,
}

impl DesiduaClient {
    pub fn new(data_dir: String) -> Result<Self, DesiduaError> {
        Self::with_store(&data_dir, credential_store(&data_dir))
    }

    fn with_store(data_dir: &str, store: Arc<dyn CredentialStore>) -> Result<Self, DesiduaError> {
        tracing::info!("DesiduaClient::new(data_dir={data_dir})");
        let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
        let config = ConfigStore::new(data_dir);
        let current = config.get();
        let audio = Arc::new(HostAudio::default());
        let media = Arc::new(MediaBridge::new());
        let backend = Backend::new(&current, store.clone())?;
        let session = build_session(&current, audio.clone(), media.clone());

        Ok(Self {
            config,
            store,
            audio,
            media,
            backend: RwLock::new(Arc::new(backend)),
            session: RwLock::new(session),
            joins: AtomicUsize::new(0),
            listeners: StdMutex::new(Vec::new()),
            rt,
        })
    }

    fn backend(&self) -> Arc<Backend> {
        self.backend.read().unwrap().clone()
    }

    fn session(&self) -> Session {
        self.session.read().unwrap().clone()
    }

    pub fn login(&self, email: String, password: String) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.auth.login(&email, &password))
            .map_err(DesiduaError::from)
    }

    pub fn logout(&self) -> Result<(), DesiduaError> {
        self.backend().auth.logout().map_err(DesiduaError::from)
    }

    pub fn is_logged_in(&self) -> bool {
        self.backend().auth.is_logged_in()
    }

    pub fn telemedicine_bookings(&self) -> Result<Vec<Booking>, DesiduaError> {
        let backend = self.backend();
        let bookings = self.rt.block_on(backend.bookings.telemedicine_bookings())?;
        Ok(bookings.into_iter().map(Booking::from).collect())
    }

    pub fn update_booking_status(
        &self,
        booking_id: String,
        status: BookingStatus,
    ) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.bookings.update_status(&booking_id, status.into()))
            .map_err(DesiduaError::from)
    }

    pub fn resolve_call(&self, booking_id: String) -> Result<String, DesiduaError> {
        let backend = self.backend();
        let token = self.rt.block_on(backend.calls.resolve(&booking_id))?;
        Ok(token.as_str().to_string())
    }

    pub fn join(&self, token: Option<String>) -> Result<(), DesiduaError> {
        let _joining = JoinInFlight::enter(&self.joins);
        let session = self.session();
        let token = token.map(RoomToken::new);

        // A panic must not unwind across the FFI boundary.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.rt.block_on(session.begin(token.as_ref()))
        }));

        match result {
            Ok(res) => res.map_err(DesiduaError::from),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("join() panicked: {msg}");
                // Release whatever the aborted join acquired.
                self.rt.block_on(session.end());
                Err(DesiduaError::Connection {
                    msg: format!("panic in join: {msg}"),
                })
            }
        }
    }

    pub fn leave(&self) {
        let session = self.session();
        self.rt.block_on(session.end());
    }

    pub fn toggle_microphone(&self) -> Option<bool> {
        let session = self.session();
        self.rt.block_on(session.toggle_microphone())
    }

    pub fn toggle_camera(&self) -> Option<bool> {
        let session = self.session();
        self.rt.block_on(session.toggle_camera())
    }

    pub fn session_state(&self) -> SessionState {
        self.session().state().into()
    }

    pub fn presence(&self, viewport_width: u32, mode: ViewMode) -> CallPresence {
        let view = desidua_core::presence::project(&self.session().snapshot());
        CallPresence::build(view, viewport_width, mode)
    }

    pub fn add_listener(&self, listener: Box<dyn CallEventListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.session().add_listener(bridge.clone());
        self.listeners.lock().unwrap().push(bridge);
    }

    pub fn set_audio_routing(&self, routing: Box<dyn AudioRouting>) {
        *self.audio.routing.lock().unwrap() = Some(Arc::from(routing));
    }

    // ── Back office ──────────────────────────────────────────────────

    pub fn revenue_summary(&self) -> Result<RevenueSummary, DesiduaError> {
        let backend = self.backend();
        Ok(self.rt.block_on(backend.revenue.summary())?.into())
    }

    /// Records of the signed-in doctor, narrowed by patient name when a
    /// query is given.
    pub fn medical_records(&self, query: Option<String>) -> Result<Vec<MedicalRecord>, DesiduaError> {
        let backend = self.backend();
        let records = self.rt.block_on(backend.records.records())?;
        let matched = desidua_core::filter_by_patient(&records, query.as_deref().unwrap_or(""));
        Ok(matched.into_iter().map(MedicalRecord::from).collect())
    }

    pub fn update_medical_record(&self, record_id: String, note: SoapNote) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.records.update(&record_id, &note.into()))
            .map_err(DesiduaError::from)
    }

    pub fn doctors(&self) -> Result<Vec<Doctor>, DesiduaError> {
        let backend = self.backend();
        let doctors = self.rt.block_on(backend.schedules.doctors())?;
        Ok(doctors.into_iter().map(Doctor::from).collect())
    }

    pub fn doctor_schedules(&self, doctor_id: Option<String>) -> Result<Vec<DoctorSchedule>, DesiduaError> {
        let backend = self.backend();
        let schedules = self
            .rt
            .block_on(backend.schedules.schedules(doctor_id.as_deref()))?;
        Ok(schedules.into_iter().map(DoctorSchedule::from).collect())
    }

    pub fn save_doctor_schedule(
        &self,
        schedule_id: Option<String>,
        draft: ScheduleDraft,
    ) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.schedules.save(schedule_id.as_deref(), &draft.into()))
            .map_err(DesiduaError::from)
    }

    pub fn delete_doctor_schedule(&self, schedule_id: String) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.schedules.delete(&schedule_id))
            .map_err(DesiduaError::from)
    }

    pub fn blocked_times(&self) -> Result<Vec<BlockedTime>, DesiduaError> {
        let backend = self.backend();
        let blocked = self.rt.block_on(backend.blocked.mine())?;
        Ok(blocked.into_iter().map(BlockedTime::from).collect())
    }

    pub fn add_blocked_time(&self, draft: BlockedTimeDraft) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.blocked.add(&draft.into()))
            .map_err(DesiduaError::from)
    }

    pub fn remove_blocked_time(&self, blocked_id: String) -> Result<(), DesiduaError> {
        let backend = self.backend();
        self.rt
            .block_on(backend.blocked.remove(&blocked_id))
            .map_err(DesiduaError::from)
    }

    // ── Call media ───────────────────────────────────────────────────

    /// Push captured microphone PCM. Dropped while no microphone is published.
    pub fn push_audio_frame(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
        channels: u32,
    ) -> Result<(), DesiduaError> {
        self.rt
            .block_on(self.media.push_audio(&samples, sample_rate, channels))
            .map_err(DesiduaError::from)
    }

    /// Push a captured camera frame. Dropped while no camera is published.
    pub fn push_video_frame(&self, frame: I420Frame) -> Result<(), DesiduaError> {
        self.media
            .push_video(&frame.into())
            .map_err(DesiduaError::from)
    }

    /// Remote call audio for the speaker, 48kHz mono, padded with silence.
    pub fn pull_audio_playback(&self, capacity: u32) -> Vec<i16> {
        self.media.pull_playout(capacity as usize)
    }

    pub fn start_video_renderer(
        &self,
        track_sid: String,
        sink: Box<dyn VideoSink>,
    ) -> Result<(), DesiduaError> {
        let _rt = self.rt.enter();
        self.media
            .start_renderer(&track_sid, Arc::new(BridgeSink { ffi_sink: sink }))
            .map_err(DesiduaError::from)
    }

    pub fn stop_video_renderer(&self, track_sid: String) {
        self.media.stop_renderer(&track_sid);
    }

    pub fn get_config(&self) -> Config {
        self.config.get().into()
    }

    pub fn set_api_url(&self, url: String) -> Result<(), DesiduaError> {
        self.reconfigure(|config| config.set_api_url(url))
    }

    pub fn set_ws_url(&self, url: String) -> Result<(), DesiduaError> {
        self.reconfigure(|config| config.set_ws_url(url))
    }

    pub fn set_publish_on_join(&self, audio: bool, video: bool) -> Result<(), DesiduaError> {
        self.reconfigure(|config| config.set_publish_on_join(audio, video))
    }

    /// Apply a config change and rebind services to it. Refused mid-call
    /// and while a join is settling so the live room is never orphaned.
    fn reconfigure(
        &self,
        apply: impl FnOnce(&ConfigStore) -> Result<(), desidua_core::DesiduaError>,
    ) -> Result<(), DesiduaError> {
        let mut session = self.session.write().unwrap();
        if self.joins.load(Ordering::SeqCst) > 0
            || session.state() != desidua_core::SessionState::Idle
        {
            return Err(DesiduaError::InvalidInput {
                msg: "settings cannot change during a call".into(),
            });
        }

        apply(&self.config)?;
        let current = self.config.get();
        *self.backend.write().unwrap() = Arc::new(Backend::new(&current, self.store.clone())?);

        let next = build_session(&current, self.audio.clone(), self.media.clone());
        for listener in self.listeners.lock().unwrap().iter() {
            next.add_listener(listener.clone());
        }
        *session = next;
        tracing::info!("config applied: api={} ws={}", current.api_url, current.ws_url);
        Ok(())
    }
}
