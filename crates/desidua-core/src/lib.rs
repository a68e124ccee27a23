//! Desidua doctor app core business logic.
//!
//! Pure Rust crate with no platform dependencies.
//! Consumed by native UI shells via UniFFI bindings.

pub mod api;
pub mod auth;
pub mod blocked_time;
pub mod bookings;
pub mod call_access;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod layout;
pub mod livekit_room;
pub mod media;
pub mod medical_records;
pub mod presence;
pub mod revenue;
pub mod room;
pub mod roster;
pub mod schedules;
pub mod session;
mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use api::BackendClient;
pub use auth::AuthService;
pub use blocked_time::{BlockedTime, BlockedTimeDraft, BlockedTimeService};
pub use bookings::{Booking, BookingService, BookingStatus, PaymentStatus, Person, Service};
pub use call_access::{CallAccessResolver, RoomToken};
pub use config::{Config, ConfigStore};
pub use credentials::{
    AUTH_TOKEN_KEY, CredentialProvider, CredentialStore, LocalStorage, MemoryStore,
    StoredCredential,
};
#[cfg(not(any(target_os = "android", target_os = "ios")))]
pub use credentials::KeyringStore;
pub use errors::DesiduaError;
pub use events::{CallEvent, CallEventListener, CallNotice, NoticeKind};
pub use layout::{GalleryLayout, SpeakerLayout, ViewMode};
pub use livekit_room::{LiveKitConnector, LiveKitRoom};
pub use media::{I420Frame, MediaBridge, PlayoutBuffer, VideoSink};
pub use medical_records::{MedicalRecord, MedicalRecordService, SoapNote, filter_by_patient};
pub use presence::{PresenceProjector, PresenceView, RosterEntry, Tile};
pub use revenue::{RevenueLine, RevenueService, RevenueSummary};
pub use room::{
    AudioSession, ConnectOptions, Connection, ParticipantState, RoomConnector,
    RoomFeed, RoomHandle, RoomSignal, RoomSnapshot, TrackRef, TrackSource,
};
pub use schedules::{DAY_NAMES, Doctor, DoctorSchedule, ScheduleDraft, ScheduleService};
pub use session::{LocalMedia, SessionController, SessionState};
