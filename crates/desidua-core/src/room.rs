//! Seam between the call flow and the real-time media client.
//!
//! The session controller only talks to a [`RoomConnector`] and the
//! [`RoomHandle`] it produces; presence projection only reads a [`RoomFeed`].
//! The LiveKit implementation lives in [`crate::livekit_room`].

use std::future::Future;

use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::errors::DesiduaError;
use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Camera,
    ScreenShare,
}

/// A call member as last reported by the media client. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantState {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
    pub is_local: bool,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub is_speaking: bool,
}

/// A published video stream, or a placeholder slot (`track_sid == None`)
/// for a participant without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub participant_sid: String,
    pub source: TrackSource,
    pub track_sid: Option<String>,
}

impl TrackRef {
    pub fn published(participant_sid: &str, source: TrackSource, track_sid: &str) -> Self {
        Self {
            participant_sid: participant_sid.to_string(),
            source,
            track_sid: Some(track_sid.to_string()),
        }
    }

    pub fn placeholder(participant_sid: &str) -> Self {
        Self {
            participant_sid: participant_sid.to_string(),
            source: TrackSource::Camera,
            track_sid: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.track_sid.is_none()
    }
}

/// Point-in-time view of the room: participants and ordered video tracks.
///
/// Track order is owned by the producer (camera before screen share, then
/// arrival order) and consumers must treat it as stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub participants: Vec<ParticipantState>,
    pub tracks: Vec<TrackRef>,
}

impl RoomSnapshot {
    pub fn participant(&self, sid: &str) -> Option<&ParticipantState> {
        self.participants.iter().find(|p| p.sid == sid)
    }
}

/// Notifications pushed by a live room after `connect` returns.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomSignal {
    Connected,
    Disconnected { reason: String },
    Failed(String),
    Snapshot(RoomSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub audio: bool,
    pub video: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl From<&Config> for ConnectOptions {
    fn from(config: &Config) -> Self {
        Self {
            audio: config.publish_audio_on_join,
            video: config.publish_video_on_join,
        }
    }
}

pub struct Connection<H> {
    pub handle: H,
    pub signals: mpsc::UnboundedReceiver<RoomSignal>,
}

/// Factory for live rooms.
///
/// Dropping the future returned by `connect` must release anything it
/// acquired; the controller relies on this to abandon in-flight connects.
pub trait RoomConnector: Send + Sync + 'static {
    type Handle: RoomHandle;

    fn connect(
        &self,
        url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> impl Future<Output = Result<Connection<Self::Handle>, DesiduaError>> + Send;
}

/// One connected room and its local participant.
pub trait RoomHandle: Send + Sync + 'static {
    /// Must tolerate being called on an already closed room.
    fn disconnect(&self) -> impl Future<Output = Result<(), DesiduaError>> + Send;

    /// `None` while the local participant is not available.
    fn microphone_enabled(&self) -> Option<bool>;

    /// `None` while the local participant is not available.
    fn camera_enabled(&self) -> Option<bool>;

    fn set_microphone_enabled(
        &self,
        enabled: bool,
    ) -> impl Future<Output = Result<(), DesiduaError>> + Send;

    fn set_camera_enabled(
        &self,
        enabled: bool,
    ) -> impl Future<Output = Result<(), DesiduaError>> + Send;
}

/// Platform audio routing session (AVAudioSession, Android audio focus).
pub trait AudioSession: Send + Sync {
    fn start(&self) -> Result<(), DesiduaError>;
    fn stop(&self);
}

/// Read side of a call: room snapshots and connection state.
pub trait RoomFeed {
    fn snapshots(&self) -> watch::Receiver<RoomSnapshot>;
    fn states(&self) -> watch::Receiver<SessionState>;
}
