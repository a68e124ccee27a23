//! LiveKit implementation of the room seam.

use std::sync::Arc;

use livekit::options::TrackPublishOptions;
use livekit::prelude::{
    LocalAudioTrack, LocalParticipant, LocalTrack, LocalTrackPublication, LocalVideoTrack,
    RemoteParticipant, Room, RoomEvent, RoomOptions,
};
use livekit::track::{TrackKind as LkTrackKind, TrackSource as LkTrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::{AudioSourceOptions, RtcAudioSource, RtcVideoSource, VideoResolution};
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::mpsc;

use crate::errors::DesiduaError;
use crate::media::MediaBridge;
use crate::room::{ConnectOptions, Connection, RoomConnector, RoomHandle, RoomSignal, TrackSource};
use crate::roster::{ObservedParticipant, ObservedTrack, RosterTracker};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

/// Connects to LiveKit rooms with auto-subscribe on.
///
/// Every room it opens shares one [`MediaBridge`], so the shells keep a
/// single capture and playout path across calls.
#[derive(Clone, Default)]
pub struct LiveKitConnector {
    media: Arc<MediaBridge>,
}

impl LiveKitConnector {
    pub fn new(media: Arc<MediaBridge>) -> Self {
        Self { media }
    }
}

impl RoomConnector for LiveKitConnector {
    type Handle = LiveKitRoom;

    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<Connection<LiveKitRoom>, DesiduaError> {
        let mut room_options = RoomOptions::default();
        room_options.auto_subscribe = true;

        let (room, events) = Room::connect(url, token, room_options)
            .await
            .map_err(|e| DesiduaError::Connection(e.to_string()))?;
        let mut guard = CloseOnDrop {
            room: Arc::new(room),
            media: self.media.clone(),
            armed: true,
        };

        let handle = LiveKitRoom {
            room: guard.room.clone(),
            media: self.media.clone(),
        };
        if options.audio {
            if let Err(e) = handle.publish_microphone().await {
                tracing::warn!("joining without microphone: {e}");
            }
        }
        if options.video {
            if let Err(e) = handle.publish_camera().await {
                tracing::warn!("joining without camera: {e}");
            }
        }

        let (tx, signals) = mpsc::unbounded_channel();
        // Receiver is held by the caller, so this cannot fail yet.
        let _ = tx.send(RoomSignal::Connected);
        tokio::spawn(event_loop(guard.room.clone(), self.media.clone(), events, tx));

        guard.armed = false;
        Ok(Connection { handle, signals })
    }
}

/// Closes a freshly connected room if `connect` is abandoned before it
/// hands the room over.
struct CloseOnDrop {
    room: Arc<Room>,
    media: Arc<MediaBridge>,
    armed: bool,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.media.reset();
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let room = self.room.clone();
        rt.spawn(async move {
            tracing::info!("closing room from abandoned connect");
            if let Err(e) = room.close().await {
                tracing::debug!("close after abandoned connect: {e}");
            }
        });
    }
}

/// A connected LiveKit room. The capture sources it publishes are handed
/// to the shared [`MediaBridge`] for the shells to feed.
pub struct LiveKitRoom {
    room: Arc<Room>,
    media: Arc<MediaBridge>,
}

impl LiveKitRoom {
    async fn publish_microphone(&self) -> Result<(), DesiduaError> {
        let source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );
        let track =
            LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(source.clone()));

        self.room
            .local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: LkTrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DesiduaError::Device(format!("publish microphone: {e}")))?;

        self.media.attach_microphone(source);
        tracing::info!("microphone track published");
        Ok(())
    }

    async fn publish_camera(&self) -> Result<(), DesiduaError> {
        let source = NativeVideoSource::new(
            VideoResolution {
                width: VIDEO_WIDTH,
                height: VIDEO_HEIGHT,
            },
            false,
        );
        let track =
            LocalVideoTrack::create_video_track("camera", RtcVideoSource::Native(source.clone()));

        self.room
            .local_participant()
            .publish_track(
                LocalTrack::Video(track),
                TrackPublishOptions {
                    source: LkTrackSource::Camera,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DesiduaError::Device(format!("publish camera: {e}")))?;

        self.media.attach_camera(source);
        tracing::info!("camera track published");
        Ok(())
    }

    fn publication(&self, source: LkTrackSource) -> Option<LocalTrackPublication> {
        self.room
            .local_participant()
            .track_publications()
            .into_values()
            .find(|p| p.source() == source)
    }

    fn source_enabled(&self, source: LkTrackSource) -> bool {
        self.publication(source).is_some_and(|p| !p.is_muted())
    }
}

impl RoomHandle for LiveKitRoom {
    async fn disconnect(&self) -> Result<(), DesiduaError> {
        self.media.reset();
        self.room
            .close()
            .await
            .map_err(|e| DesiduaError::Connection(e.to_string()))
    }

    fn microphone_enabled(&self) -> Option<bool> {
        Some(self.source_enabled(LkTrackSource::Microphone))
    }

    fn camera_enabled(&self) -> Option<bool> {
        Some(self.source_enabled(LkTrackSource::Camera))
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), DesiduaError> {
        match self.publication(LkTrackSource::Microphone) {
            Some(publication) if enabled => publication.unmute(),
            Some(publication) => publication.mute(),
            // Joined without a microphone; publish on first enable.
            None if enabled => return self.publish_microphone().await,
            None => {}
        }
        Ok(())
    }

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), DesiduaError> {
        match self.publication(LkTrackSource::Camera) {
            Some(publication) if enabled => publication.unmute(),
            Some(publication) => publication.mute(),
            None if enabled => return self.publish_camera().await,
            None => {}
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Reaction {
    Refresh,
    Speakers(Vec<String>),
    Closed(String),
    Ignore,
}

fn classify(event: RoomEvent) -> Reaction {
    match event {
        RoomEvent::Disconnected { reason } => Reaction::Closed(format!("{reason:?}")),
        RoomEvent::Reconnecting => {
            tracing::info!("room reconnecting");
            Reaction::Ignore
        }
        RoomEvent::Reconnected => {
            tracing::info!("room reconnected");
            Reaction::Refresh
        }
        RoomEvent::ActiveSpeakersChanged { speakers } => {
            Reaction::Speakers(speakers.iter().map(|p| p.sid().to_string()).collect())
        }
        RoomEvent::ParticipantConnected(_)
        | RoomEvent::ParticipantDisconnected(_)
        | RoomEvent::TrackSubscribed { .. }
        | RoomEvent::TrackUnsubscribed { .. }
        | RoomEvent::TrackUnpublished { .. }
        | RoomEvent::TrackMuted { .. }
        | RoomEvent::TrackUnmuted { .. }
        | RoomEvent::LocalTrackPublished { .. }
        | RoomEvent::LocalTrackUnpublished { .. } => Reaction::Refresh,
        _ => Reaction::Ignore,
    }
}

/// Routes subscribed tracks to the media bridge and rebuilds the room
/// snapshot on every membership, track or speaker change. Ends when the room
/// closes or the session stops listening.
async fn event_loop(
    room: Arc<Room>,
    media: Arc<MediaBridge>,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    signals: mpsc::UnboundedSender<RoomSignal>,
) {
    let mut roster = RosterTracker::new();
    let mut speakers: Vec<String> = Vec::new();

    if signals
        .send(RoomSignal::Snapshot(roster.refresh(observe(&room), &speakers)))
        .is_err()
    {
        return;
    }

    while let Some(event) = events.recv().await {
        match &event {
            RoomEvent::TrackSubscribed { track, .. } => media.track_subscribed(track),
            RoomEvent::TrackUnsubscribed { track, .. } => {
                media.track_unsubscribed(&track.sid().to_string())
            }
            _ => {}
        }
        match classify(event) {
            Reaction::Ignore => continue,
            Reaction::Closed(reason) => {
                tracing::info!("room disconnected: {reason}");
                let _ = signals.send(RoomSignal::Disconnected { reason });
                break;
            }
            Reaction::Speakers(sids) => speakers = sids,
            Reaction::Refresh => {}
        }
        let snapshot = roster.refresh(observe(&room), &speakers);
        if signals.send(RoomSignal::Snapshot(snapshot)).is_err() {
            break;
        }
    }
    tracing::debug!("room event loop ended");
}

fn observe(room: &Room) -> Vec<ObservedParticipant> {
    let mut remotes: Vec<ObservedParticipant> = room
        .remote_participants()
        .values()
        .map(observe_remote)
        .collect();
    remotes.sort_by(|a, b| a.identity.cmp(&b.identity));

    let mut observed = vec![observe_local(&room.local_participant())];
    observed.extend(remotes);
    observed
}

fn observe_local(local: &LocalParticipant) -> ObservedParticipant {
    let publications: Vec<_> = local.track_publications().into_values().collect();
    let enabled = |source| {
        publications
            .iter()
            .any(|p| p.source() == source && !p.is_muted())
    };
    let mut video_tracks: Vec<ObservedTrack> = publications
        .iter()
        .filter(|p| p.kind() == LkTrackKind::Video && !p.is_muted())
        .filter_map(|p| observed_track(p.source(), p.sid().to_string()))
        .collect();
    video_tracks.sort_by(|a, b| a.sid.cmp(&b.sid));

    ObservedParticipant {
        sid: local.sid().to_string(),
        identity: local.identity().to_string(),
        name: non_empty(local.name().to_string()),
        is_local: true,
        microphone_enabled: enabled(LkTrackSource::Microphone),
        camera_enabled: enabled(LkTrackSource::Camera),
        video_tracks,
    }
}

fn observe_remote(remote: &RemoteParticipant) -> ObservedParticipant {
    let publications: Vec<_> = remote.track_publications().into_values().collect();
    let enabled = |source| {
        publications
            .iter()
            .any(|p| p.source() == source && !p.is_muted())
    };
    // Only subscribed tracks can be rendered.
    let mut video_tracks: Vec<ObservedTrack> = publications
        .iter()
        .filter(|p| p.kind() == LkTrackKind::Video && !p.is_muted() && p.track().is_some())
        .filter_map(|p| observed_track(p.source(), p.sid().to_string()))
        .collect();
    video_tracks.sort_by(|a, b| a.sid.cmp(&b.sid));

    ObservedParticipant {
        sid: remote.sid().to_string(),
        identity: remote.identity().to_string(),
        name: non_empty(remote.name().to_string()),
        is_local: false,
        microphone_enabled: enabled(LkTrackSource::Microphone),
        camera_enabled: enabled(LkTrackSource::Camera),
        video_tracks,
    }
}

fn observed_track(source: LkTrackSource, sid: String) -> Option<ObservedTrack> {
    let source = match source {
        LkTrackSource::Camera => TrackSource::Camera,
        LkTrackSource::Screenshare => TrackSource::ScreenShare,
        _ => return None,
    };
    Some(ObservedTrack { sid, source })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
