use crate::room::{ParticipantState, RoomSnapshot, TrackRef, TrackSource};

/// A participant as read from the media client, before ordering.
#[derive(Debug, Clone)]
pub struct ObservedParticipant {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
    pub is_local: bool,
    pub microphone_enabled: bool,
    pub camera_enabled: bool,
    pub video_tracks: Vec<ObservedTrack>,
}

#[derive(Debug, Clone)]
pub struct ObservedTrack {
    pub sid: String,
    pub source: TrackSource,
}

/// Turns unordered room observations into a [`RoomSnapshot`] with stable order.
///
/// First-seen order of participants and tracks is remembered across
/// refreshes. Participants: local first, then arrival order. Tracks: one
/// camera reference (or placeholder) per participant in participant order,
/// then every screen share in arrival order.
#[derive(Debug, Default)]
pub struct RosterTracker {
    participant_order: Vec<String>,
    track_order: Vec<String>,
}

impl RosterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh(
        &mut self,
        observed: Vec<ObservedParticipant>,
        active_speakers: &[String],
    ) -> RoomSnapshot {
        self.participant_order
            .retain(|sid| observed.iter().any(|p| &p.sid == sid));
        self.track_order.retain(|sid| {
            observed
                .iter()
                .any(|p| p.video_tracks.iter().any(|t| &t.sid == sid))
        });
        for p in &observed {
            if !self.participant_order.contains(&p.sid) {
                self.participant_order.push(p.sid.clone());
            }
            for t in &p.video_tracks {
                if !self.track_order.contains(&t.sid) {
                    self.track_order.push(t.sid.clone());
                }
            }
        }

        let mut observed = observed;
        observed.sort_by_key(|p| (!p.is_local, self.participant_rank(&p.sid)));

        let mut tracks = Vec::new();
        for p in &observed {
            let mut cameras: Vec<&ObservedTrack> = p
                .video_tracks
                .iter()
                .filter(|t| t.source == TrackSource::Camera)
                .collect();
            cameras.sort_by_key(|t| self.track_rank(&t.sid));
            if cameras.is_empty() {
                tracks.push(TrackRef::placeholder(&p.sid));
            }
            for t in cameras {
                tracks.push(TrackRef::published(&p.sid, TrackSource::Camera, &t.sid));
            }
        }

        let mut shares: Vec<(&str, &ObservedTrack)> = observed
            .iter()
            .flat_map(|p| p.video_tracks.iter().map(move |t| (p.sid.as_str(), t)))
            .filter(|(_, t)| t.source == TrackSource::ScreenShare)
            .collect();
        shares.sort_by_key(|(_, t)| self.track_rank(&t.sid));
        tracks.extend(
            shares
                .into_iter()
                .map(|(psid, t)| TrackRef::published(psid, TrackSource::ScreenShare, &t.sid)),
        );

        let participants = observed
            .into_iter()
            .map(|p| ParticipantState {
                is_speaking: active_speakers.contains(&p.sid),
                sid: p.sid,
                identity: p.identity,
                name: p.name,
                is_local: p.is_local,
                microphone_enabled: p.microphone_enabled,
                camera_enabled: p.camera_enabled,
            })
            .collect();

        RoomSnapshot {
            participants,
            tracks,
        }
    }

    fn participant_rank(&self, sid: &str) -> usize {
        self.participant_order
            .iter()
            .position(|s| s == sid)
            .unwrap_or(usize::MAX)
    }

    fn track_rank(&self, sid: &str) -> usize {
        self.track_order
            .iter()
            .position(|s| s == sid)
            .unwrap_or(usize::MAX)
    }
}
