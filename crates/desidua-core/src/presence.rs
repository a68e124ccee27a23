use std::collections::HashSet;

use tokio::sync::watch;

use crate::room::{ParticipantState, RoomFeed, RoomSnapshot, TrackRef, TrackSource};

const FALLBACK_NAME: &str = "Participant";

/// One video tile in the call grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub key: String,
    pub participant_sid: String,
    pub track_sid: Option<String>,
    pub source: TrackSource,
    pub display_name: String,
    /// Avatar letter shown on placeholders.
    pub initial: String,
    pub is_local: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
}

impl Tile {
    pub fn is_placeholder(&self) -> bool {
        self.track_sid.is_none()
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

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceView {
    pub tiles: Vec<Tile>,
    pub participant_count: usize,
    pub roster: Vec<RosterEntry>,
}

/// Project a room snapshot into the call screen view model.
///
/// Every track reference yields one tile in the order given; any participant
/// not referenced by a track gets a trailing placeholder tile.
pub fn project(snapshot: &RoomSnapshot) -> PresenceView {
    let mut tiles = Vec::with_capacity(snapshot.tracks.len());
    let mut placed: HashSet<&str> = HashSet::new();
    let mut placeholders: HashSet<&str> = HashSet::new();

    for track in &snapshot.tracks {
        if track.is_placeholder() && !placeholders.insert(track.participant_sid.as_str()) {
            continue;
        }
        placed.insert(track.participant_sid.as_str());
        tiles.push(tile_for(track, snapshot.participant(&track.participant_sid)));
    }
    for p in &snapshot.participants {
        if !placed.contains(p.sid.as_str()) {
            tiles.push(tile_for(&TrackRef::placeholder(&p.sid), Some(p)));
        }
    }

    let mut roster: Vec<RosterEntry> = snapshot
        .participants
        .iter()
        .map(|p| RosterEntry {
            sid: p.sid.clone(),
            identity: p.identity.clone(),
            microphone_enabled: p.microphone_enabled,
            camera_enabled: p.camera_enabled,
            is_local: p.is_local,
        })
        .collect();
    // stable: local first, remote order preserved
    roster.sort_by_key(|e| !e.is_local);

    PresenceView {
        tiles,
        participant_count: snapshot.participants.len(),
        roster,
    }
}

fn tile_for(track: &TrackRef, participant: Option<&ParticipantState>) -> Tile {
    let display_name = participant
        .map(display_name)
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let key = match &track.track_sid {
        Some(sid) => sid.clone(),
        None => format!("placeholder:{}", track.participant_sid),
    };
    Tile {
        key,
        participant_sid: track.participant_sid.clone(),
        track_sid: track.track_sid.clone(),
        source: track.source,
        initial: initial(participant.map(|p| p.identity.as_str()).unwrap_or("")),
        display_name,
        is_local: participant.is_some_and(|p| p.is_local),
        is_muted: participant.is_some_and(|p| !p.microphone_enabled),
        is_speaking: participant.is_some_and(|p| p.is_speaking),
    }
}

fn display_name(p: &ParticipantState) -> String {
    if !p.identity.is_empty() {
        return p.identity.clone();
    }
    match p.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => FALLBACK_NAME.to_string(),
    }
}

fn initial(identity: &str) -> String {
    identity
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "U".to_string())
}

/// Re-projects the room whenever its feed publishes a new snapshot.
pub struct PresenceProjector {
    snapshots: watch::Receiver<RoomSnapshot>,
}

impl PresenceProjector {
    pub fn new(feed: &impl RoomFeed) -> Self {
        Self {
            snapshots: feed.snapshots(),
        }
    }

    /// Projection of the latest snapshot.
    pub fn current(&mut self) -> PresenceView {
        let snapshot = self.snapshots.borrow_and_update().clone();
        project(&snapshot)
    }

    /// Wait for the next snapshot. `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<PresenceView> {
        self.snapshots.changed().await.ok()?;
        Some(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testing::{participant, sample_snapshot};

    struct SyntheticFeed {
        snapshots: watch::Sender<RoomSnapshot>,
        states: watch::Sender<SessionState>,
    }

    impl SyntheticFeed {
        fn new() -> Self {
            Self {
                snapshots: watch::channel(RoomSnapshot::default()).0,
                states: watch::channel(SessionState::Idle).0,
            }
        }
    }

    impl RoomFeed for SyntheticFeed {
        fn snapshots(&self) -> watch::Receiver<RoomSnapshot> {
            self.snapshots.subscribe()
        }

        fn states(&self) -> watch::Receiver<SessionState> {
            self.states.subscribe()
        }
    }

    #[test]
    fn projects_sample_room() {
        let view = project(&sample_snapshot());

        let names: Vec<&str> = view.tiles.iter().map(|t| t.display_name.as_str()).collect();
        assert_eq!(names, vec!["dr-sari", "patient-budi", "relative-ani"]);
        assert_eq!(view.participant_count, 3);

        let doctor = &view.tiles[0];
        assert!(doctor.is_local && !doctor.is_muted && !doctor.is_placeholder());

        let patient = &view.tiles[1];
        assert!(patient.is_speaking && !patient.is_local);

        let relative = &view.tiles[2];
        assert!(relative.is_placeholder() && relative.is_muted);
        assert_eq!(relative.initial, "R");
    }

    #[test]
    fn projection_is_deterministic() {
        let snapshot = sample_snapshot();
        assert_eq!(project(&snapshot), project(&snapshot));
    }

    #[test]
    fn untracked_participants_get_one_placeholder() {
        let snapshot = RoomSnapshot {
            participants: vec![participant("a", "alice", true), participant("b", "bob", false)],
            tracks: vec![TrackRef::placeholder("b"), TrackRef::placeholder("b")],
        };
        let view = project(&snapshot);
        let keys: Vec<&str> = view.tiles.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["placeholder:b", "placeholder:a"]);
    }

    #[test]
    fn screen_share_adds_a_second_tile() {
        let mut snapshot = sample_snapshot();
        snapshot
            .tracks
            .push(TrackRef::published("PA_p1", TrackSource::ScreenShare, "TR_share"));
        let view = project(&snapshot);
        assert_eq!(view.tiles.len(), 4);
        assert_eq!(view.tiles[3].source, TrackSource::ScreenShare);
        assert_eq!(view.tiles[3].display_name, "patient-budi");
    }

    #[test]
    fn unknown_participant_falls_back() {
        let snapshot = RoomSnapshot {
            participants: vec![],
            tracks: vec![TrackRef::published("ghost", TrackSource::Camera, "t")],
        };
        let tile = &project(&snapshot).tiles[0];
        assert_eq!(tile.display_name, "Participant");
        assert_eq!(tile.initial, "U");
        assert!(!tile.is_muted && !tile.is_local);
    }

    #[test]
    fn name_used_when_identity_blank() {
        let mut p = participant("a", "", false);
        p.name = Some("Dr. Sari".into());
        let snapshot = RoomSnapshot {
            participants: vec![p],
            tracks: vec![],
        };
        assert_eq!(project(&snapshot).tiles[0].display_name, "Dr. Sari");
    }

    #[test]
    fn roster_lists_local_first() {
        let snapshot = RoomSnapshot {
            participants: vec![participant("r", "remote", false), participant("l", "local", true)],
            tracks: vec![],
        };
        let roster = project(&snapshot).roster;
        assert!(roster[0].is_local);
        assert_eq!(roster[1].identity, "remote");
    }

    #[tokio::test]
    async fn projector_follows_feed() {
        let feed = SyntheticFeed::new();
        let mut projector = PresenceProjector::new(&feed);
        assert_eq!(projector.current(), PresenceView::default());

        feed.snapshots.send_replace(sample_snapshot());
        let view = projector.next().await.unwrap();
        assert_eq!(view.tiles.len(), 3);

        feed.snapshots.send_replace(RoomSnapshot::default());
        assert_eq!(projector.next().await.unwrap().participant_count, 0);

        drop(feed);
        assert!(projector.next().await.is_none());
    }
}
