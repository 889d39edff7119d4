use std::collections::HashMap;

use crate::events::{ParticipantInfo, TrackKind, TrackSource};

/// A view-side reference to one remote track publication.
///
/// `subscribed` mirrors whether the underlying media is available: a
/// publication can be announced (published) before the local side receives
/// the track, and only subscribed publications can drive a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRef {
    pub track_sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
    pub subscribed: bool,
}

/// Input to the projection reducer, produced by the room event loop.
#[derive(Debug, Clone)]
pub enum ProjectionEvent {
    /// A participant joined, with the publication snapshot the session
    /// already holds for them. Seeding from the snapshot keeps the
    /// projection complete even for tracks published before the event
    /// stream was being watched.
    Joined {
        info: ParticipantInfo,
        publications: Vec<PublicationRef>,
    },
    Left {
        participant_sid: String,
    },
    Published {
        participant_sid: String,
        publication: PublicationRef,
    },
    Unpublished {
        participant_sid: String,
        track_sid: String,
    },
    Subscribed {
        participant_sid: String,
        publication: PublicationRef,
    },
    Unsubscribed {
        participant_sid: String,
        track_sid: String,
    },
}

/// Sink rebinding directives emitted by [`RoomProjection::apply`].
///
/// For a given (participant, kind) surface, a `Detach` for the old track is
/// always emitted before the `Attach` for its replacement, so a consumer
/// never holds two bindings on one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkUpdate {
    Detach {
        participant_sid: String,
        kind: TrackKind,
        track_sid: String,
    },
    Attach {
        participant_sid: String,
        kind: TrackKind,
        track_sid: String,
    },
}

#[derive(Debug, Clone)]
struct ParticipantEntry {
    info: ParticipantInfo,
    video: Vec<PublicationRef>,
    audio: Vec<PublicationRef>,
}

impl ParticipantEntry {
    fn list(&self, kind: TrackKind) -> &Vec<PublicationRef> {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    fn list_mut(&mut self, kind: TrackKind) -> &mut Vec<PublicationRef> {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }

    /// Insert unless a publication with the same track sid already exists.
    /// A duplicate `Subscribed` upgrades the existing entry in place.
    fn upsert(&mut self, publication: PublicationRef) {
        let list = self.list_mut(publication.kind);
        match list.iter_mut().find(|p| p.track_sid == publication.track_sid) {
            Some(existing) => {
                if publication.subscribed {
                    existing.subscribed = true;
                }
            }
            None => list.push(publication),
        }
    }

    /// Remove by track-sid identity. Position in the list is irrelevant.
    fn remove(&mut self, track_sid: &str) {
        self.video.retain(|p| p.track_sid != track_sid);
        self.audio.retain(|p| p.track_sid != track_sid);
    }

    /// The track that should drive the sink for this kind: first
    /// subscribed publication in list order, if any.
    fn head(&self, kind: TrackKind) -> Option<&str> {
        self.list(kind)
            .iter()
            .find(|p| p.subscribed)
            .map(|p| p.track_sid.as_str())
    }
}

/// Incremental reducer projecting room events into per-participant ordered
/// track lists and sink attachments.
///
/// Keyed by (participant sid, track sid) so duplicate event delivery is
/// idempotent and removal matches by identity. Updated by the room event
/// loop, read by UI layers.
#[derive(Debug, Clone, Default)]
pub struct RoomProjection {
    participants: Vec<ParticipantEntry>,
    attached: HashMap<(String, TrackKind), String>,
}

impl RoomProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event and return the sink rebindings it caused.
    pub fn apply(&mut self, event: ProjectionEvent) -> Vec<SinkUpdate> {
        match event {
            ProjectionEvent::Joined { info, publications } => {
                let sid = info.sid.clone();
                if self.entry_mut(&sid).is_none() {
                    self.participants.push(ParticipantEntry {
                        info,
                        video: Vec::new(),
                        audio: Vec::new(),
                    });
                }
                if let Some(entry) = self.entry_mut(&sid) {
                    for publication in publications {
                        entry.upsert(publication);
                    }
                }
                self.reconcile(&sid)
            }
            ProjectionEvent::Left { participant_sid } => {
                let Some(pos) = self
                    .participants
                    .iter()
                    .position(|p| p.info.sid == participant_sid)
                else {
                    return Vec::new();
                };
                self.participants.remove(pos);
                let mut updates = Vec::new();
                for kind in [TrackKind::Video, TrackKind::Audio] {
                    let key = (participant_sid.clone(), kind);
                    if let Some(track_sid) = self.attached.remove(&key) {
                        updates.push(SinkUpdate::Detach {
                            participant_sid: participant_sid.clone(),
                            kind,
                            track_sid,
                        });
                    }
                }
                updates
            }
            ProjectionEvent::Published { participant_sid, publication }
            | ProjectionEvent::Subscribed { participant_sid, publication } => {
                match self.entry_mut(&participant_sid) {
                    Some(entry) => entry.upsert(publication),
                    None => {
                        tracing::debug!(
                            "track event for unknown participant {participant_sid}, ignored"
                        );
                        return Vec::new();
                    }
                }
                self.reconcile(&participant_sid)
            }
            ProjectionEvent::Unpublished { participant_sid, track_sid }
            | ProjectionEvent::Unsubscribed { participant_sid, track_sid } => {
                match self.entry_mut(&participant_sid) {
                    Some(entry) => entry.remove(&track_sid),
                    None => return Vec::new(),
                }
                self.reconcile(&participant_sid)
            }
        }
    }

    /// Reset on disconnect.
    pub fn clear(&mut self) {
        self.participants.clear();
        self.attached.clear();
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| p.info.clone()).collect()
    }

    pub fn participant(&self, sid: &str) -> Option<&ParticipantInfo> {
        self.participants
            .iter()
            .find(|p| p.info.sid == sid)
            .map(|p| &p.info)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn video_tracks(&self, sid: &str) -> Vec<PublicationRef> {
        self.tracks(sid, TrackKind::Video)
    }

    pub fn audio_tracks(&self, sid: &str) -> Vec<PublicationRef> {
        self.tracks(sid, TrackKind::Audio)
    }

    /// The track sid currently bound to the (participant, kind) sink.
    pub fn attached(&self, sid: &str, kind: TrackKind) -> Option<&str> {
        self.attached
            .get(&(sid.to_string(), kind))
            .map(|s| s.as_str())
    }

    fn tracks(&self, sid: &str, kind: TrackKind) -> Vec<PublicationRef> {
        self.participants
            .iter()
            .find(|p| p.info.sid == sid)
            .map(|p| p.list(kind).clone())
            .unwrap_or_default()
    }

    fn entry_mut(&mut self, sid: &str) -> Option<&mut ParticipantEntry> {
        self.participants.iter_mut().find(|p| p.info.sid == sid)
    }

    /// Rebind sinks for one participant after their lists changed.
    fn reconcile(&mut self, sid: &str) -> Vec<SinkUpdate> {
        let mut updates = Vec::new();
        let Some(entry) = self.participants.iter().find(|p| p.info.sid == sid) else {
            return updates;
        };
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let desired = entry.head(kind).map(str::to_string);
            let key = (sid.to_string(), kind);
            let current = self.attached.get(&key).cloned();
            if current == desired {
                continue;
            }
            if let Some(track_sid) = current {
                self.attached.remove(&key);
                updates.push(SinkUpdate::Detach {
                    participant_sid: sid.to_string(),
                    kind,
                    track_sid,
                });
            }
            if let Some(track_sid) = desired {
                self.attached.insert(key, track_sid.clone());
                updates.push(SinkUpdate::Attach {
                    participant_sid: sid.to_string(),
                    kind,
                    track_sid,
                });
            }
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sid: &str) -> ParticipantInfo {
        ParticipantInfo {
            sid: sid.to_string(),
            identity: format!("identity-{sid}"),
            name: None,
        }
    }

    fn publication(track_sid: &str, kind: TrackKind, subscribed: bool) -> PublicationRef {
        PublicationRef {
            track_sid: track_sid.to_string(),
            kind,
            source: match kind {
                TrackKind::Audio => TrackSource::Microphone,
                TrackKind::Video => TrackSource::Camera,
            },
            subscribed,
        }
    }

    fn join(projection: &mut RoomProjection, sid: &str, pubs: Vec<PublicationRef>) -> Vec<SinkUpdate> {
        projection.apply(ProjectionEvent::Joined {
            info: info(sid),
            publications: pubs,
        })
    }

    #[test]
    fn duplicate_published_yields_one_entry() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![]);

        for _ in 0..2 {
            projection.apply(ProjectionEvent::Published {
                participant_sid: "p1".to_string(),
                publication: publication("t1", TrackKind::Video, false),
            });
        }

        assert_eq!(projection.video_tracks("p1").len(), 1);
    }

    #[test]
    fn join_seeds_all_existing_publications() {
        let mut projection = RoomProjection::new();
        join(
            &mut projection,
            "p1",
            vec![
                publication("a1", TrackKind::Audio, true),
                publication("v1", TrackKind::Video, false),
                publication("v2", TrackKind::Video, true),
            ],
        );

        assert_eq!(projection.audio_tracks("p1").len(), 1);
        assert_eq!(projection.video_tracks("p1").len(), 2);
    }

    #[test]
    fn seeded_join_then_duplicate_events_stays_consistent() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![publication("a1", TrackKind::Audio, true)]);

        // The session may replay subscribe events for tracks already seeded.
        projection.apply(ProjectionEvent::Subscribed {
            participant_sid: "p1".to_string(),
            publication: publication("a1", TrackKind::Audio, true),
        });

        assert_eq!(projection.audio_tracks("p1").len(), 1);
    }

    #[test]
    fn removal_matches_by_identity_not_position() {
        let mut projection = RoomProjection::new();
        join(
            &mut projection,
            "p1",
            vec![
                publication("v1", TrackKind::Video, true),
                publication("v2", TrackKind::Video, true),
                publication("v3", TrackKind::Video, true),
            ],
        );

        projection.apply(ProjectionEvent::Unpublished {
            participant_sid: "p1".to_string(),
            track_sid: "v2".to_string(),
        });

        let sids: Vec<_> = projection
            .video_tracks("p1")
            .into_iter()
            .map(|p| p.track_sid)
            .collect();
        assert_eq!(sids, ["v1", "v3"]);
    }

    #[test]
    fn net_effect_consistency() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![]);

        let sid = "p1".to_string();
        projection.apply(ProjectionEvent::Published {
            participant_sid: sid.clone(),
            publication: publication("t1", TrackKind::Video, false),
        });
        projection.apply(ProjectionEvent::Subscribed {
            participant_sid: sid.clone(),
            publication: publication("t1", TrackKind::Video, true),
        });
        assert_eq!(projection.video_tracks("p1").len(), 1);

        projection.apply(ProjectionEvent::Unsubscribed {
            participant_sid: sid.clone(),
            track_sid: "t1".to_string(),
        });
        assert!(projection.video_tracks("p1").is_empty());

        // Re-subscribe brings the publication back.
        projection.apply(ProjectionEvent::Subscribed {
            participant_sid: sid.clone(),
            publication: publication("t1", TrackKind::Video, true),
        });
        assert_eq!(projection.video_tracks("p1").len(), 1);

        projection.apply(ProjectionEvent::Unpublished {
            participant_sid: sid,
            track_sid: "t1".to_string(),
        });
        assert!(projection.video_tracks("p1").is_empty());
    }

    #[test]
    fn leave_removes_every_trace() {
        let mut projection = RoomProjection::new();
        join(
            &mut projection,
            "p1",
            vec![
                publication("a1", TrackKind::Audio, true),
                publication("v1", TrackKind::Video, true),
            ],
        );
        join(&mut projection, "p2", vec![publication("a2", TrackKind::Audio, true)]);

        let updates = projection.apply(ProjectionEvent::Left {
            participant_sid: "p1".to_string(),
        });

        assert!(projection.participant("p1").is_none());
        assert!(projection.video_tracks("p1").is_empty());
        assert!(projection.audio_tracks("p1").is_empty());
        assert!(projection.attached("p1", TrackKind::Video).is_none());
        assert!(projection.attached("p1", TrackKind::Audio).is_none());
        // Both attached tracks are explicitly detached for the sinks.
        assert_eq!(
            updates
                .iter()
                .filter(|u| matches!(u, SinkUpdate::Detach { .. }))
                .count(),
            2
        );
        // Other participants are untouched.
        assert_eq!(projection.audio_tracks("p2").len(), 1);
    }

    #[test]
    fn alex_scenario() {
        let mut projection = RoomProjection::new();

        // Alex joins with one audio publication already subscribed.
        let updates = join(
            &mut projection,
            "alex",
            vec![publication("a1", TrackKind::Audio, true)],
        );
        let audio: Vec<_> = projection
            .audio_tracks("alex")
            .into_iter()
            .map(|p| p.track_sid)
            .collect();
        assert_eq!(audio, ["a1"]);
        assert!(updates.contains(&SinkUpdate::Attach {
            participant_sid: "alex".to_string(),
            kind: TrackKind::Audio,
            track_sid: "a1".to_string(),
        }));

        // Alex publishes a video track.
        projection.apply(ProjectionEvent::Subscribed {
            participant_sid: "alex".to_string(),
            publication: publication("v1", TrackKind::Video, true),
        });
        let video: Vec<_> = projection
            .video_tracks("alex")
            .into_iter()
            .map(|p| p.track_sid)
            .collect();
        assert_eq!(video, ["v1"]);

        // Alex leaves.
        projection.apply(ProjectionEvent::Left {
            participant_sid: "alex".to_string(),
        });
        assert!(projection.audio_tracks("alex").is_empty());
        assert!(projection.video_tracks("alex").is_empty());
    }

    #[test]
    fn first_subscribed_track_drives_the_sink() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![]);

        // A published-but-unsubscribed head must not block attachment.
        projection.apply(ProjectionEvent::Published {
            participant_sid: "p1".to_string(),
            publication: publication("v1", TrackKind::Video, false),
        });
        assert!(projection.attached("p1", TrackKind::Video).is_none());

        let updates = projection.apply(ProjectionEvent::Subscribed {
            participant_sid: "p1".to_string(),
            publication: publication("v2", TrackKind::Video, true),
        });
        assert_eq!(projection.attached("p1", TrackKind::Video), Some("v2"));
        assert_eq!(
            updates,
            vec![SinkUpdate::Attach {
                participant_sid: "p1".to_string(),
                kind: TrackKind::Video,
                track_sid: "v2".to_string(),
            }]
        );
    }

    #[test]
    fn head_change_detaches_before_attaching() {
        let mut projection = RoomProjection::new();
        join(
            &mut projection,
            "p1",
            vec![
                publication("v1", TrackKind::Video, true),
                publication("v2", TrackKind::Video, true),
            ],
        );
        assert_eq!(projection.attached("p1", TrackKind::Video), Some("v1"));

        let updates = projection.apply(ProjectionEvent::Unsubscribed {
            participant_sid: "p1".to_string(),
            track_sid: "v1".to_string(),
        });

        assert_eq!(
            updates,
            vec![
                SinkUpdate::Detach {
                    participant_sid: "p1".to_string(),
                    kind: TrackKind::Video,
                    track_sid: "v1".to_string(),
                },
                SinkUpdate::Attach {
                    participant_sid: "p1".to_string(),
                    kind: TrackKind::Video,
                    track_sid: "v2".to_string(),
                },
            ]
        );
        assert_eq!(projection.attached("p1", TrackKind::Video), Some("v2"));
    }

    #[test]
    fn second_subscribed_track_is_tracked_but_not_rendered() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![publication("v1", TrackKind::Video, true)]);

        let updates = projection.apply(ProjectionEvent::Subscribed {
            participant_sid: "p1".to_string(),
            publication: publication("v2", TrackKind::Video, true),
        });

        assert!(updates.is_empty());
        assert_eq!(projection.video_tracks("p1").len(), 2);
        assert_eq!(projection.attached("p1", TrackKind::Video), Some("v1"));
    }

    #[test]
    fn events_for_unknown_participants_are_ignored() {
        let mut projection = RoomProjection::new();

        let updates = projection.apply(ProjectionEvent::Published {
            participant_sid: "ghost".to_string(),
            publication: publication("t1", TrackKind::Video, true),
        });
        assert!(updates.is_empty());

        let updates = projection.apply(ProjectionEvent::Unsubscribed {
            participant_sid: "ghost".to_string(),
            track_sid: "t1".to_string(),
        });
        assert!(updates.is_empty());
        assert_eq!(projection.participant_count(), 0);
    }

    #[test]
    fn duplicate_join_is_idempotent() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![publication("a1", TrackKind::Audio, true)]);
        join(&mut projection, "p1", vec![publication("a1", TrackKind::Audio, true)]);

        assert_eq!(projection.participant_count(), 1);
        assert_eq!(projection.audio_tracks("p1").len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let mut projection = RoomProjection::new();
        join(&mut projection, "p1", vec![publication("v1", TrackKind::Video, true)]);

        projection.clear();

        assert_eq!(projection.participant_count(), 0);
        assert!(projection.attached("p1", TrackKind::Video).is_none());
    }
}
