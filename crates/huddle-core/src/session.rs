use std::collections::HashMap;
use std::sync::Arc;

use livekit::prelude::{RemoteParticipant, Room, RoomEvent, RoomOptions};
use livekit::publication::RemoteTrackPublication;
use livekit::track::{
    RemoteTrack,
    TrackKind as LkTrackKind,
    TrackSource as LkTrackSource,
};
use tokio::sync::Mutex;

use crate::chat::{self, ChatService, MessageStore};
use crate::controls::{LocalControls, LocalMediaState};
use crate::errors::HuddleError;
use crate::events::{
    ConnectionState, EventEmitter, HuddleEvent, HuddleEventListener, ParticipantInfo,
    Subscription, TrackInfo, TrackKind, TrackSource,
};
use crate::projection::{ProjectionEvent, PublicationRef, RoomProjection, SinkUpdate};

/// Manages the lifecycle of one room connection.
///
/// Constructed once at application start and shared by `Arc` with every
/// view that needs it. Only this facade mutates the room handle; views
/// read the projection and listen for events.
pub struct RoomSession {
    room: Arc<Mutex<Option<Arc<Room>>>>,
    emitter: EventEmitter,
    projection: Arc<Mutex<RoomProjection>>,
    connection_state: Arc<Mutex<ConnectionState>>,
    subscribed_tracks: Arc<Mutex<HashMap<String, RemoteTrack>>>,
    messages: MessageStore,
    media_state: Arc<LocalMediaState>,
}

impl RoomSession {
    pub fn new() -> Self {
        Self {
            room: Arc::new(Mutex::new(None)),
            emitter: EventEmitter::new(),
            projection: Arc::new(Mutex::new(RoomProjection::new())),
            connection_state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            subscribed_tracks: Arc::new(Mutex::new(HashMap::new())),
            messages: Arc::new(Mutex::new(Vec::new())),
            media_state: Arc::new(LocalMediaState::new()),
        }
    }

    /// Register a listener for session events. The listener is removed
    /// when the returned guard is dropped.
    pub fn subscribe(&self, listener: Arc<dyn HuddleEventListener>) -> Subscription {
        self.emitter.subscribe(listener)
    }

    /// Create the local media controls bound to this session.
    pub fn controls(&self) -> LocalControls {
        LocalControls::new(self.room.clone(), self.media_state.clone())
    }

    /// Create a ChatService bound to this session.
    pub fn chat(&self) -> ChatService {
        ChatService::new(self.room.clone(), self.emitter.clone(), self.messages.clone())
    }

    /// Get current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.connection_state.lock().await.clone()
    }

    /// Get a snapshot of the current participant roster.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        self.projection.lock().await.participants()
    }

    /// Ordered video publications for a participant.
    pub async fn video_tracks(&self, participant_sid: &str) -> Vec<PublicationRef> {
        self.projection.lock().await.video_tracks(participant_sid)
    }

    /// Ordered audio publications for a participant.
    pub async fn audio_tracks(&self, participant_sid: &str) -> Vec<PublicationRef> {
        self.projection.lock().await.audio_tracks(participant_sid)
    }

    /// The track sid currently driving the sink for (participant, kind).
    pub async fn attached_track(&self, participant_sid: &str, kind: TrackKind) -> Option<String> {
        self.projection
            .lock()
            .await
            .attached(participant_sid, kind)
            .map(str::to_string)
    }

    /// Get a subscribed remote track by its SID, for binding to a sink.
    ///
    /// Returns `None` if the track is not currently subscribed.
    pub async fn subscribed_track(&self, track_sid: &str) -> Option<RemoteTrack> {
        self.subscribed_tracks.lock().await.get(track_sid).cloned()
    }

    /// Connect to a room.
    ///
    /// Both `url` and `token` must be non-empty. On failure the session
    /// stays disconnected and the transport error text is returned once;
    /// retrying is up to the caller.
    pub async fn connect(&self, url: &str, token: &str) -> Result<(), HuddleError> {
        validate_connect_args(url, token)?;

        self.set_connection_state(ConnectionState::Connecting).await;

        let mut options = RoomOptions::default();
        options.auto_subscribe = true;

        let (room, events) = match Room::connect(url, token, options).await {
            Ok(connected) => connected,
            Err(e) => {
                self.set_connection_state(ConnectionState::Disconnected).await;
                return Err(HuddleError::Connection(e.to_string()));
            }
        };

        let room = Arc::new(room);

        // Seed existing remote participants with their current publication
        // snapshots, so tracks published before this connect are not missed.
        {
            let mut projection = self.projection.lock().await;
            let mut registry = self.subscribed_tracks.lock().await;
            for (_, participant) in room.remote_participants() {
                let info = remote_participant_to_info(&participant);
                let publications = snapshot_publications(&participant, &mut registry);
                self.emitter.emit(HuddleEvent::ParticipantJoined(info.clone()));
                let updates = projection.apply(ProjectionEvent::Joined { info, publications });
                emit_sink_updates(&self.emitter, updates);
            }
        }

        *self.room.lock().await = Some(room.clone());

        self.set_connection_state(ConnectionState::Connected).await;

        let emitter = self.emitter.clone();
        let projection = self.projection.clone();
        let connection_state = self.connection_state.clone();
        let room_ref = self.room.clone();
        let subscribed_tracks = self.subscribed_tracks.clone();
        let messages = self.messages.clone();
        let media_state = self.media_state.clone();

        tokio::spawn(async move {
            Self::event_loop(
                events,
                emitter,
                projection,
                connection_state,
                room_ref,
                subscribed_tracks,
                messages,
                media_state,
            )
            .await;
        });

        Ok(())
    }

    /// Disconnect from the current room.
    ///
    /// Always succeeds locally and is idempotent when already disconnected.
    pub async fn disconnect(&self) {
        let room = self.room.lock().await.take();
        if let Some(room) = room {
            if let Err(e) = room.close().await {
                tracing::warn!("error closing room: {e}");
            }
        }
        self.projection.lock().await.clear();
        self.subscribed_tracks.lock().await.clear();
        self.messages.lock().await.clear();
        self.media_state.clear().await;
        self.set_connection_state(ConnectionState::Disconnected).await;
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        transition(&self.connection_state, &self.emitter, state).await;
    }

    async fn event_loop(
        mut events: tokio::sync::mpsc::UnboundedReceiver<RoomEvent>,
        emitter: EventEmitter,
        projection: Arc<Mutex<RoomProjection>>,
        connection_state: Arc<Mutex<ConnectionState>>,
        room_ref: Arc<Mutex<Option<Arc<Room>>>>,
        subscribed_tracks: Arc<Mutex<HashMap<String, RemoteTrack>>>,
        messages: MessageStore,
        media_state: Arc<LocalMediaState>,
    ) {
        let mut reconnect_attempt: u32 = 0;

        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::Connected { .. } => {
                    reconnect_attempt = 0;
                    transition(&connection_state, &emitter, ConnectionState::Connected).await;
                }

                RoomEvent::Reconnecting => {
                    reconnect_attempt += 1;
                    transition(
                        &connection_state,
                        &emitter,
                        ConnectionState::Reconnecting { attempt: reconnect_attempt },
                    )
                    .await;
                }

                RoomEvent::Reconnected => {
                    reconnect_attempt = 0;
                    transition(&connection_state, &emitter, ConnectionState::Connected).await;
                }

                RoomEvent::Disconnected { reason } => {
                    tracing::info!("room disconnected: {reason:?}");
                    projection.lock().await.clear();
                    subscribed_tracks.lock().await.clear();
                    messages.lock().await.clear();
                    media_state.clear().await;
                    *room_ref.lock().await = None;
                    transition(&connection_state, &emitter, ConnectionState::Disconnected).await;
                    break;
                }

                RoomEvent::ParticipantConnected(participant) => {
                    let info = remote_participant_to_info(&participant);
                    let publications = {
                        let mut registry = subscribed_tracks.lock().await;
                        snapshot_publications(&participant, &mut registry)
                    };
                    emitter.emit(HuddleEvent::ParticipantJoined(info.clone()));
                    let updates = projection
                        .lock()
                        .await
                        .apply(ProjectionEvent::Joined { info, publications });
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::ParticipantDisconnected(participant) => {
                    let sid = participant.sid().to_string();
                    let updates = {
                        let mut projection = projection.lock().await;
                        let mut registry = subscribed_tracks.lock().await;
                        for publication in projection
                            .video_tracks(&sid)
                            .into_iter()
                            .chain(projection.audio_tracks(&sid))
                        {
                            registry.remove(&publication.track_sid);
                        }
                        projection.apply(ProjectionEvent::Left {
                            participant_sid: sid.clone(),
                        })
                    };
                    emitter.emit(HuddleEvent::ParticipantLeft(sid));
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::TrackPublished { publication, participant } => {
                    let participant_sid = participant.sid().to_string();
                    let publication = publication_ref(&publication);
                    let info = track_info(&participant_sid, &publication);
                    let updates = projection.lock().await.apply(ProjectionEvent::Published {
                        participant_sid,
                        publication,
                    });
                    emitter.emit(HuddleEvent::TrackPublished(info));
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::TrackUnpublished { publication, participant } => {
                    let participant_sid = participant.sid().to_string();
                    let track_sid = publication.sid().to_string();
                    subscribed_tracks.lock().await.remove(&track_sid);
                    let updates = projection.lock().await.apply(ProjectionEvent::Unpublished {
                        participant_sid: participant_sid.clone(),
                        track_sid: track_sid.clone(),
                    });
                    emitter.emit(HuddleEvent::TrackUnpublished { participant_sid, track_sid });
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::TrackSubscribed { track, publication, participant } => {
                    let participant_sid = participant.sid().to_string();
                    let track_sid = track.sid().to_string();
                    subscribed_tracks
                        .lock()
                        .await
                        .insert(track_sid, track.clone());

                    let mut publication = publication_ref(&publication);
                    publication.subscribed = true;
                    let info = track_info(&participant_sid, &publication);
                    let updates = projection.lock().await.apply(ProjectionEvent::Subscribed {
                        participant_sid,
                        publication,
                    });
                    emitter.emit(HuddleEvent::TrackSubscribed(info));
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::TrackUnsubscribed { track, participant, .. } => {
                    let participant_sid = participant.sid().to_string();
                    let track_sid = track.sid().to_string();
                    subscribed_tracks.lock().await.remove(&track_sid);
                    let updates = projection.lock().await.apply(ProjectionEvent::Unsubscribed {
                        participant_sid: participant_sid.clone(),
                        track_sid: track_sid.clone(),
                    });
                    emitter.emit(HuddleEvent::TrackUnsubscribed { participant_sid, track_sid });
                    emit_sink_updates(&emitter, updates);
                }

                RoomEvent::LocalTrackPublished { publication, .. } => {
                    let source = lk_source_to_huddle(publication.source());
                    media_state.observe(source, true).await;
                    emitter.emit(HuddleEvent::LocalTrackPublished(source));
                }

                RoomEvent::LocalTrackUnpublished { publication, .. } => {
                    let source = lk_source_to_huddle(publication.source());
                    media_state.observe(source, false).await;
                    emitter.emit(HuddleEvent::LocalTrackUnpublished(source));
                }

                RoomEvent::DataReceived { payload, participant, .. } => {
                    let Some(text) = chat::decode_payload(&payload) else {
                        tracing::debug!("non-UTF-8 data payload ignored ({} bytes)", payload.len());
                        continue;
                    };
                    let sender = participant.as_ref().map(|p| p.identity().to_string());
                    let msg = chat::remote_message(sender, text);
                    messages.lock().await.push(msg.clone());
                    emitter.emit(HuddleEvent::ChatMessageReceived(msg));
                }

                _ => {
                    tracing::debug!("unhandled room event: {event:?}");
                }
            }
        }

        tracing::info!("room event loop ended");
    }
}

impl Default for RoomSession {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_connect_args(url: &str, token: &str) -> Result<(), HuddleError> {
    if url.trim().is_empty() || token.trim().is_empty() {
        return Err(HuddleError::Connection(
            "url and token must be non-empty".into(),
        ));
    }
    Ok(())
}

/// Emit only on actual state changes, so disconnect stays idempotent.
async fn transition(
    state: &Arc<Mutex<ConnectionState>>,
    emitter: &EventEmitter,
    new: ConnectionState,
) {
    let mut current = state.lock().await;
    if *current == new {
        return;
    }
    *current = new.clone();
    drop(current);
    emitter.emit(HuddleEvent::ConnectionStateChanged(new));
}

fn emit_sink_updates(emitter: &EventEmitter, updates: Vec<SinkUpdate>) {
    for update in updates {
        let event = match update {
            SinkUpdate::Detach { participant_sid, kind, track_sid } => {
                HuddleEvent::SinkDetached { participant_sid, kind, track_sid }
            }
            SinkUpdate::Attach { participant_sid, kind, track_sid } => {
                HuddleEvent::SinkAttached { participant_sid, kind, track_sid }
            }
        };
        emitter.emit(event);
    }
}

fn lk_source_to_huddle(source: LkTrackSource) -> TrackSource {
    match source {
        LkTrackSource::Microphone => TrackSource::Microphone,
        LkTrackSource::Camera => TrackSource::Camera,
        LkTrackSource::Screenshare => TrackSource::ScreenShare,
        _ => TrackSource::Unknown,
    }
}

fn lk_kind_to_huddle(kind: LkTrackKind) -> TrackKind {
    match kind {
        LkTrackKind::Audio => TrackKind::Audio,
        LkTrackKind::Video => TrackKind::Video,
    }
}

fn remote_participant_to_info(p: &RemoteParticipant) -> ParticipantInfo {
    let name = {
        let n = p.name().to_string();
        if n.is_empty() { None } else { Some(n) }
    };
    ParticipantInfo {
        sid: p.sid().to_string(),
        identity: p.identity().to_string(),
        name,
    }
}

fn publication_ref(publication: &RemoteTrackPublication) -> PublicationRef {
    PublicationRef {
        track_sid: publication.sid().to_string(),
        kind: lk_kind_to_huddle(publication.kind()),
        source: lk_source_to_huddle(publication.source()),
        subscribed: publication.is_subscribed(),
    }
}

fn track_info(participant_sid: &str, publication: &PublicationRef) -> TrackInfo {
    TrackInfo {
        sid: publication.track_sid.clone(),
        participant_sid: participant_sid.to_string(),
        kind: publication.kind,
        source: publication.source,
    }
}

/// Snapshot a participant's current publications, registering any already
/// subscribed tracks so sinks can bind to them immediately.
fn snapshot_publications(
    participant: &RemoteParticipant,
    registry: &mut HashMap<String, RemoteTrack>,
) -> Vec<PublicationRef> {
    let mut publications = Vec::new();
    for (_, publication) in participant.track_publications() {
        if let Some(track) = publication.track() {
            registry.insert(publication.sid().to_string(), track);
        }
        publications.push(publication_ref(&publication));
    }
    publications
}
