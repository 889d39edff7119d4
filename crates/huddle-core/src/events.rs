use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum HuddleEvent {
    ConnectionStateChanged(ConnectionState),
    ParticipantJoined(ParticipantInfo),
    ParticipantLeft(String), // participant SID
    TrackPublished(TrackInfo),
    TrackUnpublished { participant_sid: String, track_sid: String },
    TrackSubscribed(TrackInfo),
    TrackUnsubscribed { participant_sid: String, track_sid: String },
    /// A track became the one driving the rendering surface for
    /// (participant, kind). The previous track, if any, was detached first.
    SinkAttached { participant_sid: String, kind: TrackKind, track_sid: String },
    SinkDetached { participant_sid: String, kind: TrackKind, track_sid: String },
    LocalTrackPublished(TrackSource),
    LocalTrackUnpublished(TrackSource),
    ChatMessageReceived(ChatMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub sid: String,
    pub identity: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub sid: String,
    pub participant_sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait HuddleEventListener: Send + Sync {
    fn on_event(&self, event: HuddleEvent);
}

type ListenerTable = RwLock<Vec<(u64, Arc<dyn HuddleEventListener>)>>;

/// Internal event emitter that dispatches to registered listeners.
///
/// `subscribe` returns a [`Subscription`] guard; a view registers on mount
/// and the listener is removed when the guard drops on unmount, so
/// navigation cannot leak listeners.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<ListenerTable>,
    next_id: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn HuddleEventListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().unwrap().push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn emit(&self, event: HuddleEvent) {
        let listeners = self.listeners.read().unwrap();
        for (_, listener) in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped listener registration. Dropping it unregisters the listener.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerTable>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}
