use std::sync::Arc;
use livekit::prelude::*;
use tokio::sync::Mutex;

use crate::errors::HuddleError;
use crate::events::{ChatMessage, EventEmitter, HuddleEvent};

/// Shared message store between the RoomSession event loop and ChatService.
pub type MessageStore = Arc<Mutex<Vec<ChatMessage>>>;

/// Sender label for messages sent from this client.
pub const LOCAL_SENDER: &str = "You";

/// Fallback sender when an incoming payload carries no participant.
pub const SYSTEM_SENDER: &str = "System";

/// Chat payloads are the UTF-8 bytes of the text, no framing.
pub fn encode_payload(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode an incoming data payload as chat text. Non-UTF-8 payloads are
/// not chat messages and yield `None`.
pub fn decode_payload(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload).ok()
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Build the local log entry for a message this client sent.
pub fn local_message(text: &str) -> ChatMessage {
    ChatMessage {
        sender: LOCAL_SENDER.to_string(),
        text: text.to_string(),
        timestamp_ms: now_ms(),
    }
}

/// Build the log entry for a received payload, stamped at receipt time.
pub fn remote_message(sender: Option<String>, text: &str) -> ChatMessage {
    ChatMessage {
        sender: sender.unwrap_or_else(|| SYSTEM_SENDER.to_string()),
        text: text.to_string(),
        timestamp_ms: now_ms(),
    }
}

/// Manages chat messaging over the room's reliable data channel.
pub struct ChatService {
    room: Arc<Mutex<Option<Arc<Room>>>>,
    emitter: EventEmitter,
    messages: MessageStore,
}

impl ChatService {
    pub fn new(
        room: Arc<Mutex<Option<Arc<Room>>>>,
        emitter: EventEmitter,
        messages: MessageStore,
    ) -> Self {
        Self {
            room,
            emitter,
            messages,
        }
    }

    /// Send a chat message to all participants.
    ///
    /// Transmits the raw UTF-8 bytes of `text` and appends a local entry
    /// with sender "You". Empty or whitespace-only text is rejected
    /// without transmitting.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, HuddleError> {
        if text.trim().is_empty() {
            return Err(HuddleError::Room("empty chat message".into()));
        }

        let room = self.room.lock().await;
        let room = room
            .as_ref()
            .ok_or_else(|| HuddleError::Room("not connected".into()))?;

        room.local_participant()
            .publish_data(DataPacket {
                payload: encode_payload(text),
                reliable: true,
                ..Default::default()
            })
            .await
            .map_err(|e| HuddleError::Room(format!("send chat: {e}")))?;

        let msg = local_message(text);
        self.messages.lock().await.push(msg.clone());
        self.emitter.emit(HuddleEvent::ChatMessageReceived(msg.clone()));

        Ok(msg)
    }

    /// Get all messages in the current session.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }

    /// Clear all messages (on disconnect).
    pub async fn clear(&self) {
        self.messages.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_plain_utf8_bytes() {
        assert_eq!(encode_payload("hello"), [0x68, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn payload_round_trips_through_decode() {
        let payload = encode_payload("salut à tous");
        assert_eq!(decode_payload(&payload), Some("salut à tous"));
    }

    #[test]
    fn invalid_utf8_is_not_a_message() {
        assert_eq!(decode_payload(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn local_messages_are_sent_by_you() {
        let msg = local_message("hello");
        assert_eq!(msg.sender, "You");
        assert_eq!(msg.text, "hello");
        assert!(msg.timestamp_ms > 0);
    }

    #[test]
    fn remote_messages_fall_back_to_system_sender() {
        let msg = remote_message(None, "announcement");
        assert_eq!(msg.sender, "System");

        let msg = remote_message(Some("alice".to_string()), "hi");
        assert_eq!(msg.sender, "alice");
    }
}
