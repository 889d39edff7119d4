//! Huddle core business logic.
//!
//! Headless client for a LiveKit room: owns the session handle, projects
//! participant/track events into view state, and drives local media
//! controls and chat. UI shells consume it through [`RoomSession`] and
//! the event stream.

pub mod chat;
pub mod controls;
pub mod errors;
pub mod events;
pub mod projection;
pub mod session;

pub use chat::ChatService;
pub use controls::LocalControls;
pub use errors::HuddleError;
pub use events::{HuddleEvent, HuddleEventListener, Subscription};
pub use session::RoomSession;
