use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("room error: {0}")]
    Room(String),
    #[error("media error: {0}")]
    Media(String),
}
