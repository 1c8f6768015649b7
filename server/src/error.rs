//! Error types for the server crate

use shared::DecodeError;
use thiserror::Error;

/// Reasons an inbound input packet is dropped.
///
/// None of these stop the simulation; the input loop logs them and moves on.
#[derive(Debug, Error)]
pub enum InputError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("input for unknown client {0}")]
    UnknownClient(u8),
    #[error("client {client_id} exceeded the pending input limit for this tick")]
    TooManyPending { client_id: u8 },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Server full")]
    ServerFull,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("World engine already started")]
    AlreadyStarted,
}
