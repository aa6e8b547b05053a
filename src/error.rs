//! Error types
//!
//! None of these cross the public surface of the channel client, which logs
//! and absorbs every failure. They exist so the codec and the transport can
//! report precisely what went wrong.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced while decoding or encoding a Colibri frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object carries no string `colibriClass` field.
    #[error("frame has no colibriClass")]
    MissingDiscriminator,
    /// The discriminator is known but the body does not match its type.
    #[error("malformed {colibri_class}: {source}")]
    Malformed {
        colibri_class: String,
        #[source]
        source: serde_json::Error,
    },
    /// An outbound message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors raised by a channel transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport engine could not be started.
    #[error("failed to start transport engine: {0}")]
    Start(#[source] std::io::Error),
    /// The transport engine has already been stopped.
    #[error("transport engine is stopped")]
    Stopped,
    /// The remote endpoint did not accept the connection in time.
    #[error("connection not established within {0:?}")]
    Timeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// The session is no longer open.
    #[error("session is closed")]
    Closed,
}
