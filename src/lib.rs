//! Colibri signaling-channel client
//!
//! Connects a conferencing endpoint to a media bridge's Colibri WebSocket,
//! performs the `ServerHello`/`ClientHello` handshake and forwards the
//! bridge's control events to registered [`ChannelObserver`]s.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod observer;
pub mod transport;
pub mod util;

pub use client::ColibriChannelClient;
pub use config::ClientConfig;
pub use error::{DecodeError, TransportError};
pub use model::message::ColibriMessage;
pub use model::state::ConnectionState;
pub use observer::ChannelObserver;
