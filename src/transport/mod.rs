//! Transport abstraction
//!
//! The channel client does not talk to sockets directly. For every connection
//! it hands a [`ChannelHandler`] to a [`ChannelTransport`], which reports
//! open, message, error and close events to it and exposes the connection as
//! a [`ChannelSession`].

pub mod websocket;

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::TransportError;

pub use websocket::{WebSocketTransport, WebSocketTransportFactory};

/// Receives the transport events of one connection.
///
/// Error and close are separate signals: a terminal error is always followed
/// by its own `on_close`.
pub trait ChannelHandler: Send + Sync {
    fn on_open(&self, session: Arc<dyn ChannelSession>);
    fn on_message(&self, text: &str);
    fn on_close(&self, code: u16, reason: &str);
    fn on_error(&self, error: &TransportError);
}

/// An established connection.
pub trait ChannelSession: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queues a text frame. Must not block on network I/O.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Starts a normal close. Must not block on network I/O.
    fn close(&self) -> Result<(), TransportError>;
}

/// A started transport engine able to open one connection.
pub trait ChannelTransport: Send + Sync {
    /// Opens a connection to `address`, waiting at most `timeout`.
    ///
    /// The handler is held weakly; events stop once it is dropped.
    fn connect(
        &self,
        address: &str,
        handler: Weak<dyn ChannelHandler>,
        timeout: Duration,
    ) -> Result<Arc<dyn ChannelSession>, TransportError>;

    /// Stops the engine. Idempotent.
    fn stop(&self) -> Result<(), TransportError>;
}

/// Creates and starts transport engines.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ChannelTransport>, TransportError>;
}
