//! Connection state machine
//!
//! The channel moves `Disconnected → Connecting → HandshakePending → Ready`
//! and ends in `Closed`. Transitions are expressed as functions from the
//! current state to the next one; a function returning `None` rejects the
//! transition. [`StateCell`] applies them atomically, since transport
//! callbacks arrive on engine threads while lifecycle calls arrive on the
//! caller's thread.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a Colibri channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Nothing started yet.
    Disconnected = 0,
    /// A transport is being opened.
    Connecting = 1,
    /// The transport is open, waiting for the bridge's `ServerHello`.
    HandshakePending = 2,
    /// Handshake complete; application messages may flow.
    Ready = 3,
    /// The channel was closed locally or by the remote side.
    Closed = 4,
}

impl ConnectionState {
    /// `connect()` may start from a fresh or a closed channel.
    pub fn begin_connect(self) -> Option<Self> {
        match self {
            Self::Disconnected | Self::Closed => Some(Self::Connecting),
            _ => None,
        }
    }

    /// The transport reported an open session.
    pub fn transport_opened(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::HandshakePending),
            _ => None,
        }
    }

    /// Opening the transport failed; nothing is left behind.
    pub fn connect_failed(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Disconnected),
            _ => None,
        }
    }

    /// A `ServerHello` was answered. The bridge may greet in any state,
    /// including again once `Ready`.
    pub fn handshake_completed(self) -> Option<Self> {
        Some(Self::Ready)
    }

    /// Closing is accepted from every state.
    pub fn closed(self) -> Option<Self> {
        Some(Self::Closed)
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::HandshakePending,
            3 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::HandshakePending => "handshake-pending",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Atomically updated [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_raw(self.0.load(Ordering::SeqCst))
    }

    /// Applies `transition` to the current state.
    ///
    /// ## Returns
    ///
    /// * `Ok(previous)` - The transition was accepted and stored
    /// * `Err(current)` - The transition rejected the current state, which is left untouched
    pub fn transition(
        &self,
        transition: impl Fn(ConnectionState) -> Option<ConnectionState>,
    ) -> Result<ConnectionState, ConnectionState> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                transition(ConnectionState::from_raw(raw)).map(|next| next as u8)
            })
            .map(ConnectionState::from_raw)
            .map_err(ConnectionState::from_raw)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
