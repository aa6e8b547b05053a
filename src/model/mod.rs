//! Data models for the Colibri channel
//!
//! This module contains the wire messages exchanged with the bridge and the
//! connection state machine the client runs.

pub mod message;
pub mod state;
