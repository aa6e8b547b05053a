//! Channel observers
//!
//! Collaborators implement [`ChannelObserver`] to learn about handshake
//! completion, disconnects and the control events the bridge forwards. The
//! client never owns its observers: [`ObserverRegistry`] keeps `Weak`
//! references and silently drops the ones that have gone away.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::model::message::EndpointMessage;

/// Receives channel lifecycle and control events.
///
/// Callbacks run on transport threads and must not block.
pub trait ChannelObserver: Send + Sync {
    /// The handshake completed and the channel is `Ready`.
    fn on_connected(&self);

    /// The transport closed with the given WebSocket status code.
    fn on_disconnected(&self, code: u16, reason: &str);

    fn on_endpoint_message(&self, _message: &EndpointMessage) {}

    fn on_dominant_speaker_changed(&self, _endpoint: &str) {}

    fn on_connectivity_status_changed(&self, _endpoint: &str, _active: bool) {}
}

/// Non-owning set of observers.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Weak<dyn ChannelObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<O: ChannelObserver + 'static>(&self, observer: &Arc<O>) {
        let weak: Weak<O> = Arc::downgrade(observer);
        self.observers.write().push(weak);
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }

    /// Number of observers still alive.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` on every live observer. No lock is held while `f` runs, so
    /// observers may call back into the client.
    pub fn notify(&self, f: impl Fn(&dyn ChannelObserver)) {
        let live: Vec<Arc<dyn ChannelObserver>> = {
            let mut observers = self.observers.write();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in live {
            f(observer.as_ref());
        }
    }
}
