//! Colibri channel client
//!
//! One [`ColibriChannelClient`] manages one signaling channel to the bridge
//! for its whole life: it opens the transport, answers the bridge's
//! `ServerHello`, dispatches control events to observers, sends control
//! messages and closes the channel again.
//!
//! Every failure is absorbed here. Callers only see the boolean result of
//! [`ColibriChannelClient::connect`] and the observers' `on_disconnected`.
//! The client never reconnects on its own.
//!
//! Transport events reach the client through a [`ConnectionLink`] created
//! per `connect()`. Only the link of the latest connection is listened to,
//! so a previous connection that is still shutting down cannot touch the
//! state of the current one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::config::ClientConfig;
use crate::error::{DecodeError, TransportError};
use crate::model::message::{ClientHello, ColibriMessage, ReceiverVideoConstraints};
use crate::model::state::{ConnectionState, StateCell};
use crate::observer::{ChannelObserver, ObserverRegistry};
use crate::transport::{
    ChannelHandler, ChannelSession, ChannelTransport, TransportFactory, WebSocketTransportFactory,
};

pub struct ColibriChannelClient {
    config: ClientConfig,
    factory: Box<dyn TransportFactory>,
    state: StateCell,
    session: Mutex<Option<Arc<dyn ChannelSession>>>,
    transport: Mutex<Option<Box<dyn ChannelTransport>>>,
    /// Generation of the latest connection. Bumped by every `connect()`.
    generation: AtomicU64,
    link: Mutex<Option<Arc<ConnectionLink>>>,
    observers: ObserverRegistry,
    span: Span,
}

impl ColibriChannelClient {
    /// Creates a client that connects over WebSocket.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let factory = WebSocketTransportFactory::new(config.close_grace);
        Self::with_transport(config, factory)
    }

    /// Creates a client on top of a custom transport.
    ///
    /// Log output of the client is recorded in a span nested under the
    /// caller's current span and tagged with the endpoint id.
    pub fn with_transport(
        config: ClientConfig,
        factory: impl TransportFactory + 'static,
    ) -> Arc<Self> {
        let span = info_span!("colibri", endpoint = %config.endpoint_id);
        Arc::new(Self {
            config,
            factory: Box::new(factory),
            state: StateCell::default(),
            session: Mutex::new(None),
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
            link: Mutex::new(None),
            observers: ObserverRegistry::new(),
            span,
        })
    }

    pub fn endpoint_id(&self) -> &str {
        &self.config.endpoint_id
    }

    pub fn channel_address(&self) -> &str {
        &self.config.channel_address
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Registers an observer. The client only keeps a weak reference.
    pub fn add_observer<O: ChannelObserver + 'static>(&self, observer: &Arc<O>) {
        self.observers.add(observer);
    }

    pub fn clear_observers(&self) {
        self.observers.clear();
    }

    /// Opens the channel, waiting at most the configured connect timeout.
    ///
    /// Returns once the transport is open; the handshake finishes later and
    /// is reported through [`ChannelObserver::on_connected`]. Blocks the
    /// calling thread, so it must not be called from inside an async runtime.
    ///
    /// ## Returns
    ///
    /// * `true` - The transport is open and the client waits for `ServerHello`
    /// * `false` - No address, already active, or the transport failed to open
    pub fn connect(self: &Arc<Self>) -> bool {
        let _enter = self.span.enter();

        if !self.config.has_address() {
            warn!("No Colibri WebSocket URL provided, cannot connect");
            return false;
        }

        if let Err(state) = self.state.transition(ConnectionState::begin_connect) {
            warn!("Cannot connect while the channel is {}", state);
            return false;
        }

        // Leftovers of a connection the bridge closed.
        self.teardown();

        info!("Connecting to Colibri WebSocket: {}", self.config.channel_address);

        let transport = match self.factory.create() {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to start Colibri WebSocket transport: {}", e);
                let _ = self.state.transition(ConnectionState::connect_failed);
                return false;
            }
        };

        let link = self.next_link();
        let handler: Weak<ConnectionLink> = Arc::downgrade(&link);
        let session = match transport.connect(
            &self.config.channel_address,
            handler,
            self.config.connect_timeout,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to connect to Colibri WebSocket: {}", e);
                if let Err(e) = transport.stop() {
                    warn!("Error stopping WebSocket client: {}", e);
                }
                self.link.lock().take();
                let _ = self.state.transition(ConnectionState::connect_failed);
                return false;
            }
        };

        *self.session.lock() = Some(session);
        *self.transport.lock() = Some(transport);
        // Usually already done by on_open.
        let _ = self.state.transition(ConnectionState::transport_opened);

        if link.released.load(Ordering::SeqCst) || self.state.get() == ConnectionState::Closed {
            warn!("Channel closed while connecting, dropping the connection");
            let _ = self.state.transition(ConnectionState::closed);
            self.teardown();
            return false;
        }

        info!("Colibri WebSocket connected successfully");
        true
    }

    /// Closes the channel and stops the transport. Safe to call any number of
    /// times, in any state.
    pub fn disconnect(&self) {
        let _enter = self.span.enter();
        let _ = self.state.transition(ConnectionState::closed);
        if let Some(link) = self.link.lock().as_ref() {
            link.released.store(true, Ordering::SeqCst);
        }
        self.teardown();
        info!("Colibri WebSocket disconnected");
    }

    /// `Ready` and the transport still reports the session open.
    pub fn is_connected(&self) -> bool {
        self.state.get().is_ready()
            && self
                .session
                .lock()
                .as_ref()
                .is_some_and(|session| session.is_open())
    }

    /// Sends an application message. Dropped with a log line unless the
    /// channel is `Ready` and the session open.
    pub fn send_message(&self, message: &ColibriMessage) {
        let _enter = self.span.enter();
        let state = self.state.get();
        if !state.is_ready() {
            warn!(
                "Cannot send {} while the channel is {}",
                message.colibri_class(),
                state
            );
            return;
        }
        self.send_frame(message);
    }

    /// Makes a new link current. Events of older links are dropped from now on.
    fn next_link(self: &Arc<Self>) -> Arc<ConnectionLink> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let link = Arc::new(ConnectionLink {
            client: Arc::downgrade(self),
            generation,
            released: AtomicBool::new(false),
        });
        *self.link.lock() = Some(link.clone());
        link
    }

    /// Writes a frame if the session is open. Fire and forget.
    fn send_frame(&self, message: &ColibriMessage) {
        let Some(session) = self.session.lock().clone().filter(|s| s.is_open()) else {
            warn!("Cannot send message - WebSocket not connected");
            return;
        };

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {}", message.colibri_class(), e);
                return;
            }
        };

        debug!("Sending Colibri message: {}", text);
        if let Err(e) = session.send_text(text) {
            error!("Failed to send Colibri message: {}", e);
        }
    }

    fn teardown(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session.filter(|s| s.is_open()) {
            if let Err(e) = session.close() {
                warn!("Error closing WebSocket session: {}", e);
            }
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.stop() {
                warn!("Error stopping WebSocket client: {}", e);
            }
        }
    }

    /// Records the session. Readiness waits for the handshake.
    fn opened(&self, session: Arc<dyn ChannelSession>) {
        info!("Colibri WebSocket onConnect");
        *self.session.lock() = Some(session);
        let _ = self.state.transition(ConnectionState::transport_opened);
    }

    fn received(&self, text: &str) {
        debug!("Colibri WebSocket received: {}", text);

        let message = match ColibriMessage::decode(text) {
            Ok(message) => message,
            Err(DecodeError::MissingDiscriminator) => {
                warn!("Received message without colibriClass: {}", text);
                return;
            }
            Err(e) => {
                error!("Failed to parse Colibri WebSocket message: {}", e);
                return;
            }
        };

        self.dispatch(message);
    }

    fn closed(&self, code: u16, reason: &str) {
        info!("Colibri WebSocket closed: {} - {}", code, reason);
        let _ = self.state.transition(ConnectionState::closed);
        self.observers.notify(|o| o.on_disconnected(code, reason));
    }

    fn dispatch(&self, message: ColibriMessage) {
        match message {
            ColibriMessage::ServerHello(_) => self.handle_server_hello(),
            ColibriMessage::EndpointMessage(message) => {
                if self.ready_for("EndpointMessage") {
                    debug!("Received EndpointMessage from {:?}", message.from);
                    self.observers.notify(|o| o.on_endpoint_message(&message));
                }
            }
            ColibriMessage::DominantSpeakerEndpointChangeEvent(event) => {
                if self.ready_for("DominantSpeakerEndpointChangeEvent") {
                    debug!("Dominant speaker changed to: {}", event.dominant_speaker_endpoint);
                    self.observers
                        .notify(|o| o.on_dominant_speaker_changed(&event.dominant_speaker_endpoint));
                }
            }
            ColibriMessage::EndpointConnectivityStatusChangeEvent(event) => {
                if self.ready_for("EndpointConnectivityStatusChangeEvent") {
                    debug!("Endpoint {} connectivity: {}", event.endpoint, event.active);
                    self.observers
                        .notify(|o| o.on_connectivity_status_changed(&event.endpoint, event.active));
                }
            }
            // Not a video sender.
            ColibriMessage::SenderVideoConstraints(_) => {}
            other => debug!("Unhandled colibriClass: {}", other.colibri_class()),
        }
    }

    fn ready_for(&self, colibri_class: &str) -> bool {
        let state = self.state.get();
        if !state.is_ready() {
            debug!("Dropping {} received while {}", colibri_class, state);
        }
        state.is_ready()
    }

    /// Answers `ServerHello`, marks the channel ready and declares that no
    /// video is wanted. A repeated hello repeats all three steps.
    fn handle_server_hello(&self) {
        info!("Received ServerHello from JVB");

        self.send_frame(&ColibriMessage::ClientHello(ClientHello {}));

        let _ = self.state.transition(ConnectionState::handshake_completed);
        info!("Colibri channel is now ready");

        self.observers.notify(|o| o.on_connected());

        self.send_message(&ColibriMessage::ReceiverVideoConstraints(
            ReceiverVideoConstraints::no_video(),
        ));
        info!("Sent ReceiverVideoConstraints (lastN=0)");
    }
}

impl Drop for ColibriChannelClient {
    fn drop(&mut self) {
        if self.transport.lock().is_some() || self.session.lock().is_some() {
            self.disconnect();
        }
    }
}

/// Transport handler of one connection.
///
/// Forwards events to the client only while its generation is the client's
/// latest. `released` marks a connection the caller disconnected.
struct ConnectionLink {
    client: Weak<ColibriChannelClient>,
    generation: u64,
    released: AtomicBool,
}

impl ConnectionLink {
    fn current(&self) -> Option<Arc<ColibriChannelClient>> {
        let client = self.client.upgrade()?;
        let latest = client.generation.load(Ordering::SeqCst);
        if latest != self.generation {
            let _enter = client.span.enter();
            debug!(
                "Dropping event of connection {} (current is {})",
                self.generation, latest
            );
            return None;
        }
        Some(client)
    }
}

impl ChannelHandler for ConnectionLink {
    fn on_open(&self, session: Arc<dyn ChannelSession>) {
        if let Some(client) = self.current() {
            let _enter = client.span.enter();
            client.opened(session);
        }
    }

    fn on_message(&self, text: &str) {
        if let Some(client) = self.current() {
            let _enter = client.span.enter();
            client.received(text);
        }
    }

    fn on_close(&self, code: u16, reason: &str) {
        if let Some(client) = self.current() {
            let _enter = client.span.enter();
            client.closed(code, reason);
        }
    }

    fn on_error(&self, error: &TransportError) {
        if let Some(client) = self.current() {
            let _enter = client.span.enter();
            error!("Colibri WebSocket error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::{EndpointMessage, SenderVideoConstraints};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const ADDRESS: &str = "wss://example.test/colibri-ws/abc";
    const CLIENT_HELLO: &str = r#"{"colibriClass":"ClientHello"}"#;
    const NO_VIDEO: &str =
        r#"{"colibriClass":"ReceiverVideoConstraints","lastN":0,"defaultConstraints":{}}"#;
    const SERVER_HELLO: &str = r#"{"colibriClass":"ServerHello"}"#;

    type ConnectHook = Box<dyn FnOnce(&dyn ChannelHandler) + Send>;

    /// In-memory stand-in for the network. Keeps the handler of every
    /// connection so events can be fired from any of them.
    #[derive(Default)]
    struct Wire {
        frames: Mutex<Vec<String>>,
        handlers: Mutex<Vec<Weak<dyn ChannelHandler>>>,
        during_connect: Mutex<Option<ConnectHook>>,
        open: AtomicBool,
        fail_connect: AtomicBool,
        created: AtomicUsize,
        stopped: AtomicUsize,
        closed: AtomicUsize,
    }

    impl Wire {
        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }

        /// Handler of the `index`-th connection.
        fn connection(&self, index: usize) -> Arc<dyn ChannelHandler> {
            self.handlers.lock()[index]
                .upgrade()
                .expect("connection handler dropped")
        }

        /// Handler of the latest connection.
        fn current(&self) -> Arc<dyn ChannelHandler> {
            self.handlers
                .lock()
                .last()
                .and_then(Weak::upgrade)
                .expect("no live connection")
        }

        fn is_cut_off(&self, index: usize) -> bool {
            self.handlers.lock()[index].upgrade().is_none()
        }
    }

    struct RecordingFactory(Arc<Wire>);

    impl TransportFactory for RecordingFactory {
        fn create(&self) -> Result<Box<dyn ChannelTransport>, TransportError> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingTransport(self.0.clone())))
        }
    }

    struct RecordingTransport(Arc<Wire>);

    impl ChannelTransport for RecordingTransport {
        fn connect(
            &self,
            _address: &str,
            handler: Weak<dyn ChannelHandler>,
            timeout: Duration,
        ) -> Result<Arc<dyn ChannelSession>, TransportError> {
            if self.0.fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout(timeout));
            }
            self.0.handlers.lock().push(handler.clone());
            self.0.open.store(true, Ordering::SeqCst);
            let session: Arc<dyn ChannelSession> = Arc::new(RecordingSession(self.0.clone()));
            if let Some(handler) = handler.upgrade() {
                handler.on_open(session.clone());
                let hook = self.0.during_connect.lock().take();
                if let Some(hook) = hook {
                    hook(handler.as_ref());
                }
            }
            Ok(session)
        }

        fn stop(&self) -> Result<(), TransportError> {
            self.0.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingSession(Arc<Wire>);

    impl ChannelSession for RecordingSession {
        fn is_open(&self) -> bool {
            self.0.open.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: String) -> Result<(), TransportError> {
            if !self.is_open() {
                return Err(TransportError::Closed);
            }
            self.0.frames.lock().push(text);
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            self.0.open.store(false, Ordering::SeqCst);
            self.0.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Connected,
        Disconnected(u16, String),
        Speaker(String),
        Connectivity(String, bool),
        Endpoint(Option<String>),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl ChannelObserver for Recorder {
        fn on_connected(&self) {
            self.events.lock().push(Event::Connected);
        }

        fn on_disconnected(&self, code: u16, reason: &str) {
            self.events
                .lock()
                .push(Event::Disconnected(code, reason.to_string()));
        }

        fn on_endpoint_message(&self, message: &EndpointMessage) {
            self.events.lock().push(Event::Endpoint(message.from.clone()));
        }

        fn on_dominant_speaker_changed(&self, endpoint: &str) {
            self.events.lock().push(Event::Speaker(endpoint.to_string()));
        }

        fn on_connectivity_status_changed(&self, endpoint: &str, active: bool) {
            self.events
                .lock()
                .push(Event::Connectivity(endpoint.to_string(), active));
        }
    }

    fn setup(address: &str) -> (Arc<ColibriChannelClient>, Arc<Wire>, Arc<Recorder>) {
        let wire = Arc::new(Wire::default());
        let client = ColibriChannelClient::with_transport(
            ClientConfig::new(address, "ep1"),
            RecordingFactory(wire.clone()),
        );
        let recorder = Arc::new(Recorder::default());
        client.add_observer(&recorder);
        (client, wire, recorder)
    }

    fn ready() -> (Arc<ColibriChannelClient>, Arc<Wire>, Arc<Recorder>) {
        let (client, wire, recorder) = setup(ADDRESS);
        assert!(client.connect());
        wire.current().on_message(SERVER_HELLO);
        (client, wire, recorder)
    }

    #[test]
    fn server_hello_completes_handshake() {
        let (client, wire, recorder) = setup(ADDRESS);
        assert!(client.connect());
        assert_eq!(client.state(), ConnectionState::HandshakePending);
        assert!(!client.is_connected());
        assert!(wire.frames().is_empty());

        wire.current().on_message(SERVER_HELLO);

        assert_eq!(wire.frames(), vec![CLIENT_HELLO, NO_VIDEO]);
        assert_eq!(recorder.events(), vec![Event::Connected]);
        assert!(client.is_connected());
        assert_eq!(client.endpoint_id(), "ep1");
    }

    #[test]
    fn repeated_server_hello_stays_ready() {
        let (client, wire, recorder) = ready();
        wire.current().on_message(SERVER_HELLO);

        assert_eq!(wire.frames(), vec![CLIENT_HELLO, NO_VIDEO, CLIENT_HELLO, NO_VIDEO]);
        assert_eq!(recorder.events(), vec![Event::Connected, Event::Connected]);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[test]
    fn malformed_frames_change_nothing() {
        let (client, wire, recorder) = setup(ADDRESS);
        assert!(client.connect());

        for raw in ["", "{oops", "[]", "42", r#"{"colibriClass":null}"#] {
            wire.current().on_message(raw);
            assert_eq!(client.state(), ConnectionState::HandshakePending);
        }

        wire.current().on_message(SERVER_HELLO);
        let handler = wire.current();
        handler.on_message(r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent""#);
        handler.on_message(r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent"}"#);

        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(wire.frames().len(), 2);
        assert_eq!(recorder.events(), vec![Event::Connected]);
    }

    #[test]
    fn frames_without_discriminator_are_not_dispatched() {
        let (client, wire, recorder) = ready();
        wire.current().on_message(r#"{"dominantSpeakerEndpoint":"ep2"}"#);
        assert_eq!(recorder.events(), vec![Event::Connected]);
    }

    #[test]
    fn dominant_speaker_reaches_observer_once() {
        let (client, wire, recorder) = ready();
        wire.current().on_message(
            r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent","dominantSpeakerEndpoint":"ep2"}"#,
        );
        assert_eq!(
            recorder.events(),
            vec![Event::Connected, Event::Speaker("ep2".into())]
        );
    }

    #[test]
    fn connectivity_and_endpoint_messages_are_forwarded() {
        let (client, wire, recorder) = ready();
        wire.current().on_message(
            r#"{"colibriClass":"EndpointConnectivityStatusChangeEvent","endpoint":"ep3","active":"true"}"#,
        );
        wire.current()
            .on_message(r#"{"colibriClass":"EndpointMessage","from":"ep4","type":"hi"}"#);

        assert_eq!(
            recorder.events(),
            vec![
                Event::Connected,
                Event::Connectivity("ep3".into(), true),
                Event::Endpoint(Some("ep4".into())),
            ]
        );
    }

    #[test]
    fn control_events_before_handshake_are_dropped() {
        let (client, wire, recorder) = setup(ADDRESS);
        assert!(client.connect());
        wire.current().on_message(
            r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent","dominantSpeakerEndpoint":"ep2"}"#,
        );
        wire.current().on_message(r#"{"colibriClass":"EndpointMessage"}"#);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn ignored_and_unknown_classes() {
        let (client, wire, recorder) = ready();
        wire.current().on_message(
            r#"{"colibriClass":"SenderVideoConstraints","videoConstraints":{"idealHeight":180}}"#,
        );
        wire.current()
            .on_message(r#"{"colibriClass":"ForwardedSources","forwardedSources":[]}"#);

        assert_eq!(wire.frames().len(), 2);
        assert_eq!(recorder.events(), vec![Event::Connected]);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[test]
    fn remote_close_notifies_observer_once() {
        let (client, wire, recorder) = ready();
        wire.open.store(false, Ordering::SeqCst);
        wire.current().on_close(1006, "abnormal");

        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(
            recorder.events(),
            vec![Event::Connected, Event::Disconnected(1006, "abnormal".into())]
        );
    }

    #[test]
    fn close_callback_alone_clears_connected() {
        let (client, wire, _recorder) = ready();
        assert!(client.is_connected());
        // The session still reports open; the state alone must flip the answer.
        wire.current().on_close(1001, "going away");
        assert!(!client.is_connected());
    }

    #[test]
    fn transport_error_does_not_close() {
        let (client, wire, recorder) = ready();
        wire.current().on_error(&TransportError::Closed);
        assert!(client.is_connected());
        assert_eq!(recorder.events(), vec![Event::Connected]);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (client, wire, _recorder) = setup(ADDRESS);
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(wire.created.load(Ordering::SeqCst), 0);

        assert!(client.connect());
        wire.current().on_message(SERVER_HELLO);
        assert!(client.is_connected());

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(wire.closed.load(Ordering::SeqCst), 1);
        assert_eq!(wire.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_address_creates_no_transport() {
        let (client, wire, _recorder) = setup("");
        assert!(!client.connect());
        assert_eq!(wire.created.load(Ordering::SeqCst), 0);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_connect_stops_transport() {
        let (client, wire, _recorder) = setup(ADDRESS);
        wire.fail_connect.store(true, Ordering::SeqCst);

        assert!(!client.connect());
        assert_eq!(wire.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());

        wire.fail_connect.store(false, Ordering::SeqCst);
        assert!(client.connect());
    }

    #[test]
    fn connect_twice_is_rejected() {
        let (client, wire, _recorder) = setup(ADDRESS);
        assert!(client.connect());
        assert!(!client.connect());
        assert_eq!(wire.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_without_open_session_is_noop() {
        let (client, wire, _recorder) = setup(ADDRESS);
        let message = ColibriMessage::ReceiverVideoConstraints(ReceiverVideoConstraints::no_video());
        client.send_message(&message);
        assert!(wire.frames().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert!(client.connect());
        wire.current().on_message(SERVER_HELLO);
        wire.open.store(false, Ordering::SeqCst);
        client.send_message(&message);

        assert_eq!(wire.frames().len(), 2);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[test]
    fn application_send_requires_ready() {
        let (client, wire, _recorder) = setup(ADDRESS);
        assert!(client.connect());
        let message = ColibriMessage::EndpointMessage(EndpointMessage {
            to: Some("ep2".into()),
            ..Default::default()
        });
        client.send_message(&message);
        assert!(wire.frames().is_empty());

        wire.current().on_message(SERVER_HELLO);
        client.send_message(&message);
        assert_eq!(
            wire.frames().last().map(String::as_str),
            Some(r#"{"colibriClass":"EndpointMessage","to":"ep2"}"#)
        );
    }

    #[test]
    fn unknown_messages_cannot_be_sent() {
        let (client, wire, _recorder) = ready();
        client.send_message(&ColibriMessage::Unknown {
            colibri_class: "Custom".into(),
            body: json!({}),
        });
        client.send_message(&ColibriMessage::SenderVideoConstraints(
            SenderVideoConstraints::default(),
        ));
        assert_eq!(wire.frames().len(), 3);
    }

    #[test]
    fn server_hello_after_remote_close_completes_handshake_again() {
        let (client, wire, recorder) = ready();
        wire.current().on_close(1001, "going away");
        assert_eq!(client.state(), ConnectionState::Closed);

        wire.current().on_message(SERVER_HELLO);

        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(wire.frames(), vec![CLIENT_HELLO, NO_VIDEO, CLIENT_HELLO, NO_VIDEO]);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Connected,
                Event::Disconnected(1001, "going away".into()),
                Event::Connected,
            ]
        );
    }

    #[test]
    fn late_events_of_replaced_connection_are_ignored() {
        let (client, wire, recorder) = ready();
        // Held like a reader task that is still delivering.
        let previous = wire.connection(0);

        client.disconnect();
        assert!(client.connect());
        wire.current().on_message(SERVER_HELLO);
        assert!(client.is_connected());

        previous.on_message(SERVER_HELLO);
        previous.on_message(
            r#"{"colibriClass":"DominantSpeakerEndpointChangeEvent","dominantSpeakerEndpoint":"ep2"}"#,
        );
        previous.on_error(&TransportError::Closed);
        previous.on_close(1000, "");

        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(wire.frames(), vec![CLIENT_HELLO, NO_VIDEO, CLIENT_HELLO, NO_VIDEO]);
        assert_eq!(recorder.events(), vec![Event::Connected, Event::Connected]);

        wire.current().on_close(1000, "");
        assert!(!client.is_connected());
        assert_eq!(
            recorder.events(),
            vec![
                Event::Connected,
                Event::Connected,
                Event::Disconnected(1000, String::new()),
            ]
        );
    }

    #[test]
    fn reconnect_cuts_off_previous_connection() {
        let (client, wire, _recorder) = ready();
        client.disconnect();
        assert!(client.connect());

        assert!(wire.is_cut_off(0));
        assert!(!wire.is_cut_off(1));
        assert_eq!(client.state(), ConnectionState::HandshakePending);
    }

    #[test]
    fn close_reply_after_disconnect_reaches_observers() {
        let (client, wire, recorder) = ready();
        client.disconnect();
        wire.current().on_close(1000, "");

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(
            recorder.events(),
            vec![Event::Connected, Event::Disconnected(1000, String::new())]
        );
    }

    #[test]
    fn reconnect_after_remote_close_stops_previous_transport() {
        let (client, wire, recorder) = ready();
        wire.open.store(false, Ordering::SeqCst);
        wire.current().on_close(1006, "abnormal");

        assert!(client.connect());
        assert_eq!(wire.created.load(Ordering::SeqCst), 2);
        assert_eq!(wire.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::HandshakePending);

        wire.current().on_message(SERVER_HELLO);
        assert!(client.is_connected());
        assert_eq!(
            recorder.events(),
            vec![
                Event::Connected,
                Event::Disconnected(1006, "abnormal".into()),
                Event::Connected,
            ]
        );
    }

    #[test]
    fn disconnect_during_connect_wins_over_server_hello() {
        let (client, wire, recorder) = setup(ADDRESS);
        let weak = Arc::downgrade(&client);
        *wire.during_connect.lock() = Some(Box::new(move |handler: &dyn ChannelHandler| {
            if let Some(client) = weak.upgrade() {
                client.disconnect();
            }
            handler.on_message(SERVER_HELLO);
        }));

        assert!(!client.connect());
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(wire.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.events(), vec![Event::Connected]);
    }

    #[test]
    fn dropped_observer_is_skipped() {
        let (client, wire, recorder) = setup(ADDRESS);
        drop(recorder);
        assert!(client.connect());
        wire.current().on_message(SERVER_HELLO);
        wire.current().on_close(1000, "bye");
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn dropping_the_client_stops_the_transport() {
        let (client, wire, _recorder) = setup(ADDRESS);
        assert!(client.connect());
        drop(client);
        assert_eq!(wire.stopped.load(Ordering::SeqCst), 1);
    }
}
