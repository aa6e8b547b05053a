//! WebSocket transport
//!
//! Each transport owns a small tokio runtime (the "engine"). The connection
//! is split into a reader task, which turns incoming frames into
//! [`ChannelHandler`] callbacks, and a writer task draining an unbounded
//! queue, so sending from any thread never waits on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ChannelHandler, ChannelSession, ChannelTransport, TransportFactory};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ENGINE_THREADS: usize = 2;

/// Close received without a status code.
const NO_STATUS_RECEIVED: u16 = 1005;
/// Connection dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Starts one [`WebSocketTransport`] per connection attempt.
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    close_grace: Duration,
}

impl WebSocketTransportFactory {
    /// `close_grace` bounds how long a stopping engine waits for the close
    /// handshake before it is torn down.
    pub fn new(close_grace: Duration) -> Self {
        Self { close_grace }
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self) -> Result<Box<dyn ChannelTransport>, TransportError> {
        Ok(Box::new(WebSocketTransport::start(self.close_grace)?))
    }
}

pub struct WebSocketTransport {
    runtime: Mutex<Option<Runtime>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    close_grace: Duration,
}

impl WebSocketTransport {
    pub fn start(close_grace: Duration) -> Result<Self, TransportError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(ENGINE_THREADS)
            .thread_name("colibri-ws")
            .enable_all()
            .build()
            .map_err(TransportError::Start)?;

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            reader: Mutex::new(None),
            close_grace,
        })
    }
}

impl ChannelTransport for WebSocketTransport {
    /// Blocks the calling thread; must not be called from inside a runtime.
    fn connect(
        &self,
        address: &str,
        handler: Weak<dyn ChannelHandler>,
        timeout: Duration,
    ) -> Result<Arc<dyn ChannelSession>, TransportError> {
        let handle = match self.runtime.lock().as_ref() {
            Some(runtime) => runtime.handle().clone(),
            None => return Err(TransportError::Stopped),
        };

        let (stream, response) = handle
            .block_on(async { tokio::time::timeout(timeout, connect_async(address)).await })
            .map_err(|_| TransportError::Timeout(timeout))??;
        debug!("WebSocket upgrade accepted with status {}", response.status());

        let (sink, stream) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        let session = Arc::new(WebSocketSession {
            open: AtomicBool::new(true),
            outbound: outbound_tx,
        });

        if let Some(handler) = handler.upgrade() {
            handler.on_open(session.clone());
        }

        handle.spawn(write_loop(sink, outbound_rx));
        let reader = handle.spawn(read_loop(stream, session.clone(), handler));
        *self.reader.lock() = Some(reader);

        Ok(session)
    }

    /// Hands the runtime to a short-lived thread that gives the reader
    /// `close_grace` to finish the close handshake, then shuts it down.
    fn stop(&self) -> Result<(), TransportError> {
        let Some(runtime) = self.runtime.lock().take() else {
            return Ok(());
        };
        let reader = self.reader.lock().take();
        let grace = self.close_grace;

        thread::Builder::new()
            .name("colibri-ws-stop".into())
            .spawn(move || {
                if let Some(reader) = reader {
                    runtime.block_on(async {
                        if tokio::time::timeout(grace, reader).await.is_err() {
                            debug!("Close handshake not finished within {:?}", grace);
                        }
                    });
                }
                runtime.shutdown_background();
                debug!("WebSocket engine stopped");
            })
            .map_err(TransportError::Start)?;

        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop WebSocket engine: {}", e);
        }
    }
}

struct WebSocketSession {
    open: AtomicBool,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ChannelSession for WebSocketSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        self.outbound
            .send(Message::Close(Some(frame)))
            .map_err(|_| TransportError::Closed)
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}

/// Delivers frames until the stream ends, then reports exactly one close.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    session: Arc<WebSocketSession>,
    handler: Weak<dyn ChannelHandler>,
) {
    let mut close: Option<(u16, String)> = None;

    while let Some(frame) = stream.next().await {
        let Some(handler) = handler.upgrade() else {
            debug!("Channel handler dropped, stop reading");
            break;
        };

        match frame {
            Ok(Message::Text(text)) => handler.on_message(&text),
            Ok(Message::Binary(data)) => {
                debug!("Ignoring binary frame of {} bytes", data.len());
            }
            Ok(Message::Close(frame)) => {
                session.open.store(false, Ordering::SeqCst);
                close = Some(match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                    None => (NO_STATUS_RECEIVED, String::new()),
                });
            }
            // Ping replies are queued by tungstenite itself.
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                handler.on_error(&TransportError::WebSocket(e));
                break;
            }
        }
    }

    session.open.store(false, Ordering::SeqCst);
    let (code, reason) =
        close.unwrap_or_else(|| (ABNORMAL_CLOSURE, "connection lost".to_string()));
    info!("WebSocket closed: {} - {}", code, reason);

    if let Some(handler) = handler.upgrade() {
        handler.on_close(code, &reason);
    }
}
