//! In-process emulated device server.
//!
//! Accepts a single control connection, answers the handshake itself, and
//! hands everything after that to the plugin bus: `provide_request` parses
//! a frame out of the unhandled buffer, `provide_response` turns it into
//! an outbound message. Received chunks are queued through the action
//! queue so each parse attempt sees a consistent buffer, retrying while a
//! frame is still incomplete.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, warn};

use super::plugin::{
    run_bus, ClientConnectedEvent, ProvideRequestEvent, ProvideResponseEvent, SendResponseEvent,
    ServerMessage, ServerPlugin,
};
use crate::action_queue::{ActionFuture, ActionQueue};
use crate::error::{DebugError, Result};
use crate::protocol::handshake::HANDSHAKE_TOKEN_SIZE;
use crate::protocol::{
    HandshakeRequest, HandshakeResponse, DEFAULT_CONTROL_PORT, DEFAULT_HOST, HANDSHAKE_MAGIC,
};
use crate::transport::spawn_writer_task;

/// Where to listen and which magic to accept.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub magic: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_CONTROL_PORT,
            magic: HANDSHAKE_MAGIC.to_string(),
        }
    }
}

/// Lifecycle events surfaced to the server's consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected(SocketAddr),
    BeforeSendResponse(u32),
    AfterSendResponse(u32),
}

/// The emulated server, configured but not yet listening.
pub struct DebugServer {
    config: ServerConfig,
    plugins: Vec<Box<dyn ServerPlugin>>,
}

impl DebugServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
        }
    }

    /// Register a plugin. Handlers run in registration order.
    pub fn add_plugin(&mut self, plugin: impl ServerPlugin) -> &mut Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Bind and start serving a single connection.
    pub async fn listen(self) -> Result<(ServerHandle, mpsc::UnboundedReceiver<ServerEvent>)> {
        let listener =
            TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "emulated server listening");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run(
            listener,
            self.plugins,
            self.config.magic,
            outbound_tx.clone(),
            outbound_rx,
            event_tx,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        Ok((
            ServerHandle {
                local_addr,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            },
            event_rx,
        ))
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: watch::Sender<bool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Push an unsolicited message (typically an update) to the client.
    pub fn send(&self, mut message: ServerMessage) -> Result<()> {
        self.outbound
            .send(message.to_buffer())
            .map_err(|_| DebugError::ConnectionClosed)
    }

    /// Close the connection; the client observes EOF.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

struct ServerCore {
    handshake_complete: bool,
    buffer: BytesMut,
    plugins: Vec<Box<dyn ServerPlugin>>,
    magic: String,
    outbound: mpsc::UnboundedSender<Bytes>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown: watch::Sender<bool>,
}

#[allow(clippy::too_many_arguments)]
async fn run(
    listener: TcpListener,
    plugins: Vec<Box<dyn ServerPlugin>>,
    magic: String,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (socket, peer) = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                return;
            }
        },
        _ = shutdown_rx.changed() => return,
    };
    debug!(%peer, "client connected");

    let mut plugins = plugins;
    let event = run_bus!(
        plugins,
        on_client_connected,
        ClientConnectedEvent { socket }
    );
    let _ = events.send(ServerEvent::ClientConnected(peer));

    let (mut read_half, write_half) = event.socket.into_split();
    let (writer, _writer_task) = spawn_writer_task(write_half);

    // Pump queued outbound frames into the writer until shutdown.
    let mut pump_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = pump_shutdown.changed() => break,
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if writer.send(frame).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let core = Arc::new(Mutex::new(ServerCore {
        handshake_complete: false,
        buffer: BytesMut::new(),
        plugins,
        magic,
        outbound: outbound_tx,
        events,
        shutdown: shutdown_tx,
    }));
    let queue = ActionQueue::new();

    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = read_half.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("client disconnected");
                    break;
                }
                Ok(n) => {
                    core.lock().await.buffer.extend_from_slice(&buf[..n]);
                    let core = core.clone();
                    let _ = queue.run(move || {
                        let core = core.clone();
                        Box::pin(async move { process(core).await }) as ActionFuture
                    });
                    queue.poke();
                }
                Err(e) => {
                    error!(error = %e, "control read failed");
                    break;
                }
            },
        }
    }
}

/// One processing attempt: drain every complete frame currently buffered.
/// `Ok(false)` means no frame was recognized; the action queue retries
/// when more data arrives.
async fn process(core: Arc<Mutex<ServerCore>>) -> Result<bool> {
    let mut core = core.lock().await;
    let mut progressed = false;
    while step(&mut core).await? {
        progressed = true;
    }
    Ok(progressed)
}

/// Handle the handshake or one request. `Ok(false)` on short read.
async fn step(core: &mut ServerCore) -> Result<bool> {
    if !core.handshake_complete {
        return match HandshakeRequest::from_buffer(&core.buffer) {
            Ok(request) => {
                if request.magic != core.magic {
                    let err = DebugError::BadMagic {
                        expected: core.magic.clone(),
                        actual: request.magic,
                    };
                    error!(error = %err, "closing connection");
                    let _ = core.shutdown.send(true);
                    return Err(err);
                }
                let _ = core.buffer.split_to(HANDSHAKE_TOKEN_SIZE);
                core.handshake_complete = true;
                let mut response =
                    HandshakeResponse::new(&core.magic, (3, 1, 0), revision_timestamp());
                core.outbound
                    .send(response.to_buffer())
                    .map_err(|_| DebugError::ConnectionClosed)?;
                debug!("handshake answered");
                Ok(true)
            }
            Err(e) if e.is_short_read() => Ok(false),
            Err(e) => {
                error!(error = %e, "closing connection");
                let _ = core.shutdown.send(true);
                Err(e)
            }
        };
    }

    let snapshot = Bytes::copy_from_slice(&core.buffer);
    let event = run_bus!(
        core.plugins,
        provide_request,
        ProvideRequestEvent {
            buffer: snapshot,
            request: None,
        }
    );
    core.buffer = BytesMut::from(&event.buffer[..]);
    let Some(request) = event.request else {
        return Ok(false);
    };
    debug!(request_id = request.request_id(), command = ?request.command(), "request parsed");

    let event = run_bus!(
        core.plugins,
        provide_response,
        ProvideResponseEvent {
            request,
            response: None,
        }
    );
    let Some(response) = event.response else {
        warn!("no plugin produced a response");
        return Ok(true);
    };

    let mut event = run_bus!(core.plugins, before_send_response, SendResponseEvent { response });
    let _ = core
        .events
        .send(ServerEvent::BeforeSendResponse(event.response.request_id()));

    let frame = event.response.to_buffer();
    core.outbound
        .send(frame)
        .map_err(|_| DebugError::ConnectionClosed)?;

    let event = run_bus!(core.plugins, after_send_response, event);
    let _ = core
        .events
        .send(ServerEvent::AfterSendResponse(event.response.request_id()));
    Ok(true)
}

fn revision_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
