//! Debugger client: socket ownership and the async command surface.
//!
//! [`DebugClient`] is a cheap handle over an actor task that owns the
//! control socket and the [`DebugSession`] state machine. User commands
//! travel over a channel into the actor; each carries a oneshot the
//! session resolves when the matching response frame arrives.

mod io_port;
mod session;

pub use io_port::{spawn_io_port_reader, LineAssembler};
pub use session::{ClientEvent, DebugSession, Response, ResponseSender, SessionCommand};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{DebugError, Result};
use crate::protocol::{
    GenericResponse, StackTraceResponse, StepType, ThreadsResponse, VariablesResponse,
    DEFAULT_CONTROL_PORT, DEFAULT_HOST,
};
use crate::transport::spawn_writer_task;

/// Where and how to reach the device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Open the program-output connection when the device announces one.
    pub connect_io_port: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_CONTROL_PORT,
            connect_io_port: true,
        }
    }
}

/// Handle to a running debugger session.
#[derive(Clone)]
pub struct DebugClient {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl DebugClient {
    /// Connect to the device's control port and start the session.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        debug!(host = %config.host, port = config.port, "control channel connected");
        Ok(Self::start(stream, config))
    }

    /// Start a session over an already connected stream. Used directly in
    /// tests with in-memory pipes.
    pub fn start<S>(stream: S, config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut session = DebugSession::new(writer, event_tx.clone());
        if let Err(e) = session.send_handshake() {
            error!(error = %e, "failed to queue handshake");
        }
        tokio::spawn(run_loop(reader, session, command_rx, event_tx, config));

        (
            Self {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Resume all threads. Only valid while stopped.
    pub async fn continue_run(&self) -> Result<GenericResponse> {
        self.generic(|reply| SessionCommand::Continue { reply }).await
    }

    /// Halt all threads. Only valid while running.
    pub async fn pause(&self) -> Result<GenericResponse> {
        self.generic(|reply| SessionCommand::Pause { reply }).await
    }

    /// Step one thread. Only valid while stopped.
    pub async fn step(&self, thread_index: u32, step_type: StepType) -> Result<GenericResponse> {
        self.generic(move |reply| SessionCommand::Step {
            thread_index,
            step_type,
            reply,
        })
        .await
    }

    /// List threads. Only valid while stopped.
    pub async fn threads(&self) -> Result<ThreadsResponse> {
        match self
            .request(|reply| SessionCommand::Threads { reply })
            .await?
        {
            Response::Threads(rsp) => Ok(rsp),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch one thread's call stack. Only valid while stopped.
    pub async fn stack_trace(&self, thread_index: u32) -> Result<StackTraceResponse> {
        match self
            .request(move |reply| SessionCommand::StackTrace {
                thread_index,
                reply,
            })
            .await?
        {
            Response::StackTrace(rsp) => Ok(rsp),
            other => Err(unexpected(other)),
        }
    }

    /// Fetch a variable or its children. Only valid while stopped.
    pub async fn get_variables(
        &self,
        path: Vec<String>,
        get_child_keys: bool,
        stack_frame_index: u32,
        thread_index: u32,
    ) -> Result<VariablesResponse> {
        match self
            .request(move |reply| SessionCommand::Variables {
                path,
                get_child_keys,
                stack_frame_index,
                thread_index,
                reply,
            })
            .await?
        {
            Response::Variables(rsp) => Ok(rsp),
            other => Err(unexpected(other)),
        }
    }

    /// Tell the device to leave the channel. Always valid.
    pub async fn exit_channel(&self) -> Result<GenericResponse> {
        self.generic(|reply| SessionCommand::ExitChannel { reply })
            .await
    }

    async fn generic<F>(&self, make: F) -> Result<GenericResponse>
    where
        F: FnOnce(ResponseSender) -> SessionCommand,
    {
        match self.request(make).await? {
            Response::Generic(rsp) => Ok(rsp),
            other => Err(unexpected(other)),
        }
    }

    async fn request<F>(&self, make: F) -> Result<Response>
    where
        F: FnOnce(ResponseSender) -> SessionCommand,
    {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| DebugError::ConnectionClosed)?;
        rx.await.map_err(|_| DebugError::ConnectionClosed)?
    }
}

fn unexpected(response: Response) -> DebugError {
    DebugError::Decode(format!("unexpected response variant: {response:?}"))
}

async fn run_loop<R>(
    mut reader: R,
    mut session: DebugSession,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    config: ClientConfig,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("control channel closed by peer");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = session.receive(&buf[..n]) {
                        error!(error = %e, "session failed");
                        break;
                    }
                    if let Some(port) = session.take_pending_io_port() {
                        if config.connect_io_port {
                            let _ = io_port::spawn_io_port_reader(
                                config.host.clone(),
                                port,
                                events.clone(),
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "control channel read failed");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(command) => session.handle_command(command),
                // Every client handle is gone.
                None => break,
            },
        }
    }
    session.fail_pending();
    let _ = events.send(ClientEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        AllThreadsStoppedUpdate, HandshakeRequest, HandshakeResponse, StopReason,
        HANDSHAKE_MAGIC,
    };
    use tokio::io::{duplex, AsyncWriteExt};

    /// Accept the handshake token on the raw peer side and answer it.
    async fn answer_handshake<S>(peer: &mut S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut token = [0u8; 8];
        peer.read_exact(&mut token).await.unwrap();
        assert_eq!(HandshakeRequest::from_buffer(&token).unwrap().magic, HANDSHAKE_MAGIC);
        let frame = HandshakeResponse::new(HANDSHAKE_MAGIC, (3, 1, 0), 1).to_buffer();
        peer.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn boot_stop_produces_auto_continue_on_the_wire() {
        let (stream, mut peer) = duplex(4096);
        let (_client, mut events) = DebugClient::start(stream, ClientConfig::default());

        answer_handshake(&mut peer).await;
        let update = AllThreadsStoppedUpdate::new(0, StopReason::Normal, "").to_buffer();
        peer.write_all(&update).await.unwrap();

        // The session answers with a continue request, not an event.
        let mut frame = [0u8; 12];
        peer.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[8..12], &2u32.to_le_bytes());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn gated_command_fails_without_wire_traffic() {
        let (stream, mut peer) = duplex(4096);
        let (client, _events) = DebugClient::start(stream, ClientConfig::default());

        answer_handshake(&mut peer).await;
        let err = client.threads().await.unwrap_err();
        assert!(matches!(err, DebugError::NotStopped));
    }

    #[tokio::test]
    async fn peer_close_fails_in_flight_requests() {
        let (stream, mut peer) = duplex(4096);
        let (client, mut events) = DebugClient::start(stream, ClientConfig::default());

        answer_handshake(&mut peer).await;
        let exit = client.exit_channel();
        drop(peer);

        assert!(matches!(
            exit.await.unwrap_err(),
            DebugError::ConnectionClosed
        ));
        assert!(matches!(events.recv().await.unwrap(), ClientEvent::Closed));
    }
}
