//! Fallback command shell over the device's telnet port.
//!
//! [`TelnetPipeline`] is the synchronous core: chunk in, events and
//! writes out. [`TelnetShell`] wraps it in an actor that owns the socket,
//! for callers that want the async surface.

mod command;
mod pipeline;

pub use command::CommandOptions;
pub use pipeline::{TelnetEvent, TelnetPipeline, PROMPT};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{DebugError, Result};
use crate::transport::spawn_writer_task;

/// Default telnet port on the device.
pub const DEFAULT_TELNET_PORT: u16 = 8085;

enum ShellCommand {
    Execute {
        text: String,
        options: CommandOptions,
        responder: oneshot::Sender<Result<String>>,
    },
    Write {
        text: String,
    },
}

/// Async handle over a running telnet pipeline.
#[derive(Clone)]
pub struct TelnetShell {
    commands: mpsc::UnboundedSender<ShellCommand>,
}

impl TelnetShell {
    /// Connect to the device's telnet port and start the pipeline.
    pub async fn connect(
        host: &str,
        port: u16,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TelnetEvent>)> {
        let stream = TcpStream::connect((host, port)).await?;
        debug!(%host, port, "telnet channel connected");
        Ok(Self::start(stream))
    }

    /// Start the pipeline over an already connected stream.
    pub fn start<S>(stream: S) -> (Self, mpsc::UnboundedReceiver<TelnetEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let pipeline = TelnetPipeline::new(writer, event_tx);
        tokio::spawn(run_loop(reader, pipeline, command_rx));

        (
            Self {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Run one command and wait for its output.
    pub async fn execute_command(&self, text: &str, options: CommandOptions) -> Result<String> {
        let (responder, rx) = oneshot::channel();
        self.commands
            .send(ShellCommand::Execute {
                text: text.to_string(),
                options,
                responder,
            })
            .map_err(|_| DebugError::ConnectionClosed)?;
        rx.await.map_err(|_| DebugError::ConnectionClosed)?
    }

    /// Write straight to the shell, bypassing the queue.
    pub fn write(&self, text: &str) -> Result<()> {
        self.commands
            .send(ShellCommand::Write {
                text: text.to_string(),
            })
            .map_err(|_| DebugError::ConnectionClosed)
    }
}

async fn run_loop<R>(
    mut reader: R,
    mut pipeline: TelnetPipeline,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("telnet channel closed by peer");
                    break;
                }
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    pipeline.receive(&chunk);
                }
                Err(e) => {
                    error!(error = %e, "telnet read failed");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Execute { text, options, responder }) => {
                    pipeline.execute_command_with(&text, options, responder);
                }
                Some(ShellCommand::Write { text }) => pipeline.write(&text),
                None => break,
            },
        }
    }
    pipeline.connection_lost();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn command_roundtrip_over_a_stream() {
        let (stream, mut peer) = duplex(4096);
        let (shell, _events) = TelnetShell::start(stream);

        peer.write_all(b"Brightscript Debugger> ").await.unwrap();
        let result =
            tokio::spawn(
                async move { shell.execute_command("print 5", CommandOptions::default()).await },
            );

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"print 5\r\n");

        peer.write_all(b"print 5\r\n5\r\nBrightscript Debugger> ")
            .await
            .unwrap();
        assert_eq!(result.await.unwrap().unwrap(), "5\r\n");
    }

    #[tokio::test]
    async fn peer_close_rejects_waiting_commands() {
        let (stream, mut peer) = duplex(4096);
        let (shell, _events) = TelnetShell::start(stream);

        peer.write_all(b"Brightscript Debugger> ").await.unwrap();
        let pending = {
            let shell = shell.clone();
            tokio::spawn(async move {
                shell
                    .execute_command("print 1", CommandOptions::default())
                    .await
            })
        };

        // Let the command reach the pipeline, then kill the connection.
        let mut buf = [0u8; 64];
        let _ = peer.read(&mut buf).await.unwrap();
        drop(peer);

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            DebugError::ConnectionClosed
        ));
    }
}
