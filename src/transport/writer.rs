//! Dedicated writer task for outbound frames.
//!
//! Protocol state machines hand fully encoded frames to an mpsc channel;
//! a single task owns the socket write half and drains the channel. This
//! keeps every state transition synchronous — nothing in the session
//! suspends on a socket write — and batches frames that are already
//! queued into one flush.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{DebugError, Result};

/// Maximum frames drained per flush.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for sending frames to the writer task. Cheap to clone; dropping
/// every handle shuts the task down cleanly.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl WriterHandle {
    /// Queue a frame. Fails once the connection is gone.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| DebugError::ConnectionClosed)
    }

    /// A handle backed by a bare channel, so state-machine tests can
    /// observe outbound frames without a socket.
    #[cfg(test)]
    pub(crate) fn test_channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the writer task over a socket write half.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // All handles dropped, clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        for frame in &batch {
            writer.write_all(frame).await?;
        }
        writer.flush().await?;
    }
}
