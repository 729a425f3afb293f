//! Reader for the device-nominated I/O port.
//!
//! The port carries program output as newline-delimited text. Reads can
//! split a line anywhere, so the trailing partial line is buffered until
//! its newline arrives.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::session::ClientEvent;

/// Reassembles newline-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line completed by it. Line
    /// terminators (`\n`, and a preceding `\r`) are stripped.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// The buffered partial line, if any.
    pub fn partial(&self) -> &str {
        &self.partial
    }
}

/// Connect to the announced port and forward each complete line as a
/// [`ClientEvent::IoOutput`].
pub fn spawn_io_port_reader(
    host: String,
    port: u32,
    events: mpsc::UnboundedSender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(port) = u16::try_from(port) else {
            warn!(port, "I/O port out of range");
            return;
        };
        let mut stream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%host, port, error = %e, "failed to open I/O port");
                return;
            }
        };
        debug!(%host, port, "I/O port connected");

        let mut assembler = LineAssembler::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "I/O port read failed");
                    break;
                }
            };
            let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
            for line in assembler.push(&chunk) {
                if events.send(ClientEvent::IoOutput(line)).is_err() {
                    return;
                }
            }
        }
        debug!(port, "I/O port closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_lines_are_split() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push("one\r\ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(assembler.partial(), "");
    }

    #[test]
    fn partial_line_is_buffered_across_pushes() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push("hel").is_empty());
        assert_eq!(assembler.partial(), "hel");
        let lines = assembler.push("lo\r\nwor");
        assert_eq!(lines, vec!["hello"]);
        assert_eq!(assembler.partial(), "wor");
        assert_eq!(assembler.push("ld\n"), vec!["world"]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut assembler = LineAssembler::new();
        assert_eq!(assembler.push("a\n\nb\n"), vec!["a", "", "b"]);
    }
}
