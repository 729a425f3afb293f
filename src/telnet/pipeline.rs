//! Command pipeline over the device's line-oriented shell.
//!
//! The shell is half duplex: it prints a literal prompt when idle, and a
//! command's output is everything between writing the command and the
//! next prompt. Output arrives in arbitrary chunks that can split
//! messages anywhere, interleaved with thread-attach notices the shell
//! prints on its own, so each chunk is normalized before dispatch:
//! prompts are forced onto their own line, interior notice lines are
//! dropped, and a trailing notice with no prompt after it gets a no-op
//! write to coax the shell into printing one.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::command::{CommandOptions, TelnetCommand};
use crate::error::Result;
use crate::transport::WriterHandle;

/// The exact prompt the shell prints when idle.
pub const PROMPT: &str = "Brightscript Debugger>";

/// Warning the shell mixes into command output; never part of a response.
pub(crate) const INTERRUPT_WARNING: &str = "warning: operation may not be interruptible";

const THREAD_ATTACHED_PREFIX: &str = "Thread attached";

/// Events surfaced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Every raw chunk, verbatim, before any normalization.
    ConsoleOutput(String),
    /// Text the shell printed that no command claimed.
    UnhandledConsoleOutput(String),
}

/// Serializes command execution against the shell.
pub struct TelnetPipeline {
    writer: WriterHandle,
    events: mpsc::UnboundedSender<TelnetEvent>,
    commands: VecDeque<TelnetCommand>,
    active: Option<TelnetCommand>,
    unhandled: String,
    at_prompt: bool,
}

impl TelnetPipeline {
    pub fn new(writer: WriterHandle, events: mpsc::UnboundedSender<TelnetEvent>) -> Self {
        Self {
            writer,
            events,
            commands: VecDeque::new(),
            active: None,
            unhandled: String::new(),
            at_prompt: false,
        }
    }

    pub fn is_at_debugger_prompt(&self) -> bool {
        self.at_prompt
    }

    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn has_active_command(&self) -> bool {
        self.active.is_some()
    }

    pub fn unhandled_text_len(&self) -> usize {
        self.unhandled.len()
    }

    /// Feed one received chunk through normalization and dispatch.
    pub fn receive(&mut self, chunk: &str) {
        let _ = self
            .events
            .send(TelnetEvent::ConsoleOutput(chunk.to_string()));
        self.unhandled.push_str(chunk);
        self.unhandled = normalize_prompt_lines(&self.unhandled);

        let trailing_notice = ends_with_thread_attached(&self.unhandled);
        self.unhandled = strip_interior_thread_attached(&self.unhandled);
        self.at_prompt = self.unhandled.trim_end().ends_with(PROMPT);

        if !self.at_prompt && trailing_notice {
            // The notice swallowed the prompt; a no-op makes the shell
            // print it again.
            debug!("coaxing the shell to reprint its prompt");
            let _ = self.writer.send(Bytes::from_static(b"print \"\"\r\n"));
            return;
        }

        self.dispatch();
        self.try_execute_next();
    }

    fn dispatch(&mut self) {
        let matched = self
            .active
            .as_ref()
            .and_then(|active| active.match_response(&self.unhandled));

        if let Some((response, consumed)) = matched {
            let leftover = self.unhandled[consumed..].to_string();
            self.unhandled.clear();
            if !leftover.is_empty() {
                let _ = self
                    .events
                    .send(TelnetEvent::UnhandledConsoleOutput(leftover));
            }
            if let Some(active) = self.active.take() {
                debug!(command = active.text(), "command resolved");
                active.resolve(response);
            }
        } else if self.active.is_none() && !self.unhandled.is_empty() {
            // Nothing is waiting for this text. Complete lines (or an idle
            // prompt) flush out; a partial line is retained.
            if self.at_prompt || self.unhandled.ends_with('\n') {
                let text = std::mem::take(&mut self.unhandled);
                let _ = self.events.send(TelnetEvent::UnhandledConsoleOutput(text));
            }
        }
    }

    /// Enqueue a command. The receiver resolves with the command's output
    /// once the shell prints its next prompt.
    pub fn execute_command(
        &mut self,
        text: &str,
        options: CommandOptions,
    ) -> oneshot::Receiver<Result<String>> {
        let (tx, rx) = oneshot::channel();
        self.execute_command_with(text, options, tx);
        rx
    }

    /// Like [`execute_command`](Self::execute_command) but settling an
    /// externally owned deferred.
    pub fn execute_command_with(
        &mut self,
        text: &str,
        options: CommandOptions,
        responder: oneshot::Sender<Result<String>>,
    ) {
        let command = TelnetCommand::new(text, options.wait_for_prompt, responder);
        if options.insert_at_front {
            self.commands.push_front(command);
        } else {
            self.commands.push_back(command);
        }
        self.try_execute_next();
    }

    fn try_execute_next(&mut self) {
        while self.active.is_none() && self.at_prompt {
            let Some(command) = self.commands.pop_front() else {
                break;
            };
            debug!(command = command.text(), "command written to shell");
            if self
                .writer
                .send(Bytes::from(format!("{}\r\n", command.text())))
                .is_err()
            {
                command.reject();
                continue;
            }
            if command.wait_for_prompt() {
                self.at_prompt = false;
                self.active = Some(command);
            } else {
                command.resolve(String::new());
            }
        }
    }

    /// Write straight to the shell, bypassing the queue. Used for pause,
    /// which must interrupt a running program.
    pub fn write(&mut self, text: &str) {
        let _ = self.writer.send(Bytes::from(text.to_string()));
    }

    /// Reject the active and queued commands; the shell is gone.
    pub fn connection_lost(&mut self) {
        if let Some(active) = self.active.take() {
            active.reject();
        }
        for command in self.commands.drain(..) {
            command.reject();
        }
    }
}

/// Insert a newline before any prompt token glued onto another line.
fn normalize_prompt_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;
    while let Some(idx) = rest.find(PROMPT) {
        out.push_str(&rest[..idx]);
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(PROMPT);
        rest = &rest[idx + PROMPT.len()..];
    }
    out.push_str(rest);
    out
}

/// Drop newline-terminated thread-attach notice lines. The final segment
/// is kept even when it looks like a notice: it may still be growing, and
/// a complete trailing notice is the coax trigger instead.
fn strip_interior_thread_attached(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let complete = line.ends_with('\n');
        if complete && line.trim().starts_with(THREAD_ATTACHED_PREFIX) {
            continue;
        }
        out.push_str(line);
    }
    out
}

fn ends_with_thread_attached(text: &str) -> bool {
    let trimmed = text.trim_end();
    let last_line = match trimmed.rfind('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    last_line.trim_start().starts_with(THREAD_ATTACHED_PREFIX)
}
