//! A queued shell command and its prompt-scan resolution.

use tokio::sync::oneshot;

use super::pipeline::{INTERRUPT_WARNING, PROMPT};
use crate::error::{DebugError, Result};

/// Scheduling options for [`execute_command`](super::TelnetPipeline::execute_command).
#[derive(Debug, Clone, Copy)]
pub struct CommandOptions {
    /// Hold the prompt until the device prints it again; the text before
    /// that prompt becomes the command's response.
    pub wait_for_prompt: bool,
    /// Jump the queue.
    pub insert_at_front: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            wait_for_prompt: true,
            insert_at_front: false,
        }
    }
}

pub(crate) struct TelnetCommand {
    text: String,
    wait_for_prompt: bool,
    responder: oneshot::Sender<Result<String>>,
}

impl TelnetCommand {
    pub(crate) fn new(
        text: &str,
        wait_for_prompt: bool,
        responder: oneshot::Sender<Result<String>>,
    ) -> Self {
        Self {
            text: text.to_string(),
            wait_for_prompt,
            responder,
        }
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn wait_for_prompt(&self) -> bool {
        self.wait_for_prompt
    }

    /// Scan accumulated shell output for this command's response: the text
    /// before the first prompt, minus the echoed command line and the
    /// not-interruptible warning. Returns the response and how many bytes
    /// of `text` the command consumed (through the prompt and the spaces
    /// the device prints after it).
    pub(crate) fn match_response(&self, text: &str) -> Option<(String, usize)> {
        let idx = text.find(PROMPT)?;
        let mut consumed = idx + PROMPT.len();
        consumed += text[consumed..].len() - text[consumed..].trim_start_matches(' ').len();

        let mut response = &text[..idx];
        for echo in [format!("{}\r\n", self.text), format!("{}\n", self.text)] {
            if let Some(stripped) = response.strip_prefix(echo.as_str()) {
                response = stripped;
                break;
            }
        }
        Some((strip_warning_lines(response), consumed))
    }

    pub(crate) fn resolve(self, response: String) {
        let _ = self.responder.send(Ok(response));
    }

    pub(crate) fn reject(self) {
        let _ = self.responder.send(Err(DebugError::ConnectionClosed));
    }
}

fn strip_warning_lines(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !line.trim().starts_with(INTERRUPT_WARNING))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str) -> (TelnetCommand, oneshot::Receiver<Result<String>>) {
        let (tx, rx) = oneshot::channel();
        (TelnetCommand::new(text, true, tx), rx)
    }

    #[test]
    fn response_is_text_before_first_prompt() {
        let (cmd, _rx) = command("print 5");
        let text = "print 5\r\n5\r\nBrightscript Debugger> ";
        let (response, consumed) = cmd.match_response(text).unwrap();
        assert_eq!(response, "5\r\n");
        assert_eq!(consumed, text.len());
    }

    #[test]
    fn warning_lines_are_stripped() {
        let (cmd, _rx) = command("print 5");
        let text =
            "print 5\r\n5\r\nwarning: operation may not be interruptible.\r\nBrightscript Debugger> ";
        let (response, _) = cmd.match_response(text).unwrap();
        assert_eq!(response, "5\r\n");
    }

    #[test]
    fn no_prompt_means_no_resolution() {
        let (cmd, _rx) = command("print 5");
        assert!(cmd.match_response("print 5\r\n5\r\n").is_none());
    }

    #[test]
    fn consumption_stops_at_first_prompt() {
        let (cmd, _rx) = command("x");
        let text = "x\r\n1\r\nBrightscript Debugger> extra\r\nBrightscript Debugger> ";
        let (response, consumed) = cmd.match_response(text).unwrap();
        assert_eq!(response, "1\r\n");
        assert_eq!(&text[consumed..], "extra\r\nBrightscript Debugger> ");
    }

    #[test]
    fn resolve_and_reject_settle_the_deferred() {
        let (cmd, mut rx) = command("x");
        cmd.resolve("out".into());
        assert_eq!(rx.try_recv().unwrap().unwrap(), "out");

        let (cmd, mut rx) = command("y");
        cmd.reject();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::ConnectionClosed)
        ));
    }
}
