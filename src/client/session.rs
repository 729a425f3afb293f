//! Client session state machine.
//!
//! The session is synchronous: socket bytes come in through
//! [`DebugSession::receive`], fully encoded frames go out through the
//! writer handle, and consumer events go out through an event channel.
//! All state transitions happen between suspension points, so the pending
//! table and the unhandled-bytes buffer are never observed mid-update.
//!
//! Incoming bytes accumulate until a frame can be decoded. Frames are
//! recognized in a fixed order: a response whose request id is pending,
//! then the stop/attach updates, then the undefined and I/O-port updates.
//! Anything shorter than its declared length stays buffered untouched.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{DebugError, Result};
use crate::protocol::{
    peek_packet_length, peek_request_id, peek_update_type, AllThreadsStoppedUpdate, Command,
    EmptyRequest, GenericResponse, HandshakeRequest, HandshakeResponse, IoPortOpenedUpdate,
    StackTraceRequest, StackTraceResponse, StepRequest, StepType, ThreadAttachedUpdate,
    ThreadsResponse, UndefinedUpdate, UpdateType, VariablesRequest, VariablesResponse,
    FRAME_HEADER_SIZE, HANDSHAKE_MAGIC, UPDATE_HEADER_SIZE,
};
use crate::transport::WriterHandle;

/// A decoded response, dispatched to whoever issued the request.
#[derive(Debug)]
pub enum Response {
    Generic(GenericResponse),
    Threads(ThreadsResponse),
    StackTrace(StackTraceResponse),
    Variables(VariablesResponse),
}

impl Response {
    fn packet_length(&self) -> u32 {
        match self {
            Response::Generic(r) => r.packet_length,
            Response::Threads(r) => r.packet_length,
            Response::StackTrace(r) => r.packet_length,
            Response::Variables(r) => r.packet_length,
        }
    }
}

/// Completion side of one in-flight request.
pub type ResponseSender = oneshot::Sender<Result<Response>>;

/// Events surfaced to the session's consumer.
#[derive(Debug)]
pub enum ClientEvent {
    /// The device halted (after the boot-time stop, which is swallowed).
    Stopped(AllThreadsStoppedUpdate),
    /// A new thread appeared, held at its first statement.
    ThreadAttached(ThreadAttachedUpdate),
    /// The device nominated a TCP port for program output.
    IoPortOpened(u32),
    /// One line of program output from the I/O port.
    IoOutput(String),
    /// The control connection is gone.
    Closed,
}

/// User commands routed into the session by the client handle.
#[derive(Debug)]
pub enum SessionCommand {
    Continue { reply: ResponseSender },
    Pause { reply: ResponseSender },
    Step {
        thread_index: u32,
        step_type: StepType,
        reply: ResponseSender,
    },
    Threads { reply: ResponseSender },
    StackTrace {
        thread_index: u32,
        reply: ResponseSender,
    },
    Variables {
        path: Vec<String>,
        get_child_keys: bool,
        stack_frame_index: u32,
        thread_index: u32,
        reply: ResponseSender,
    },
    ExitChannel { reply: ResponseSender },
}

/// Per-command context needed to decode the matching response.
enum RequestExtra {
    None,
    Variables { get_child_keys: bool },
}

struct RequestRecord {
    command: Command,
    extra: RequestExtra,
    /// None for requests the session issues on its own behalf.
    responder: Option<ResponseSender>,
}

/// The client-side protocol session.
pub struct DebugSession {
    handshake_complete: bool,
    protocol_version: (u32, u32, u32),
    stopped: bool,
    first_run_continue_fired: bool,
    primary_thread_index: i32,
    stack_frame_index: u32,
    total_requests: u32,
    active_requests: HashMap<u32, RequestRecord>,
    unhandled: BytesMut,
    writer: WriterHandle,
    events: mpsc::UnboundedSender<ClientEvent>,
    pending_io_port: Option<u32>,
}

impl DebugSession {
    pub fn new(writer: WriterHandle, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            handshake_complete: false,
            protocol_version: (0, 0, 0),
            stopped: false,
            first_run_continue_fired: false,
            primary_thread_index: -1,
            stack_frame_index: 0,
            total_requests: 0,
            active_requests: HashMap::new(),
            unhandled: BytesMut::new(),
            writer,
            events,
            pending_io_port: None,
        }
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn protocol_version(&self) -> (u32, u32, u32) {
        self.protocol_version
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn first_run_continue_fired(&self) -> bool {
        self.first_run_continue_fired
    }

    pub fn primary_thread_index(&self) -> i32 {
        self.primary_thread_index
    }

    pub fn stack_frame_index(&self) -> u32 {
        self.stack_frame_index
    }

    pub fn set_stack_frame_index(&mut self, index: u32) {
        self.stack_frame_index = index;
    }

    pub fn active_request_count(&self) -> usize {
        self.active_requests.len()
    }

    pub fn unhandled_len(&self) -> usize {
        self.unhandled.len()
    }

    /// Open the conversation by writing the magic token.
    pub fn send_handshake(&mut self) -> Result<()> {
        self.writer.send(HandshakeRequest::new().to_buffer())
    }

    /// The I/O port announced by the device, if one arrived since the last
    /// call. The owner opens the second connection.
    pub fn take_pending_io_port(&mut self) -> Option<u32> {
        self.pending_io_port.take()
    }

    /// Append received bytes and decode as many frames as possible.
    ///
    /// An error is fatal to the session: the caller must fail pending
    /// requests and drop the transport.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.unhandled.extend_from_slice(data);
        loop {
            if self.unhandled.is_empty() {
                return Ok(());
            }
            match self.parse_one()? {
                Some(consumed) => {
                    let _ = self.unhandled.split_to(consumed);
                }
                None => return Ok(()),
            }
        }
    }

    /// Try to decode one frame at the head of the buffer. `Some(n)` means
    /// n bytes were recognized; `None` means wait for more data.
    fn parse_one(&mut self) -> Result<Option<usize>> {
        if !self.handshake_complete {
            return self.parse_handshake();
        }
        let Some(request_id) = peek_request_id(&self.unhandled) else {
            return Ok(None);
        };
        if request_id != 0 {
            self.parse_response(request_id)
        } else {
            self.parse_update()
        }
    }

    fn parse_handshake(&mut self) -> Result<Option<usize>> {
        match HandshakeResponse::from_buffer(&self.unhandled) {
            Ok(rsp) => {
                if rsp.magic != HANDSHAKE_MAGIC {
                    return Err(DebugError::BadMagic {
                        expected: HANDSHAKE_MAGIC.to_string(),
                        actual: rsp.magic,
                    });
                }
                self.protocol_version = (rsp.major, rsp.minor, rsp.patch);
                self.handshake_complete = true;
                debug!(
                    major = rsp.major,
                    minor = rsp.minor,
                    patch = rsp.patch,
                    "handshake complete"
                );
                Ok(Some(rsp.packet_length as usize))
            }
            Err(e) if e.is_short_read() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_response(&mut self, request_id: u32) -> Result<Option<usize>> {
        let Some(record) = self.active_requests.get(&request_id) else {
            return Err(DebugError::UnknownRequestId(request_id));
        };

        let decoded = match record.command {
            Command::Threads => {
                ThreadsResponse::from_buffer(&self.unhandled).map(Response::Threads)
            }
            Command::StackTrace => {
                StackTraceResponse::from_buffer(&self.unhandled).map(Response::StackTrace)
            }
            Command::Variables => {
                let named = match record.extra {
                    RequestExtra::Variables { get_child_keys } => get_child_keys,
                    RequestExtra::None => false,
                };
                VariablesResponse::from_buffer(&self.unhandled, named).map(Response::Variables)
            }
            _ => GenericResponse::from_buffer(&self.unhandled).map(Response::Generic),
        };

        match decoded {
            Ok(response) => {
                let consumed = response.packet_length() as usize;
                let record = self
                    .active_requests
                    .remove(&request_id)
                    .expect("record was just looked up");
                debug!(request_id, command = ?record.command, "response dispatched");
                if let Some(responder) = record.responder {
                    let _ = responder.send(Ok(response));
                }
                Ok(Some(consumed))
            }
            Err(e) if e.is_short_read() => Ok(None),
            Err(e @ DebugError::Decode(_)) => {
                // Present but malformed: drop the frame and fail only the
                // request it answered; the session survives.
                warn!(request_id, error = %e, "malformed response consumed");
                let consumed = self.malformed_frame_len();
                let record = self
                    .active_requests
                    .remove(&request_id)
                    .expect("record was just looked up");
                if let Some(responder) = record.responder {
                    let _ = responder.send(Err(e));
                }
                Ok(Some(consumed))
            }
            Err(e) => Err(e),
        }
    }

    fn parse_update(&mut self) -> Result<Option<usize>> {
        let update_type = match peek_update_type(&self.unhandled) {
            Ok(t) => t,
            Err(e) if e.is_short_read() => return Ok(None),
            Err(e @ DebugError::UnknownUpdateType(_)) => {
                // Skip the frame if its declared length has arrived.
                let declared = peek_packet_length(&self.unhandled).unwrap_or(0) as usize;
                if declared >= UPDATE_HEADER_SIZE {
                    if declared > self.unhandled.len() {
                        return Ok(None);
                    }
                    warn!(error = %e, "unknown update consumed");
                    return Ok(Some(declared));
                }
                warn!(error = %e, "unknown update with bogus length, dropping header");
                return Ok(Some(UPDATE_HEADER_SIZE.min(self.unhandled.len())));
            }
            Err(e) => return Err(e),
        };

        match update_type {
            UpdateType::AllThreadsStopped => {
                self.decode_update(AllThreadsStoppedUpdate::from_buffer, |session, update| {
                    let consumed = update.packet_length as usize;
                    session.handle_all_threads_stopped(update);
                    consumed
                })
            }
            UpdateType::ThreadAttached => {
                self.decode_update(ThreadAttachedUpdate::from_buffer, |session, update| {
                    let consumed = update.packet_length as usize;
                    debug!(thread = update.thread_index, "thread attached");
                    let _ = session.events.send(ClientEvent::ThreadAttached(update));
                    consumed
                })
            }
            UpdateType::Undefined => {
                self.decode_update(UndefinedUpdate::from_buffer, |_, update| {
                    debug!(error_code = ?update.error_code, "undefined update");
                    update.packet_length as usize
                })
            }
            UpdateType::IoPortOpened => {
                self.decode_update(IoPortOpenedUpdate::from_buffer, |session, update| {
                    debug!(port = update.port, "I/O port opened");
                    session.pending_io_port = Some(update.port);
                    let _ = session.events.send(ClientEvent::IoPortOpened(update.port));
                    update.packet_length as usize
                })
            }
        }
    }

    fn decode_update<T>(
        &mut self,
        decode: fn(&[u8]) -> Result<T>,
        apply: fn(&mut Self, T) -> usize,
    ) -> Result<Option<usize>> {
        match decode(&self.unhandled) {
            Ok(update) => Ok(Some(apply(self, update))),
            Err(e) if e.is_short_read() => Ok(None),
            Err(e @ DebugError::Decode(_)) => {
                warn!(error = %e, "malformed update consumed");
                Ok(Some(self.malformed_frame_len()))
            }
            Err(e) => Err(e),
        }
    }

    /// Bytes to discard for a frame that decoded as malformed. Its
    /// declared length is known to be present; a nonsensical declared
    /// length falls back to the header alone.
    fn malformed_frame_len(&self) -> usize {
        let declared = peek_packet_length(&self.unhandled).unwrap_or(0) as usize;
        declared
            .max(FRAME_HEADER_SIZE)
            .min(self.unhandled.len())
    }

    fn handle_all_threads_stopped(&mut self, update: AllThreadsStoppedUpdate) {
        if !self.first_run_continue_fired {
            // The device boots into the debugger; resume it silently and
            // only report stops from here on.
            self.first_run_continue_fired = true;
            self.stopped = true;
            debug!("auto-continuing the boot-time stop");
            let request_id = self.next_request_id();
            let frame = EmptyRequest::new(Command::Continue, request_id).to_buffer();
            self.record_and_send(request_id, Command::Continue, RequestExtra::None, None, frame);
            self.stopped = false;
            return;
        }
        self.stopped = true;
        self.primary_thread_index = update.primary_thread_index;
        self.stack_frame_index = 0;
        let _ = self.events.send(ClientEvent::Stopped(update));
    }

    /// Route a user command into the matching request.
    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Continue { reply } => self.send_continue(reply),
            SessionCommand::Pause { reply } => self.send_pause(reply),
            SessionCommand::Step {
                thread_index,
                step_type,
                reply,
            } => self.send_step(thread_index, step_type, reply),
            SessionCommand::Threads { reply } => self.send_threads(reply),
            SessionCommand::StackTrace {
                thread_index,
                reply,
            } => self.send_stack_trace(thread_index, reply),
            SessionCommand::Variables {
                path,
                get_child_keys,
                stack_frame_index,
                thread_index,
                reply,
            } => self.send_variables(path, get_child_keys, stack_frame_index, thread_index, reply),
            SessionCommand::ExitChannel { reply } => self.send_exit_channel(reply),
        }
    }

    pub fn send_continue(&mut self, reply: ResponseSender) {
        if !self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = EmptyRequest::new(Command::Continue, request_id).to_buffer();
        self.record_and_send(
            request_id,
            Command::Continue,
            RequestExtra::None,
            Some(reply),
            frame,
        );
        self.stopped = false;
    }

    pub fn send_pause(&mut self, reply: ResponseSender) {
        if self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = EmptyRequest::new(Command::Stop, request_id).to_buffer();
        self.record_and_send(request_id, Command::Stop, RequestExtra::None, Some(reply), frame);
    }

    pub fn send_step(&mut self, thread_index: u32, step_type: StepType, reply: ResponseSender) {
        if !self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = StepRequest::new(request_id, thread_index, step_type).to_buffer();
        self.record_and_send(request_id, Command::Step, RequestExtra::None, Some(reply), frame);
        self.stopped = false;
    }

    pub fn send_threads(&mut self, reply: ResponseSender) {
        if !self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = EmptyRequest::new(Command::Threads, request_id).to_buffer();
        self.record_and_send(
            request_id,
            Command::Threads,
            RequestExtra::None,
            Some(reply),
            frame,
        );
    }

    pub fn send_stack_trace(&mut self, thread_index: u32, reply: ResponseSender) {
        if !self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = StackTraceRequest::new(request_id, thread_index).to_buffer();
        self.record_and_send(
            request_id,
            Command::StackTrace,
            RequestExtra::None,
            Some(reply),
            frame,
        );
    }

    pub fn send_variables(
        &mut self,
        path: Vec<String>,
        get_child_keys: bool,
        stack_frame_index: u32,
        thread_index: u32,
        reply: ResponseSender,
    ) {
        if !self.stopped {
            let _ = reply.send(Err(DebugError::NotStopped));
            return;
        }
        let request_id = self.next_request_id();
        let frame = VariablesRequest::new(
            request_id,
            path,
            get_child_keys,
            stack_frame_index,
            thread_index,
        )
        .to_buffer();
        self.record_and_send(
            request_id,
            Command::Variables,
            RequestExtra::Variables { get_child_keys },
            Some(reply),
            frame,
        );
    }

    pub fn send_exit_channel(&mut self, reply: ResponseSender) {
        let request_id = self.next_request_id();
        let frame = EmptyRequest::new(Command::ExitChannel, request_id).to_buffer();
        self.record_and_send(
            request_id,
            Command::ExitChannel,
            RequestExtra::None,
            Some(reply),
            frame,
        );
    }

    fn next_request_id(&mut self) -> u32 {
        self.total_requests += 1;
        self.total_requests
    }

    fn record_and_send(
        &mut self,
        request_id: u32,
        command: Command,
        extra: RequestExtra,
        responder: Option<ResponseSender>,
        frame: Bytes,
    ) {
        // Record first so a response can never race its request's entry.
        self.active_requests.insert(
            request_id,
            RequestRecord {
                command,
                extra,
                responder,
            },
        );
        debug!(request_id, ?command, "request issued");
        if self.writer.send(frame).is_err() {
            if let Some(record) = self.active_requests.remove(&request_id) {
                if let Some(responder) = record.responder {
                    let _ = responder.send(Err(DebugError::ConnectionClosed));
                }
            }
        }
    }

    /// Fail every in-flight request; called when the transport is lost.
    pub fn fail_pending(&mut self) {
        for (_, record) in self.active_requests.drain() {
            if let Some(responder) = record.responder {
                let _ = responder.send(Err(DebugError::ConnectionClosed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCode, StackEntry, StopReason};

    struct Harness {
        session: DebugSession,
        outgoing: mpsc::UnboundedReceiver<Bytes>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
    }

    fn harness() -> Harness {
        let (writer, outgoing) = WriterHandle::test_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        Harness {
            session: DebugSession::new(writer, event_tx),
            outgoing,
            events,
        }
    }

    fn handshake_bytes() -> Bytes {
        HandshakeResponse::new(HANDSHAKE_MAGIC, (3, 1, 0), 1_700_000_000_000).to_buffer()
    }

    fn stop_update_bytes(thread: i32, detail: &str) -> Bytes {
        AllThreadsStoppedUpdate::new(thread, StopReason::Normal, detail).to_buffer()
    }

    /// Handshake plus the swallowed boot-time stop, leaving the session
    /// running with the auto-continue in flight.
    fn booted() -> Harness {
        let mut h = harness();
        h.session.receive(&handshake_bytes()).unwrap();
        h.session.receive(&stop_update_bytes(0, "")).unwrap();
        let _ = h.outgoing.try_recv().unwrap(); // the auto-continue frame
        h
    }

    /// Drive `booted()` to a reported stop so gated commands are legal.
    fn booted_and_stopped() -> Harness {
        let mut h = booted();
        // Resolve the auto-continue, then stop again.
        let continue_rsp = GenericResponse::new(1, ErrorCode::Ok).to_buffer();
        h.session.receive(&continue_rsp).unwrap();
        h.session.receive(&stop_update_bytes(0, "stop")).unwrap();
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ClientEvent::Stopped(_)
        ));
        h
    }

    #[test]
    fn handshake_sets_version_and_flag() {
        let mut h = harness();
        h.session.receive(&handshake_bytes()).unwrap();
        assert!(h.session.handshake_complete());
        assert_eq!(h.session.protocol_version(), (3, 1, 0));
        assert_eq!(h.session.unhandled_len(), 0);
    }

    #[test]
    fn handshake_split_across_chunks() {
        let mut h = harness();
        let wire = handshake_bytes();
        h.session.receive(&wire[..10]).unwrap();
        assert!(!h.session.handshake_complete());
        assert_eq!(h.session.unhandled_len(), 10);
        h.session.receive(&wire[10..]).unwrap();
        assert!(h.session.handshake_complete());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut h = harness();
        let wire = HandshakeResponse::new("notdebug", (3, 1, 0), 0).to_buffer();
        assert!(matches!(
            h.session.receive(&wire),
            Err(DebugError::BadMagic { .. })
        ));
    }

    #[test]
    fn first_run_stop_fires_continue_and_stays_silent() {
        let mut h = harness();
        h.session.receive(&handshake_bytes()).unwrap();
        h.session.receive(&stop_update_bytes(0, "")).unwrap();

        assert!(h.session.first_run_continue_fired());
        assert!(!h.session.stopped());

        let frame = h.outgoing.try_recv().unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[0..4], &12u32.to_le_bytes());
        assert_eq!(&frame[4..8], &1u32.to_le_bytes());
        assert_eq!(&frame[8..12], &Command::Continue.to_wire().to_le_bytes());

        // The caller is not told about the boot-time stop.
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn second_stop_is_reported() {
        let mut h = booted();
        let continue_rsp = GenericResponse::new(1, ErrorCode::Ok).to_buffer();
        h.session.receive(&continue_rsp).unwrap();

        h.session.receive(&stop_update_bytes(3, "runtime")).unwrap();
        assert!(h.session.stopped());
        assert_eq!(h.session.primary_thread_index(), 3);
        assert_eq!(h.session.stack_frame_index(), 0);
        match h.events.try_recv().unwrap() {
            ClientEvent::Stopped(update) => {
                assert_eq!(update.primary_thread_index, 3);
                assert_eq!(update.stop_reason_detail, "runtime");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn split_update_leaves_buffer_untouched_then_dispatches_once() {
        let mut h = booted_and_stopped();
        let wire = stop_update_bytes(1, "a longer stop reason detail");

        // Split inside the detail string.
        let cut = wire.len() - 8;
        h.session.receive(&wire[..cut]).unwrap();
        assert_eq!(h.session.unhandled_len(), cut);
        assert!(h.events.try_recv().is_err());

        h.session.receive(&wire[cut..]).unwrap();
        assert_eq!(h.session.unhandled_len(), 0);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ClientEvent::Stopped(_)
        ));
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn stopped_gated_commands_fail_fast_while_running() {
        let mut h = booted();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_threads(tx);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::NotStopped)
        ));
        // Nothing went out on the wire.
        assert!(h.outgoing.try_recv().is_err());
    }

    #[test]
    fn pause_is_gated_on_running() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_pause(tx);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::NotStopped)
        ));
    }

    #[test]
    fn exit_channel_is_unconditional() {
        let mut h = booted();
        let (tx, _rx) = oneshot::channel();
        h.session.send_exit_channel(tx);
        let frame = h.outgoing.try_recv().unwrap();
        assert_eq!(&frame[8..12], &Command::ExitChannel.to_wire().to_le_bytes());
    }

    #[test]
    fn threads_response_resolves_pending_request() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_threads(tx);
        assert_eq!(h.session.active_request_count(), 1);

        let frame = h.outgoing.try_recv().unwrap();
        let request_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let rsp = ThreadsResponse::new(request_id, vec![]).to_buffer();
        h.session.receive(&rsp).unwrap();

        assert_eq!(h.session.active_request_count(), 0);
        assert!(matches!(
            rx.try_recv().unwrap().unwrap(),
            Response::Threads(_)
        ));
    }

    #[test]
    fn stack_trace_response_decoded_by_recorded_command() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_stack_trace(0, tx);
        let frame = h.outgoing.try_recv().unwrap();
        let request_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let rsp = StackTraceResponse::new(
            request_id,
            vec![StackEntry {
                line_number: 10,
                function_name: "main".into(),
                file_path: "pkg:/source/main.brs".into(),
            }],
        )
        .to_buffer();
        h.session.receive(&rsp).unwrap();

        match rx.try_recv().unwrap().unwrap() {
            Response::StackTrace(rsp) => assert_eq!(rsp.entries.len(), 1),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn variables_response_uses_recorded_shape() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session
            .send_variables(vec!["m".into(), "top".into()], true, 0, 1, tx);
        let frame = h.outgoing.try_recv().unwrap();
        let request_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let rsp = VariablesResponse::new(
            request_id,
            vec![crate::protocol::VariableInfo {
                flags: 0,
                value_type: 2,
                name: Some("top".into()),
                value: "roSGNode".into(),
            }],
        )
        .to_buffer();
        h.session.receive(&rsp).unwrap();

        match rx.try_recv().unwrap().unwrap() {
            Response::Variables(rsp) => {
                assert_eq!(rsp.variables[0].name.as_deref(), Some("top"))
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn unknown_request_id_is_fatal() {
        let mut h = booted();
        let continue_rsp = GenericResponse::new(1, ErrorCode::Ok).to_buffer();
        h.session.receive(&continue_rsp).unwrap();

        let rogue = GenericResponse::new(99, ErrorCode::Ok).to_buffer();
        assert!(matches!(
            h.session.receive(&rogue),
            Err(DebugError::UnknownRequestId(99))
        ));
    }

    #[test]
    fn thread_attached_update_is_surfaced() {
        let mut h = booted();
        let wire = ThreadAttachedUpdate::new(2, StopReason::Normal, "").to_buffer();
        h.session.receive(&wire).unwrap();
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ClientEvent::ThreadAttached(_)
        ));
    }

    #[test]
    fn io_port_update_is_surfaced_and_queued_for_the_owner() {
        let mut h = booted();
        let wire = IoPortOpenedUpdate::new(45000).to_buffer();
        h.session.receive(&wire).unwrap();
        assert_eq!(h.session.take_pending_io_port(), Some(45000));
        assert_eq!(h.session.take_pending_io_port(), None);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ClientEvent::IoPortOpened(45000)
        ));
    }

    #[test]
    fn unknown_update_type_is_skipped_by_declared_length() {
        let mut h = booted();
        // A 20-byte update frame with an out-of-range type.
        let mut rogue = Vec::new();
        rogue.extend_from_slice(&20u32.to_le_bytes());
        rogue.extend_from_slice(&0u32.to_le_bytes());
        rogue.extend_from_slice(&0u32.to_le_bytes());
        rogue.extend_from_slice(&77u32.to_le_bytes());
        rogue.extend_from_slice(&[0xAA; 4]);
        // Follow it with a real update to prove resynchronization.
        rogue.extend_from_slice(&ThreadAttachedUpdate::new(1, StopReason::Normal, "").to_buffer());

        h.session.receive(&rogue).unwrap();
        assert_eq!(h.session.unhandled_len(), 0);
        assert!(matches!(
            h.events.try_recv().unwrap(),
            ClientEvent::ThreadAttached(_)
        ));
    }

    #[test]
    fn malformed_response_fails_only_its_request() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_threads(tx);
        let frame = h.outgoing.try_recv().unwrap();
        let request_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        // Declared length covers the header plus four bytes the threads
        // body cannot account for.
        let mut rogue = Vec::new();
        rogue.extend_from_slice(&16u32.to_le_bytes());
        rogue.extend_from_slice(&request_id.to_le_bytes());
        rogue.extend_from_slice(&0u32.to_le_bytes());
        rogue.extend_from_slice(&2u32.to_le_bytes());

        h.session.receive(&rogue).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::Decode(_))
        ));
        assert_eq!(h.session.active_request_count(), 0);
        assert_eq!(h.session.unhandled_len(), 0);
    }

    #[test]
    fn fail_pending_rejects_every_responder() {
        let mut h = booted_and_stopped();
        let (tx, mut rx) = oneshot::channel();
        h.session.send_threads(tx);
        h.session.fail_pending();
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::ConnectionClosed)
        ));
        assert_eq!(h.session.active_request_count(), 0);
    }
}
