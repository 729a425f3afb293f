//! Typed plugin event bus for the emulated server.
//!
//! Each lifecycle point emits a fixed-shape event payload. Handlers run
//! sequentially in registration order; each receives the payload returned
//! by the previous handler and may modify it. Default implementations
//! pass the payload through, so a plugin implements whatever subset it
//! cares about.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::warn;

use crate::protocol::{
    AllThreadsStoppedUpdate, GenericResponse, IoPortOpenedUpdate, ProtocolRequest,
    StackTraceResponse, ThreadAttachedUpdate, ThreadsResponse, UndefinedUpdate, VariablesResponse,
};

/// Boxed future for plugin hook results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A frame the server can send: a response to a request, or an
/// unsolicited update.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Generic(GenericResponse),
    StackTrace(StackTraceResponse),
    Threads(ThreadsResponse),
    Variables(VariablesResponse),
    AllThreadsStopped(AllThreadsStoppedUpdate),
    ThreadAttached(ThreadAttachedUpdate),
    IoPortOpened(IoPortOpenedUpdate),
    Undefined(UndefinedUpdate),
}

impl ServerMessage {
    /// Serialize for the wire, stamping the packet length.
    pub fn to_buffer(&mut self) -> Bytes {
        match self {
            ServerMessage::Generic(m) => m.to_buffer(),
            ServerMessage::StackTrace(m) => m.to_buffer(),
            ServerMessage::Threads(m) => m.to_buffer(),
            ServerMessage::Variables(m) => m.to_buffer(),
            ServerMessage::AllThreadsStopped(m) => m.to_buffer(),
            ServerMessage::ThreadAttached(m) => m.to_buffer(),
            ServerMessage::IoPortOpened(m) => m.to_buffer(),
            ServerMessage::Undefined(m) => m.to_buffer(),
        }
    }

    /// The request this message answers; zero for updates.
    pub fn request_id(&self) -> u32 {
        match self {
            ServerMessage::Generic(m) => m.request_id,
            ServerMessage::StackTrace(m) => m.request_id,
            ServerMessage::Threads(m) => m.request_id,
            ServerMessage::Variables(m) => m.request_id,
            ServerMessage::AllThreadsStopped(_)
            | ServerMessage::ThreadAttached(_)
            | ServerMessage::IoPortOpened(_)
            | ServerMessage::Undefined(_) => 0,
        }
    }
}

/// A client connected. A handler may swap the socket (e.g. to wrap or
/// redirect it) by returning a different one.
pub struct ClientConnectedEvent {
    pub socket: TcpStream,
}

/// The server wants a request parsed out of its unhandled buffer. A
/// handler that recognizes one sets `request` and leaves the residual
/// bytes in `buffer`.
pub struct ProvideRequestEvent {
    pub buffer: Bytes,
    pub request: Option<ProtocolRequest>,
}

/// A parsed request needs a response. A handler sets `response`; leaving
/// it empty suppresses the reply.
pub struct ProvideResponseEvent {
    pub request: ProtocolRequest,
    pub response: Option<ServerMessage>,
}

/// A response is about to be (or was just) written.
pub struct SendResponseEvent {
    pub response: ServerMessage,
}

/// Hooks into the emulated server's lifecycle.
pub trait ServerPlugin: Send + 'static {
    fn on_client_connected<'a>(
        &'a mut self,
        event: ClientConnectedEvent,
    ) -> BoxFuture<'a, ClientConnectedEvent> {
        Box::pin(async move { event })
    }

    fn provide_request<'a>(
        &'a mut self,
        event: ProvideRequestEvent,
    ) -> BoxFuture<'a, ProvideRequestEvent> {
        Box::pin(async move { event })
    }

    fn provide_response<'a>(
        &'a mut self,
        event: ProvideResponseEvent,
    ) -> BoxFuture<'a, ProvideResponseEvent> {
        Box::pin(async move { event })
    }

    fn before_send_response<'a>(
        &'a mut self,
        event: SendResponseEvent,
    ) -> BoxFuture<'a, SendResponseEvent> {
        Box::pin(async move { event })
    }

    fn after_send_response<'a>(
        &'a mut self,
        event: SendResponseEvent,
    ) -> BoxFuture<'a, SendResponseEvent> {
        Box::pin(async move { event })
    }
}

/// Stock request parser: recognizes the standard request frames so test
/// plugins only have to produce responses.
pub struct StandardRequestParser;

impl ServerPlugin for StandardRequestParser {
    fn provide_request<'a>(
        &'a mut self,
        mut event: ProvideRequestEvent,
    ) -> BoxFuture<'a, ProvideRequestEvent> {
        Box::pin(async move {
            if event.request.is_some() {
                return event;
            }
            match ProtocolRequest::from_buffer(&event.buffer) {
                Ok(request) => {
                    let consumed = request.packet_length() as usize;
                    event.buffer = event.buffer.slice(consumed..);
                    event.request = Some(request);
                }
                Err(e) if e.is_short_read() => {}
                Err(e) => {
                    // Unusable frame; skip what its header claims so the
                    // stream can resynchronize.
                    warn!(error = %e, "dropping unparseable request frame");
                    let declared = crate::protocol::peek_packet_length(&event.buffer)
                        .unwrap_or(0) as usize;
                    let skip = declared
                        .max(crate::protocol::FRAME_HEADER_SIZE)
                        .min(event.buffer.len());
                    event.buffer = event.buffer.slice(skip..);
                }
            }
            event
        })
    }
}

/// Threading helper: run one event through every plugin in order.
macro_rules! run_bus {
    ($plugins:expr, $hook:ident, $event:expr) => {{
        let mut event = $event;
        for plugin in $plugins.iter_mut() {
            event = plugin.$hook(event).await;
        }
        event
    }};
}

pub(crate) use run_bus;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, EmptyRequest, StepRequest, StepType};

    #[tokio::test]
    async fn standard_parser_extracts_and_leaves_residual() {
        let mut parser = StandardRequestParser;
        let mut wire = EmptyRequest::new(Command::Continue, 1).to_buffer().to_vec();
        wire.extend_from_slice(&StepRequest::new(2, 0, StepType::Line).to_buffer());

        let event = parser
            .provide_request(ProvideRequestEvent {
                buffer: Bytes::from(wire),
                request: None,
            })
            .await;

        let request = event.request.unwrap();
        assert_eq!(request.command(), Command::Continue);
        assert_eq!(request.request_id(), 1);
        // The second frame is untouched residual.
        assert_eq!(event.buffer.len(), 17);
    }

    #[tokio::test]
    async fn standard_parser_waits_on_partial_frames() {
        let mut parser = StandardRequestParser;
        let wire = EmptyRequest::new(Command::Continue, 1).to_buffer();

        let event = parser
            .provide_request(ProvideRequestEvent {
                buffer: wire.slice(..5),
                request: None,
            })
            .await;

        assert!(event.request.is_none());
        assert_eq!(event.buffer.len(), 5);
    }

    #[tokio::test]
    async fn standard_parser_skips_garbage_frames() {
        let mut parser = StandardRequestParser;
        let mut wire = Vec::new();
        wire.extend_from_slice(&12u32.to_le_bytes());
        wire.extend_from_slice(&1u32.to_le_bytes());
        wire.extend_from_slice(&400u32.to_le_bytes()); // no such command

        let event = parser
            .provide_request(ProvideRequestEvent {
                buffer: Bytes::from(wire),
                request: None,
            })
            .await;

        assert!(event.request.is_none());
        assert!(event.buffer.is_empty());
    }

    #[test]
    fn server_message_request_ids() {
        let mut msg = ServerMessage::Generic(GenericResponse::new(
            8,
            crate::protocol::ErrorCode::Ok,
        ));
        assert_eq!(msg.request_id(), 8);
        let wire = msg.to_buffer();
        assert_eq!(wire.len(), 12);

        let update = ServerMessage::Undefined(UndefinedUpdate::new(
            crate::protocol::ErrorCode::Undefined,
        ));
        assert_eq!(update.request_id(), 0);
    }
}
