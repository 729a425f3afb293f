//! Wire protocol: constants, buffer primitives, and message codecs.
//!
//! Every frame except the handshake request starts with a common header of
//! u32 LE fields: `packet_length` (total frame bytes), `request_id` (zero
//! for asynchronous updates), then `command_code` for requests or
//! `error_code` for responses and updates; updates append `update_type`.
//!
//! Encoding builds the body first and prepends the header, so
//! `packet_length` is always the exact on-wire length. Decoding never
//! consumes bytes on failure: a `ShortRead` leaves the caller's buffer
//! untouched until more data arrives.

pub mod buffer;
pub mod constants;
pub mod handshake;
pub mod requests;
pub mod responses;
pub mod updates;

pub use buffer::WireBuffer;
pub use constants::{
    variable_request_flags, Command, ErrorCode, StepType, StopReason, UpdateType,
    DEFAULT_CONTROL_PORT, DEFAULT_HOST, FRAME_HEADER_SIZE, HANDSHAKE_MAGIC, UPDATE_HEADER_SIZE,
};
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use requests::{
    EmptyRequest, ProtocolRequest, StackTraceRequest, StepRequest, VariablesRequest,
};
pub use responses::{
    GenericResponse, StackEntry, StackTraceResponse, ThreadInfo, ThreadsResponse, VariableInfo,
    VariablesResponse,
};
pub use updates::{
    AllThreadsStoppedUpdate, IoPortOpenedUpdate, ThreadAttachedUpdate, UndefinedUpdate,
};

use bytes::Bytes;

use crate::error::{DebugError, Result};

/// Decoded request header fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestHeader {
    pub packet_length: u32,
    pub request_id: u32,
    pub command: Command,
}

/// Decoded response header fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResponseHeader {
    pub packet_length: u32,
    pub request_id: u32,
    pub error_code: ErrorCode,
}

/// The frame's declared length must be fully buffered before any body
/// field is interpreted.
fn ensure_full_packet(buf: &WireBuffer, packet_length: u32) -> Result<()> {
    if (packet_length as usize) < FRAME_HEADER_SIZE {
        return Err(DebugError::Decode(format!(
            "declared packet length {packet_length} is smaller than the header"
        )));
    }
    if (packet_length as usize) > buf.len() {
        return Err(DebugError::ShortRead);
    }
    Ok(())
}

pub(crate) fn read_request_header(buf: &mut WireBuffer) -> Result<RequestHeader> {
    let packet_length = buf.read_u32_le()?;
    let request_id = buf.read_u32_le()?;
    let command = Command::from_wire(buf.read_u32_le()?)?;
    ensure_full_packet(buf, packet_length)?;
    Ok(RequestHeader {
        packet_length,
        request_id,
        command,
    })
}

pub(crate) fn read_response_header(buf: &mut WireBuffer) -> Result<ResponseHeader> {
    let packet_length = buf.read_u32_le()?;
    let request_id = buf.read_u32_le()?;
    let error_code = ErrorCode::from_wire(buf.read_u32_le()?)?;
    ensure_full_packet(buf, packet_length)?;
    Ok(ResponseHeader {
        packet_length,
        request_id,
        error_code,
    })
}

/// Reads an update header and checks the frame is the expected update.
pub(crate) fn read_update_header(
    buf: &mut WireBuffer,
    expected: UpdateType,
) -> Result<ResponseHeader> {
    let header = read_response_header(buf)?;
    if header.request_id != 0 {
        return Err(DebugError::Decode(format!(
            "update frame carries request id {}",
            header.request_id
        )));
    }
    let update_type = UpdateType::from_wire(buf.read_u32_le()?)?;
    if update_type != expected {
        return Err(DebugError::Decode(format!(
            "expected update type {expected:?}, found {update_type:?}"
        )));
    }
    Ok(header)
}

/// A body field ran past the declared frame length: the frame is present
/// but malformed, not short.
pub(crate) fn in_packet<T>(result: Result<T>) -> Result<T> {
    result.map_err(|e| match e {
        DebugError::ShortRead => {
            DebugError::Decode("body truncated inside declared packet length".to_string())
        }
        other => other,
    })
}

/// A successful decode must consume exactly the declared length.
pub(crate) fn finish_decode(buf: &WireBuffer, packet_length: u32) -> Result<()> {
    if buf.read_offset() != packet_length as usize {
        return Err(DebugError::Decode(format!(
            "decoded {} bytes but the frame declared {}",
            buf.read_offset(),
            packet_length
        )));
    }
    Ok(())
}

/// Prepend the request header to an encoded body. Returns the final
/// packet length and the wire bytes.
pub(crate) fn finish_request(
    mut body: WireBuffer,
    request_id: u32,
    command: Command,
) -> (u32, Bytes) {
    body.insert_u32_le_at_front(command.to_wire());
    body.insert_u32_le_at_front(request_id);
    let packet_length = (body.len() + 4) as u32;
    body.insert_u32_le_at_front(packet_length);
    (packet_length, body.into_bytes())
}

/// Prepend the response header to an encoded body.
pub(crate) fn finish_response(
    mut body: WireBuffer,
    request_id: u32,
    error_code: ErrorCode,
) -> (u32, Bytes) {
    body.insert_u32_le_at_front(error_code.to_wire());
    body.insert_u32_le_at_front(request_id);
    let packet_length = (body.len() + 4) as u32;
    body.insert_u32_le_at_front(packet_length);
    (packet_length, body.into_bytes())
}

/// Prepend the update header (request id zero) to an encoded body.
pub(crate) fn finish_update(
    mut body: WireBuffer,
    error_code: ErrorCode,
    update_type: UpdateType,
) -> (u32, Bytes) {
    body.insert_u32_le_at_front(update_type.to_wire());
    body.insert_u32_le_at_front(error_code.to_wire());
    body.insert_u32_le_at_front(0);
    let packet_length = (body.len() + 4) as u32;
    body.insert_u32_le_at_front(packet_length);
    (packet_length, body.into_bytes())
}

/// Peek the declared packet length without consuming bytes.
pub fn peek_packet_length(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Peek the request id without consuming bytes.
pub fn peek_request_id(data: &[u8]) -> Option<u32> {
    if data.len() < 8 {
        return None;
    }
    Some(u32::from_le_bytes([data[4], data[5], data[6], data[7]]))
}

/// Peek an update frame's type field. `ShortRead` until the full update
/// header has arrived.
pub fn peek_update_type(data: &[u8]) -> Result<UpdateType> {
    if data.len() < UPDATE_HEADER_SIZE {
        return Err(DebugError::ShortRead);
    }
    UpdateType::from_wire(u32::from_le_bytes([data[12], data[13], data[14], data[15]]))
}
