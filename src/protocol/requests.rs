//! Request frames sent from the client to the device.
//!
//! Continue, Stop, Threads, and ExitChannel carry no body; Step,
//! StackTrace, and Variables add the fields their operations need. The
//! header is prepended once the body is built, so `packet_length` covers
//! the full frame including its own 12 header bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    finish_decode, finish_request, in_packet, read_request_header, variable_request_flags,
    Command, StepType, WireBuffer, FRAME_HEADER_SIZE,
};
use crate::error::{DebugError, Result};

/// A request whose body is empty: Continue, Stop, Threads, ExitChannel,
/// and the breakpoint list commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyRequest {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    pub command: Command,
}

impl EmptyRequest {
    pub fn new(command: Command, request_id: u32) -> Self {
        Self {
            packet_length: 0,
            request_id,
            command,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_request_header(&mut buf)?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            command: header.command,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let (packet_length, bytes) = finish_request(WireBuffer::new(), self.request_id, self.command);
        self.packet_length = packet_length;
        bytes
    }
}

/// Step one thread by line, over a call, or out of the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    pub thread_index: u32,
    pub step_type: StepType,
}

impl StepRequest {
    pub fn new(request_id: u32, thread_index: u32, step_type: StepType) -> Self {
        Self {
            packet_length: 0,
            request_id,
            thread_index,
            step_type,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_request_header(&mut buf)?;
        if header.command != Command::Step {
            return Err(DebugError::Decode(format!(
                "expected a step request, found {:?}",
                header.command
            )));
        }
        let thread_index = in_packet(buf.read_u32_le())?;
        let step_type = StepType::from_wire(in_packet(buf.read_u8())?)?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            thread_index,
            step_type,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.thread_index);
        body.write_u8(self.step_type.to_wire());
        let (packet_length, bytes) = finish_request(body, self.request_id, Command::Step);
        self.packet_length = packet_length;
        bytes
    }
}

/// Ask for the call stack of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTraceRequest {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    pub thread_index: u32,
}

impl StackTraceRequest {
    pub fn new(request_id: u32, thread_index: u32) -> Self {
        Self {
            packet_length: 0,
            request_id,
            thread_index,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_request_header(&mut buf)?;
        if header.command != Command::StackTrace {
            return Err(DebugError::Decode(format!(
                "expected a stack trace request, found {:?}",
                header.command
            )));
        }
        let thread_index = in_packet(buf.read_u32_le())?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            thread_index,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.thread_index);
        let (packet_length, bytes) = finish_request(body, self.request_id, Command::StackTrace);
        self.packet_length = packet_length;
        bytes
    }
}

/// Ask for a variable (or its children) at a dotted access path within one
/// stack frame of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablesRequest {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    pub get_child_keys: bool,
    pub thread_index: u32,
    pub stack_frame_index: u32,
    pub path: Vec<String>,
}

impl VariablesRequest {
    pub fn new(
        request_id: u32,
        path: Vec<String>,
        get_child_keys: bool,
        stack_frame_index: u32,
        thread_index: u32,
    ) -> Self {
        Self {
            packet_length: 0,
            request_id,
            get_child_keys,
            thread_index,
            stack_frame_index,
            path,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_request_header(&mut buf)?;
        if header.command != Command::Variables {
            return Err(DebugError::Decode(format!(
                "expected a variables request, found {:?}",
                header.command
            )));
        }
        let flags = in_packet(buf.read_u8())?;
        let thread_index = in_packet(buf.read_u32_le())?;
        let stack_frame_index = in_packet(buf.read_u32_le())?;
        let path_len = in_packet(buf.read_u32_le())?;
        let mut path = Vec::with_capacity(path_len as usize);
        for _ in 0..path_len {
            path.push(in_packet(buf.read_cstring())?);
        }
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            get_child_keys: flags & variable_request_flags::GET_CHILD_KEYS != 0,
            thread_index,
            stack_frame_index,
            path,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        let mut flags = 0u8;
        if self.get_child_keys {
            flags |= variable_request_flags::GET_CHILD_KEYS;
        }
        body.write_u8(flags);
        body.write_u32_le(self.thread_index);
        body.write_u32_le(self.stack_frame_index);
        body.write_u32_le(self.path.len() as u32);
        for entry in &self.path {
            body.write_cstring(entry);
        }
        let (packet_length, bytes) = finish_request(body, self.request_id, Command::Variables);
        self.packet_length = packet_length;
        bytes
    }
}

/// A request parsed off the wire by the server, dispatched on its
/// command code.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolRequest {
    Empty(EmptyRequest),
    Step(StepRequest),
    StackTrace(StackTraceRequest),
    Variables(VariablesRequest),
}

impl ProtocolRequest {
    /// Decode whichever request sits at the head of `data`.
    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(DebugError::ShortRead);
        }
        let command =
            Command::from_wire(u32::from_le_bytes([data[8], data[9], data[10], data[11]]))?;
        Ok(match command {
            Command::Step => ProtocolRequest::Step(StepRequest::from_buffer(data)?),
            Command::StackTrace => {
                ProtocolRequest::StackTrace(StackTraceRequest::from_buffer(data)?)
            }
            Command::Variables => ProtocolRequest::Variables(VariablesRequest::from_buffer(data)?),
            _ => ProtocolRequest::Empty(EmptyRequest::from_buffer(data)?),
        })
    }

    pub fn command(&self) -> Command {
        match self {
            ProtocolRequest::Empty(r) => r.command,
            ProtocolRequest::Step(_) => Command::Step,
            ProtocolRequest::StackTrace(_) => Command::StackTrace,
            ProtocolRequest::Variables(_) => Command::Variables,
        }
    }

    pub fn request_id(&self) -> u32 {
        match self {
            ProtocolRequest::Empty(r) => r.request_id,
            ProtocolRequest::Step(r) => r.request_id,
            ProtocolRequest::StackTrace(r) => r.request_id,
            ProtocolRequest::Variables(r) => r.request_id,
        }
    }

    pub fn packet_length(&self) -> u32 {
        match self {
            ProtocolRequest::Empty(r) => r.packet_length,
            ProtocolRequest::Step(r) => r.packet_length,
            ProtocolRequest::StackTrace(r) => r.packet_length,
            ProtocolRequest::Variables(r) => r.packet_length,
        }
    }
}
