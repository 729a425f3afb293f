//! Response frames sent from the device back to the client.
//!
//! A response reuses its request's id; which body follows the header is
//! not written on the wire, so the client selects the decoder from the
//! command it recorded when the request was issued.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    finish_decode, finish_response, in_packet, read_response_header, ErrorCode, StopReason,
    WireBuffer,
};
use crate::error::Result;

/// A body-less response: Continue, Stop, Step, and ExitChannel reply with
/// the header alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericResponse {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
}

impl GenericResponse {
    pub fn new(request_id: u32, error_code: ErrorCode) -> Self {
        Self {
            packet_length: 0,
            request_id,
            error_code,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_response_header(&mut buf)?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            error_code: header.error_code,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let (packet_length, bytes) =
            finish_response(WireBuffer::new(), self.request_id, self.error_code);
        self.packet_length = packet_length;
        bytes
    }
}

/// One frame of a thread's call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub line_number: u32,
    pub function_name: String,
    pub file_path: String,
}

/// The call stack of one thread, innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTraceResponse {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub entries: Vec<StackEntry>,
}

impl StackTraceResponse {
    pub fn new(request_id: u32, entries: Vec<StackEntry>) -> Self {
        Self {
            packet_length: 0,
            request_id,
            error_code: ErrorCode::Ok,
            entries,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_response_header(&mut buf)?;
        let stack_size = in_packet(buf.read_u32_le())?;
        let mut entries = Vec::with_capacity(stack_size as usize);
        for _ in 0..stack_size {
            entries.push(StackEntry {
                line_number: in_packet(buf.read_u32_le())?,
                function_name: in_packet(buf.read_cstring())?,
                file_path: in_packet(buf.read_cstring())?,
            });
        }
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            error_code: header.error_code,
            entries,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            body.write_u32_le(entry.line_number);
            body.write_cstring(&entry.function_name);
            body.write_cstring(&entry.file_path);
        }
        let (packet_length, bytes) = finish_response(body, self.request_id, self.error_code);
        self.packet_length = packet_length;
        bytes
    }
}

/// One running or stopped thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub stop_reason: StopReason,
    pub stop_reason_detail: String,
    pub line_number: u32,
    pub function_name: String,
    pub file_path: String,
}

/// All threads known to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadsResponse {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub threads: Vec<ThreadInfo>,
}

impl ThreadsResponse {
    pub fn new(request_id: u32, threads: Vec<ThreadInfo>) -> Self {
        Self {
            packet_length: 0,
            request_id,
            error_code: ErrorCode::Ok,
            threads,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_response_header(&mut buf)?;
        let count = in_packet(buf.read_u32_le())?;
        let mut threads = Vec::with_capacity(count as usize);
        for _ in 0..count {
            threads.push(ThreadInfo {
                stop_reason: StopReason::from_wire(in_packet(buf.read_u8())?)?,
                stop_reason_detail: in_packet(buf.read_cstring())?,
                line_number: in_packet(buf.read_u32_le())?,
                function_name: in_packet(buf.read_cstring())?,
                file_path: in_packet(buf.read_cstring())?,
            });
        }
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            error_code: header.error_code,
            threads,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.threads.len() as u32);
        for thread in &self.threads {
            body.write_u8(thread.stop_reason.to_wire());
            body.write_cstring(&thread.stop_reason_detail);
            body.write_u32_le(thread.line_number);
            body.write_cstring(&thread.function_name);
            body.write_cstring(&thread.file_path);
        }
        let (packet_length, bytes) = finish_response(body, self.request_id, self.error_code);
        self.packet_length = packet_length;
        bytes
    }
}

/// One variable entry. The name is on the wire only when the originating
/// request asked for child keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub flags: u8,
    pub value_type: u8,
    pub name: Option<String>,
    pub value: String,
}

/// The variable (or its children) at the requested path.
///
/// The wire does not say whether entries carry names; that shape is
/// implied by the request, so the decoder takes the request's recorded
/// `get_child_keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablesResponse {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub variables: Vec<VariableInfo>,
}

impl VariablesResponse {
    pub fn new(request_id: u32, variables: Vec<VariableInfo>) -> Self {
        Self {
            packet_length: 0,
            request_id,
            error_code: ErrorCode::Ok,
            variables,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8], named_entries: bool) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_response_header(&mut buf)?;
        let count = in_packet(buf.read_u32_le())?;
        let mut variables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let flags = in_packet(buf.read_u8())?;
            let value_type = in_packet(buf.read_u8())?;
            let name = if named_entries {
                Some(in_packet(buf.read_cstring())?)
            } else {
                None
            };
            let value = in_packet(buf.read_cstring())?;
            variables.push(VariableInfo {
                flags,
                value_type,
                name,
                value,
            });
        }
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            error_code: header.error_code,
            variables,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.variables.len() as u32);
        for variable in &self.variables {
            body.write_u8(variable.flags);
            body.write_u8(variable.value_type);
            if let Some(name) = &variable.name {
                body.write_cstring(name);
            }
            body.write_cstring(&variable.value);
        }
        let (packet_length, bytes) = finish_response(body, self.request_id, self.error_code);
        self.packet_length = packet_length;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DebugError;

    #[test]
    fn generic_response_roundtrip() {
        let mut original = GenericResponse::new(5, ErrorCode::CantContinue);
        let wire = original.to_buffer();
        assert_eq!(wire.len(), 12);
        let decoded = GenericResponse::from_buffer(&wire).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn stack_trace_two_entries_packet_length() {
        let mut rsp = StackTraceResponse::new(
            3,
            vec![
                StackEntry {
                    line_number: 10,
                    function_name: "main".into(),
                    file_path: "pkg:/source/main.brs".into(),
                },
                StackEntry {
                    line_number: 20,
                    function_name: "foo".into(),
                    file_path: "pkg:/source/foo.brs".into(),
                },
            ],
        );
        let wire = rsp.to_buffer();

        let expected = 12
            + 4
            + (4 + "main".len() + 1 + "pkg:/source/main.brs".len() + 1)
            + (4 + "foo".len() + 1 + "pkg:/source/foo.brs".len() + 1);
        assert_eq!(wire.len(), expected);
        assert_eq!(rsp.packet_length as usize, expected);

        let decoded = StackTraceResponse::from_buffer(&wire).unwrap();
        assert_eq!(decoded, rsp);
        assert_eq!(decoded.packet_length as usize, wire.len());
    }

    #[test]
    fn stack_trace_empty_roundtrip() {
        let mut rsp = StackTraceResponse::new(1, vec![]);
        let wire = rsp.to_buffer();
        assert_eq!(wire.len(), 16);
        let decoded = StackTraceResponse::from_buffer(&wire).unwrap();
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn threads_response_roundtrip() {
        let mut rsp = ThreadsResponse::new(
            2,
            vec![ThreadInfo {
                stop_reason: StopReason::Break,
                stop_reason_detail: "user break".into(),
                line_number: 14,
                function_name: "loop".into(),
                file_path: "pkg:/source/app.brs".into(),
            }],
        );
        let wire = rsp.to_buffer();
        let decoded = ThreadsResponse::from_buffer(&wire).unwrap();
        assert_eq!(decoded, rsp);
    }

    #[test]
    fn variables_response_named_and_unnamed_shapes() {
        let mut named = VariablesResponse::new(
            4,
            vec![
                VariableInfo {
                    flags: 0,
                    value_type: 6,
                    name: Some("id".into()),
                    value: "42".into(),
                },
                VariableInfo {
                    flags: 1,
                    value_type: 2,
                    name: Some("title".into()),
                    value: "roMessagePort".into(),
                },
            ],
        );
        let wire = named.to_buffer();
        let decoded = VariablesResponse::from_buffer(&wire, true).unwrap();
        assert_eq!(decoded, named);

        let mut unnamed = VariablesResponse::new(
            4,
            vec![VariableInfo {
                flags: 0,
                value_type: 6,
                name: None,
                value: "42".into(),
            }],
        );
        let wire = unnamed.to_buffer();
        let decoded = VariablesResponse::from_buffer(&wire, false).unwrap();
        assert_eq!(decoded, unnamed);
    }

    #[test]
    fn split_delivery_is_short_read_at_every_cut() {
        let mut rsp = ThreadsResponse::new(
            2,
            vec![ThreadInfo {
                stop_reason: StopReason::Normal,
                stop_reason_detail: String::new(),
                line_number: 1,
                function_name: "main".into(),
                file_path: "pkg:/source/main.brs".into(),
            }],
        );
        let wire = rsp.to_buffer();
        for cut in 0..wire.len() {
            assert!(
                ThreadsResponse::from_buffer(&wire[..cut])
                    .unwrap_err()
                    .is_short_read(),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn bad_error_code_is_decode_error() {
        let mut rsp = GenericResponse::new(1, ErrorCode::Ok);
        let mut wire = rsp.to_buffer().to_vec();
        wire[8..12].copy_from_slice(&999u32.to_le_bytes());
        assert!(matches!(
            GenericResponse::from_buffer(&wire),
            Err(DebugError::Decode(_))
        ));
    }
}
