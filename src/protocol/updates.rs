//! Asynchronous update frames pushed by the device.
//!
//! Updates always carry request id zero; the `update_type` field after the
//! error code says which body follows.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{
    finish_decode, finish_update, in_packet, read_update_header, ErrorCode, StopReason,
    UpdateType, WireBuffer,
};
use crate::error::Result;

/// Every script thread halted; the device is now debuggable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllThreadsStoppedUpdate {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub primary_thread_index: i32,
    pub stop_reason: StopReason,
    pub stop_reason_detail: String,
}

impl AllThreadsStoppedUpdate {
    pub fn new(primary_thread_index: i32, stop_reason: StopReason, detail: &str) -> Self {
        Self {
            packet_length: 0,
            error_code: ErrorCode::Ok,
            primary_thread_index,
            stop_reason,
            stop_reason_detail: detail.to_string(),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_update_header(&mut buf, UpdateType::AllThreadsStopped)?;
        let primary_thread_index = in_packet(buf.read_i32_le())?;
        let stop_reason = StopReason::from_wire(in_packet(buf.read_u8())?)?;
        let stop_reason_detail = in_packet(buf.read_cstring())?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            error_code: header.error_code,
            primary_thread_index,
            stop_reason,
            stop_reason_detail,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_i32_le(self.primary_thread_index);
        body.write_u8(self.stop_reason.to_wire());
        body.write_cstring(&self.stop_reason_detail);
        let (packet_length, bytes) =
            finish_update(body, self.error_code, UpdateType::AllThreadsStopped);
        self.packet_length = packet_length;
        bytes
    }
}

/// A new script thread appeared and is held at its first statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadAttachedUpdate {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub thread_index: i32,
    pub stop_reason: StopReason,
    pub stop_reason_detail: String,
}

impl ThreadAttachedUpdate {
    pub fn new(thread_index: i32, stop_reason: StopReason, detail: &str) -> Self {
        Self {
            packet_length: 0,
            error_code: ErrorCode::Ok,
            thread_index,
            stop_reason,
            stop_reason_detail: detail.to_string(),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_update_header(&mut buf, UpdateType::ThreadAttached)?;
        let thread_index = in_packet(buf.read_i32_le())?;
        let stop_reason = StopReason::from_wire(in_packet(buf.read_u8())?)?;
        let stop_reason_detail = in_packet(buf.read_cstring())?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            error_code: header.error_code,
            thread_index,
            stop_reason,
            stop_reason_detail,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_i32_le(self.thread_index);
        body.write_u8(self.stop_reason.to_wire());
        body.write_cstring(&self.stop_reason_detail);
        let (packet_length, bytes) =
            finish_update(body, self.error_code, UpdateType::ThreadAttached);
        self.packet_length = packet_length;
        bytes
    }
}

/// The device nominated a TCP port that will carry program output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPortOpenedUpdate {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub port: u32,
}

impl IoPortOpenedUpdate {
    pub fn new(port: u32) -> Self {
        Self {
            packet_length: 0,
            error_code: ErrorCode::Ok,
            port,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_update_header(&mut buf, UpdateType::IoPortOpened)?;
        let port = in_packet(buf.read_u32_le())?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            error_code: header.error_code,
            port,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_u32_le(self.port);
        let (packet_length, bytes) = finish_update(body, self.error_code, UpdateType::IoPortOpened);
        self.packet_length = packet_length;
        bytes
    }
}

/// An update the device sends when it has nothing better to say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndefinedUpdate {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
}

impl UndefinedUpdate {
    pub fn new(error_code: ErrorCode) -> Self {
        Self {
            packet_length: 0,
            error_code,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_update_header(&mut buf, UpdateType::Undefined)?;
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            error_code: header.error_code,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let (packet_length, bytes) =
            finish_update(WireBuffer::new(), self.error_code, UpdateType::Undefined);
        self.packet_length = packet_length;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DebugError;
    use crate::protocol::{peek_request_id, peek_update_type};
    use serde_json::json;

    #[test]
    fn all_threads_stopped_roundtrip() {
        let mut original = AllThreadsStoppedUpdate::new(2, StopReason::Break, "stop requested");
        let wire = original.to_buffer();
        assert_eq!(peek_request_id(&wire), Some(0));
        assert_eq!(
            peek_update_type(&wire).unwrap(),
            UpdateType::AllThreadsStopped
        );

        let decoded = AllThreadsStoppedUpdate::from_buffer(&wire).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.packet_length as usize, wire.len());
    }

    #[test]
    fn thread_attached_roundtrip() {
        let mut original = ThreadAttachedUpdate::new(1, StopReason::Normal, "");
        let wire = original.to_buffer();
        let decoded = ThreadAttachedUpdate::from_buffer(&wire).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn io_port_opened_roundtrip() {
        let mut original = IoPortOpenedUpdate::new(45_632);
        let wire = original.to_buffer();
        assert_eq!(wire.len(), 20);
        let decoded = IoPortOpenedUpdate::from_buffer(&wire).unwrap();
        assert_eq!(decoded.port, 45_632);
    }

    #[test]
    fn undefined_update_is_header_only() {
        let mut original = UndefinedUpdate::new(ErrorCode::Undefined);
        let wire = original.to_buffer();
        assert_eq!(wire.len(), 16);
        let decoded = UndefinedUpdate::from_buffer(&wire).unwrap();
        assert_eq!(decoded.error_code, ErrorCode::Undefined);
    }

    #[test]
    fn nonzero_request_id_is_rejected() {
        let mut original = IoPortOpenedUpdate::new(1);
        let mut wire = original.to_buffer().to_vec();
        wire[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            IoPortOpenedUpdate::from_buffer(&wire),
            Err(DebugError::Decode(_))
        ));
    }

    #[test]
    fn mismatched_update_type_is_rejected() {
        let mut stopped = AllThreadsStoppedUpdate::new(0, StopReason::Normal, "");
        let wire = stopped.to_buffer();
        assert!(matches!(
            ThreadAttachedUpdate::from_buffer(&wire),
            Err(DebugError::Decode(_))
        ));
    }

    #[test]
    fn split_inside_detail_is_short_read() {
        let mut original = AllThreadsStoppedUpdate::new(0, StopReason::Normal, "start of program");
        let wire = original.to_buffer();
        // Split in the middle of the detail string.
        let cut = wire.len() - 5;
        assert!(AllThreadsStoppedUpdate::from_buffer(&wire[..cut])
            .unwrap_err()
            .is_short_read());
    }

    #[test]
    fn from_json_builds_unsent_update() {
        let update = AllThreadsStoppedUpdate::from_json(json!({
            "primary_thread_index": 0,
            "stop_reason": "Normal",
            "stop_reason_detail": "",
        }))
        .unwrap();
        assert_eq!(update.packet_length, 0);
        assert_eq!(update.stop_reason, StopReason::Normal);
    }
}
