//! Handshake frames.
//!
//! The client opens the control channel by writing a bare 8-byte token:
//! the magic string and its NUL terminator, no header. The device answers
//! with a header-prefixed frame carrying the magic back plus its protocol
//! version and, from major version 3, a revision timestamp.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{
    finish_decode, finish_response, in_packet, read_response_header, ErrorCode, WireBuffer,
    HANDSHAKE_MAGIC,
};
use crate::error::{DebugError, Result};

/// Length of the handshake request token on the wire.
pub const HANDSHAKE_TOKEN_SIZE: usize = 8;

/// The bare magic token the client sends first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub magic: String,
}

impl HandshakeRequest {
    pub fn new() -> Self {
        Self {
            magic: HANDSHAKE_MAGIC.to_string(),
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Decode the fixed-size token. A token without a NUL cannot be valid,
    /// so it fails as a magic mismatch rather than a short read.
    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_TOKEN_SIZE {
            return Err(DebugError::ShortRead);
        }
        let token = &data[..HANDSHAKE_TOKEN_SIZE];
        let Some(nul) = token.iter().position(|&b| b == 0) else {
            return Err(DebugError::BadMagic {
                expected: HANDSHAKE_MAGIC.to_string(),
                actual: String::from_utf8_lossy(token).into_owned(),
            });
        };
        let magic = String::from_utf8_lossy(&token[..nul]).into_owned();
        Ok(Self { magic })
    }

    /// Encode as exactly [`HANDSHAKE_TOKEN_SIZE`] bytes, NUL padded.
    pub fn to_buffer(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_TOKEN_SIZE);
        let text = self.magic.as_bytes();
        let copy = text.len().min(HANDSHAKE_TOKEN_SIZE - 1);
        buf.put_slice(&text[..copy]);
        while buf.len() < HANDSHAKE_TOKEN_SIZE {
            buf.put_u8(0);
        }
        buf.freeze()
    }
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// The device's reply to the handshake token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub packet_length: u32,
    #[serde(default)]
    pub request_id: u32,
    #[serde(default)]
    pub error_code: ErrorCode,
    pub magic: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default)]
    pub revision_timestamp: i64,
}

impl HandshakeResponse {
    pub fn new(magic: &str, version: (u32, u32, u32), revision_timestamp: i64) -> Self {
        Self {
            packet_length: 0,
            request_id: 0,
            error_code: ErrorCode::Ok,
            magic: magic.to_string(),
            major: version.0,
            minor: version.1,
            patch: version.2,
            revision_timestamp,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut buf = WireBuffer::from_slice(data);
        let header = read_response_header(&mut buf)?;
        let magic = in_packet(buf.read_cstring())?;
        let major = in_packet(buf.read_u32_le())?;
        let minor = in_packet(buf.read_u32_le())?;
        let patch = in_packet(buf.read_u32_le())?;
        let revision_timestamp = if major >= 3 {
            in_packet(buf.read_i64_le())?
        } else {
            0
        };
        finish_decode(&buf, header.packet_length)?;
        Ok(Self {
            packet_length: header.packet_length,
            request_id: header.request_id,
            error_code: header.error_code,
            magic,
            major,
            minor,
            patch,
            revision_timestamp,
        })
    }

    pub fn to_buffer(&mut self) -> Bytes {
        let mut body = WireBuffer::new();
        body.write_cstring(&self.magic);
        body.write_u32_le(self.major);
        body.write_u32_le(self.minor);
        body.write_u32_le(self.patch);
        if self.major >= 3 {
            body.write_i64_le(self.revision_timestamp);
        }
        let (packet_length, bytes) = finish_response(body, self.request_id, self.error_code);
        self.packet_length = packet_length;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_token_is_exactly_eight_bytes() {
        let wire = HandshakeRequest::new().to_buffer();
        assert_eq!(&wire[..], b"bsdebug\0");
    }

    #[test]
    fn request_roundtrip() {
        let wire = HandshakeRequest::new().to_buffer();
        let decoded = HandshakeRequest::from_buffer(&wire).unwrap();
        assert_eq!(decoded.magic, HANDSHAKE_MAGIC);
    }

    #[test]
    fn request_short_token_waits() {
        assert!(HandshakeRequest::from_buffer(b"bsde")
            .unwrap_err()
            .is_short_read());
    }

    #[test]
    fn request_token_without_nul_is_bad_magic() {
        let err = HandshakeRequest::from_buffer(b"nonsense").unwrap_err();
        assert!(matches!(err, DebugError::BadMagic { .. }));
    }

    #[test]
    fn response_roundtrip_with_timestamp() {
        let mut original = HandshakeResponse::new(HANDSHAKE_MAGIC, (3, 1, 0), 1_700_000_000_000);
        let wire = original.to_buffer();
        // header 12 + magic 8 + versions 12 + timestamp 8
        assert_eq!(wire.len(), 40);
        assert_eq!(original.packet_length, 40);

        let decoded = HandshakeResponse::from_buffer(&wire).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.packet_length as usize, wire.len());
    }

    #[test]
    fn pre_v3_response_has_no_timestamp() {
        let mut original = HandshakeResponse::new(HANDSHAKE_MAGIC, (2, 0, 0), 0);
        let wire = original.to_buffer();
        assert_eq!(wire.len(), 32);
        let decoded = HandshakeResponse::from_buffer(&wire).unwrap();
        assert_eq!(decoded.revision_timestamp, 0);
    }

    #[test]
    fn response_split_inside_body_is_short_read() {
        let mut original = HandshakeResponse::new(HANDSHAKE_MAGIC, (3, 1, 0), 42);
        let wire = original.to_buffer();
        for cut in 0..wire.len() {
            assert!(
                HandshakeResponse::from_buffer(&wire[..cut])
                    .unwrap_err()
                    .is_short_read(),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn response_from_json_defaults_header_fields() {
        let rsp = HandshakeResponse::from_json(json!({
            "magic": "bsdebug",
            "major": 3,
            "minor": 1,
            "patch": 0,
        }))
        .unwrap();
        assert_eq!(rsp.packet_length, 0);
        assert_eq!(rsp.error_code, ErrorCode::Ok);
        assert_eq!(rsp.revision_timestamp, 0);
    }
}
