//! Wire frames.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::RelayError;

/// 1-character frame type tag. Uppercase variants flow server → client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameTag {
    #[serde(rename = "o")]
    Open,
    #[serde(rename = "O")]
    Opened,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "d")]
    Data,
    #[serde(rename = "c")]
    Close,
    #[serde(rename = "C")]
    Closed,
    #[serde(rename = "e")]
    Error,
}

/// One channel frame. Only the fields a given tag needs are present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "t")]
    pub tag: FrameTag,
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Payload bytes, base64.
    #[serde(rename = "b64", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Frame {
    fn bare(tag: FrameTag, id: u32) -> Self {
        Self {
            tag,
            id,
            host: None,
            port: None,
            payload: None,
            msg: None,
        }
    }

    pub fn open(id: u32, host: &str, port: u16) -> Self {
        Self {
            host: Some(host.to_string()),
            port: Some(port),
            ..Self::bare(FrameTag::Open, id)
        }
    }

    pub fn write(id: u32, data: &[u8]) -> Self {
        Self {
            payload: Some(B64.encode(data)),
            ..Self::bare(FrameTag::Write, id)
        }
    }

    pub fn close(id: u32) -> Self {
        Self::bare(FrameTag::Close, id)
    }

    /// Decoded payload bytes; empty when the frame carries none.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, RelayError> {
        match &self.payload {
            None => Ok(Vec::new()),
            Some(text) => B64
                .decode(text)
                .map_err(|e| RelayError::Protocol(format!("bad b64 payload: {}", e))),
        }
    }

    pub fn encode(&self) -> String {
        // Frames are plain data; encoding cannot fail.
        serde_json::to_string(self).expect("frame serialization")
    }

    pub fn decode(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::Protocol(format!("bad frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_frame_wire_shape() {
        let json = Frame::open(7, "example.com", 80).encode();
        assert!(json.contains("\"t\":\"o\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"host\":\"example.com\""));
        assert!(json.contains("\"port\":80"));
        assert!(!json.contains("b64"));
    }

    #[test]
    fn payload_round_trips_through_base64() {
        let frame = Frame::write(3, &[0, 1, 2, 0xFF]);
        let back = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(back.payload_bytes().unwrap(), vec![0, 1, 2, 0xFF]);
    }

    #[test]
    fn inbound_tags_parse() {
        let frame = Frame::decode(r#"{"t":"C","id":9}"#).unwrap();
        assert_eq!(frame.tag, FrameTag::Closed);
        let frame = Frame::decode(r#"{"t":"e","id":2,"msg":"refused"}"#).unwrap();
        assert_eq!(frame.tag, FrameTag::Error);
        assert_eq!(frame.msg.as_deref(), Some("refused"));
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode(r#"{"t":"z","id":1}"#).is_err());
    }
}
