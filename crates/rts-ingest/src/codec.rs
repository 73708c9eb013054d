//! Length-prefixed JSON framing for the ingest wire protocol, per spec
//! section 4.4 and 6.1.
//!
//! Grounded on the teacher workspace's own dependency on
//! `tokio-util`'s `codec` feature (declared for exactly this purpose,
//! unused by any copied module until now): [`LengthDelimitedCodec`]
//! handles the length prefix, this module layers the JSON envelope on
//! top.

use bytes::{BufMut, BytesMut};
use rts_core::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// The top-level envelope every inbound and outbound frame carries, per
/// spec section 6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub payload: serde_json::Value,
    pub timestamp: i64,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Handshake,
    Event,
    Heartbeat,
    Command,
    CommandResponse,
}

/// A `tokio_util::codec::Decoder`/`Encoder` pair that delegates framing
/// to [`LengthDelimitedCodec`] and (de)serializes the JSON envelope on
/// each side of it.
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(16 * 1024 * 1024)
                .new_codec(),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CollectorError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        match self.inner.decode(src) {
            Ok(Some(bytes)) => {
                let frame: Frame = serde_json::from_slice(&bytes)?;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CollectorError::protocol(format!("frame decode error: {e}"))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CollectorError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)?;
        let mut buf = BytesMut::with_capacity(payload.len());
        buf.put_slice(&payload);
        self.inner
            .encode(buf.freeze(), dst)
            .map_err(|e| CollectorError::protocol(format!("frame encode error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_codec() {
        let mut codec = FrameCodec::default();
        let frame = Frame {
            frame_type: FrameType::Heartbeat,
            payload: serde_json::json!({}),
            timestamp: 1000,
            session_id: Some("S1".to_string()),
        };

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::Heartbeat);
        assert_eq!(decoded.session_id, Some("S1".to_string()));
    }

    #[test]
    fn decode_returns_none_on_incomplete_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_malformed_json_as_protocol_error() {
        let mut length_codec = LengthDelimitedCodec::new();
        let mut buf = BytesMut::new();
        length_codec.encode(bytes::Bytes::from_static(b"{not json"), &mut buf).unwrap();

        let mut codec = FrameCodec::default();
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), rts_core::ErrorKind::Protocol);
    }
}
