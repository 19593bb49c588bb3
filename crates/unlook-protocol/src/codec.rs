//! Conversion between [`Message`] values and wire parts.
//!
//! Tagged messages are one JSON part. A [`Message::Frame`] is two parts: the
//! JSON [`FrameHeader`] followed by the raw payload.

use bytes::Bytes;
use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Frame, FrameHeader, Message, MessageKind};

/// Encodes a message into its wire parts.
pub fn encode(message: &Message) -> ProtocolResult<Vec<Bytes>> {
    match message {
        Message::Frame(frame) => Ok(vec![
            Bytes::from(serde_json::to_vec(&frame.header)?),
            frame.payload.clone(),
        ]),
        other => Ok(vec![Bytes::from(serde_json::to_vec(other)?)]),
    }
}

/// Encodes a tagged message as a single JSON buffer, for datagrams.
pub fn encode_json(message: &Message) -> ProtocolResult<Vec<u8>> {
    if let Message::Frame(_) = message {
        return Err(ProtocolError::malformed(
            "frames cannot be sent as a single JSON document",
        ));
    }
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message from its wire parts.
///
/// One part is decoded as a tagged JSON message, two parts as a frame.
pub fn decode(parts: &[Bytes]) -> ProtocolResult<Message> {
    match parts {
        [single] => decode_json(single),
        [header, payload] => decode_frame(header, payload.clone()),
        [] => Err(ProtocolError::malformed("message has no parts")),
        _ => Err(ProtocolError::malformed(format!(
            "unexpected message with {} parts",
            parts.len()
        ))),
    }
}

/// Decodes a single tagged JSON message.
///
/// Fails with [`ProtocolError::Malformed`] when the bytes are not JSON, the
/// `type` tag is missing or unknown, or the fields do not fit the tag.
pub fn decode_json(data: &[u8]) -> ProtocolResult<Message> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|e| ProtocolError::malformed(format!("invalid JSON: {e}")))?;

    let kind = match value.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return Err(ProtocolError::malformed("type tag is not a string")),
        None if value.is_object() => return Err(ProtocolError::malformed("missing type tag")),
        None => return Err(ProtocolError::malformed("message is not a JSON object")),
    };

    if MessageKind::from_tag(&kind).is_none() {
        let reason = format!("unknown message type {kind:?}");
        return Err(ProtocolError::malformed_kind(kind, reason));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::malformed_kind(kind, e.to_string()))
}

fn decode_frame(header: &[u8], payload: Bytes) -> ProtocolResult<Message> {
    let header: FrameHeader = serde_json::from_slice(header).map_err(|e| {
        ProtocolError::malformed_kind(MessageKind::Frame.tag(), format!("invalid frame header: {e}"))
    })?;
    Ok(Message::Frame(Frame { header, payload }))
}

/// Returns the tag a malformed message carried, if any.
///
/// Used to fill `original_type` in error responses.
pub fn malformed_kind(error: &ProtocolError) -> Option<&str> {
    match error {
        ProtocolError::Malformed { kind, .. } => kind.as_deref(),
        _ => None,
    }
}

/// True when the error is a well-formed message with a tag nobody knows.
pub fn is_unknown_kind(error: &ProtocolError) -> bool {
    malformed_kind(error).is_some_and(|kind| MessageKind::from_tag(kind).is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Announce, Response, StreamOptions};
    use serde_json::json;
    use unlook_core::{DeviceIdentity, Resolution, StreamFormat};

    fn roundtrip(message: Message) {
        let parts = encode(&message).unwrap();
        assert_eq!(decode(&parts).unwrap(), message);
    }

    #[test]
    fn roundtrips_every_kind() {
        let identity = DeviceIdentity::new("abc-123456", 2, true);
        roundtrip(Message::discover("2.0.0"));
        roundtrip(Message::Announce(
            Announce::from_identity(&identity, 5680).with_ip_address("10.0.0.7"),
        ));
        roundtrip(Message::ping(1_700_000_000.5));
        roundtrip(Message::GetStatus);
        roundtrip(Message::start_stream(
            StreamOptions::default().with_format(StreamFormat::Raw),
        ));
        roundtrip(Message::stop_stream());
        roundtrip(Message::set_config(json!({"camera": {"left": {"framerate": 15}}})));
        roundtrip(Message::SetConfig { config: None });
        roundtrip(Message::get_config());
        roundtrip(Message::CaptureFrame);
        roundtrip(Message::Disconnect);
        roundtrip(Message::Response(
            Response::ok("PING").with("timestamp", 12.5),
        ));
        roundtrip(Message::Frame(Frame::new(
            FrameHeader {
                camera: 1,
                frame: 42,
                timestamp: 1_700_000_000.25,
                format: StreamFormat::Jpeg,
                resolution: Resolution::HD,
            },
            Bytes::from_static(&[0xff, 0xd8, 0xff, 0xd9]),
        )));
    }

    #[test]
    fn frame_is_two_parts() {
        let frame = Frame::new(
            FrameHeader {
                camera: 0,
                frame: 7,
                timestamp: 1.0,
                format: StreamFormat::H264,
                resolution: Resolution::HD,
            },
            Bytes::from_static(b"nal"),
        );
        let parts = encode(&Message::Frame(frame)).unwrap();
        assert_eq!(parts.len(), 2);
        let header: Value = serde_json::from_slice(&parts[0]).unwrap();
        assert_eq!(
            header,
            json!({"camera": 0, "frame": 7, "timestamp": 1.0, "format": "h264", "resolution": [1280, 720]})
        );
        assert_eq!(&parts[1][..], b"nal");
    }

    #[test]
    fn missing_tag_is_malformed() {
        for input in [&br#"{"client_version":"x"}"#[..], b"[1,2]", b"42", br#"{"type":7}"#] {
            match decode_json(input) {
                Err(ProtocolError::Malformed { kind: None, .. }) => {}
                other => panic!("unexpected result for {input:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn non_json_is_malformed() {
        for input in [&b"hello"[..], b"", b"\xff\xfe", b"{\"type\":"] {
            assert!(matches!(
                decode_json(input),
                Err(ProtocolError::Malformed { kind: None, .. })
            ));
        }
    }

    #[test]
    fn unknown_tag_keeps_kind() {
        let err = decode_json(br#"{"type":"FOO"}"#).unwrap_err();
        assert_eq!(malformed_kind(&err), Some("FOO"));
        assert!(is_unknown_kind(&err));
    }

    #[test]
    fn bad_fields_keep_kind() {
        let err = decode_json(br#"{"type":"START_STREAM","quality":"high"}"#).unwrap_err();
        assert_eq!(malformed_kind(&err), Some("START_STREAM"));
        assert!(!is_unknown_kind(&err));

        let err = decode_json(br#"{"type":"UNLOOK_ANNOUNCE","device_id":"x"}"#).unwrap_err();
        assert_eq!(malformed_kind(&err), Some("UNLOOK_ANNOUNCE"));
    }

    #[test]
    fn bad_frame_header() {
        let parts = [Bytes::from_static(b"{}"), Bytes::from_static(b"x")];
        let err = decode(&parts).unwrap_err();
        assert_eq!(malformed_kind(&err), Some("FRAME"));
    }

    #[test]
    fn part_count_checks() {
        assert!(matches!(decode(&[]), Err(ProtocolError::Malformed { .. })));
        let three = vec![Bytes::from_static(b"a"); 3];
        assert!(matches!(decode(&three), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn datagram_encoding() {
        let data = encode_json(&Message::discover("1.0")).unwrap();
        assert_eq!(decode_json(&data).unwrap(), Message::discover("1.0"));
    }
}
