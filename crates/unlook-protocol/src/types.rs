//! Message types exchanged between scanner and clients.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unlook_core::{Capabilities, DeviceIdentity, Resolution, StreamFormat};

/// Every message kind, identified by its `type` tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Discover,
    Announce,
    Ping,
    GetStatus,
    StartStream,
    StopStream,
    SetConfig,
    GetConfig,
    CaptureFrame,
    Disconnect,
    Response,
    Frame,
}

impl MessageKind {
    /// Kinds carried as tagged JSON objects.
    pub const TAGGED: [MessageKind; 11] = [
        MessageKind::Discover,
        MessageKind::Announce,
        MessageKind::Ping,
        MessageKind::GetStatus,
        MessageKind::StartStream,
        MessageKind::StopStream,
        MessageKind::SetConfig,
        MessageKind::GetConfig,
        MessageKind::CaptureFrame,
        MessageKind::Disconnect,
        MessageKind::Response,
    ];

    /// Wire tag of the kind. Frames have no tag and report `FRAME`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Discover => "UNLOOK_DISCOVER",
            Self::Announce => "UNLOOK_ANNOUNCE",
            Self::Ping => "PING",
            Self::GetStatus => "GET_STATUS",
            Self::StartStream => "START_STREAM",
            Self::StopStream => "STOP_STREAM",
            Self::SetConfig => "SET_CONFIG",
            Self::GetConfig => "GET_CONFIG",
            Self::CaptureFrame => "CAPTURE_FRAME",
            Self::Disconnect => "DISCONNECT",
            Self::Response => "RESPONSE",
            Self::Frame => "FRAME",
        }
    }

    /// Looks up a tagged kind by its wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::TAGGED.into_iter().find(|kind| kind.tag() == tag)
    }

    /// True for kinds a client may send on the control channel.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::GetStatus
                | Self::StartStream
                | Self::StopStream
                | Self::SetConfig
                | Self::GetConfig
                | Self::CaptureFrame
                | Self::Disconnect
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

fn unknown_client_version() -> String {
    "unknown".to_string()
}

/// A protocol message.
///
/// Tagged kinds serialize as JSON objects with a `type` key. [`Message::Frame`]
/// is never serialized through serde; the codec writes it as a header part and
/// a payload part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Broadcast by clients looking for scanners.
    #[serde(rename = "UNLOOK_DISCOVER")]
    Discover {
        #[serde(default = "unknown_client_version")]
        client_version: String,
    },

    /// A scanner describing itself.
    #[serde(rename = "UNLOOK_ANNOUNCE")]
    Announce(Announce),

    /// Liveness check.
    #[serde(rename = "PING")]
    Ping {
        #[serde(default)]
        timestamp: f64,
    },

    #[serde(rename = "GET_STATUS")]
    GetStatus,

    #[serde(rename = "START_STREAM")]
    StartStream(StreamOptions),

    #[serde(rename = "STOP_STREAM")]
    StopStream(StreamOptions),

    /// Partial configuration update.
    #[serde(rename = "SET_CONFIG")]
    SetConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },

    #[serde(rename = "GET_CONFIG")]
    GetConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
    },

    /// Capture one still from every enabled camera.
    #[serde(rename = "CAPTURE_FRAME")]
    CaptureFrame,

    /// Ends the session; the server closes the connection after replying.
    #[serde(rename = "DISCONNECT")]
    Disconnect,

    #[serde(rename = "RESPONSE")]
    Response(Response),

    /// One streamed image.
    #[serde(skip)]
    Frame(Frame),
}

impl Message {
    /// Returns the kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Discover { .. } => MessageKind::Discover,
            Self::Announce(_) => MessageKind::Announce,
            Self::Ping { .. } => MessageKind::Ping,
            Self::GetStatus => MessageKind::GetStatus,
            Self::StartStream(_) => MessageKind::StartStream,
            Self::StopStream(_) => MessageKind::StopStream,
            Self::SetConfig { .. } => MessageKind::SetConfig,
            Self::GetConfig { .. } => MessageKind::GetConfig,
            Self::CaptureFrame => MessageKind::CaptureFrame,
            Self::Disconnect => MessageKind::Disconnect,
            Self::Response(_) => MessageKind::Response,
            Self::Frame(_) => MessageKind::Frame,
        }
    }

    /// Creates a Discover message.
    pub fn discover(client_version: impl Into<String>) -> Self {
        Self::Discover {
            client_version: client_version.into(),
        }
    }

    /// Creates a Ping message.
    pub fn ping(timestamp: f64) -> Self {
        Self::Ping { timestamp }
    }

    /// Creates a SetConfig message carrying a partial configuration.
    pub fn set_config(config: Value) -> Self {
        Self::SetConfig {
            config: Some(config),
        }
    }

    /// Creates a GetConfig message.
    pub fn get_config() -> Self {
        Self::GetConfig { config: None }
    }

    /// Creates a StartStream message.
    pub fn start_stream(options: StreamOptions) -> Self {
        Self::StartStream(options)
    }

    /// Creates a StopStream message.
    pub fn stop_stream() -> Self {
        Self::StopStream(StreamOptions::default())
    }
}

/// Payload of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub device_id: String,
    pub name: String,
    pub version: String,
    /// Number of working cameras.
    pub cameras: usize,
    /// Control channel port.
    pub port: u16,
    pub capabilities: Capabilities,
    /// Sender address, filled in by periodic beacons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl Announce {
    /// Builds an announcement for `identity` reachable on `port`.
    pub fn from_identity(identity: &DeviceIdentity, port: u16) -> Self {
        Self {
            device_id: identity.device_id.clone(),
            name: identity.name.clone(),
            version: identity.version.clone(),
            cameras: identity.cameras,
            port,
            capabilities: identity.capabilities,
            ip_address: None,
        }
    }

    /// Adds the sender address.
    #[must_use]
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// Optional overrides carried by StartStream and StopStream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StreamFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl StreamOptions {
    #[must_use]
    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Answer to a command.
///
/// Command-specific data (returned config, state, timestamps) is merged into
/// the top level of the JSON object through `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    /// Tag of the request this answers.
    pub original_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Response {
    /// Creates a successful response.
    pub fn ok(original_type: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            original_type: original_type.into(),
            error: None,
            data: Map::new(),
        }
    }

    /// Creates an error response.
    pub fn error(original_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            original_type: original_type.into(),
            error: Some(reason.into()),
            data: Map::new(),
        }
    }

    /// Adds a payload entry.
    ///
    /// The reserved keys `type`, `status`, `original_type` and `error` are
    /// ignored so that payload data can never shadow the envelope.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !matches!(key.as_str(), "type" | "status" | "original_type" | "error") {
            self.data.insert(key, value.into());
        }
        self
    }

    /// Adds a payload entry from any serializable value.
    pub fn try_with<T: Serialize>(
        self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(self.with(key, serde_json::to_value(value)?))
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Returns a payload entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Error reason, if this is an error response.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Metadata sent in the first part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Camera index (0 = left, 1 = right).
    pub camera: u8,
    /// Per-camera sequence number, starting at 0 for each stream session.
    pub frame: u64,
    /// Capture time in epoch seconds.
    pub timestamp: f64,
    pub format: StreamFormat,
    pub resolution: Resolution,
}

/// A streamed frame: header plus opaque encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tags_roundtrip() {
        for kind in MessageKind::TAGGED {
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MessageKind::from_tag("FRAME"), None);
        assert_eq!(MessageKind::from_tag("ping"), None);
    }

    #[test]
    fn command_kinds() {
        assert!(MessageKind::Ping.is_command());
        assert!(MessageKind::CaptureFrame.is_command());
        assert!(MessageKind::Disconnect.is_command());
        assert!(!MessageKind::Discover.is_command());
        assert!(!MessageKind::Response.is_command());
        assert!(!MessageKind::Frame.is_command());
    }

    #[test]
    fn unit_command_serde() {
        let json = serde_json::to_string(&Message::GetStatus).unwrap();
        assert_eq!(json, r#"{"type":"GET_STATUS"}"#);
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Message::GetStatus);
    }

    #[test]
    fn discover_defaults_client_version() {
        let parsed: Message = serde_json::from_str(r#"{"type":"UNLOOK_DISCOVER"}"#).unwrap();
        assert_eq!(parsed, Message::discover("unknown"));
    }

    #[test]
    fn stream_options_are_optional() {
        let json = serde_json::to_string(&Message::stop_stream()).unwrap();
        assert_eq!(json, r#"{"type":"STOP_STREAM"}"#);

        let parsed: Message =
            serde_json::from_str(r#"{"type":"START_STREAM","format":"mjpeg","quality":80}"#)
                .unwrap();
        assert_eq!(
            parsed,
            Message::start_stream(
                StreamOptions::default()
                    .with_format(StreamFormat::Jpeg)
                    .with_quality(80)
            )
        );
    }

    #[test]
    fn announce_serde() {
        let identity = DeviceIdentity::new("0123456789abcdef", 2, false).with_version("1.2.3");
        let announce = Announce::from_identity(&identity, 5680);
        insta::assert_json_snapshot!(Message::Announce(announce), @r#"
        {
          "type": "UNLOOK_ANNOUNCE",
          "device_id": "0123456789abcdef",
          "name": "UnLook-abcdef",
          "version": "1.2.3",
          "cameras": 2,
          "port": 5680,
          "capabilities": {
            "dual_camera": true,
            "color_mode": true,
            "tof": false,
            "dlp": false
          }
        }
        "#);
    }

    #[test]
    fn response_payload_is_flattened() {
        let response = Response::ok("GET_CONFIG").with("config", json!({"stream": {}}));
        let value = serde_json::to_value(Message::Response(response.clone())).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "RESPONSE",
                "status": "ok",
                "original_type": "GET_CONFIG",
                "config": {"stream": {}}
            })
        );

        let parsed: Message = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, Message::Response(response));
    }

    #[test]
    fn response_error_and_reserved_keys() {
        let response = Response::error("FOO", "unknown command")
            .with("status", "ok")
            .with("extra", 1);
        assert!(!response.is_ok());
        assert_eq!(response.error_message(), Some("unknown command"));
        assert_eq!(response.get("status"), None);
        assert_eq!(response.get("extra"), Some(&json!(1)));
    }

    #[test]
    fn frames_are_not_serde_serializable() {
        let frame = Frame::new(
            FrameHeader {
                camera: 0,
                frame: 0,
                timestamp: 0.0,
                format: StreamFormat::Raw,
                resolution: Resolution::HD,
            },
            Bytes::from_static(b"px"),
        );
        assert!(serde_json::to_string(&Message::Frame(frame)).is_err());
    }
}
