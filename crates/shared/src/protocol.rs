//! Socket.IO v5 framing over Engine.IO v4 text frames.
//!
//! Only the subset the dashboard backend uses is supported: the default
//! namespace, text events, ping/pong and the connect handshake. Acks and
//! binary attachments are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Engine.IO protocol revision sent in the `EIO` query parameter.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Path the Socket.IO server is mounted on.
pub const SOCKET_IO_PATH: &str = "/socket.io/";

const DEFAULT_NAMESPACE: &str = "/";

/// Event names exchanged with the analytics backend.
pub mod events {
    pub const INITIAL_DATA: &str = "initial_data";
    pub const IOT_DATA_UPDATE: &str = "iot_data_update";
    pub const ANALYSIS_RESULT: &str = "analysis_result";
    pub const PREDICTION_UPDATE: &str = "prediction_update";
    pub const SPECTRAL_UPDATE: &str = "spectral_update";
    pub const ANALYSIS_ERROR: &str = "analysis_error";

    pub const REQUEST_INITIAL_DATA: &str = "request_initial_data";
    pub const REQUEST_ANALYSIS: &str = "request_analysis";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame type {0:?}")]
    UnknownFrameType(char),
    #[error("unknown packet type {0:?}")]
    UnknownPacketType(char),
    #[error("unsupported packet type {0:?}")]
    Unsupported(char),
    #[error("packet for foreign namespace {0}")]
    ForeignNamespace(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

fn malformed(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}

/// Engine.IO open handshake sent by the server as the first frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

/// An Engine.IO frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    /// Heartbeat from the server; the payload (e.g. `probe`) is echoed back.
    Ping(String),
    Pong(String),
    Message(Packet),
    Upgrade,
    Noop,
}

/// A Socket.IO packet carried inside an Engine.IO message frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Sent bare by the client; the server's reply carries the socket id.
    Connect { sid: Option<String> },
    Disconnect,
    Event { name: String, data: Option<Value> },
    ConnectError { message: String },
}

impl Frame {
    /// Parse a WebSocket text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Frame::Open)
                .map_err(malformed),
            '1' => Ok(Frame::Close),
            '2' => Ok(Frame::Ping(rest.to_string())),
            '3' => Ok(Frame::Pong(rest.to_string())),
            '4' => Packet::decode(rest).map(Frame::Message),
            '5' => Ok(Frame::Upgrade),
            '6' => Ok(Frame::Noop),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }

    /// Render as a WebSocket text frame.
    pub fn encode(&self) -> String {
        match self {
            Frame::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Frame::Close => "1".to_string(),
            Frame::Ping(payload) => format!("2{payload}"),
            Frame::Pong(payload) => format!("3{payload}"),
            Frame::Message(packet) => format!("4{}", packet.encode()),
            Frame::Upgrade => "5".to_string(),
            Frame::Noop => "6".to_string(),
        }
    }

    /// Shorthand for an outbound event frame.
    pub fn event(name: impl Into<String>, data: Option<Value>) -> Self {
        Frame::Message(Packet::Event {
            name: name.into(),
            data,
        })
    }
}

impl Packet {
    fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut body = chars.as_str();

        // Optional namespace: `/admin,` precedes the ack id and payload.
        let mut namespace = DEFAULT_NAMESPACE;
        if body.starts_with('/') {
            match body.find(',') {
                Some(idx) => {
                    namespace = &body[..idx];
                    body = &body[idx + 1..];
                }
                None => {
                    namespace = body;
                    body = "";
                }
            }
        }

        // Ack ids are numeric and sit right before the JSON payload.
        let ack_len = body.bytes().take_while(|b| b.is_ascii_digit()).count();
        let body = &body[ack_len..];

        match kind {
            '3' | '5' | '6' => return Err(ProtocolError::Unsupported(kind)),
            '0' | '1' | '2' | '4' => {}
            other => return Err(ProtocolError::UnknownPacketType(other)),
        }

        if namespace != DEFAULT_NAMESPACE {
            return Err(ProtocolError::ForeignNamespace(namespace.to_string()));
        }

        match kind {
            '0' => {
                if body.is_empty() {
                    return Ok(Packet::Connect { sid: None });
                }
                let value: Value = serde_json::from_str(body).map_err(malformed)?;
                let sid = value.get("sid").and_then(Value::as_str).map(str::to_string);
                Ok(Packet::Connect { sid })
            }
            '1' => Ok(Packet::Disconnect),
            '2' => {
                let value: Value = serde_json::from_str(body).map_err(malformed)?;
                let Value::Array(mut args) = value else {
                    return Err(ProtocolError::Malformed(
                        "event payload is not an array".to_string(),
                    ));
                };
                if args.is_empty() {
                    return Err(ProtocolError::Malformed("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ProtocolError::Malformed(format!(
                            "event name is not a string: {other}"
                        )))
                    }
                };
                let data = if args.is_empty() {
                    None
                } else {
                    Some(args.remove(0))
                };
                Ok(Packet::Event { name, data })
            }
            _ => {
                let message = match serde_json::from_str::<Value>(body) {
                    Ok(Value::String(msg)) => msg,
                    Ok(value) => value
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string(),
                    Err(_) => body.to_string(),
                };
                Ok(Packet::ConnectError { message })
            }
        }
    }

    fn encode(&self) -> String {
        match self {
            Packet::Connect { sid: None } => "0".to_string(),
            Packet::Connect { sid: Some(sid) } => {
                format!("0{}", serde_json::json!({ "sid": sid }))
            }
            Packet::Disconnect => "1".to_string(),
            Packet::Event { name, data } => {
                let mut args = vec![Value::String(name.clone())];
                if let Some(data) = data {
                    args.push(data.clone());
                }
                format!("2{}", Value::Array(args))
            }
            Packet::ConnectError { message } => {
                format!("4{}", serde_json::json!({ "message": message }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let text = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let frame = Frame::decode(text).unwrap();
        match frame {
            Frame::Open(handshake) => {
                assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.ping_timeout, 20000);
                assert_eq!(handshake.max_payload, Some(1_000_000));
            }
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_connect_reply() {
        assert_eq!(
            Frame::decode(r#"40{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap(),
            Frame::Message(Packet::Connect {
                sid: Some("wZX3oN0bSVIhsaknAAAI".to_string())
            })
        );
        assert_eq!(
            Frame::decode("40").unwrap(),
            Frame::Message(Packet::Connect { sid: None })
        );
    }

    #[test]
    fn test_decode_event() {
        let frame = Frame::decode(r#"42["initial_data",{"iot_data":[{"temperature_c":24.5}]}]"#)
            .unwrap();
        assert_eq!(
            frame,
            Frame::event(
                "initial_data",
                Some(json!({"iot_data": [{"temperature_c": 24.5}]}))
            )
        );

        assert_eq!(
            Frame::decode(r#"42["request_initial_data"]"#).unwrap(),
            Frame::event("request_initial_data", None)
        );
    }

    #[test]
    fn test_decode_event_skips_ack_id() {
        assert_eq!(
            Frame::decode(r#"4213["spectral_update",[0.1,0.2]]"#).unwrap(),
            Frame::event("spectral_update", Some(json!([0.1, 0.2])))
        );
    }

    #[test]
    fn test_decode_foreign_namespace() {
        assert_eq!(
            Frame::decode(r#"42/admin,["initial_data",{}]"#),
            Err(ProtocolError::ForeignNamespace("/admin".to_string()))
        );
    }

    #[test]
    fn test_decode_connect_error() {
        assert_eq!(
            Frame::decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            Frame::Message(Packet::ConnectError {
                message: "Not authorized".to_string()
            })
        );
    }

    #[test]
    fn test_decode_heartbeats_and_control() {
        assert_eq!(Frame::decode("2").unwrap(), Frame::Ping(String::new()));
        assert_eq!(
            Frame::decode("2probe").unwrap(),
            Frame::Ping("probe".to_string())
        );
        assert_eq!(Frame::decode("1").unwrap(), Frame::Close);
        assert_eq!(Frame::decode("41").unwrap(), Frame::Message(Packet::Disconnect));
        assert_eq!(Frame::decode("6").unwrap(), Frame::Noop);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Frame::decode(""), Err(ProtocolError::Empty));
        assert_eq!(Frame::decode("9"), Err(ProtocolError::UnknownFrameType('9')));
        assert_eq!(Frame::decode("45"), Err(ProtocolError::Unsupported('5')));
        assert_eq!(Frame::decode("43[]"), Err(ProtocolError::Unsupported('3')));
        assert!(matches!(
            Frame::decode(r#"42{"not":"an array"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Frame::decode("42[]"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_client_frames() {
        assert_eq!(Frame::Message(Packet::Connect { sid: None }).encode(), "40");
        assert_eq!(Frame::Pong("probe".to_string()).encode(), "3probe");
        assert_eq!(
            Frame::event("request_analysis", None).encode(),
            r#"42["request_analysis"]"#
        );
        assert_eq!(
            Frame::event("request_data", Some(json!({"x": 3}))).encode(),
            r#"42["request_data",{"x":3}]"#
        );
        assert_eq!(Frame::Message(Packet::Disconnect).encode(), "41");
    }
}
