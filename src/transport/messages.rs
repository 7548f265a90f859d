//! Browser control message types.
//!
//! Messages cross the WebSocket as `{"type": "...", "data": {...}}` JSON
//! envelopes; binary frames carry audio and never JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for a message from the browser. The payload stays raw until the
/// per-type handler parses it, so unknown types get a typed error reply
/// instead of a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Value,
}

/// `join` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    pub callsign: String,
    pub reflector: String,
    pub module: String,
}

/// `ptt` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PttRequest {
    pub active: bool,
}

/// `format` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormatRequest {
    pub audio: String,
}

/// A message to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    Welcome {
        session_id: String,
        server: String,
    },
    Joined {
        reflector: String,
        module: String,
        callsign: String,
    },
    Pong,
    Ptt {
        active: bool,
    },
    Format {
        audio: String,
    },
    Rx {
        active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<String>,
    },
    Nack,
    Disconnected,
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::Welcome {
            session_id: "abc".into(),
            server: "gw".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["data"]["session_id"], "abc");

        // Unit variants carry no data member.
        let json = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pong"}));
    }

    #[test]
    fn test_rx_src_omitted_when_none() {
        let json = serde_json::to_value(ServerMessage::Rx {
            active: false,
            src: None,
        })
        .unwrap();
        assert!(json["data"].get("src").is_none());

        let json = serde_json::to_value(ServerMessage::Rx {
            active: true,
            src: Some("KC1ABC".into()),
        })
        .unwrap();
        assert_eq!(json["data"]["src"], "KC1ABC");
    }

    #[test]
    fn test_client_envelope_tolerates_missing_data() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, "ping");
        assert!(msg.data.is_null());
    }

    #[test]
    fn test_join_request_defaults() {
        let req: JoinRequest =
            serde_json::from_value(serde_json::json!({"callsign": "KC1ABC"})).unwrap();
        assert_eq!(req.callsign, "KC1ABC");
        assert_eq!(req.module, "");
    }
}
