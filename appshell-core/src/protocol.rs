//! WebSocket protocol types for the real-time channel
//!
//! All frames are JSON text. A namespace's background handler pushes
//! named events to every client connected to that namespace; clients may
//! send events back to `in` handlers and ping for keepalive.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Named event for the namespace handler
    Emit {
        event: String,
        #[serde(default)]
        data: Value,
    },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Named event from the namespace handler
    Emit { event: String, data: Value },

    /// Pong response to ping
    Pong,

    /// The server is shutting down; no further events follow
    Closing,

    /// Frame could not be understood
    Error { message: String },
}

impl ServerMessage {
    pub fn emit(event: impl Into<String>, data: Value) -> Self {
        Self::Emit {
            event: event.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_serialization() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"emit","event":"button","data":{"id":3}}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Emit {
                event: "button".into(),
                data: json!({"id": 3}),
            }
        );

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn test_emit_without_data() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"emit","event":"refresh"}"#).unwrap();
        match parsed {
            ClientMessage::Emit { event, data } => {
                assert_eq!(event, "refresh");
                assert!(data.is_null());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_value(ServerMessage::emit("tick", json!(7))).unwrap();
        assert_eq!(json, json!({"type": "emit", "event": "tick", "data": 7}));

        let json = serde_json::to_string(&ServerMessage::Closing).unwrap();
        assert_eq!(json, r#"{"type":"closing"}"#);
    }
}
