//! Frames of the realtime channel protocol.
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`. Clients join
//! one topic per watched table filter, keep the socket alive with heartbeats
//! on the `phoenix` topic and receive row changes as `postgres_changes`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{RawChange, ResourceKey};

pub const HEARTBEAT_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

/// What an incoming frame means to a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// Reply to a join, leave or heartbeat
    Reply { ok: bool, response: Value },
    /// A row change
    Change(RawChange),
    /// The server closed or errored the channel
    Closed(String),
    /// Presence, system and other frames this client ignores
    Other,
}

impl Frame {
    /// Join request subscribing to every change on `key`'s table within its scope.
    pub fn join(key: &ResourceKey, access_token: &str, msg_ref: &str) -> Self {
        Self {
            topic: key.topic(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": key.resource,
                        "filter": key.scope.filter(),
                    }],
                },
                "access_token": access_token,
            }),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn leave(key: &ResourceKey, msg_ref: &str) -> Self {
        Self {
            topic: key.topic(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Classifies the frame. A change frame whose `data` cannot be read as a
    /// change is reported as `Other` with a warning.
    pub fn kind(&self) -> FrameKind {
        match self.event.as_str() {
            EVENT_REPLY => FrameKind::Reply {
                ok: self.payload.get("status").and_then(Value::as_str) == Some("ok"),
                response: self.payload.get("response").cloned().unwrap_or(Value::Null),
            },
            EVENT_CHANGES => {
                let data = self.payload.get("data").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<RawChange>(data) {
                    Ok(change) => FrameKind::Change(change),
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, "Unreadable change frame: {}", e);
                        FrameKind::Other
                    }
                }
            }
            EVENT_CLOSE => FrameKind::Closed("channel closed by server".to_string()),
            EVENT_ERROR => FrameKind::Closed(format!("channel error: {}", self.payload)),
            _ => FrameKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, Scope};

    #[test]
    fn test_join_frame() {
        let key = ResourceKey::new("farms", Scope::owner("U1"));
        let frame = Frame::join(&key, "anon-key", "1");

        assert_eq!(frame.topic, "realtime:public:farms:owner_id=eq.U1");
        assert_eq!(frame.event, "phx_join");
        let change = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "farms");
        assert_eq!(change["filter"], "owner_id=eq.U1");

        let encoded = frame.encode().unwrap();
        assert!(encoded.contains("\"ref\":\"1\""));
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_decode_change_frame() {
        let text = r#"{
            "topic": "realtime:public:farms:owner_id=eq.U1",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "farms",
                    "type": "UPDATE",
                    "commit_timestamp": "2024-03-01T10:00:00Z",
                    "record": {"id": "f1", "name": "Plot A", "owner_id": "U1"},
                    "old_record": {"id": "f1"},
                    "columns": []
                },
                "ids": [1]
            },
            "ref": null
        }"#;

        match Frame::decode(text).unwrap().kind() {
            FrameKind::Change(change) => {
                assert_eq!(change.resource, "farms");
                assert_eq!(change.kind, ChangeKind::Update);
                assert_eq!(change.record.unwrap()["name"], "Plot A");
                assert!(change.commit_timestamp.is_some());
            }
            other => panic!("Expected change, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reply_and_close() {
        let ok = Frame::decode(
            r#"{"topic":"t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        )
        .unwrap();
        assert!(matches!(ok.kind(), FrameKind::Reply { ok: true, .. }));

        let err = Frame::decode(
            r#"{"topic":"t","event":"phx_reply","payload":{"status":"error","response":{"reason":"denied"}},"ref":"1"}"#,
        )
        .unwrap();
        match err.kind() {
            FrameKind::Reply { ok, response } => {
                assert!(!ok);
                assert_eq!(response["reason"], "denied");
            }
            other => panic!("Expected reply, got {:?}", other),
        }

        let closed = Frame::decode(r#"{"topic":"t","event":"phx_close","payload":{},"ref":null}"#)
            .unwrap();
        assert!(matches!(closed.kind(), FrameKind::Closed(_)));
    }

    #[test]
    fn test_malformed_change_is_ignored() {
        let frame = Frame::decode(
            r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"table":"farms"}},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(frame.kind(), FrameKind::Other);
    }
}
