//! Wire Frames
//!
//! JSON frame types exchanged between socket clients and the relay. Four
//! frame kinds exist: `msg` carries a payload to a target, `ack` confirms
//! receipt of a `msg` or `answer` by id, `answer` responds to an earlier
//! question, and `client` announces a connection's logical endpoint id.
//!
//! A literal `"KA"` text frame is a keep-alive no-op and is never parsed
//! as a [`Frame`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Keep-alive no-op frame, ignored by all receivers.
pub const KEEP_ALIVE: &str = "KA";

/// All frames that travel over a relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Fire-and-forget payload with unique id, origin and target
    #[serde(rename = "msg", rename_all = "camelCase")]
    Msg {
        id: Uuid,
        origin_id: String,
        target_id: String,
        payload: Value,
    },

    /// Acknowledges a `msg` or `answer` by its id
    #[serde(rename = "ack", rename_all = "camelCase")]
    Ack {
        id: Uuid,
        origin_id: String,
        target_id: String,
    },

    /// Response to a previously received `msg`, carrying the question id
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        id: Uuid,
        origin_id: String,
        target_id: String,
        question_id: Uuid,
        payload: Value,
    },

    /// Announces this connection's logical endpoint id, sent right after connecting
    #[serde(rename = "client", rename_all = "camelCase")]
    Client { client_id: String },
}

impl Frame {
    /// Create a fresh `msg` frame
    pub fn msg(origin_id: impl Into<String>, target_id: impl Into<String>, payload: Value) -> Self {
        Frame::Msg {
            id: Uuid::new_v4(),
            origin_id: origin_id.into(),
            target_id: target_id.into(),
            payload,
        }
    }

    /// Create a fresh `answer` frame for the given question
    pub fn answer(
        origin_id: impl Into<String>,
        target_id: impl Into<String>,
        question_id: Uuid,
        payload: Value,
    ) -> Self {
        Frame::Answer {
            id: Uuid::new_v4(),
            origin_id: origin_id.into(),
            target_id: target_id.into(),
            question_id,
            payload,
        }
    }

    /// Build the `ack` for a received `msg` or `answer`: same id, origin and
    /// target swapped. Returns `None` for frames that are not acknowledged.
    pub fn ack_for(received: &Frame) -> Option<Frame> {
        match received {
            Frame::Msg {
                id,
                origin_id,
                target_id,
                ..
            }
            | Frame::Answer {
                id,
                origin_id,
                target_id,
                ..
            } => Some(Frame::Ack {
                id: *id,
                origin_id: target_id.clone(),
                target_id: origin_id.clone(),
            }),
            _ => None,
        }
    }

    /// Frame id, where one exists (`client` frames have none)
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Frame::Msg { id, .. } | Frame::Ack { id, .. } | Frame::Answer { id, .. } => Some(*id),
            Frame::Client { .. } => None,
        }
    }

    /// Target endpoint id, where one exists
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Frame::Msg { target_id, .. }
            | Frame::Ack { target_id, .. }
            | Frame::Answer { target_id, .. } => Some(target_id),
            Frame::Client { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_msg_wire_shape() {
        let id = Uuid::new_v4();
        let frame = Frame::Msg {
            id,
            origin_id: "nodeA".to_string(),
            target_id: "nodeB".to_string(),
            payload: json!({"kind": "PING"}),
        };
        let wire: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["type"], "msg");
        assert_eq!(wire["id"], json!(id.to_string()));
        assert_eq!(wire["originId"], "nodeA");
        assert_eq!(wire["targetId"], "nodeB");
        assert_eq!(wire["payload"]["kind"], "PING");
    }

    #[test]
    fn test_answer_wire_shape() {
        let frame = Frame::answer("nodeB", "nodeA", Uuid::new_v4(), json!("PONG"));
        let wire: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(wire["type"], "answer");
        assert!(wire.get("questionId").is_some());
    }

    #[test]
    fn test_client_wire_shape() {
        let wire = serde_json::to_string(&Frame::Client {
            client_id: "nodeA".to_string(),
        })
        .unwrap();
        assert_eq!(wire, r#"{"type":"client","clientId":"nodeA"}"#);
    }

    #[test]
    fn test_ack_swaps_origin_and_target() {
        let msg = Frame::msg("nodeA", "nodeB", json!(1));
        let ack = Frame::ack_for(&msg).unwrap();
        match ack {
            Frame::Ack {
                id,
                origin_id,
                target_id,
            } => {
                assert_eq!(Some(id), msg.id());
                assert_eq!(origin_id, "nodeB");
                assert_eq!(target_id, "nodeA");
            }
            _ => panic!("Expected Ack frame"),
        }
    }

    #[test]
    fn test_client_frames_are_not_acked() {
        let client = Frame::Client {
            client_id: "nodeA".to_string(),
        };
        assert!(Frame::ack_for(&client).is_none());
    }

    #[test]
    fn test_roundtrip_through_relay_text() {
        // The relay forwards raw text, so parse(serialize(f)) must be identity.
        let frame = Frame::msg("a", "b", json!({"x": [1, 2, 3]}));
        let text = serde_json::to_string(&frame).unwrap();
        let parsed: Frame = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, frame);
    }
}
