//! Wire format for the conversation stream.
//!
//! Single responsibility: translate between raw stream frames and typed
//! records. No knowledge of connection management or ordering.

use serde::Serialize;

use crate::error::CourierError;
use crate::message::{ConversationId, Message};

/// Outbound send payload.
///
/// The server does not answer a send synchronously; the created message
/// echoes back on the stream like any other.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendPayload<'a> {
    conversation_id: &'a ConversationId,
    text: &'a str,
}

/// Encode a send payload for the open channel.
pub fn encode_send(conversation: &ConversationId, text: &str) -> Result<String, CourierError> {
    serde_json::to_string(&SendPayload {
        conversation_id: conversation,
        text,
    })
    .map_err(|e| CourierError::Transport(format!("Failed to encode send payload: {}", e)))
}

/// Decode a pushed stream event into a [`Message`].
///
/// Frames carry one JSON message each, either bare or wrapped in a
/// `{"type": "message", "message": {...}}` envelope depending on broker
/// version. Anything else is a malformed event; the caller drops it without
/// tearing down the channel.
pub fn decode_event(raw: &str) -> Result<Message, CourierError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| CourierError::MalformedEvent(format!("Invalid JSON: {}", e)))?;

    // Bare message object
    if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
        return Ok(message);
    }

    // Enveloped message
    if let Some(inner) = value.get("message") {
        if let Ok(message) = serde_json::from_value::<Message>(inner.clone()) {
            return Ok(message);
        }
    }

    Err(CourierError::MalformedEvent(format!(
        "Unrecognized event shape: {}",
        raw
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_send_is_camel_case() {
        let payload = encode_send(&ConversationId::from("bk-1"), "on my way").unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["conversationId"], "bk-1");
        assert_eq!(value["text"], "on my way");
    }

    #[test]
    fn test_decode_bare_message() {
        let raw = r#"{
            "id": "m1",
            "conversationId": "bk-1",
            "senderId": "host-3",
            "content": "welcome",
            "isRead": false,
            "createdAt": "2026-03-01T10:00:00Z"
        }"#;

        let message = decode_event(raw).unwrap();
        assert_eq!(message.id.as_str(), "m1");
        assert_eq!(message.content, "welcome");
    }

    #[test]
    fn test_decode_enveloped_message() {
        let raw = r#"{
            "type": "message",
            "message": {
                "id": "m2",
                "conversationId": "bk-1",
                "senderId": "guest-17",
                "content": "thanks",
                "createdAt": "2026-03-01T10:01:00Z"
            }
        }"#;

        let message = decode_event(raw).unwrap();
        assert_eq!(message.id.as_str(), "m2");
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = decode_event("not json at all").unwrap_err();
        assert!(matches!(err, CourierError::MalformedEvent(_)));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode_event(r#"{"type": "typing", "participant": "host-3"}"#).unwrap_err();
        assert!(matches!(err, CourierError::MalformedEvent(_)));
    }
}
