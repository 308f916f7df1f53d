//! Inbound frame classification.
//!
//! Text frames are always treated as JSON messages. Binary frames may carry
//! either raw audio or a JSON control message; a binary frame is promoted to a
//! message only when it decodes as UTF-8 JSON with a recognised `type`.

use bytes::Bytes;
use serde_json::Value;
use tracing::{trace, warn};

use super::base::{Frame, LinkEvent, LinkKind};
use crate::core::protocol::{ServerMessage, is_recognized_type};

/// Classifies one inbound data frame. Returns `None` for frames that are
/// dropped (unparseable text, close frames).
pub(crate) fn classify(kind: LinkKind, frame: Frame) -> Option<LinkEvent> {
    match frame {
        Frame::Text(text) => classify_text(kind, &text),
        Frame::Binary(data) => Some(classify_binary(data)),
        Frame::Close(_) => None,
    }
}

fn classify_text(kind: LinkKind, text: &str) -> Option<LinkEvent> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(link = %kind, "Dropping non-JSON text frame: {}", e);
            return None;
        }
    };

    let message = ServerMessage::from_value(value).unwrap_or_else(|| ServerMessage::Unknown {
        message_type: String::new(),
    });
    Some(LinkEvent::Message(message))
}

fn classify_binary(data: Bytes) -> LinkEvent {
    let Ok(text) = std::str::from_utf8(&data) else {
        return LinkEvent::Binary(data);
    };

    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => return LinkEvent::Binary(data),
    };

    let recognized = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(is_recognized_type);
    if !recognized {
        trace!("Binary JSON without a recognised type, treating as opaque");
        return LinkEvent::Binary(data);
    }

    match ServerMessage::from_value(value) {
        Some(message) => LinkEvent::Message(message),
        None => LinkEvent::Binary(data),
    }
}
