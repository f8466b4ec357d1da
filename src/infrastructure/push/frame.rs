use crate::domain::entities::RawPushEvent;
use crate::domain::value_objects::EntityId;
use crate::shared::error::SyncError;
use serde_json::{json, Value};

/// Frames the client sends to the push server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    JoinProject(EntityId),
    LeaveProject(EntityId),
}

impl OutboundFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundFrame::JoinProject(_) => "join-project",
            OutboundFrame::LeaveProject(_) => "leave-project",
        }
    }

    pub fn encode(&self) -> String {
        let project_id = match self {
            OutboundFrame::JoinProject(id) | OutboundFrame::LeaveProject(id) => id.as_str(),
        };
        json!({ "event": self.event_name(), "data": project_id }).to_string()
    }
}

/// Decode one text frame: `{"event": name, "data": payload}` or `[name, payload]`.
pub fn decode_frame(text: &str) -> Result<RawPushEvent, SyncError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| SyncError::MalformedEvent(format!("frame is not JSON: {err}")))?;

    match value {
        Value::Object(mut map) => {
            let name = match map.remove("event") {
                Some(Value::String(name)) if !name.is_empty() => name,
                _ => {
                    return Err(SyncError::MalformedEvent(
                        "frame has no event name".to_string(),
                    ))
                }
            };
            let payload = map.remove("data").unwrap_or(Value::Null);
            Ok(RawPushEvent::new(name, payload))
        }
        Value::Array(items) => {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (Some(Value::String(name)), payload) if !name.is_empty() => {
                    Ok(RawPushEvent::new(name, payload.unwrap_or(Value::Null)))
                }
                _ => Err(SyncError::MalformedEvent(
                    "array frame must start with an event name".to_string(),
                )),
            }
        }
        other => Err(SyncError::MalformedEvent(format!(
            "unexpected frame shape: {other}"
        ))),
    }
}
