use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned ordering marker for an entity state.
///
/// Payloads carry either an explicit revision counter (`version`, or the
/// document counter `__v`) or an `updatedAt` timestamp. Whichever is found
/// first is used, so a given server must be consistent about which one it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionTag(i64);

impl VersionTag {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        if let Some(version) = fields.get("version").and_then(integer_of) {
            return Some(Self(version));
        }
        if let Some(version) = fields.get("__v").and_then(integer_of) {
            return Some(Self(version));
        }
        fields
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|timestamp| Self(timestamp.timestamp_millis()))
    }

    /// Later of two optional tags; an untagged side never wins over a tagged one.
    pub fn latest(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (Some(l), None) => Some(l),
            (None, r) => r,
        }
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn explicit_version_takes_precedence() {
        let map = fields(json!({"version": 4, "__v": 1, "updatedAt": "2024-01-01T00:00:00Z"}));
        assert_eq!(VersionTag::from_fields(&map), Some(VersionTag::new(4)));
    }

    #[test]
    fn falls_back_to_updated_at_millis() {
        let map = fields(json!({"updatedAt": "2024-01-01T00:00:01.500Z"}));
        let tag = VersionTag::from_fields(&map).unwrap();
        assert_eq!(tag.value(), 1_704_067_201_500);
    }

    #[test]
    fn missing_or_invalid_is_untagged() {
        assert_eq!(VersionTag::from_fields(&fields(json!({"title": "x"}))), None);
        assert_eq!(
            VersionTag::from_fields(&fields(json!({"updatedAt": "yesterday"}))),
            None
        );
    }

    #[test]
    fn latest_prefers_tagged_side() {
        let a = Some(VersionTag::new(2));
        assert_eq!(VersionTag::latest(a, None), a);
        assert_eq!(VersionTag::latest(None, a), a);
        assert_eq!(
            VersionTag::latest(a, Some(VersionTag::new(5))),
            Some(VersionTag::new(5))
        );
    }
}
