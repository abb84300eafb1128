//! Frame parsing.
//!
//! Upstream trade feeds are heterogeneous: some push raw arrays, some wrap a
//! single event in an envelope, some batch records. [`FrameShape::decode`]
//! recognizes the shape with a prioritized list of matchers, the first match
//! wins:
//!
//! 1. a JSON array, every element is a candidate;
//! 2. `{"type": "trade", "data": ..}`, the `data` value;
//! 3. `{"event": "trade", "payload": ..}`, the `payload` value;
//! 4. `{"records": [..]}`, every record;
//! 5. anything else, the payload itself.
//!
//! Parsing never fails past this module: undecodable frames simply yield no
//! candidates.

use serde_json::Value;
use tracing::debug;

use crate::types::Frame;

/// Recognized layout of one decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameShape {
    Batch(Vec<Value>),
    TradeEnvelope(Value),
    EventEnvelope(Value),
    Records(Vec<Value>),
    Single(Value),
}

impl FrameShape {
    /// Decodes `frame` and classifies it.
    ///
    /// Returns `None` for text that is not JSON and for a `null` payload.
    pub fn decode(frame: &Frame) -> Option<Self> {
        let value = match frame {
            Frame::Json(value) => value.clone(),
            _ => {
                let Some(text) = frame.as_text() else {
                    debug!("dropping non utf-8 frame");
                    return None;
                };
                match serde_json::from_str::<Value>(text) {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(%err, "dropping undecodable frame");
                        return None;
                    }
                }
            }
        };
        Self::classify(value)
    }

    /// Classifies an already decoded payload.
    pub fn classify(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) => Some(FrameShape::Batch(items)),
            Value::Object(mut map) => {
                if is_tag(map.get("type")) && present(map.get("data")) {
                    return map.remove("data").map(FrameShape::TradeEnvelope);
                }
                if is_tag(map.get("event")) && present(map.get("payload")) {
                    return map.remove("payload").map(FrameShape::EventEnvelope);
                }
                if let Some(Value::Array(_)) = map.get("records") {
                    if let Some(Value::Array(records)) = map.remove("records") {
                        return Some(FrameShape::Records(records));
                    }
                }
                Some(FrameShape::Single(Value::Object(map)))
            }
            other => Some(FrameShape::Single(other)),
        }
    }

    /// Candidate messages carried by the frame, in frame order.
    pub fn into_candidates(self) -> Vec<Value> {
        match self {
            FrameShape::Batch(items) | FrameShape::Records(items) => items,
            FrameShape::TradeEnvelope(value)
            | FrameShape::EventEnvelope(value)
            | FrameShape::Single(value) => vec![value],
        }
    }
}

/// Candidates extracted from `frame`; empty if it can not be decoded.
pub fn candidates(frame: &Frame) -> Vec<Value> {
    FrameShape::decode(frame)
        .map(FrameShape::into_candidates)
        .unwrap_or_default()
}

fn is_tag(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(tag)) if tag == "trade")
}

fn present(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn shape(text: &str) -> Option<FrameShape> {
        FrameShape::decode(&Frame::from(text))
    }

    #[test]
    fn test_array_frame() {
        assert_eq!(
            shape(r#"[{"id": 1}, {"id": 2}]"#),
            Some(FrameShape::Batch(vec![json!({"id": 1}), json!({"id": 2})]))
        );
    }

    #[test]
    fn test_trade_envelope() {
        assert_eq!(
            shape(r#"{"type": "trade", "data": {"id": "x"}}"#),
            Some(FrameShape::TradeEnvelope(json!({"id": "x"})))
        );
    }

    #[test]
    fn test_event_envelope() {
        assert_eq!(
            shape(r#"{"event": "trade", "payload": {"id": "y"}}"#),
            Some(FrameShape::EventEnvelope(json!({"id": "y"})))
        );
    }

    #[test]
    fn test_records_batch() {
        assert_eq!(
            candidates(&Frame::from(json!({"records": [{"id": 1}, {"id": 2}, {"id": 3}]}))),
            vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]
        );
    }

    #[test]
    fn test_fallback_to_whole_payload() {
        // Wrong tag or missing nested field fall through to the default.
        let other_type = json!({"type": "quote", "data": {"id": 1}});
        assert_eq!(
            FrameShape::classify(other_type.clone()),
            Some(FrameShape::Single(other_type))
        );
        let no_data = json!({"type": "trade", "id": 5});
        assert_eq!(
            FrameShape::classify(no_data.clone()),
            Some(FrameShape::Single(no_data))
        );
        let records_not_array = json!({"records": {"id": 1}});
        assert_eq!(
            FrameShape::classify(records_not_array.clone()),
            Some(FrameShape::Single(records_not_array))
        );
    }

    #[test]
    fn test_envelope_precedence() {
        let both = json!({
            "type": "trade",
            "data": {"id": "from-data"},
            "event": "trade",
            "payload": {"id": "from-payload"},
            "records": [{"id": "r"}],
        });
        assert_eq!(
            FrameShape::classify(both),
            Some(FrameShape::TradeEnvelope(json!({"id": "from-data"})))
        );
    }

    #[test]
    fn test_malformed_frames_yield_nothing() {
        assert!(candidates(&Frame::from("not json")).is_empty());
        assert!(candidates(&Frame::from("null")).is_empty());
        assert!(candidates(&Frame::from(Value::Null)).is_empty());
        assert!(candidates(&Frame::from("")).is_empty());
        assert!(candidates(&Frame::Binary(vec![0xc3, 0x28])).is_empty());
    }

    #[test]
    fn test_binary_json_frame() {
        assert_eq!(
            candidates(&Frame::Binary(br#"{"id": 9}"#.to_vec())),
            vec![json!({"id": 9})]
        );
    }

    #[test]
    fn test_scalar_payload_is_single_candidate() {
        assert_eq!(candidates(&Frame::from("42")), vec![json!(42)]);
    }
}
