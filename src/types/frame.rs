use serde_json::Value;

/// One inbound or outbound message of the realtime transport.
///
/// Upstream feeds deliver either text (expected to be JSON) or payloads that
/// are already structured, so both are first-class.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(String),
    /// Binary payload, interpreted as UTF-8 text when parsed.
    Binary(Vec<u8>),
    Json(Value),
}

impl Frame {
    /// Text content of the frame, if it carries any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            Frame::Json(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(value: String) -> Self {
        Frame::Text(value)
    }
}

impl From<&str> for Frame {
    fn from(value: &str) -> Self {
        Frame::Text(value.to_string())
    }
}

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Frame::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_frame_text() {
        assert_eq!(Frame::from("abc").as_text(), Some("abc"));
        assert_eq!(Frame::Binary(b"{}".to_vec()).as_text(), Some("{}"));
        assert_eq!(Frame::Binary(vec![0xff, 0xfe]).as_text(), None);
        assert_eq!(Frame::from(json!({"a": 1})).as_text(), None);
    }
}
