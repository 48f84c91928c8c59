//! Payload serialization
//!
//! The record payload is opaque to storage. [`JsonSerializer`] is the default;
//! any serde data format can be plugged in by implementing [`Serializer`].

use crate::services::error::RecordError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload codec used by the record store
pub trait Serializer: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, RecordError>;

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, RecordError>;
}

/// JSON payloads via `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, RecordError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, RecordError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_json_payload() {
        let payload = JsonSerializer.encode(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(payload, r#"{"x":1,"y":2}"#);
        assert_eq!(
            JsonSerializer.decode::<Point>(&payload).unwrap(),
            Point { x: 1, y: 2 }
        );
    }

    #[test]
    fn test_malformed_payload() {
        let result = JsonSerializer.decode::<Point>("{\"x\":");
        assert!(matches!(result, Err(RecordError::Serialization(_))));
    }
}
