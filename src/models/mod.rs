//! Data model: messages, chat sessions and the backend wire types.

mod message;
mod request;
mod session;

pub use message::{HistoryMessage, Message, MessageRole, TextField};
pub use request::{HistoryResponse, SessionStateResponse, StreamRequest};
pub use session::{ChatSession, ChatState};

use serde::{Deserialize, Deserializer};

/// Deserialize an id sent either as a string or as an integer.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer")
        }

        fn visit_str<E>(self, value: &str) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// Deserialize a nullable string as an empty string.
pub(crate) fn deserialize_nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "deserialize_id")]
        id: String,
        #[serde(default, deserialize_with = "deserialize_nullable_string")]
        text: String,
    }

    #[test]
    fn test_deserialize_id_from_string_or_int() {
        let w: Wrapper = serde_json::from_str(r#"{"id": "msg-7"}"#).unwrap();
        assert_eq!(w.id, "msg-7");
        let w: Wrapper = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(w.id, "42");
    }

    #[test]
    fn test_deserialize_nullable_string() {
        let w: Wrapper = serde_json::from_str(r#"{"id": 1, "text": null}"#).unwrap();
        assert_eq!(w.text, "");
        let w: Wrapper = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(w.text, "");
    }
}
