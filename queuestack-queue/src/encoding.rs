//! Message content and the codecs that turn it into stored payloads

use base64::Engine;
use bytes::Bytes;
use queuestack_core::QueueError;
use serde::{Deserialize, Serialize};

/// How message content is carried in the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    /// Unicode text stored as-is
    #[default]
    Text,
    /// Raw bytes stored as base64 text
    Base64,
}

/// Message body as seen by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Binary(Bytes),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes.as_ref(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for MessageContent {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for MessageContent {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<&[u8]> for MessageContent {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<&[u8; N]> for MessageContent {
    fn from(bytes: &[u8; N]) -> Self {
        Self::Binary(Bytes::copy_from_slice(bytes))
    }
}

impl MessageEncoding {
    /// Turn caller content into the stored payload
    pub fn encode(&self, content: &MessageContent) -> Result<String, QueueError> {
        match (self, content) {
            (Self::Text, MessageContent::Text(text)) => Ok(text.clone()),
            (Self::Text, MessageContent::Binary(_)) => Err(QueueError::invalid_argument(
                "binary content requires base64 encoding",
            )),
            (Self::Base64, content) => {
                Ok(base64::engine::general_purpose::STANDARD.encode(content.as_bytes()))
            }
        }
    }

    /// Turn a stored payload back into caller content
    pub fn decode(&self, payload: &str) -> Result<MessageContent, QueueError> {
        match self {
            Self::Text => Ok(MessageContent::Text(payload.to_string())),
            Self::Base64 => base64::engine::general_purpose::STANDARD
                .decode(payload)
                .map(|bytes| MessageContent::Binary(Bytes::from(bytes)))
                .map_err(|_| QueueError::invalid_argument("message content is not valid base64")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_returns_original_bytes() {
        let encoding = MessageEncoding::Base64;
        let payload = encoding.encode(&MessageContent::from(b"bytedata")).unwrap();

        assert_eq!(payload, "Ynl0ZWRhdGE=");
        assert_eq!(
            encoding.decode(&payload).unwrap(),
            MessageContent::Binary(Bytes::from_static(b"bytedata"))
        );
    }

    #[test]
    fn test_base64_accepts_text_and_returns_bytes() {
        let encoding = MessageEncoding::Base64;
        let payload = encoding.encode(&"hello".into()).unwrap();

        let decoded = encoding.decode(&payload).unwrap();
        assert_eq!(decoded.as_bytes(), b"hello");
        assert!(decoded.as_text().is_none());
    }

    #[test]
    fn test_text_rejects_bytes() {
        let result = MessageEncoding::Text.encode(&MessageContent::from(vec![0u8, 1, 2]));
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    #[test]
    fn test_base64_decode_of_plain_text_fails() {
        let result = MessageEncoding::Base64.decode("not base64!");
        assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
    }

    #[test]
    fn test_encoding_from_config_value() {
        let encoding: MessageEncoding = serde_json::from_str(r#""base64""#).unwrap();
        assert_eq!(encoding, MessageEncoding::Base64);
    }
}
