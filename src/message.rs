use std::time::Duration;

use bytes::Bytes;

use crate::{error::ErrorCode, Offset, PartitionId};

/// Timestamp metadata as attached by the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timestamp {
    #[default]
    NotAvailable,
    /// Milliseconds since epoch, set by the producer.
    CreateTime(i64),
    /// Milliseconds since epoch, set by the broker on append.
    LogAppendTime(i64),
}

impl Timestamp {
    pub fn to_millis(self) -> Option<i64> {
        match self {
            Timestamp::NotAvailable => None,
            Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) if ms >= 0 => Some(ms),
            _ => None,
        }
    }
}

/// A message as handed over by the broker client, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub timestamp: Timestamp,
    pub partition: PartitionId,
    pub offset: Offset,
    /// Set when the broker client delivers an error instead of a message.
    pub error: Option<ErrorCode>,
}

impl RawMessage {
    pub fn new<S: Into<String>>(topic: S, partition: PartitionId, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            ..Default::default()
        }
    }

    pub fn with_key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_payload<V: Into<Bytes>>(mut self, payload: V) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_error(mut self, error: ErrorCode) -> Self {
        self.error = Some(error);
        self
    }
}

/// Polled message, owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    key: Bytes,
    payload: Bytes,
    timestamp: Option<Duration>,
    partition: PartitionId,
    offset: Offset,
}

pub type MessageBatch = Vec<Message>;

impl Message {
    /// Decodes a raw broker message. Messages carrying a broker error code are
    /// handed back as the error, they never become a `Message`.
    pub fn decode(raw: RawMessage) -> Result<Message, ErrorCode> {
        if let Some(error) = raw.error {
            return Err(error);
        }

        Ok(Message {
            timestamp: raw
                .timestamp
                .to_millis()
                .map(|ms| Duration::from_millis(ms as u64)),
            key: raw.key.unwrap_or_default(),
            payload: raw.payload.unwrap_or_default(),
            topic: raw.topic,
            partition: raw.partition,
            offset: raw.offset,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Empty when the producer did not set a key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Lossy utf-8 view of the key, for logging.
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Time since epoch, `None` when the broker attached no timestamp.
    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn decode_full_message() {
        let raw = RawMessage::new("orders", 3, 17)
            .with_key("order-1")
            .with_payload("{}")
            .with_timestamp(Timestamp::CreateTime(1_700_000_000_000));

        let message = Message::decode(raw).unwrap();
        assert_eq!(message.topic(), "orders");
        assert_eq!(message.key().as_ref(), b"order-1");
        assert_eq!(message.payload().as_ref(), b"{}");
        assert_eq!(
            message.timestamp(),
            Some(Duration::from_millis(1_700_000_000_000))
        );
        assert_eq!(message.partition(), 3);
        assert_eq!(message.offset(), 17);
    }

    #[test]
    fn missing_fields_decode_empty() {
        let message = Message::decode(RawMessage::new("orders", 0, 0)).unwrap();
        assert!(message.key().is_empty());
        assert!(message.payload().is_empty());
        assert_eq!(message.timestamp(), None);
        assert_eq!(message.key_str(), "");
    }

    #[test]
    fn timestamp_extraction() {
        assert_eq!(Timestamp::NotAvailable.to_millis(), None);
        assert_eq!(Timestamp::CreateTime(-1).to_millis(), None);
        assert_eq!(Timestamp::LogAppendTime(5).to_millis(), Some(5));
        assert_eq!(Timestamp::CreateTime(0).to_millis(), Some(0));
    }

    #[test]
    fn error_message_is_not_decoded() {
        let raw = RawMessage::new("orders", 0, 0)
            .with_payload("lost")
            .with_error(ErrorCode::OffsetOutOfRange);
        assert_eq!(Message::decode(raw), Err(ErrorCode::OffsetOutOfRange));
    }
}
