use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ErrorCode;
use crate::topic_partition::{Offset, TopicPartition};
use crate::Result;

#[derive(Clone, Debug, PartialEq)]
struct Record {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Bytes>,
    payload: Option<Bytes>,
    error: ErrorCode,
}

/// A message returned by a poll.
///
/// A message is either empty (the poll timed out), a record carrying a
/// payload, or an error notification. End-of-partition is reported as an
/// error notification with [`ErrorCode::PARTITION_EOF`] but is not a failure;
/// check it with [`Message::is_eof`].
///
/// # Examples
///
/// ```
/// use kafka_group::Message;
///
/// let msg = Message::new("orders", 0, 41, None, Some("hello".into()));
/// assert!(!msg.is_empty());
/// assert_eq!(msg.payload_str(), Some("hello"));
/// assert!(Message::empty().is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    record: Option<Record>,
}

impl Message {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Bytes>,
        payload: Option<Bytes>,
    ) -> Self {
        Message {
            record: Some(Record {
                topic: topic.into(),
                partition,
                offset,
                key,
                payload,
                error: ErrorCode::NO_ERROR,
            }),
        }
    }

    /// An error notification tied to a partition.
    pub fn error(code: ErrorCode, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Message {
            record: Some(Record {
                topic: topic.into(),
                partition,
                offset,
                key: None,
                payload: None,
                error: code,
            }),
        }
    }

    /// End-of-partition notification; `offset` is the high watermark reached.
    pub fn eof(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Message::error(ErrorCode::PARTITION_EOF, topic, partition, offset)
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }

    /// The error carried by this message, `None` for records and empty
    /// messages.
    pub fn get_error(&self) -> Option<ErrorCode> {
        self.record
            .as_ref()
            .map(|r| r.error)
            .filter(|code| code.is_error())
    }

    pub fn is_eof(&self) -> bool {
        self.get_error() == Some(ErrorCode::PARTITION_EOF)
    }

    /// `true` for a message carrying data rather than a status.
    pub fn is_record(&self) -> bool {
        self.record.is_some() && self.get_error().is_none()
    }

    pub fn topic(&self) -> &str {
        self.record.as_ref().map_or("", |r| r.topic.as_str())
    }

    pub fn partition(&self) -> i32 {
        self.record
            .as_ref()
            .map_or(TopicPartition::UNASSIGNED, |r| r.partition)
    }

    /// The raw offset, `Offset::RAW_INVALID` for an empty message.
    pub fn offset(&self) -> i64 {
        self.record.as_ref().map_or(Offset::RAW_INVALID, |r| r.offset)
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.record.as_ref().and_then(|r| r.key.as_ref())
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.record.as_ref().and_then(|r| r.payload.as_ref())
    }

    pub fn payload_str(&self) -> Option<&str> {
        self.payload().and_then(|p| std::str::from_utf8(p).ok())
    }

    /// Decodes the payload as JSON. A missing payload decodes like `null`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.payload().map(|p| p.as_ref()).unwrap_or(&b"null"[..]);
        Ok(serde_json::from_slice(bytes)?)
    }
}
