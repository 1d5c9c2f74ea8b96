use std::fmt;

use thiserror::Error;

use crate::topic_partition::TopicPartitionList;

/// A broker or transport status code.
///
/// Codes follow the librdkafka numbering: negative values are raised by the
/// client itself, positive values come from the broker protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const NO_ERROR: ErrorCode = ErrorCode(0);
    pub const OFFSET_OUT_OF_RANGE: ErrorCode = ErrorCode(1);
    pub const UNKNOWN_TOPIC_OR_PART: ErrorCode = ErrorCode(3);
    pub const NOT_COORDINATOR: ErrorCode = ErrorCode(16);
    pub const ILLEGAL_GENERATION: ErrorCode = ErrorCode(22);
    pub const UNKNOWN_MEMBER_ID: ErrorCode = ErrorCode(25);
    pub const REBALANCE_IN_PROGRESS: ErrorCode = ErrorCode(27);
    pub const TOPIC_ALREADY_EXISTS: ErrorCode = ErrorCode(36);

    pub const NO_OFFSET: ErrorCode = ErrorCode(-168);
    pub const STATE: ErrorCode = ErrorCode(-172);
    pub const REVOKE_PARTITIONS: ErrorCode = ErrorCode(-174);
    pub const ASSIGN_PARTITIONS: ErrorCode = ErrorCode(-175);
    pub const TIMED_OUT: ErrorCode = ErrorCode(-185);
    pub const INVALID_ARG: ErrorCode = ErrorCode(-186);
    pub const UNKNOWN_TOPIC: ErrorCode = ErrorCode(-188);
    pub const UNKNOWN_PARTITION: ErrorCode = ErrorCode(-190);
    pub const PARTITION_EOF: ErrorCode = ErrorCode(-191);
    pub const DESTROY: ErrorCode = ErrorCode(-197);

    pub const fn new(code: i32) -> Self {
        ErrorCode(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// Returns `true` for anything other than `NO_ERROR`.
    pub const fn is_error(self) -> bool {
        self.0 != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NO_ERROR => "NO_ERROR",
            Self::OFFSET_OUT_OF_RANGE => "OFFSET_OUT_OF_RANGE",
            Self::UNKNOWN_TOPIC_OR_PART => "UNKNOWN_TOPIC_OR_PART",
            Self::NOT_COORDINATOR => "NOT_COORDINATOR",
            Self::ILLEGAL_GENERATION => "ILLEGAL_GENERATION",
            Self::UNKNOWN_MEMBER_ID => "UNKNOWN_MEMBER_ID",
            Self::REBALANCE_IN_PROGRESS => "REBALANCE_IN_PROGRESS",
            Self::TOPIC_ALREADY_EXISTS => "TOPIC_ALREADY_EXISTS",
            Self::NO_OFFSET => "_NO_OFFSET",
            Self::STATE => "_STATE",
            Self::REVOKE_PARTITIONS => "_REVOKE_PARTITIONS",
            Self::ASSIGN_PARTITIONS => "_ASSIGN_PARTITIONS",
            Self::TIMED_OUT => "_TIMED_OUT",
            Self::INVALID_ARG => "_INVALID_ARG",
            Self::UNKNOWN_TOPIC => "_UNKNOWN_TOPIC",
            Self::UNKNOWN_PARTITION => "_UNKNOWN_PARTITION",
            Self::PARTITION_EOF => "_PARTITION_EOF",
            Self::DESTROY => "_DESTROY",
            _ => "UNKNOWN",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NO_ERROR => "Success",
            Self::OFFSET_OUT_OF_RANGE => "Broker: Offset out of range",
            Self::UNKNOWN_TOPIC_OR_PART => "Broker: Unknown topic or partition",
            Self::NOT_COORDINATOR => "Broker: Not coordinator",
            Self::ILLEGAL_GENERATION => "Broker: Specified group generation id is not valid",
            Self::UNKNOWN_MEMBER_ID => "Broker: Unknown member",
            Self::REBALANCE_IN_PROGRESS => "Broker: Group rebalance in progress",
            Self::TOPIC_ALREADY_EXISTS => "Broker: Topic already exists",
            Self::NO_OFFSET => "Local: No offset stored",
            Self::STATE => "Local: Erroneous state",
            Self::REVOKE_PARTITIONS => "Local: Revoke partitions",
            Self::ASSIGN_PARTITIONS => "Local: Assign partitions",
            Self::TIMED_OUT => "Local: Timed out",
            Self::INVALID_ARG => "Local: Invalid argument or configuration",
            Self::UNKNOWN_TOPIC => "Local: Unknown topic",
            Self::UNKNOWN_PARTITION => "Local: Unknown partition",
            Self::PARTITION_EOF => "Broker: No more messages",
            Self::DESTROY => "Local: Broker handle destroyed",
            _ => "Unknown error code",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode(code)
    }
}

/// The handle operation a rebalance was applying when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebalanceAction {
    Assign,
    Unassign,
}

impl fmt::Display for RebalanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceAction::Assign => f.write_str("assign"),
            RebalanceAction::Unassign => f.write_str("unassign"),
        }
    }
}

#[derive(Error, Debug)]
pub enum KafkaError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Broker error: code={code}, message={message}")]
    BrokerError { code: ErrorCode, message: String },

    #[error("Rebalance failed to {action} partitions: {source}")]
    RebalanceApplyError {
        action: RebalanceAction,
        source: Box<KafkaError>,
    },

    #[error("Assignment callback changed the partition set from {expected} to {actual}")]
    InvalidAssignment {
        expected: TopicPartitionList,
        actual: TopicPartitionList,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid subscription pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl KafkaError {
    /// Builds a `BrokerError` carrying the code's standard description.
    pub fn broker(code: ErrorCode) -> Self {
        KafkaError::BrokerError {
            code,
            message: code.description().to_string(),
        }
    }

    /// The broker code behind this error, if there is one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            KafkaError::BrokerError { code, .. } => Some(*code),
            KafkaError::RebalanceApplyError { source, .. } => source.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_display_includes_name_and_value() {
        assert_eq!(
            ErrorCode::UNKNOWN_TOPIC_OR_PART.to_string(),
            "UNKNOWN_TOPIC_OR_PART (3)"
        );
        assert_eq!(ErrorCode::new(9999).name(), "UNKNOWN");
        assert!(!ErrorCode::NO_ERROR.is_error());
        assert!(ErrorCode::PARTITION_EOF.is_error());
    }

    #[test]
    fn rebalance_apply_error_exposes_inner_code() {
        let err = KafkaError::RebalanceApplyError {
            action: RebalanceAction::Assign,
            source: Box::new(KafkaError::broker(ErrorCode::ILLEGAL_GENERATION)),
        };
        assert_eq!(err.code(), Some(ErrorCode::ILLEGAL_GENERATION));
        assert!(err.to_string().starts_with("Rebalance failed to assign"));
    }
}
