use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tonic::Code;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the sink for conditions it cannot resolve locally. Per-record failures are
/// never raised, they are reported as [ErrorInfo] values.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Schema Error - {0}")]
    Schema(String),

    #[error("Stream Error - {0}")]
    Stream(String),

    #[error("gRPC Error - {0}")]
    Grpc(Box<tonic::Status>),

    /// Rows were rejected on the client before they reached the service. The map is keyed by the
    /// row position within the submitted batch.
    #[error("Append Serialization Error - {code:?}: {message}")]
    AppendSerialization {
        code: Code,
        message: String,
        row_errors: BTreeMap<i64, String>,
    },

    #[error("OneShot Receiver Error - {0}")]
    ActorPatternRecv(String),
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Grpc(Box::new(status))
    }
}

impl Error {
    /// The gRPC status code carried by this error, [Code::Unknown] when the error did not come
    /// from the transport.
    pub fn status_code(&self) -> Code {
        match self {
            Error::Grpc(status) => status.code(),
            Error::AppendSerialization { code, .. } => *code,
            _ => Code::Unknown,
        }
    }

    /// Per-row messages attached to the error, keyed by row position in the submitted batch.
    pub(crate) fn row_errors(&self) -> Option<&BTreeMap<i64, String>> {
        match self {
            Error::AppendSerialization { row_errors, .. } => Some(row_errors),
            _ => None,
        }
    }
}

/// Classification of a failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// The message carried fields the schema does not know about.
    UnknownFields,
    /// The message was empty or a value violated a domain bound.
    InvalidMessage,
    /// The message could not be parsed or the row could not be encoded.
    Deserialization,
    /// The service rejected the record and retrying will not help.
    Sink4xx,
    /// The service failed transiently, the record can be retried.
    Sink5xx,
    /// The status code was configured as retryable.
    SinkRetryable,
    /// Failure that fits no other kind.
    SinkUnknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownFields => "UNKNOWN_FIELDS_ERROR",
            ErrorKind::InvalidMessage => "INVALID_MESSAGE_ERROR",
            ErrorKind::Deserialization => "DESERIALIZATION_ERROR",
            ErrorKind::Sink4xx => "SINK_4XX_ERROR",
            ErrorKind::Sink5xx => "SINK_5XX_ERROR",
            ErrorKind::SinkRetryable => "SINK_RETRYABLE_ERROR",
            ErrorKind::SinkUnknown => "SINK_UNKNOWN_ERROR",
        }
    }

    /// Whether the caller may resend the record.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Sink5xx | ErrorKind::SinkRetryable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure reported for one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub cause: String,
    pub kind: ErrorKind,
}

impl ErrorInfo {
    pub fn new(cause: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            cause: cause.into(),
            kind,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversion() {
        let err: Error = tonic::Status::unavailable("backend down").into();
        assert!(matches!(err, Error::Grpc(_)));
        assert_eq!(err.status_code(), Code::Unavailable);
        assert!(err.to_string().contains("backend down"));
        assert!(err.row_errors().is_none());
    }

    #[test]
    fn test_non_grpc_errors_are_unknown() {
        assert_eq!(
            Error::Stream("closed".to_string()).status_code(),
            Code::Unknown
        );
        assert_eq!(
            Error::ActorPatternRecv("dropped".to_string()).status_code(),
            Code::Unknown
        );
    }

    #[test]
    fn test_append_serialization_error() {
        let err = Error::AppendSerialization {
            code: Code::InvalidArgument,
            message: "rows too large".to_string(),
            row_errors: BTreeMap::from([(2, "row 2 too large".to_string())]),
        };
        assert_eq!(err.status_code(), Code::InvalidArgument);
        assert_eq!(
            err.row_errors().and_then(|rows| rows.get(&2)),
            Some(&"row 2 too large".to_string())
        );
    }

    #[test]
    fn test_error_kind_retryable() {
        assert!(ErrorKind::Sink5xx.is_retryable());
        assert!(ErrorKind::SinkRetryable.is_retryable());
        assert!(!ErrorKind::Sink4xx.is_retryable());
        assert!(!ErrorKind::InvalidMessage.is_retryable());
        assert_eq!(ErrorKind::Sink4xx.to_string(), "SINK_4XX_ERROR");
        assert_eq!(
            ErrorInfo::new("bad row", ErrorKind::Sink4xx).to_string(),
            "SINK_4XX_ERROR: bad row"
        );
    }
}
