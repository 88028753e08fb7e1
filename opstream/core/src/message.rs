//! Operation Messages
//!
//! The unit of data a producer publishes into a [`Streamer`](crate::Streamer).
//! Each operation emits zero or more progress payloads and at most one
//! failure, which is always the last message it ever publishes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default status code attached to a failure when none is supplied
pub const DEFAULT_FAILURE_CODE: u16 = 400;

/// A single published message
///
/// `T` is the application-defined progress payload (for example the
/// upstream RPC's result type). The core never inspects it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Message<T> {
    /// Progress reported by the operation
    Progress(T),
    /// The operation failed; nothing is published after this
    Failure(OperationFailure),
}

impl<T> Message<T> {
    /// Whether this message ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Borrow the progress payload, if any
    #[must_use]
    pub fn progress(&self) -> Option<&T> {
        match self {
            Self::Progress(payload) => Some(payload),
            Self::Failure(_) => None,
        }
    }

    /// Borrow the failure, if any
    #[must_use]
    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::Progress(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }

    /// Consume the message and return the progress payload, if any
    #[must_use]
    pub fn into_progress(self) -> Option<T> {
        match self {
            Self::Progress(payload) => Some(payload),
            Self::Failure(_) => None,
        }
    }
}

impl<T> From<OperationFailure> for Message<T> {
    fn from(failure: OperationFailure) -> Self {
        Self::Failure(failure)
    }
}

/// Terminal error reported by an operation
///
/// Carries the rendered error text rather than the error value itself so that
/// one failure can be cloned to every subscriber and serialized to any
/// transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    /// Human-readable error description
    pub message: String,
    /// Status code to surface to clients (HTTP-style)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

impl OperationFailure {
    /// Create a failure with no explicit status code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create a failure with an explicit status code
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Render any error into a failure
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Self::new(error.to_string())
    }

    /// Status code to report, falling back to [`DEFAULT_FAILURE_CODE`]
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.code.unwrap_or(DEFAULT_FAILURE_CODE)
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_terminal() {
        let progress: Message<u32> = Message::Progress(3);
        let failure: Message<u32> = Message::Failure(OperationFailure::new("boom"));

        assert!(!progress.is_terminal());
        assert!(failure.is_terminal());
        assert_eq!(progress.progress(), Some(&3));
        assert_eq!(failure.failure().map(|f| f.message.as_str()), Some("boom"));
    }

    #[test]
    fn test_failure_from_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "controller went away");
        let failure = OperationFailure::from_error(&io);

        assert_eq!(failure.message, "controller went away");
        assert_eq!(failure.status_code(), DEFAULT_FAILURE_CODE);
        assert_eq!(failure.to_string(), "controller went away");
    }

    #[test]
    fn test_failure_explicit_code() {
        let failure = OperationFailure::with_code("quota exceeded", 429);
        assert_eq!(failure.status_code(), 429);
    }

    #[test]
    fn test_message_serialization_shape() {
        let msg: Message<String> = Message::Progress("Creating".to_string());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["body"], "Creating");

        let msg: Message<String> = Message::Failure(OperationFailure::new("nope"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["body"]["message"], "nope");
        assert!(json["body"].get("code").is_none());
    }
}
