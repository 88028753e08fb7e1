//! Wire Payloads
//!
//! JSON shapes written to clients. HTTP responses carry
//! `{"data": ...}` for progress and `{"result": {"message", "code"}}` for
//! errors; WebSocket frames always carry `{"code", "data"}`.

use serde::{Deserialize, Serialize};

use crate::message::{Message, OperationFailure};

/// Status code sent with WebSocket progress frames
pub const OK_CODE: u16 = 200;

/// Error text and status code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultBody {
    /// Error description
    pub message: String,
    /// Status code
    pub code: u16,
}

impl From<&OperationFailure> for ResultBody {
    fn from(failure: &OperationFailure) -> Self {
        Self {
            message: failure.message.clone(),
            code: failure.status_code(),
        }
    }
}

/// One line of an HTTP streaming response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPayload<D> {
    /// Progress payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<D>,
    /// Error result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultBody>,
}

impl<'a, T> StreamPayload<&'a T> {
    /// Borrowing view of a message
    #[must_use]
    pub fn from_message(message: &'a Message<T>) -> Self {
        match message {
            Message::Progress(payload) => Self {
                data: Some(payload),
                result: None,
            },
            Message::Failure(failure) => Self {
                data: None,
                result: Some(ResultBody::from(failure)),
            },
        }
    }
}

/// Error body inside a WebSocket frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error description
    pub message: String,
}

/// One WebSocket frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsStreamPayload<D> {
    /// Status code (200 for progress)
    pub code: u16,
    /// Progress payload or [`ErrorData`]
    pub data: D,
}

/// Encode a message as the text of one WebSocket frame
///
/// # Errors
///
/// Returns the serializer error if the payload cannot be encoded.
pub fn ws_frame_text<T: Serialize>(message: &Message<T>) -> Result<String, serde_json::Error> {
    match message {
        Message::Progress(payload) => serde_json::to_string(&WsStreamPayload {
            code: OK_CODE,
            data: payload,
        }),
        Message::Failure(failure) => serde_json::to_string(&WsStreamPayload {
            code: failure.status_code(),
            data: ErrorData {
                message: failure.message.clone(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_payload() {
        let msg = Message::Progress(json!({"message": "Creating"}));
        let value = serde_json::to_value(StreamPayload::from_message(&msg)).unwrap();
        assert_eq!(value, json!({"data": {"message": "Creating"}}));
    }

    #[test]
    fn test_failure_payload() {
        let msg: Message<String> = Message::Failure(OperationFailure::new("no quota"));
        let value = serde_json::to_value(StreamPayload::from_message(&msg)).unwrap();
        assert_eq!(value, json!({"result": {"message": "no quota", "code": 400}}));
    }

    #[test]
    fn test_ws_frames() {
        let progress = Message::Progress("step 1".to_string());
        let text = ws_frame_text(&progress).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            json!({"code": 200, "data": "step 1"})
        );

        let failure: Message<String> =
            Message::Failure(OperationFailure::with_code("Key doesn't exist", 404));
        let text = ws_frame_text(&failure).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            json!({"code": 404, "data": {"message": "Key doesn't exist"}})
        );
    }
}
