use std::fmt;

use crate::{CommentId, PostId, ServerMessage, SessionId};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Comment {1} not found in post {0}")]
    NotFound(PostId, CommentId),

    #[error("Permission denied")]
    Unauthorized,

    #[error("Unknown session {0:?}")]
    UnknownSession(SessionId),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Machine-readable error kind, as sent on the wire
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Unauthorized,
    UnknownSession,
    ProtocolError,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::UnknownSession => "unknown_session",
            ErrorCode::ProtocolError => "protocol_error",
            ErrorCode::Internal => "internal",
        })
    }
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Unknown(_) => ErrorCode::Internal,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::NullByteInString(_) => ErrorCode::InvalidInput,
            Error::NotFound(_, _) => ErrorCode::NotFound,
            Error::Unauthorized => ErrorCode::Unauthorized,
            Error::UnknownSession(_) => ErrorCode::UnknownSession,
            Error::Protocol(_) => ErrorCode::ProtocolError,
        }
    }

    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self.code() {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::UnknownSession => StatusCode::GONE,
            ErrorCode::ProtocolError => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The reply sent to the client whose command caused this error
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_message()).expect("serializing error message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_shape() {
        let err = Error::NotFound(PostId::new("42"), CommentId(7));
        assert_eq!(
            serde_json::to_value(err.to_message()).unwrap(),
            serde_json::json!({
                "type": "error",
                "code": "not_found",
                "message": "Comment 7 not found in post 42",
            })
        );
        assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn null_bytes_are_invalid_input() {
        let err = Error::NullByteInString(String::from("a\0b"));
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.code().to_string(), "invalid_input");
    }
}
