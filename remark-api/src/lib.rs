use chrono::Utc;
use std::fmt;

pub use uuid::Uuid;
pub type Time = chrono::DateTime<Utc>;

mod comment;
pub use comment::{Comment, CommentId};

mod error;
pub use error::{Error, ErrorCode};

mod message;
pub use message::{ClientMessage, ServerMessage};

#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn new(id: impl Into<String>) -> PostId {
        PostId(id.into())
    }

    // See comments on other `validate` functions throughout remark-api
    pub fn validate(&self) -> Result<(), Error> {
        if self.0.is_empty() {
            return Err(Error::InvalidInput(String::from("post id must not be empty")));
        }
        validate_string(&self.0)
    }

    pub fn topic(&self) -> Topic {
        Topic(self.clone())
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription key of one post's comment thread, displayed as `comments:<post id>`
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Topic(pub PostId);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comments:{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn generate() -> SessionId {
        SessionId(Uuid::new_v4())
    }
}

/// Identity token presented by a client on connect
///
/// The token is opaque to the comment service: only the server's verifier
/// decides whether it is valid, and holding a valid one is what makes a session
/// a moderator, ie. allowed to approve and delete comments.
#[derive(Clone, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> AuthToken {
        AuthToken(token.into())
    }
}

// Tokens end up in session debug output, keep them out of the logs
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Rejects strings that could not be safely handed over to a presentation layer
///
/// All user-provided strings should go through this before being stored.
pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}
