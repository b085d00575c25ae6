use std::fmt;

use crate::Time;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct CommentId(pub u64);

impl CommentId {
    /// Id given to the first comment of any thread
    pub const FIRST: CommentId = CommentId(1);

    pub fn next(self) -> CommentId {
        CommentId(self.0 + 1)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Assigned by the server, strictly increasing within a thread
    pub comment_id: CommentId,

    pub author: String,
    pub body: String,

    /// Time at which the server accepted this comment
    pub inserted_at: Time,

    /// Set once by a moderator, never reverts
    pub approved: bool,
}
