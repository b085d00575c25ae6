//! Messages exchanged over the comment socket, as JSON text frames
//!
//! Every message is an object tagged by its `type` field. Unknown extra fields
//! on inbound messages are ignored, so that eg. an `approve_comment` still
//! carrying the comment's author and body is accepted.

use crate::{Comment, CommentId, ErrorCode, PostId};

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(rename = "postId")]
        post_id: PostId,
    },
    Leave {
        #[serde(rename = "postId")]
        post_id: PostId,
    },
    CreateComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        author: String,
        body: String,
    },
    ApproveComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        #[serde(rename = "commentId")]
        comment_id: CommentId,
    },
    DeleteComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        #[serde(rename = "commentId")]
        comment_id: CommentId,
    },
}

impl ClientMessage {
    pub fn post_id(&self) -> &PostId {
        match self {
            ClientMessage::Join { post_id }
            | ClientMessage::Leave { post_id }
            | ClientMessage::CreateComment { post_id, .. }
            | ClientMessage::ApproveComment { post_id, .. }
            | ClientMessage::DeleteComment { post_id, .. } => post_id,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full state of a thread, always sent on join before any live event
    Snapshot {
        #[serde(rename = "postId")]
        post_id: PostId,
        comments: Vec<Comment>,
    },
    CreatedComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        #[serde(flatten)]
        comment: Comment,
    },
    /// Carries author and body so that clients which hid the unapproved
    /// comment can render it without another round-trip
    ApprovedComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        #[serde(rename = "commentId")]
        comment_id: CommentId,
        author: String,
        body: String,
    },
    DeletedComment {
        #[serde(rename = "postId")]
        post_id: PostId,
        #[serde(rename = "commentId")]
        comment_id: CommentId,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn created(post_id: PostId, comment: Comment) -> ServerMessage {
        ServerMessage::CreatedComment { post_id, comment }
    }

    pub fn approved(post_id: PostId, comment: &Comment) -> ServerMessage {
        ServerMessage::ApprovedComment {
            post_id,
            comment_id: comment.comment_id,
            author: comment.author.clone(),
            body: comment.body.clone(),
        }
    }

    pub fn deleted(post_id: PostId, comment_id: CommentId) -> ServerMessage {
        ServerMessage::DeletedComment {
            post_id,
            comment_id,
        }
    }
}
