use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use remark_api::{Comment, CommentId, Error, PostId, Time};
use tokio::sync::Mutex;

pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Time;
}

#[derive(Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        chrono::Utc::now()
    }
}

/// Handle on one post's thread
///
/// Holding the lock is what serializes mutations, joins and broadcasts of a
/// thread against each other.
pub type ThreadHandle = Arc<Mutex<Thread>>;

#[derive(Clone, Debug)]
pub struct CommentStore {
    threads: Arc<RwLock<HashMap<PostId, ThreadHandle>>>,
    clock: Arc<dyn Clock>,
}

impl CommentStore {
    pub fn new(clock: Arc<dyn Clock>) -> CommentStore {
        CommentStore {
            threads: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn thread(&self, post: &PostId) -> Option<ThreadHandle> {
        self.threads.read().get(post).cloned()
    }

    /// Looks a thread up, running `absent` if there is none
    ///
    /// No thread can be created for `post` while `absent` runs.
    pub fn thread_or_else<E>(
        &self,
        post: &PostId,
        absent: impl FnOnce() -> Result<(), E>,
    ) -> Result<Option<ThreadHandle>, E> {
        let threads = self.threads.read();
        match threads.get(post) {
            Some(t) => Ok(Some(t.clone())),
            None => absent().map(|()| None),
        }
    }

    pub fn thread_or_create(&self, post: &PostId) -> ThreadHandle {
        if let Some(t) = self.thread(post) {
            return t;
        }
        self.threads
            .write()
            .entry(post.clone())
            .or_insert_with(|| {
                tracing::debug!(%post, "creating comment thread");
                Arc::new(Mutex::new(Thread::new(post.clone())))
            })
            .clone()
    }

    /// Current comments of a post, empty if nobody ever commented it
    pub async fn list(&self, post: &PostId) -> Vec<Comment> {
        match self.thread(post) {
            None => Vec::new(),
            Some(t) => t.lock().await.list(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Approval {
    Applied(Comment),
    AlreadyApproved(Comment),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Deletion {
    Removed,
    AlreadyDeleted,
}

#[derive(Debug)]
pub struct Thread {
    post: PostId,

    /// Keyed by id, which is also arrival order
    comments: BTreeMap<CommentId, Comment>,

    /// Last id handed out, ids are never reused even after a delete
    last_id: Option<CommentId>,
}

impl Thread {
    pub fn new(post: PostId) -> Thread {
        Thread {
            post,
            comments: BTreeMap::new(),
            last_id: None,
        }
    }

    pub fn post(&self) -> &PostId {
        &self.post
    }

    pub fn create(&mut self, author: &str, body: &str, now: Time) -> Result<Comment, Error> {
        let author = author.trim();
        let body = body.trim();
        if author.is_empty() {
            return Err(Error::InvalidInput(String::from("author must not be empty")));
        }
        if body.is_empty() {
            return Err(Error::InvalidInput(String::from("body must not be empty")));
        }
        remark_api::validate_string(author)?;
        remark_api::validate_string(body)?;

        let comment_id = self.last_id.map_or(CommentId::FIRST, CommentId::next);
        let comment = Comment {
            comment_id,
            author: String::from(author),
            body: String::from(body),
            inserted_at: now,
            approved: false,
        };
        self.last_id = Some(comment_id);
        self.comments.insert(comment_id, comment.clone());
        Ok(comment)
    }

    pub fn approve(&mut self, id: CommentId) -> Result<Approval, Error> {
        let comment = self
            .comments
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(self.post.clone(), id))?;
        if comment.approved {
            return Ok(Approval::AlreadyApproved(comment.clone()));
        }
        comment.approved = true;
        Ok(Approval::Applied(comment.clone()))
    }

    pub fn delete(&mut self, id: CommentId) -> Result<Deletion, Error> {
        if self.comments.remove(&id).is_some() {
            return Ok(Deletion::Removed);
        }
        if self.was_assigned(id) {
            Ok(Deletion::AlreadyDeleted)
        } else {
            Err(Error::NotFound(self.post.clone(), id))
        }
    }

    pub fn list(&self) -> Vec<Comment> {
        self.comments.values().cloned().collect()
    }

    fn was_assigned(&self, id: CommentId) -> bool {
        match self.last_id {
            None => false,
            Some(last) => CommentId::FIRST <= id && id <= last,
        }
    }
}
