use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;
use remark_api::{AuthToken, Error, ServerMessage, SessionId, Topic};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

/// Outbound queue of one connected client
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Resolves once the session is removed from the registry, for whatever reason
pub type Dropped = oneshot::Receiver<()>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub token: Option<AuthToken>,
    pub topics: HashSet<Topic>,
}

#[derive(Debug)]
struct Entry {
    session: Session,
    outbox: Outbox,
    dropped: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, Entry>,
    topics: HashMap<Topic, HashSet<SessionId>>,
}

impl Registry {
    fn entry_mut(&mut self, id: SessionId) -> Result<&mut Entry, Error> {
        self.sessions
            .get_mut(&id)
            .ok_or(Error::UnknownSession(id))
    }

    fn remove(&mut self, id: SessionId) -> Result<Session, Error> {
        let entry = self
            .sessions
            .remove(&id)
            .ok_or(Error::UnknownSession(id))?;
        for topic in entry.session.topics.iter() {
            if let Some(subscribers) = self.topics.get_mut(topic) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    self.topics.remove(topic);
                }
            }
        }
        // the connection may be stuck writing to its peer, wake it up
        let _ = entry.dropped.send(());
        Ok(entry.session)
    }
}

/// Connected sessions, their subscriptions and their outbound queues
///
/// The lock is only ever held for bookkeeping and never across an await
/// point; ordering between joins and broadcasts of a thread is provided by
/// the thread's own lock.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry(Arc<RwLock<Registry>>);

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    /// Add a session with no subscriptions, that gets told when it is dropped
    pub fn register(&self, id: SessionId, token: Option<AuthToken>, outbox: Outbox) -> Dropped {
        let session = Session {
            id,
            token,
            topics: HashSet::new(),
        };
        let (dropped, on_drop) = oneshot::channel();
        let mut this = self.0.write();
        if this.sessions.contains_key(&id) {
            tracing::warn!(?id, "session registered twice, replacing the old one");
            let _ = this.remove(id);
        }
        this.sessions.insert(
            id,
            Entry {
                session,
                outbox,
                dropped,
            },
        );
        on_drop
    }

    pub fn session(&self, id: SessionId) -> Result<Session, Error> {
        self.0
            .read()
            .sessions
            .get(&id)
            .map(|e| e.session.clone())
            .ok_or(Error::UnknownSession(id))
    }

    pub fn subscribe(&self, id: SessionId, topic: Topic) -> Result<(), Error> {
        let mut this = self.0.write();
        this.entry_mut(id)?.session.topics.insert(topic.clone());
        this.topics.entry(topic).or_default().insert(id);
        Ok(())
    }

    pub fn unsubscribe(&self, id: SessionId, topic: &Topic) -> Result<(), Error> {
        let mut this = self.0.write();
        this.entry_mut(id)?.session.topics.remove(topic);
        if let Some(subscribers) = this.topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                this.topics.remove(topic);
            }
        }
        Ok(())
    }

    pub fn sessions_for(&self, topic: &Topic) -> HashSet<SessionId> {
        self.0
            .read()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn deregister(&self, id: SessionId) -> Result<Session, Error> {
        self.0.write().remove(id)
    }

    /// Queue a message for one session without waiting
    ///
    /// A session whose queue is full is disconnected, so that one stalled
    /// client can never hold up the others.
    pub fn send(&self, id: SessionId, msg: ServerMessage) -> Result<(), Error> {
        let res = self
            .0
            .read()
            .sessions
            .get(&id)
            .ok_or(Error::UnknownSession(id))?
            .outbox
            .try_send(msg);
        match res {
            Ok(()) => Ok(()),
            Err(err) => {
                self.drop_stalled(id, &err);
                Err(Error::UnknownSession(id))
            }
        }
    }

    /// Queue a message for every session subscribed to `topic`
    pub fn broadcast(&self, topic: &Topic, msg: &ServerMessage) {
        let mut failed = Vec::new();
        {
            let this = self.0.read();
            let subscribers = match this.topics.get(topic) {
                Some(s) => s,
                None => return,
            };
            for id in subscribers {
                if let Some(entry) = this.sessions.get(id) {
                    if let Err(err) = entry.outbox.try_send(msg.clone()) {
                        failed.push((*id, err));
                    }
                }
            }
        }
        for (id, err) in failed {
            self.drop_stalled(id, &err);
        }
    }

    fn drop_stalled(&self, id: SessionId, err: &TrySendError<ServerMessage>) {
        match err {
            TrySendError::Full(_) => {
                tracing::warn!(?id, "outbound queue full, disconnecting session")
            }
            TrySendError::Closed(_) => {
                tracing::debug!(?id, "outbound queue closed, dropping session")
            }
        }
        let _ = self.deregister(id);
    }
}
