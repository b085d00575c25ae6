use remark_api::{Comment, CommentId, Error, PostId, ServerMessage, SessionId};

use crate::{
    auth::{Action, AuthorizationGate},
    registry::SessionRegistry,
    store::{Approval, CommentStore, Deletion},
};

/// Applies comment commands and fans the resulting events out to subscribers
///
/// Every operation touching a thread runs with the thread's lock held, from
/// the store mutation until the event is queued for all subscribers. Joins take
/// the same lock before subscribing and queuing the snapshot, so a joining
/// session never misses or double-sees an event.
#[derive(Clone, Debug)]
pub struct EventBroker {
    store: CommentStore,
    registry: SessionRegistry,
    gate: AuthorizationGate,
}

impl EventBroker {
    pub fn new(store: CommentStore, registry: SessionRegistry, gate: AuthorizationGate) -> Self {
        EventBroker {
            store,
            registry,
            gate,
        }
    }

    pub fn store(&self) -> &CommentStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn join(&self, session: SessionId, post: PostId) -> Result<(), Error> {
        post.validate()?;
        // threads only come into existence with their first comment
        let thread = self
            .store
            .thread_or_else(&post, || self.subscribe(session, &post, Vec::new()))?;
        if let Some(thread) = thread {
            let thread = thread.lock().await;
            self.subscribe(session, &post, thread.list())?;
        }
        tracing::debug!(?session, topic = %post.topic(), "session joined");
        Ok(())
    }

    fn subscribe(
        &self,
        session: SessionId,
        post: &PostId,
        comments: Vec<Comment>,
    ) -> Result<(), Error> {
        self.registry.subscribe(session, post.topic())?;
        self.registry.send(
            session,
            ServerMessage::Snapshot {
                post_id: post.clone(),
                comments,
            },
        )
    }

    pub async fn leave(&self, session: SessionId, post: PostId) -> Result<(), Error> {
        let topic = post.topic();
        match self.store.thread(&post) {
            Some(thread) => {
                let _thread = thread.lock().await;
                self.registry.unsubscribe(session, &topic)?;
            }
            None => self.registry.unsubscribe(session, &topic)?,
        }
        tracing::debug!(?session, %topic, "session left");
        Ok(())
    }

    pub fn disconnect(&self, session: SessionId) {
        match self.registry.deregister(session) {
            Ok(s) => tracing::debug!(?session, topics = s.topics.len(), "session disconnected"),
            // already dropped for overflowing its queue
            Err(_) => tracing::debug!(?session, "disconnected session was already gone"),
        }
    }

    async fn check(&self, session: SessionId, action: Action) -> Result<(), Error> {
        let s = self.registry.session(session)?;
        if self.gate.authorize(&s, action).await {
            Ok(())
        } else {
            tracing::info!(?session, ?action, "rejected unauthorized action");
            Err(Error::Unauthorized)
        }
    }

    pub async fn handle_create(
        &self,
        session: SessionId,
        post: PostId,
        author: &str,
        body: &str,
    ) -> Result<(), Error> {
        self.check(session, Action::Create).await?;
        post.validate()?;
        let thread = self.store.thread_or_create(&post);
        let mut thread = thread.lock().await;
        let comment = thread.create(author, body, self.store.now())?;
        tracing::debug!(
            ?session,
            topic = %thread.post().topic(),
            comment = %comment.comment_id,
            "created comment"
        );
        self.registry
            .broadcast(&post.topic(), &ServerMessage::created(post, comment));
        Ok(())
    }

    pub async fn handle_approve(
        &self,
        session: SessionId,
        post: PostId,
        comment_id: CommentId,
    ) -> Result<(), Error> {
        self.check(session, Action::Approve).await?;
        let thread = self
            .store
            .thread(&post)
            .ok_or_else(|| Error::NotFound(post.clone(), comment_id))?;
        let mut thread = thread.lock().await;
        match thread.approve(comment_id)? {
            Approval::Applied(comment) => {
                tracing::debug!(?session, %post, comment = %comment_id, "approved comment");
                self.registry
                    .broadcast(&post.topic(), &ServerMessage::approved(post, &comment));
            }
            // a retry: confirm to the retrying client only
            Approval::AlreadyApproved(comment) => {
                self.registry
                    .send(session, ServerMessage::approved(post, &comment))?;
            }
        }
        Ok(())
    }

    pub async fn handle_delete(
        &self,
        session: SessionId,
        post: PostId,
        comment_id: CommentId,
    ) -> Result<(), Error> {
        self.check(session, Action::Delete).await?;
        let thread = self
            .store
            .thread(&post)
            .ok_or_else(|| Error::NotFound(post.clone(), comment_id))?;
        let mut thread = thread.lock().await;
        match thread.delete(comment_id)? {
            Deletion::Removed => {
                tracing::debug!(?session, %post, comment = %comment_id, "deleted comment");
                self.registry
                    .broadcast(&post.topic(), &ServerMessage::deleted(post, comment_id));
            }
            Deletion::AlreadyDeleted => {
                self.registry
                    .send(session, ServerMessage::deleted(post, comment_id))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use remark_api::{AuthToken, ErrorCode};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{auth::StaticTokens, store::SystemClock};

    pub(crate) fn moderator() -> AuthToken {
        AuthToken::new("moderator-token")
    }

    pub(crate) fn broker() -> EventBroker {
        EventBroker::new(
            CommentStore::new(Arc::new(SystemClock)),
            SessionRegistry::new(),
            AuthorizationGate::new(Arc::new(StaticTokens::new([moderator()]))),
        )
    }

    fn connect(
        broker: &EventBroker,
        token: Option<AuthToken>,
    ) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let id = SessionId::generate();
        let (tx, rx) = mpsc::channel(64);
        broker.registry().register(id, token, tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut res = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            res.push(msg);
        }
        res
    }

    fn post() -> PostId {
        PostId::new("42")
    }

    fn snapshot_of(msg: &ServerMessage) -> &[Comment] {
        match msg {
            ServerMessage::Snapshot { comments, .. } => comments,
            m => panic!("expected a snapshot, got {m:?}"),
        }
    }

    #[tokio::test]
    async fn comment_lifecycle() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        let (b, mut rx_b) = connect(&broker, Some(moderator()));
        broker.join(a, post()).await.unwrap();
        broker.join(b, post()).await.unwrap();
        assert!(snapshot_of(&drain(&mut rx_a)[0]).is_empty());
        assert!(snapshot_of(&drain(&mut rx_b)[0]).is_empty());

        broker
            .handle_create(a, post(), "alice", "hi")
            .await
            .unwrap();
        for rx in [&mut rx_a, &mut rx_b] {
            match &drain(rx)[..] {
                [ServerMessage::CreatedComment { post_id, comment }] => {
                    assert_eq!(post_id, &post());
                    assert_eq!(comment.comment_id, CommentId(1));
                    assert_eq!(comment.author, "alice");
                    assert!(!comment.approved);
                }
                msgs => panic!("unexpected messages {msgs:?}"),
            }
        }

        broker.handle_approve(b, post(), CommentId(1)).await.unwrap();
        let approved = ServerMessage::ApprovedComment {
            post_id: post(),
            comment_id: CommentId(1),
            author: String::from("alice"),
            body: String::from("hi"),
        };
        assert_eq!(drain(&mut rx_a), vec![approved.clone()]);
        assert_eq!(drain(&mut rx_b), vec![approved]);

        let (c, mut rx_c) = connect(&broker, None);
        broker.join(c, post()).await.unwrap();
        let msgs = drain(&mut rx_c);
        let snapshot = snapshot_of(&msgs[0]);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].approved);

        broker.handle_delete(b, post(), CommentId(1)).await.unwrap();
        let deleted = ServerMessage::deleted(post(), CommentId(1));
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(drain(rx), vec![deleted.clone()]);
        }

        let (d, mut rx_d) = connect(&broker, None);
        broker.join(d, post()).await.unwrap();
        assert!(snapshot_of(&drain(&mut rx_d)[0]).is_empty());
    }

    #[tokio::test]
    async fn joining_an_empty_post_does_not_create_its_thread() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        for i in 0..3 {
            broker.join(a, PostId::new(format!("empty-{i}"))).await.unwrap();
        }
        broker.join(a, post()).await.unwrap();
        let msgs = drain(&mut rx_a);
        assert_eq!(msgs.len(), 4);
        assert!(msgs.iter().all(|m| snapshot_of(m).is_empty()));
        assert!(broker.store().thread(&post()).is_none());
        assert!(broker.store().thread(&PostId::new("empty-0")).is_none());

        // still subscribed, so the first comment creates the thread and reaches us
        broker.handle_create(a, post(), "alice", "hi").await.unwrap();
        assert!(broker.store().thread(&post()).is_some());
        assert!(matches!(
            &drain(&mut rx_a)[..],
            [ServerMessage::CreatedComment { post_id, .. }] if post_id == &post()
        ));
    }

    #[tokio::test]
    async fn unauthorized_moderation_leaves_store_untouched() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        let (forged, _rx) = connect(&broker, Some(AuthToken::new("forged")));
        broker.join(a, post()).await.unwrap();
        broker.handle_create(a, post(), "alice", "hi").await.unwrap();
        drain(&mut rx_a);
        let before = broker.store().list(&post()).await;

        for s in [a, forged] {
            let err = broker
                .handle_approve(s, post(), CommentId(1))
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::Unauthorized);
            let err = broker
                .handle_delete(s, post(), CommentId(1))
                .await
                .unwrap_err();
            assert_eq!(err, Error::Unauthorized);
        }

        assert_eq!(broker.store().list(&post()).await, before);
        // nothing was broadcast
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn retries_only_answer_the_retrying_session() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        let (b, mut rx_b) = connect(&broker, Some(moderator()));
        broker.join(a, post()).await.unwrap();
        broker.handle_create(a, post(), "alice", "hi").await.unwrap();
        broker.handle_approve(b, post(), CommentId(1)).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        broker.handle_approve(b, post(), CommentId(1)).await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert!(matches!(
            &drain(&mut rx_b)[..],
            [ServerMessage::ApprovedComment { .. }]
        ));

        broker.handle_delete(b, post(), CommentId(1)).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::deleted(post(), CommentId(1))]);
        broker.handle_delete(b, post(), CommentId(1)).await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn unknown_comments_and_threads() {
        let broker = broker();
        let (b, _rx) = connect(&broker, Some(moderator()));
        let err = broker
            .handle_approve(b, PostId::new("nope"), CommentId(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(broker.store().thread(&PostId::new("nope")).is_none());

        broker.handle_create(b, post(), "bob", "yo").await.unwrap();
        let err = broker
            .handle_delete(b, post(), CommentId(5))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound(post(), CommentId(5)));
    }

    #[tokio::test]
    async fn invalid_input_is_not_broadcast() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        broker.join(a, post()).await.unwrap();
        drain(&mut rx_a);
        let err = broker
            .handle_create(a, post(), "alice", "   ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(drain(&mut rx_a).is_empty());
        let err = broker.join(a, PostId::new("")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn leave_and_disconnect_stop_events() {
        let broker = broker();
        let (a, mut rx_a) = connect(&broker, None);
        let (b, mut rx_b) = connect(&broker, None);
        broker.join(a, post()).await.unwrap();
        broker.join(b, post()).await.unwrap();
        broker.join(b, PostId::new("43")).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        broker.leave(a, post()).await.unwrap();
        broker.disconnect(b);
        assert!(broker.registry().sessions_for(&post().topic()).is_empty());
        assert!(broker
            .registry()
            .sessions_for(&PostId::new("43").topic())
            .is_empty());

        broker.handle_create(a, post(), "alice", "hi").await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
        // b's queue was freed along with the session
        assert!(rx_b.recv().await.is_none());

        assert_eq!(
            broker.handle_create(b, post(), "bob", "yo").await,
            Err(Error::UnknownSession(b))
        );
    }

    #[tokio::test]
    async fn concurrent_joins_see_each_event_exactly_once() {
        let broker = broker();
        let (writer, _rx) = connect(&broker, None);
        let mut joiners = Vec::new();
        for _ in 0..8 {
            let (id, rx) = connect(&broker, None);
            joiners.push((id, rx));
        }

        let writes = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    broker
                        .handle_create(writer, post(), "alice", &format!("comment {i}"))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let joins = joiners
            .iter()
            .map(|(id, _)| {
                let broker = broker.clone();
                let id = *id;
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    broker.join(id, post()).await.unwrap();
                })
            })
            .collect::<Vec<_>>();
        writes.await.unwrap();
        for j in joins {
            j.await.unwrap();
        }

        for (_, mut rx) in joiners {
            let msgs = drain(&mut rx);
            let mut seen = snapshot_of(&msgs[0])
                .iter()
                .map(|c| c.comment_id.0)
                .collect::<Vec<_>>();
            for m in &msgs[1..] {
                match m {
                    ServerMessage::CreatedComment { comment, .. } => {
                        seen.push(comment.comment_id.0)
                    }
                    m => panic!("unexpected message {m:?}"),
                }
            }
            assert_eq!(seen, (1..=20).collect::<Vec<_>>());
        }
    }
}
