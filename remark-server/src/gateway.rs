//! Websocket endpoint of the comment service
//!
//! Each connection is one session. Inbound text frames are decoded into
//! [`ClientMessage`]s and dispatched to the [`EventBroker`]; everything the
//! broker queues for the session is written back as JSON text frames.

use anyhow::Context;
use axum::{
    extract::{ws::Message, Path, State, WebSocketUpgrade},
    Json,
};
use futures::{SinkExt, StreamExt};
use remark_api::{ClientMessage, Comment, PostId, ServerMessage, SessionId};
use tokio::sync::mpsc;

use crate::{
    extractors::{FeedConfig, Identity},
    EventBroker, Error,
};

pub async fn comment_socket(
    ws: WebSocketUpgrade,
    Identity(token): Identity,
    State(broker): State<EventBroker>,
    State(feed): State<FeedConfig>,
) -> axum::response::Response {
    ws.on_upgrade(move |sock| {
        let (write, read) = sock.split();
        comment_socket_impl(write, read, broker, feed, token)
    })
}

pub async fn fetch_comments(
    Path(post): Path<String>,
    State(broker): State<EventBroker>,
) -> Result<Json<Vec<Comment>>, Error> {
    let post = PostId(post);
    post.validate()?;
    Ok(Json(broker.store().list(&post).await))
}

/// Decode one inbound frame, `None` for frames that carry no command
pub fn decode(msg: Message) -> Result<Option<ClientMessage>, Error> {
    match msg {
        Message::Text(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| Error::protocol(format!("invalid message: {err}"))),
        Message::Binary(_) => Err(Error::protocol("binary frames are not supported")),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
    }
}

pub fn encode(msg: &ServerMessage) -> Result<Message, Error> {
    let json = serde_json::to_string(msg)
        .with_context(|| format!("serializing outbound message {msg:?}"))?;
    Ok(Message::Text(json))
}

pub async fn dispatch(
    broker: &EventBroker,
    session: SessionId,
    msg: ClientMessage,
) -> Result<(), Error> {
    tracing::trace!(?session, post = %msg.post_id(), "dispatching {msg:?}");
    match msg {
        ClientMessage::Join { post_id } => broker.join(session, post_id).await?,
        ClientMessage::Leave { post_id } => broker.leave(session, post_id).await?,
        ClientMessage::CreateComment {
            post_id,
            author,
            body,
        } => {
            broker
                .handle_create(session, post_id, &author, &body)
                .await?
        }
        ClientMessage::ApproveComment {
            post_id,
            comment_id,
        } => broker.handle_approve(session, post_id, comment_id).await?,
        ClientMessage::DeleteComment {
            post_id,
            comment_id,
        } => broker.handle_delete(session, post_id, comment_id).await?,
    }
    Ok(())
}

pub async fn comment_socket_impl<W, R>(
    mut write: W,
    read: R,
    broker: EventBroker,
    feed: FeedConfig,
    token: Option<remark_api::AuthToken>,
) where
    W: 'static + Send + Unpin + futures::Sink<Message>,
    <W as futures::Sink<Message>>::Error: Send,
    R: 'static + Send + Unpin + futures::Stream<Item = Result<Message, axum::Error>>,
{
    let session = SessionId::generate();
    let (outbox, mut receiver) = mpsc::channel(feed.outbox_capacity);
    tracing::debug!(?session, with_token = token.is_some(), "comment socket connected");
    let mut dropped = broker.registry().register(session, token, outbox);

    let mut read = read.fuse();
    let stalled = loop {
        tokio::select! {
            // the registry dropped us, most likely for being too slow
            _ = &mut dropped => break true,
            msg = receiver.recv() => match msg {
                None => break true,
                Some(msg) => {
                    let frame = match encode(&msg) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::error!(?session, ?err, "dropping unencodable message");
                            continue;
                        }
                    };
                    tokio::select! {
                        _ = &mut dropped => break true,
                        res = write.send(frame) => if res.is_err() {
                            break false;
                        },
                    }
                }
            },
            msg = read.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break false,
                Some(Err(err)) => {
                    tracing::debug!(?session, ?err, "comment socket read failed");
                    break false;
                }
                Some(Ok(msg)) => {
                    let res = match decode(msg) {
                        Ok(None) => Ok(()),
                        Ok(Some(cmd)) => dispatch(&broker, session, cmd).await,
                        Err(err) => Err(err),
                    };
                    if let Err(err) = res {
                        let reply = err.into_api().to_message();
                        // failure means the session is gone, which `dropped` notices
                        let _ = broker.registry().send(session, reply);
                    }
                }
            },
        }
    };

    broker.disconnect(session);
    // a stalled peer would never acknowledge the close either
    if !stalled {
        let _ = write.close().await;
    }
    tracing::debug!(?session, stalled, "comment socket closed");
}
