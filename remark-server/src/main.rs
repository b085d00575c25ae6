use anyhow::Context;
use axum::{routing::get, Router};
use remark_api::AuthToken;
use std::{net::SocketAddr, sync::Arc};

mod auth;
mod broker;
mod error;
mod extractors;
mod fuzz;
mod gateway;
mod registry;
mod store;

pub use broker::EventBroker;
pub use error::Error;

use auth::{AuthorizationGate, StaticTokens};
use extractors::{AppState, FeedConfig};
use registry::SessionRegistry;
use store::{CommentStore, SystemClock};

#[derive(Debug, structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Token allowed to approve and delete comments, can be repeated
    #[structopt(long = "moderator-token", env = "MODERATOR_TOKENS", use_delimiter = true)]
    moderator_tokens: Vec<String>,

    /// Number of messages queued for a client before it gets disconnected
    #[structopt(long, env = "OUTBOX_CAPACITY", default_value = "256")]
    outbox_capacity: usize,
}

impl Opt {
    /// Configured moderator tokens, `MODERATOR_TOKENS=""` meaning none
    fn moderator_tokens(&self) -> Vec<AuthToken> {
        self.moderator_tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(AuthToken::new)
            .collect()
    }

    fn state(&self) -> anyhow::Result<AppState> {
        anyhow::ensure!(self.outbox_capacity > 0, "outbox capacity must be positive");
        let verifier = StaticTokens::new(self.moderator_tokens());
        let broker = EventBroker::new(
            CommentStore::new(Arc::new(SystemClock)),
            SessionRegistry::new(),
            AuthorizationGate::new(Arc::new(verifier)),
        );
        Ok(AppState {
            broker,
            feed: FeedConfig {
                outbox_capacity: self.outbox_capacity,
            },
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/socket", get(gateway::comment_socket))
        .route("/api/posts/:post_id/comments", get(gateway::fetch_comments))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let state = opt.state().context("building server state")?;
    if opt.moderator_tokens().is_empty() {
        tracing::warn!("no moderator token configured, comments can be created but never approved");
    }

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app(state).into_make_service())
        .await
        .context("serving axum webserver")
}
