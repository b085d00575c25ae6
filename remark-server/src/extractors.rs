use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{self, request},
};
use remark_api::AuthToken;
use std::convert::Infallible;

use crate::EventBroker;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub broker: EventBroker,
    pub feed: FeedConfig,
}

#[derive(Clone, Copy, Debug)]
pub struct FeedConfig {
    /// Messages that may wait for a slow client before it gets disconnected
    pub outbox_capacity: usize,
}

#[derive(serde::Deserialize)]
struct TokenParam {
    token: Option<String>,
}

/// Identity token of the connecting client, if any
///
/// Read from an `Authorization: Bearer` header, or else from the `token` query
/// parameter as browsers cannot set headers on websocket connections. The token
/// is not checked here: a connection is never refused over it, and a token the
/// verifier rejects only keeps the session from moderating.
pub struct Identity(pub Option<AuthToken>);

fn token(raw: &str) -> Option<AuthToken> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| AuthToken::new(raw))
}

fn bearer(auth: &http::HeaderValue) -> Option<&str> {
    let auth = auth.to_str().ok()?;
    let (scheme, token) = auth.trim_start().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &S,
    ) -> Result<Identity, Infallible> {
        if let Some(auth) = req.headers.get(http::header::AUTHORIZATION) {
            match bearer(auth) {
                Some(t) => return Ok(Identity(token(t))),
                None => tracing::debug!("ignoring non-bearer authorization header"),
            }
        }
        match Query::<TokenParam>::from_request_parts(req, state).await {
            Ok(Query(param)) => Ok(Identity(param.token.as_deref().and_then(token))),
            Err(err) => {
                tracing::debug!(?err, "ignoring unreadable query string");
                Ok(Identity(None))
            }
        }
    }
}
