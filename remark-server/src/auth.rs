use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;
use remark_api::AuthToken;

use crate::registry::Session;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Create,
    Approve,
    Delete,
}

/// Decides whether an identity token is currently valid
#[async_trait]
pub trait TokenVerifier: fmt::Debug + Send + Sync {
    async fn verify(&self, token: &AuthToken) -> bool;
}

/// Accepts a fixed set of moderator tokens, as configured at startup
#[derive(Debug, Default)]
pub struct StaticTokens(HashSet<AuthToken>);

impl StaticTokens {
    pub fn new(tokens: impl IntoIterator<Item = AuthToken>) -> StaticTokens {
        StaticTokens(tokens.into_iter().collect())
    }
}

#[async_trait]
impl TokenVerifier for StaticTokens {
    async fn verify(&self, token: &AuthToken) -> bool {
        self.0.contains(token)
    }
}

#[derive(Clone, Debug)]
pub struct AuthorizationGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl AuthorizationGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> AuthorizationGate {
        AuthorizationGate { verifier }
    }

    pub async fn authorize(&self, session: &Session, action: Action) -> bool {
        match action {
            // anonymous commenting is allowed
            Action::Create => true,
            Action::Approve | Action::Delete => match &session.token {
                None => false,
                Some(token) => self.verifier.verify(token).await,
            },
        }
    }
}
