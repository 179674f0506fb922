// crates/server/src/auth.rs
//! Bearer token authentication.
//!
//! Each configured token maps to a `UserIdentity`. Handlers that mutate jobs
//! take an `AuthenticatedUser` argument, which resolves the identity from the
//! `Authorization` header or, for `EventSource` clients that cannot set
//! headers, from a `?token=` query parameter.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Identity resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
}

/// Token table. Empty means every authenticated route answers 401.
#[derive(Debug, Clone, Default)]
pub struct AuthTokens {
    tokens: Vec<(String, UserIdentity)>,
}

impl AuthTokens {
    pub fn new<I, T, U>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            tokens: pairs
                .into_iter()
                .map(|(token, user)| {
                    (
                        token.into(),
                        UserIdentity {
                            user_id: user.into(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Authenticate a token, returning the associated identity if valid.
    ///
    /// Every entry is compared in constant time and the scan never stops early.
    pub fn authenticate(&self, candidate: &str) -> Option<&UserIdentity> {
        let mut found = None;
        for (token, identity) in &self.tokens {
            if bool::from(candidate.as_bytes().ct_eq(token.as_bytes())) && found.is_none() {
                found = Some(identity);
            }
        }
        found
    }
}

/// Axum extractor that provides the authenticated user identity.
pub struct AuthenticatedUser(pub UserIdentity);

impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Authorization header first.
        if let Some(token) = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
        {
            if let Some(identity) = state.auth.authenticate(token) {
                return Ok(AuthenticatedUser(identity.clone()));
            }
        }

        // Query parameter fallback for SSE EventSource.
        if let Some(query) = parts.uri.query() {
            for pair in query.split('&') {
                if let Some(token) = pair.strip_prefix("token=") {
                    if let Some(identity) = state.auth.authenticate(token) {
                        return Ok(AuthenticatedUser(identity.clone()));
                    }
                }
            }
        }

        tracing::debug!(path = %parts.uri.path(), "Rejected unauthenticated request");
        Err(ApiError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn tokens() -> AuthTokens {
        AuthTokens::new([("tok-alice", "alice"), ("tok-bob", "bob")])
    }

    #[test]
    fn test_authenticate_known_tokens() {
        let auth = tokens();
        assert_eq!(auth.len(), 2);
        assert_eq!(auth.authenticate("tok-alice").unwrap().user_id, "alice");
        assert_eq!(auth.authenticate("tok-bob").unwrap().user_id, "bob");
    }

    #[test]
    fn test_authenticate_rejects_unknown_and_prefixes() {
        let auth = tokens();
        assert!(auth.authenticate("").is_none());
        assert!(auth.authenticate("tok-al").is_none());
        assert!(auth.authenticate("tok-alice2").is_none());
    }

    #[test]
    fn test_empty_table_rejects_everything() {
        let auth = AuthTokens::default();
        assert!(auth.is_empty());
        assert!(auth.authenticate("anything").is_none());
    }

    async fn extract(request: Request<()>) -> Result<UserIdentity, ApiError> {
        let state = AppState::in_memory(tokens());
        let (mut parts, _) = request.into_parts();
        AuthenticatedUser::from_request_parts(&mut parts, &state)
            .await
            .map(|user| user.0)
    }

    #[tokio::test]
    async fn test_extractor_reads_bearer_header() {
        let request = Request::builder()
            .uri("/api/jobs/j1")
            .header("authorization", "Bearer tok-bob")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap().user_id, "bob");
    }

    #[tokio::test]
    async fn test_extractor_falls_back_to_query_token() {
        let request = Request::builder()
            .uri("/api/jobs/j1/stream?x=1&token=tok-alice")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap().user_id, "alice");
    }

    #[tokio::test]
    async fn test_extractor_rejects_bad_credentials() {
        let request = Request::builder()
            .uri("/api/jobs/j1?token=nope")
            .header("authorization", "Basic dG9rLWFsaWNl")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await.unwrap_err(),
            ApiError::Unauthenticated
        ));
    }
}
