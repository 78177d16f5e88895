//! routes/auth.rs
//! Sign-in lives with the identity provider; here we only turn its token
//! into an `Identity`.
use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::{
    error::{forbidden, AppErr},
    model::Identity,
    state::AppState,
    utils::jwt,
};

/// Authenticated caller. Reads `Authorization: Bearer <jwt>`, or the
/// `token` query parameter for websocket upgrades.
#[derive(Debug, Clone)]
pub struct Viewer(pub Identity);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = AppErr;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let secret = parts
            .extensions
            .get::<AppState>()
            .map(|s| s.cfg.jwt_secret.clone())
            .ok_or_else(|| AppErr::Internal("state extension missing".into()))?;

        let token = match bearer(parts) {
            Some(t) => t,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .ok_or_else(|| forbidden("missing token"))?,
        };
        jwt::verify(&token, &secret).map(Viewer).ok_or_else(|| forbidden("bad token"))
    }
}

fn bearer(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}
