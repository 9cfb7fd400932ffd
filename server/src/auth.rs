use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use ride_tracker_lib::user::User;
use serde::Deserialize;

use crate::{error::AppError, server_state::ServerState};

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token from `Authorization: Bearer <token>`, or from `?token=` since browsers cannot set
/// headers on websocket upgrades.
pub fn request_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    bearer
        .or_else(|| Query::<TokenQuery>::try_from_uri(&parts.uri).ok().and_then(|query| query.0.token))
        .filter(|token| !token.is_empty())
}

/// Signed in user, rejects the request with 401 otherwise.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<ServerState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ServerState>) -> Result<Self, Self::Rejection> {
        let token = request_token(parts).ok_or(AppError::NotAuthenticated)?;
        match state.data_manager.authenticate(&token).await? {
            Some(user) => Ok(AuthUser(user)),
            None => {
                tracing::warn!("Rejected unknown token");
                Err(AppError::NotAuthenticated)
            }
        }
    }
}

/// Signed in user if there is one. Never rejects.
pub struct MaybeUser(pub Option<User>);

impl FromRequestParts<Arc<ServerState>> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ServerState>) -> Result<Self, Self::Rejection> {
        let Some(token) = request_token(parts) else {
            return Ok(MaybeUser(None));
        };

        match state.data_manager.authenticate(&token).await {
            Ok(user) => Ok(MaybeUser(user)),
            Err(err) => {
                tracing::error!("Failed to authenticate: {}", err);
                Ok(MaybeUser(None))
            }
        }
    }
}
