// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> Result<impl IntoResponse, ApiError> {
//!     user.require(Permission::CertificatesRead)?;
//!     // ...
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{AuthError, AuthenticatedUser};
use crate::state::AppState;
use crate::storage::TokenRevocationRepository;

/// Extractor for authenticated users.
///
/// Validates the bearer access token and rejects tokens whose `jti` was
/// revoked by logout or refresh rotation. Reuses the user inserted by
/// [`require_auth`](super::middleware::require_auth) when present.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = bearer_token(auth_header)?;
        let user = authenticate(token, state)?;
        Ok(Auth(user))
    }
}

pub(crate) fn bearer_token(header: &str) -> Result<&str, AuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Verify an access token and check the deny-list.
pub(crate) fn authenticate(token: &str, state: &AppState) -> Result<AuthenticatedUser, AuthError> {
    let user = state.tokens.verify_access(token)?;
    let revoked = TokenRevocationRepository::new(&state.db)
        .is_revoked(&user.token_id)
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    if revoked {
        return Err(AuthError::TokenRevoked);
    }
    Ok(user)
}

/// Optional authentication extractor.
///
/// Returns `None` if no valid authentication is present, instead of rejecting.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match Auth::from_request_parts(parts, state).await {
            Ok(Auth(user)) => Ok(OptionalAuth(Some(user))),
            Err(_) => Ok(OptionalAuth(None)),
        }
    }
}
