// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Pre-authenticates a whole router subtree. Handlers inside it still use
//! the [`Auth`](super::Auth) extractor, which picks up the user inserted
//! here instead of verifying the token a second time.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/me", get(me))
//!     .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::extractor::{authenticate, bearer_token};
use super::AuthError;
use crate::state::AppState;

/// Reject the request unless it carries a valid, unrevoked access token.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth_header = match request.headers().get(AUTHORIZATION) {
        Some(header) => header,
        None => return AuthError::MissingAuthHeader.into_response(),
    };

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(_) => return AuthError::InvalidAuthHeader.into_response(),
    };

    let user = match bearer_token(auth_str).and_then(|token| authenticate(token, &state)) {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!(error = %e, path = %request.uri().path(), "authentication rejected");
            return e.into_response();
        }
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}
