// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use super::roles::Permission;
use crate::error::{ApiError, ErrorCode};

/// Authentication and authorization error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token signature is invalid
    InvalidSignature,
    /// Token has expired
    TokenExpired,
    /// Token issuer is invalid
    InvalidIssuer,
    /// Token is valid but of another kind (refresh used as access, ...)
    WrongTokenType,
    /// Token ID is on the deny-list
    TokenRevoked,
    /// Unknown email or wrong password
    InvalidCredentials,
    /// Too many failed logins
    AccountLocked { until: DateTime<Utc> },
    /// Account disabled or deleted
    AccountDisabled,
    /// Submitted TOTP code did not verify
    InvalidTwoFactorCode,
    /// Authenticated but missing a permission
    InsufficientPermissions(Option<Permission>),
    /// Internal error
    InternalError(String),
}

impl AuthError {
    /// Numeric error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::InvalidIssuer
            | AuthError::WrongTokenType => ErrorCode::Unauthorized,
            AuthError::TokenExpired => ErrorCode::TokenExpired,
            AuthError::TokenRevoked => ErrorCode::TokenRevoked,
            AuthError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AuthError::AccountLocked { .. } => ErrorCode::AccountLocked,
            AuthError::AccountDisabled => ErrorCode::AccountDisabled,
            AuthError::InvalidTwoFactorCode => ErrorCode::InvalidTwoFactorCode,
            AuthError::InsufficientPermissions(_) => ErrorCode::Forbidden,
            AuthError::InternalError(_) => ErrorCode::Internal,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::InvalidIssuer => write!(f, "Token issuer is invalid"),
            AuthError::WrongTokenType => write!(f, "Token cannot be used for this operation"),
            AuthError::TokenRevoked => write!(f, "Token has been revoked"),
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::AccountLocked { until } => {
                write!(f, "Account is locked until {}", until.to_rfc3339())
            }
            AuthError::AccountDisabled => write!(f, "Account is disabled"),
            AuthError::InvalidTwoFactorCode => write!(f, "Invalid two-factor code"),
            AuthError::InsufficientPermissions(Some(p)) => {
                write!(f, "Missing permission '{p}' for this operation")
            }
            AuthError::InsufficientPermissions(None) => {
                write!(f, "Insufficient permissions for this operation")
            }
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let api = ApiError::new(err.error_code(), err.to_string());
        match err {
            AuthError::AccountLocked { until } => {
                api.with_details(serde_json::json!({ "locked_until": until }))
            }
            AuthError::InsufficientPermissions(Some(p)) => {
                api.with_details(serde_json::json!({ "required_permission": p }))
            }
            _ => api,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn missing_auth_returns_401() {
        let response = AuthError::MissingAuthHeader.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "unauthorized");
        assert_eq!(body["code"], 1100);
    }

    #[tokio::test]
    async fn insufficient_permissions_returns_403_with_permission() {
        let response =
            AuthError::InsufficientPermissions(Some(Permission::AuditRead)).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["details"]["required_permission"], "audit:read");
    }

    #[tokio::test]
    async fn locked_account_returns_423_with_deadline() {
        let until = Utc::now();
        let response = AuthError::AccountLocked { until }.into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["code"], 1102);
        assert!(body["details"]["locked_until"].is_string());
    }

    #[test]
    fn token_errors_map_to_dedicated_codes() {
        assert_eq!(AuthError::TokenExpired.error_code(), ErrorCode::TokenExpired);
        assert_eq!(AuthError::TokenRevoked.error_code(), ErrorCode::TokenRevoked);
        assert_eq!(AuthError::WrongTokenType.error_code(), ErrorCode::Unauthorized);
    }
}
