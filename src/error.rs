// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error type shared by every handler.
//!
//! Subsystem errors (`DbError`, `AuthError`, `AsaciError`, ...) convert into
//! [`ApiError`] so handlers can propagate with `?`. The response body carries
//! both a stable snake_case `error_code` and the numeric `code`.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{PasswordError, TotpError};
use crate::storage::DbError;

/// Numeric error codes exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed = 1000,
    BadRequest = 1001,
    Unauthorized = 1100,
    InvalidCredentials = 1101,
    AccountLocked = 1102,
    AccountDisabled = 1103,
    TwoFactorRequired = 1104,
    InvalidTwoFactorCode = 1105,
    TokenExpired = 1106,
    TokenRevoked = 1107,
    PasswordReused = 1108,
    Forbidden = 1200,
    NotFound = 1300,
    Conflict = 1400,
    InvalidStatusTransition = 1500,
    OrassError = 2000,
    OrassUnavailable = 2001,
    AsaciError = 3000,
    AsaciUnavailable = 3001,
    Internal = 9000,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::InvalidCredentials => "invalid_credentials",
            ErrorCode::AccountLocked => "account_locked",
            ErrorCode::AccountDisabled => "account_disabled",
            ErrorCode::TwoFactorRequired => "two_factor_required",
            ErrorCode::InvalidTwoFactorCode => "invalid_two_factor_code",
            ErrorCode::TokenExpired => "token_expired",
            ErrorCode::TokenRevoked => "token_revoked",
            ErrorCode::PasswordReused => "password_reused",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::InvalidStatusTransition => "invalid_status_transition",
            ErrorCode::OrassError => "orass_error",
            ErrorCode::OrassUnavailable => "orass_unavailable",
            ErrorCode::AsaciError => "asaci_error",
            ErrorCode::AsaciUnavailable => "asaci_unavailable",
            ErrorCode::Internal => "internal_error",
        }
    }

    /// HTTP status this code maps to.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::BadRequest | ErrorCode::PasswordReused => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::Unauthorized
            | ErrorCode::InvalidCredentials
            | ErrorCode::TwoFactorRequired
            | ErrorCode::InvalidTwoFactorCode
            | ErrorCode::TokenExpired
            | ErrorCode::TokenRevoked => StatusCode::UNAUTHORIZED,
            ErrorCode::AccountLocked => StatusCode::LOCKED,
            ErrorCode::AccountDisabled | ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict | ErrorCode::InvalidStatusTransition => StatusCode::CONFLICT,
            ErrorCode::OrassError | ErrorCode::AsaciError => StatusCode::BAD_GATEWAY,
            ErrorCode::OrassUnavailable | ErrorCode::AsaciUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// JSON error body returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable snake_case identifier.
    pub error_code: String,
    /// Numeric error code.
    pub code: u16,
    /// Field-level validation errors or other structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Well-formed request the current state cannot accept.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorCode::BadRequest, message);
        err.status = StatusCode::UNPROCESSABLE_ENTITY;
        err
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Single-field validation failure.
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = BTreeMap::new();
        fields.insert(
            field.to_string(),
            vec![serde_json::json!({ "code": "invalid", "message": message })],
        );
        Self::new(ErrorCode::ValidationFailed, format!("Validation failed for field '{field}'"))
            .with_details(serde_json::json!(fields))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code.name(), self.code.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code.as_u16(), error = %self.message, "request failed");
        }
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code.name().to_string(),
            code: self.code.as_u16(),
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        for (field, field_errors) in errors.field_errors() {
            let entries = field_errors
                .iter()
                .map(|e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{field} is invalid"));
                    serde_json::json!({ "code": e.code, "message": message })
                })
                .collect();
            fields.insert(field.to_string(), entries);
        }

        let message = if fields.len() == 1 {
            format!(
                "Validation failed for field '{}'",
                fields.keys().next().map(String::as_str).unwrap_or_default()
            )
        } else {
            format!("Validation failed for {} fields", fields.len())
        };

        ApiError::new(ErrorCode::ValidationFailed, message).with_details(serde_json::json!(fields))
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            DbError::AlreadyExists(what) => ApiError::conflict(format!("{what} already exists")),
            DbError::Constraint(message) => ApiError::unprocessable(message),
            DbError::InvalidTransition { from, to } => ApiError::new(
                ErrorCode::InvalidStatusTransition,
                format!("Cannot move certificate request from {from} to {to}"),
            )
            .with_details(serde_json::json!({ "from": from, "to": to })),
            other => {
                tracing::error!(error = %other, "storage failure");
                ApiError::internal("Storage error")
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Weak(violations) => ApiError::new(
                ErrorCode::ValidationFailed,
                "Password does not meet the strength policy",
            )
            .with_details(serde_json::json!({ "password": violations })),
            PasswordError::Reused => ApiError::new(
                ErrorCode::PasswordReused,
                "Password was used recently and cannot be reused",
            ),
            PasswordError::Hashing(message) => {
                tracing::error!(error = %message, "password hashing failed");
                ApiError::internal("Password processing failed")
            }
        }
    }
}

impl From<TotpError> for ApiError {
    fn from(err: TotpError) -> Self {
        tracing::error!(error = %err, "TOTP failure");
        ApiError::internal("Two-factor processing failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    #[test]
    fn constructors_set_status_and_code() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.code, ErrorCode::NotFound);
        assert_eq!(nf.message, "missing");

        let conflict = ApiError::conflict("dup");
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let locked = ApiError::new(ErrorCode::AccountLocked, "locked");
        assert_eq!(locked.status, StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"], "bad data");
        assert_eq!(body["error_code"], "bad_request");
        assert_eq!(body["code"], 1001);
        assert!(body.get("details").is_none());
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(email(message = "Invalid email address"))]
        email: String,
        #[validate(length(min = 3, message = "Too short"))]
        name: String,
    }

    #[test]
    fn validation_errors_become_field_details() {
        let sample = Sample {
            email: "not-an-email".to_string(),
            name: "x".to_string(),
        };
        let err: ApiError = sample.validate().unwrap_err().into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let details = err.details.unwrap();
        assert_eq!(details["email"][0]["message"], "Invalid email address");
        assert_eq!(details["name"][0]["message"], "Too short");
    }
    #[test]
    fn storage_errors_map_to_http() {
        assert_eq!(
            ApiError::from(DbError::NotFound("User u1".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(DbError::AlreadyExists("Email a@b.c".into())).code,
            ErrorCode::Conflict
        );

        use crate::certify::CertificateStatus;
        let err = ApiError::from(DbError::InvalidTransition {
            from: CertificateStatus::Completed,
            to: CertificateStatus::Failed,
        });
        assert_eq!(err.code, ErrorCode::InvalidStatusTransition);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.details.unwrap()["from"], "COMPLETED");
    }

    #[test]
    fn password_errors_map_to_http() {
        let weak = ApiError::from(PasswordError::Weak(vec!["too short".into()]));
        assert_eq!(weak.code, ErrorCode::ValidationFailed);
        assert_eq!(weak.details.unwrap()["password"][0], "too short");
        assert_eq!(ApiError::from(PasswordError::Reused).code.as_u16(), 1108);
    }
}
