// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, Clone, thiserror::Error)]
pub enum AsaciError {
    #[error("ASACI integration is not configured")]
    NotConfigured,

    #[error("ASACI is unavailable (circuit open)")]
    Unavailable,

    #[error("ASACI request failed: {0}")]
    Network(String),

    #[error("ASACI request timed out")]
    Timeout,

    #[error("ASACI authentication failed: {0}")]
    Auth(String),

    #[error("ASACI returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("ASACI response was invalid: {0}")]
    InvalidResponse(String),
}

impl AsaciError {
    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            AsaciError::Network(_) | AsaciError::Timeout | AsaciError::Unavailable => true,
            AsaciError::Api { status, .. } => *status >= 500 || *status == 429,
            AsaciError::NotConfigured | AsaciError::Auth(_) | AsaciError::InvalidResponse(_) => {
                false
            }
        }
    }

    /// Stable identifier recorded on failed certificate requests.
    pub fn code(&self) -> &'static str {
        match self {
            AsaciError::NotConfigured => "asaci_not_configured",
            AsaciError::Unavailable => "asaci_unavailable",
            AsaciError::Network(_) => "asaci_network",
            AsaciError::Timeout => "asaci_timeout",
            AsaciError::Auth(_) => "asaci_auth",
            AsaciError::Api { .. } => "asaci_api",
            AsaciError::InvalidResponse(_) => "asaci_invalid_response",
        }
    }
}

impl From<reqwest::Error> for AsaciError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AsaciError::Timeout
        } else if err.is_decode() {
            AsaciError::InvalidResponse(err.to_string())
        } else {
            AsaciError::Network(err.to_string())
        }
    }
}

impl From<AsaciError> for ApiError {
    fn from(err: AsaciError) -> Self {
        match &err {
            AsaciError::NotConfigured
            | AsaciError::Unavailable
            | AsaciError::Network(_)
            | AsaciError::Timeout => ApiError::new(ErrorCode::AsaciUnavailable, err.to_string()),
            AsaciError::Api { status: 404, .. } => ApiError::not_found(err.to_string()),
            AsaciError::Api { status, .. } => ApiError::new(ErrorCode::AsaciError, err.to_string())
                .with_details(serde_json::json!({ "upstream_status": status })),
            AsaciError::Auth(_) | AsaciError::InvalidResponse(_) => {
                ApiError::new(ErrorCode::AsaciError, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn retryability() {
        assert!(AsaciError::Timeout.is_retryable());
        assert!(AsaciError::Unavailable.is_retryable());
        assert!(AsaciError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(AsaciError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!AsaciError::Api { status: 422, message: String::new() }.is_retryable());
        assert!(!AsaciError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn api_error_mapping() {
        assert_eq!(
            ApiError::from(AsaciError::Unavailable).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(AsaciError::Api { status: 404, message: "no".into() }).status,
            StatusCode::NOT_FOUND
        );
        let err = ApiError::from(AsaciError::Api { status: 422, message: "bad".into() });
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.details.unwrap()["upstream_status"], 422);
    }
}
