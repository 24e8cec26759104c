// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrassError {
    #[error("ORASS integration is not configured")]
    NotConfigured,

    #[error("Policy {0} not found in ORASS")]
    NotFound(String),

    #[error("ORASS gateway unreachable: {0}")]
    Network(String),

    #[error("ORASS gateway timed out")]
    Timeout,

    #[error("ORASS gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("ORASS query failed (ORA-{code}): {message}")]
    Sql { code: i64, message: String },

    #[error("ORASS response was invalid: {0}")]
    InvalidResponse(String),
}

impl OrassError {
    pub fn is_retryable(&self) -> bool {
        match self {
            OrassError::Network(_) | OrassError::Timeout => true,
            OrassError::Gateway { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Stable identifier recorded on failed certificate requests.
    pub fn code(&self) -> &'static str {
        match self {
            OrassError::NotConfigured => "orass_not_configured",
            OrassError::NotFound(_) => "policy_not_found",
            OrassError::Network(_) => "orass_network",
            OrassError::Timeout => "orass_timeout",
            OrassError::Gateway { .. } => "orass_gateway",
            OrassError::Sql { .. } => "orass_sql",
            OrassError::InvalidResponse(_) => "orass_invalid_response",
        }
    }
}

impl From<reqwest::Error> for OrassError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrassError::Timeout
        } else if err.is_decode() {
            OrassError::InvalidResponse(err.to_string())
        } else {
            OrassError::Network(err.to_string())
        }
    }
}

impl From<OrassError> for ApiError {
    fn from(err: OrassError) -> Self {
        match &err {
            OrassError::NotFound(_) => ApiError::not_found(err.to_string()),
            OrassError::NotConfigured | OrassError::Network(_) | OrassError::Timeout => {
                ApiError::new(ErrorCode::OrassUnavailable, err.to_string())
            }
            OrassError::Gateway { .. } | OrassError::Sql { .. } | OrassError::InvalidResponse(_) => {
                ApiError::new(ErrorCode::OrassError, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn maps_to_http_status() {
        assert_eq!(
            ApiError::from(OrassError::NotFound("P".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(OrassError::Timeout).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(OrassError::Sql { code: 942, message: "table".into() }).code,
            ErrorCode::OrassError
        );
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(OrassError::Timeout.is_retryable());
        assert!(OrassError::Gateway { status: 502, message: String::new() }.is_retryable());
        assert!(!OrassError::NotFound("P".into()).is_retryable());
        assert!(!OrassError::Sql { code: 942, message: String::new() }.is_retryable());
    }
}
