// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AuthError;
use super::roles::Permission;

/// Kind of token, carried in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    #[serde(rename = "2fa")]
    TwoFactor,
}

/// Claims carried by every token the server issues.
///
/// Refresh and two-factor challenge tokens carry the same shape; their
/// `permissions` are left empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    /// Role name at issuance
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Token ID, used for revocation
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub typ: TokenType,
}

/// Authenticated user information extracted from an access token.
///
/// This is the primary type used throughout the application to represent
/// the authenticated user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    /// Role name
    pub role: String,
    pub permissions: BTreeSet<Permission>,
    /// `jti` of the access token
    #[serde(skip)]
    pub token_id: String,
    /// Token expiration (Unix timestamp)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
            permissions: claims.permissions.into_iter().collect(),
            token_id: claims.jti,
            expires_at: claims.exp,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Fail with 403 unless the user holds `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), AuthError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions(Some(permission)))
        }
    }
}
