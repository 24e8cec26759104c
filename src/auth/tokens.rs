// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local HS256 token issuance and verification.
//!
//! Access and refresh tokens are signed with separate secrets so a leaked
//! refresh secret cannot mint access tokens. Two-factor challenge tokens
//! share the refresh secret and are distinguished by `typ`.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use super::claims::{AuthenticatedUser, Claims, TokenType};
use super::error::AuthError;
use crate::config::AuthSettings;
use crate::storage::{StoredRole, StoredUser};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Lifetime of a two-factor challenge token.
pub const TWO_FACTOR_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(settings.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(settings.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(settings.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(settings.refresh_secret.as_bytes()),
            issuer: settings.issuer.clone(),
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue_pair(&self, user: &StoredUser, role: &StoredRole) -> Result<TokenPair, AuthError> {
        let access_claims = self.claims(
            user,
            &role.name,
            role.permissions.iter().copied().collect(),
            TokenType::Access,
            self.access_ttl,
        );
        let refresh_claims =
            self.claims(user, &role.name, Vec::new(), TokenType::Refresh, self.refresh_ttl);

        Ok(TokenPair {
            access_token: sign(&access_claims, &self.access_encoding)?,
            refresh_token: sign(&refresh_claims, &self.refresh_encoding)?,
            expires_in: self.access_ttl.as_secs(),
            access_claims,
            refresh_claims,
        })
    }

    /// Short-lived token proving the password step succeeded.
    pub fn issue_two_factor_challenge(&self, user: &StoredUser) -> Result<String, AuthError> {
        let claims = self.claims(
            user,
            "",
            Vec::new(),
            TokenType::TwoFactor,
            TWO_FACTOR_CHALLENGE_TTL,
        );
        sign(&claims, &self.refresh_encoding)
    }

    pub fn verify_access(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.verify(token, &self.access_decoding, TokenType::Access)?;
        Ok(AuthenticatedUser::from_claims(claims))
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, &self.refresh_decoding, TokenType::Refresh)
    }

    pub fn verify_challenge(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(token, &self.refresh_decoding, TokenType::TwoFactor)
    }

    fn claims(
        &self,
        user: &StoredUser,
        role: &str,
        permissions: Vec<super::roles::Permission>,
        typ: TokenType,
        ttl: Duration,
    ) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: role.to_string(),
            permissions,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            iss: self.issuer.clone(),
            typ,
        }
    }

    fn verify(
        &self,
        token: &str,
        key: &DecodingKey,
        expected: TokenType,
    ) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let claims = decode::<Claims>(token, key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                _ => AuthError::MalformedToken,
            })?
            .claims;

        if claims.typ != expected {
            return Err(AuthError::WrongTokenType);
        }
        Ok(claims)
    }
}

fn sign(claims: &Claims, key: &EncodingKey) -> Result<String, AuthError> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AuthError::InternalError(format!("token signing failed: {e}")))
}
