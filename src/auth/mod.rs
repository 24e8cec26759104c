// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Local accounts with HS256 JWTs.
//!
//! ## Auth Flow
//!
//! 1. `POST /v1/auth/login` verifies the Argon2id password hash
//! 2. Without two-factor auth, an access/refresh pair is returned directly.
//!    With it, a 5 minute challenge token is returned and exchanged for the
//!    pair at `POST /v1/auth/2fa/verify` together with a TOTP code.
//! 3. Clients send `Authorization: Bearer <access token>`
//! 4. The server verifies signature, expiry, issuer and token type, then
//!    checks the `jti` deny-list and extracts:
//!    - `sub` → `user_id`
//!    - `role` and `permissions`
//!
//! ## Security
//!
//! - Access and refresh tokens use separate secrets
//! - Refresh rotates the pair and revokes the old refresh `jti`
//! - Repeated failed logins lock the account for a configured duration
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;
pub mod middleware;
pub mod password;
pub mod roles;
pub mod tokens;
pub mod totp;

pub use claims::{AuthenticatedUser, Claims, TokenType};
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use middleware::require_auth;
pub use password::{PasswordError, PasswordHasher};
pub use roles::{Permission, SystemRole};
pub use tokens::{TokenPair, TokenService};
pub use totp::TotpError;
