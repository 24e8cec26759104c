// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication endpoints.
//!
//! Login is a one or two step exchange. Without two-factor auth the
//! password step returns the token pair directly; with it, the password
//! step returns a short-lived challenge token that `/2fa/verify` trades for
//! the pair together with a TOTP code.
//!
//! Every outcome, successful or not, is written to the operation log.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use validator::Validate;

use super::{client_ip, users::UserResponse};
use crate::{
    auth::{
        password::ensure_strength, totp, Auth, AuthError, OptionalAuth, PasswordError, Permission,
    },
    error::ApiError,
    state::AppState,
    storage::{
        normalize_email, AuditAction, AuditRepository, DbError, OperationLog,
        PasswordHistoryRepository, RoleRepository, StoredUser, TokenRevocationRepository,
        UserRepository, UserStatus,
    },
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Self-registration request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    /// Must satisfy the password policy.
    pub password: String,
    #[validate(length(min = 2, max = 100, message = "Name must be 2-100 characters"))]
    pub full_name: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Issued access/refresh pair.
#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub user: UserResponse,
}

/// Returned by login when a TOTP code is still needed.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorChallenge {
    pub requires_two_factor: bool,
    /// Exchange at `/v1/auth/2fa/verify` within five minutes.
    pub challenge_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    Tokens(TokenResponse),
    TwoFactor(TwoFactorChallenge),
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorVerifyRequest {
    pub challenge_token: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Also revoke this refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorSetupResponse {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// `otpauth://` URL for QR codes.
    pub otpauth_url: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorCodeRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorDisableRequest {
    pub password: String,
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

// ============================================================================
// Helpers
// ============================================================================

/// Write `log` as a success or a failure depending on `result`.
fn record_outcome<T>(state: &AppState, log: OperationLog, result: &Result<T, ApiError>) {
    let log = match result {
        Ok(_) => log,
        Err(e) => log.failed(&e.message),
    };
    AuditRepository::new(&state.db).record(log);
}

fn ensure_can_login(user: &StoredUser) -> Result<(), AuthError> {
    if user.is_deleted() || user.status == UserStatus::Disabled {
        return Err(AuthError::AccountDisabled);
    }
    if let Some(until) = user.locked_until.filter(|until| *until > Utc::now()) {
        return Err(AuthError::AccountLocked { until });
    }
    Ok(())
}

/// Count a failed attempt and return the error to report.
fn failed_attempt(state: &AppState, user: &StoredUser, err: AuthError) -> ApiError {
    let lockout = chrono::Duration::from_std(state.config.auth.lockout)
        .unwrap_or_else(|_| chrono::Duration::minutes(15));
    match UserRepository::new(&state.db).record_failed_login(
        &user.id,
        state.config.auth.max_failed_attempts,
        lockout,
    ) {
        Ok(updated) => {
            if let Some(until) = updated.locked_until {
                warn!(user_id = %user.id, locked_until = %until, "Account locked after failed logins");
            }
            err.into()
        }
        Err(e) => e.into(),
    }
}

fn issue_tokens(state: &AppState, user: &StoredUser) -> Result<TokenResponse, ApiError> {
    let role = RoleRepository::new(&state.db).get(&user.role_id)?;
    let pair = state.tokens.issue_pair(user, &role)?;
    Ok(TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: pair.expires_in,
        user: UserResponse::new(user, &role),
    })
}

fn current_user(state: &AppState, user_id: &str) -> Result<StoredUser, ApiError> {
    let user = UserRepository::new(&state.db).get(user_id)?;
    ensure_can_login(&user)?;
    Ok(user)
}

/// Step of a fresh `code` for `user`. Codes already spent are rejected.
fn accept_code(user: &StoredUser, secret: &str, code: &str) -> Result<u64, ApiError> {
    totp::matching_step_now(secret, code, user.totp_last_step)?
        .ok_or_else(|| AuthError::InvalidTwoFactorCode.into())
}

// ============================================================================
// Handlers
// ============================================================================

/// Create an account with the default role.
///
/// When self-registration is disabled, only callers holding `users:write`
/// may use this endpoint.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 403, description = "Registration disabled", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody)
    )
)]
pub async fn register(
    OptionalAuth(caller): OptionalAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let log = OperationLog::new(AuditAction::Register)
        .with_email(normalize_email(&request.email))
        .with_ip(client_ip(&headers));

    let result = async {
        let admin_override = caller
            .as_ref()
            .is_some_and(|c| c.has_permission(Permission::UsersWrite));
        if !state.config.auth.allow_registration && !admin_override {
            return Err(ApiError::forbidden("Self-registration is disabled"));
        }
        request.validate()?;
        ensure_strength(&request.password)?;

        let role = RoleRepository::new(&state.db)
            .get_by_name(&state.config.auth.default_role)?
            .ok_or_else(|| ApiError::internal("Default role is missing"))?;
        let hash = state.hasher.hash(&request.password).await?;
        let user = StoredUser::new(&request.email, request.full_name.trim(), hash, role.id.clone());
        UserRepository::new(&state.db).create(&user)?;
        PasswordHistoryRepository::new(&state.db).record(&user.id, &user.password_hash)?;
        info!(user_id = %user.id, role = %role.name, "User registered");
        Ok::<_, ApiError>(UserResponse::new(&user, &role))
    }
    .await;

    let log = match &result {
        Ok(user) => log.with_user(&user.id).with_resource("user", &user.id),
        Err(_) => log,
    };
    record_outcome(&state, log, &result);
    result.map(|user| (StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens, or a two-factor challenge", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
        (status = 403, description = "Account disabled", body = crate::error::ErrorBody),
        (status = 423, description = "Account locked", body = crate::error::ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut log = OperationLog::new(AuditAction::Login)
        .with_email(normalize_email(&request.email))
        .with_ip(client_ip(&headers));

    let found = UserRepository::new(&state.db).get_by_email(&request.email);
    if let Ok(Some(user)) = &found {
        log = log.with_user(&user.id);
    }

    let result = async {
        request.validate()?;
        let user = found?.ok_or(AuthError::InvalidCredentials)?;
        ensure_can_login(&user)?;

        if !state.hasher.verify(&request.password, &user.password_hash).await? {
            return Err(failed_attempt(&state, &user, AuthError::InvalidCredentials));
        }

        if user.two_factor_enabled {
            let challenge_token = state.tokens.issue_two_factor_challenge(&user)?;
            return Ok(LoginResponse::TwoFactor(TwoFactorChallenge {
                requires_two_factor: true,
                challenge_token,
            }));
        }

        let user = UserRepository::new(&state.db).record_successful_login(&user.id)?;
        Ok::<_, ApiError>(LoginResponse::Tokens(issue_tokens(&state, &user)?))
    }
    .await;

    let log = match &result {
        Ok(LoginResponse::TwoFactor(_)) => {
            log.with_details(serde_json::json!({ "two_factor_pending": true }))
        }
        _ => log,
    };
    record_outcome(&state, log, &result);
    result.map(Json)
}

/// Second login step for accounts with two-factor auth.
#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    tag = "Auth",
    request_body = TwoFactorVerifyRequest,
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 401, description = "Invalid challenge or code", body = crate::error::ErrorBody)
    )
)]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorVerifyRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut log = OperationLog::new(AuditAction::TwoFactorVerify).with_ip(client_ip(&headers));

    let result = async {
        request.validate()?;
        let claims = state.tokens.verify_challenge(&request.challenge_token)?;
        log = log.clone().with_user(&claims.sub).with_email(&claims.email);

        let revocations = TokenRevocationRepository::new(&state.db);
        if revocations.is_revoked(&claims.jti)? {
            return Err(AuthError::TokenRevoked.into());
        }

        let user = current_user(&state, &claims.sub)?;
        let secret = user
            .two_factor_secret
            .as_deref()
            .filter(|_| user.two_factor_enabled)
            .ok_or(AuthError::InvalidTwoFactorCode)?;
        let Some(step) = totp::matching_step_now(secret, &request.code, user.totp_last_step)? else {
            return Err(failed_attempt(&state, &user, AuthError::InvalidTwoFactorCode));
        };

        let users = UserRepository::new(&state.db);
        if users.accept_totp_step(&user.id, step, |_| Ok(()))?.is_none() {
            warn!(user_id = %user.id, "Two-factor code replayed");
            return Err(failed_attempt(&state, &user, AuthError::InvalidTwoFactorCode));
        }
        if !revocations.revoke(&claims.jti, claims.exp)? {
            return Err(AuthError::TokenRevoked.into());
        }
        let user = users.record_successful_login(&user.id)?;
        issue_tokens(&state, &user)
    }
    .await;

    record_outcome(&state, log, &result);
    result.map(Json)
}

/// Rotate a refresh token. The presented token is revoked.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token", body = crate::error::ErrorBody)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let mut log = OperationLog::new(AuditAction::TokenRefresh).with_ip(client_ip(&headers));

    let result = (|| -> Result<TokenResponse, ApiError> {
        let claims = state.tokens.verify_refresh(&request.refresh_token)?;
        log = log.clone().with_user(&claims.sub).with_email(&claims.email);

        let user = current_user(&state, &claims.sub)?;
        if !TokenRevocationRepository::new(&state.db).revoke(&claims.jti, claims.exp)? {
            warn!(user_id = %claims.sub, "Revoked refresh token presented");
            return Err(AuthError::TokenRevoked.into());
        }
        issue_tokens(&state, &user)
    })();

    record_outcome(&state, log, &result);
    result.map(Json)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    request_body(content = Option<LogoutRequest>, description = "Refresh token to revoke as well"),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Tokens revoked"),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn logout(
    Auth(user): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ApiError> {
    let revocations = TokenRevocationRepository::new(&state.db);
    revocations.revoke(&user.token_id, user.expires_at)?;

    let refresh_token = body.and_then(|Json(b)| b.refresh_token);
    let mut refresh_revoked = false;
    if let Some(token) = refresh_token {
        match state.tokens.verify_refresh(&token) {
            Ok(claims) if claims.sub == user.user_id => {
                revocations.revoke(&claims.jti, claims.exp)?;
                refresh_revoked = true;
            }
            Ok(_) => warn!(user_id = %user.user_id, "Logout with another user's refresh token"),
            Err(e) => tracing::debug!(error = %e, "Ignoring unusable refresh token at logout"),
        }
    }

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::Logout)
            .with_user(&user.user_id)
            .with_email(&user.email)
            .with_ip(client_ip(&headers))
            .with_details(serde_json::json!({ "refresh_revoked": refresh_revoked })),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody)
    )
)]
pub async fn me(Auth(user): Auth, State(state): State<AppState>) -> Result<Json<UserResponse>, ApiError> {
    let user = current_user(&state, &user.user_id)?;
    Ok(Json(UserResponse::load(&state, &user)?))
}

/// Change the caller's password. The last `AUTH_PASSWORD_HISTORY_DEPTH`
/// passwords cannot be reused.
#[utoipa::path(
    post,
    path = "/v1/auth/change-password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Policy violation or reused password", body = crate::error::ErrorBody),
        (status = 401, description = "Current password is wrong", body = crate::error::ErrorBody)
    )
)]
pub async fn change_password(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let log = OperationLog::new(AuditAction::PasswordChange)
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(&headers));

    let result = async {
        let user = current_user(&state, &caller.user_id)?;
        if !state.hasher.verify(&request.current_password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }
        ensure_strength(&request.new_password)?;

        let history = PasswordHistoryRepository::new(&state.db);
        let mut previous = vec![user.password_hash.clone()];
        previous.extend(
            history
                .recent(&user.id, state.config.auth.password_history_depth)?
                .into_iter()
                .map(|entry| entry.password_hash),
        );
        for hash in &previous {
            if state.hasher.verify(&request.new_password, hash).await? {
                return Err(PasswordError::Reused.into());
            }
        }

        let new_hash = state.hasher.hash(&request.new_password).await?;
        let user = UserRepository::new(&state.db).replace_password(
            &user.id,
            &user.password_hash,
            new_hash,
        )?;
        history.record(&user.id, &user.password_hash)?;
        Ok::<_, ApiError>(())
    }
    .await;

    record_outcome(&state, log, &result);
    result.map(|_| StatusCode::NO_CONTENT)
}

/// Generate a pending TOTP secret. Two-factor auth is not active until
/// `/2fa/enable` confirms a code.
#[utoipa::path(
    post,
    path = "/v1/auth/2fa/setup",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Secret generated", body = TwoFactorSetupResponse),
        (status = 409, description = "Already enabled", body = crate::error::ErrorBody)
    )
)]
pub async fn setup_two_factor(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TwoFactorSetupResponse>, ApiError> {
    let log = OperationLog::new(AuditAction::TwoFactorSetup)
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(&headers));

    let result = (|| -> Result<TwoFactorSetupResponse, ApiError> {
        let user = current_user(&state, &caller.user_id)?;
        if user.two_factor_enabled {
            return Err(ApiError::conflict("Two-factor authentication is already enabled"));
        }
        let secret = totp::generate_secret()?;
        let user = UserRepository::new(&state.db).set_pending_two_factor(&user.id, secret.clone())?;
        Ok(TwoFactorSetupResponse {
            otpauth_url: totp::provisioning_url(&secret, &user.email, &state.config.auth.totp_issuer),
            secret,
        })
    })();

    record_outcome(&state, log, &result);
    result.map(Json)
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enable",
    tag = "Auth",
    request_body = TwoFactorCodeRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Two-factor enabled", body = UserResponse),
        (status = 400, description = "No pending setup", body = crate::error::ErrorBody),
        (status = 401, description = "Wrong code", body = crate::error::ErrorBody)
    )
)]
pub async fn enable_two_factor(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let log = OperationLog::new(AuditAction::TwoFactorEnable)
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(&headers));

    let result = (|| -> Result<UserResponse, ApiError> {
        request.validate()?;
        let user = current_user(&state, &caller.user_id)?;
        let pending = user
            .two_factor_pending_secret
            .clone()
            .ok_or_else(|| ApiError::bad_request("Start two-factor setup first"))?;
        let step = accept_code(&user, &pending, &request.code)?;

        let user = UserRepository::new(&state.db)
            .accept_totp_step(&user.id, step, |user| {
                if user.two_factor_pending_secret.as_deref() != Some(pending.as_str()) {
                    return Err(DbError::Constraint(
                        "Two-factor setup was restarted; confirm the new secret".to_string(),
                    ));
                }
                user.two_factor_secret = user.two_factor_pending_secret.take();
                user.two_factor_enabled = true;
                Ok(())
            })?
            .ok_or(AuthError::InvalidTwoFactorCode)?;
        UserResponse::load(&state, &user)
    })();

    record_outcome(&state, log, &result);
    result.map(Json)
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/disable",
    tag = "Auth",
    request_body = TwoFactorDisableRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Two-factor disabled", body = UserResponse),
        (status = 400, description = "Two-factor not enabled", body = crate::error::ErrorBody),
        (status = 401, description = "Wrong password or code", body = crate::error::ErrorBody)
    )
)]
pub async fn disable_two_factor(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TwoFactorDisableRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let log = OperationLog::new(AuditAction::TwoFactorDisable)
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(&headers));

    let result = async {
        request.validate()?;
        let user = current_user(&state, &caller.user_id)?;
        let secret = match (&user.two_factor_secret, user.two_factor_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(ApiError::bad_request("Two-factor authentication is not enabled")),
        };
        if !state.hasher.verify(&request.password, &user.password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }
        let step = accept_code(&user, &secret, &request.code)?;

        let user = UserRepository::new(&state.db)
            .accept_totp_step(&user.id, step, |user| {
                if user.two_factor_secret.as_deref() != Some(secret.as_str()) {
                    return Err(DbError::Constraint(
                        "Two-factor secret changed by another request".to_string(),
                    ));
                }
                user.two_factor_enabled = false;
                user.two_factor_secret = None;
                user.two_factor_pending_secret = None;
                Ok(())
            })?
            .ok_or(AuthError::InvalidTwoFactorCode)?;
        UserResponse::load(&state, &user)
    }
    .await;

    record_outcome(&state, log, &result);
    result.map(Json)
}

// ============================================================================
// Tests
// ============================================================================
