// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User administration.
//!
//! Reading requires `users:read`; every change requires `users:write`.
//! Deleting is a soft delete and the address stays reserved.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{client_ip, require_permission};
use crate::{
    auth::{password::ensure_strength, Auth, Permission},
    error::ApiError,
    state::AppState,
    storage::{
        AuditAction, AuditRepository, OperationLog, Page, PageRequest, PasswordHistoryRepository,
        RoleRepository, StoredRole, StoredUser, UserFilter, UserRepository, UserStatus,
    },
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Public view of a user account.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    /// User unique identifier.
    pub id: String,
    /// Normalized email address.
    pub email: String,
    /// Display name.
    pub full_name: String,
    /// Role name.
    pub role: String,
    /// Permissions granted by the role.
    pub permissions: Vec<Permission>,
    /// Account status.
    pub status: UserStatus,
    /// Whether TOTP is required at login.
    pub two_factor_enabled: bool,
    /// Consecutive failed logins.
    pub failed_login_attempts: u32,
    /// Set while the account is locked out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserResponse {
    pub fn new(user: &StoredUser, role: &StoredRole) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: role.name.clone(),
            permissions: role.permissions.iter().copied().collect(),
            status: user.status,
            two_factor_enabled: user.two_factor_enabled,
            failed_login_attempts: user.failed_login_attempts,
            locked_until: user.locked_until,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }

    /// Resolve the role and build the response.
    pub(crate) fn load(state: &AppState, user: &StoredUser) -> Result<Self, ApiError> {
        let role = RoleRepository::new(&state.db).get(&user.role_id)?;
        Ok(Self::new(user, &role))
    }
}

/// Query parameters for listing users.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListParams {
    /// Role name.
    pub role: Option<String>,
    pub status: Option<UserStatus>,
    /// Case-insensitive match on email or name.
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Request to create a user with an explicit role.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 2, max = 100, message = "Name must be 2-100 characters"))]
    pub full_name: String,
    pub password: String,
    /// Role name (`admin`, `operator`, ...).
    pub role: String,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be 2-100 characters"))]
    pub full_name: Option<String>,
    /// Role name.
    pub role: Option<String>,
    pub status: Option<UserStatus>,
}

fn role_by_name(state: &AppState, name: &str) -> Result<StoredRole, ApiError> {
    RoleRepository::new(&state.db)
        .get_by_name(name)?
        .ok_or_else(|| ApiError::validation_field("role", format!("Unknown role '{name}'")))
}

fn live_user(state: &AppState, user_id: &str) -> Result<StoredUser, ApiError> {
    let user = UserRepository::new(&state.db).get(user_id)?;
    if user.is_deleted() {
        return Err(ApiError::not_found(format!("User {user_id} not found")));
    }
    Ok(user)
}

// ============================================================================
// Handlers
// ============================================================================

#[utoipa::path(
    get,
    path = "/v1/users",
    tag = "Users",
    params(UserListParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Users matching the filters", body = Page<UserResponse>),
        (status = 403, description = "Missing users:read", body = crate::error::ErrorBody)
    )
)]
pub async fn list_users(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Query(params): Query<UserListParams>,
) -> Result<Json<Page<UserResponse>>, ApiError> {
    require_permission(&state, &caller, Permission::UsersRead)?;

    let role_id = match params.role.as_deref() {
        Some(name) => Some(role_by_name(&state, name)?.id),
        None => None,
    };
    let filter = UserFilter {
        role_id,
        status: params.status,
        search: params.search.filter(|s| !s.trim().is_empty()),
        include_deleted: false,
    };

    let roles: HashMap<String, StoredRole> = RoleRepository::new(&state.db)
        .list()?
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();
    let page = UserRepository::new(&state.db)
        .list(&filter, PageRequest::new(params.page, params.per_page))?;

    let items = page
        .items
        .iter()
        .map(|user| {
            roles
                .get(&user.role_id)
                .map(|role| UserResponse::new(user, role))
                .ok_or_else(|| ApiError::internal(format!("User {} has no role", user.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(Page {
        items,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/users/{user_id}",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "Unknown or deleted user", body = crate::error::ErrorBody)
    )
)]
pub async fn get_user(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    require_permission(&state, &caller, Permission::UsersRead)?;
    let user = live_user(&state, &user_id)?;
    Ok(Json(UserResponse::load(&state, &user)?))
}

#[utoipa::path(
    post,
    path = "/v1/users",
    tag = "Users",
    request_body = CreateUserRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody)
    )
)]
pub async fn create_user(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    require_permission(&state, &caller, Permission::UsersWrite)?;
    request.validate()?;
    ensure_strength(&request.password)?;
    let role = role_by_name(&state, &request.role)?;

    let hash = state.hasher.hash(&request.password).await?;
    let user = StoredUser::new(&request.email, request.full_name.trim(), hash, role.id.clone());
    UserRepository::new(&state.db).create(&user)?;
    PasswordHistoryRepository::new(&state.db).record(&user.id, &user.password_hash)?;

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::UserCreate)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_resource("user", &user.id)
            .with_ip(client_ip(&headers))
            .with_details(serde_json::json!({ "email": user.email, "role": role.name })),
    );

    Ok((StatusCode::CREATED, Json(UserResponse::new(&user, &role))))
}

#[utoipa::path(
    patch,
    path = "/v1/users/{user_id}",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 404, description = "Unknown or deleted user", body = crate::error::ErrorBody)
    )
)]
pub async fn update_user(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    require_permission(&state, &caller, Permission::UsersWrite)?;
    request.validate()?;

    let mut user = live_user(&state, &user_id)?;
    if let Some(full_name) = &request.full_name {
        user.full_name = full_name.trim().to_string();
    }
    if let Some(role) = &request.role {
        user.role_id = role_by_name(&state, role)?.id;
    }
    if let Some(status) = request.status {
        if status == UserStatus::Disabled && user.id == caller.user_id {
            return Err(ApiError::unprocessable("You cannot disable your own account"));
        }
        user.status = status;
    }

    let user = UserRepository::new(&state.db).update(&user)?;
    let response = UserResponse::load(&state, &user)?;

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::UserUpdate)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_resource("user", &user.id)
            .with_ip(client_ip(&headers))
            .with_details(serde_json::json!({
                "full_name": request.full_name,
                "role": request.role,
                "status": request.status,
            })),
    );

    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/v1/users/{user_id}",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "User deleted"),
        (status = 404, description = "Unknown or deleted user", body = crate::error::ErrorBody),
        (status = 422, description = "Cannot delete yourself", body = crate::error::ErrorBody)
    )
)]
pub async fn delete_user(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, &caller, Permission::UsersWrite)?;
    if user_id == caller.user_id {
        return Err(ApiError::unprocessable("You cannot delete your own account"));
    }

    let user = UserRepository::new(&state.db).soft_delete(&user_id)?;

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::UserDelete)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_resource("user", &user.id)
            .with_ip(client_ip(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Clear a login lockout.
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/unlock",
    tag = "Users",
    params(("user_id" = String, Path, description = "User ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User unlocked", body = UserResponse),
        (status = 404, description = "Unknown or deleted user", body = crate::error::ErrorBody)
    )
)]
pub async fn unlock_user(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, ApiError> {
    require_permission(&state, &caller, Permission::UsersWrite)?;
    live_user(&state, &user_id)?;
    let user = UserRepository::new(&state.db).unlock(&user_id)?;

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::UserUnlock)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_resource("user", &user.id)
            .with_ip(client_ip(&headers)),
    );

    Ok(Json(UserResponse::load(&state, &user)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::state::test_state;
    use crate::test_support::seed_user;

    fn caller(state: &AppState, user: &StoredUser) -> Auth {
        let token = crate::test_support::bearer_for(state, user);
        Auth(state.tokens.verify_access(&token).unwrap())
    }

    fn admin(state: &AppState) -> (StoredUser, Auth) {
        let user = seed_user(&state.db, "admin", "admin@example.com");
        let auth = caller(state, &user);
        (user, auth)
    }

    fn create_request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            email: email.to_string(),
            full_name: "Awa Traoré".to_string(),
            password: "Str0ng!Pass".to_string(),
            role: "operator".to_string(),
        }
    }

    #[tokio::test]
    async fn create_user_assigns_role_and_records_history() {
        let state = test_state();
        let (_, auth) = admin(&state);

        let (status, Json(user)) = create_user(
            auth,
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("Awa@Example.com")),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user.email, "awa@example.com");
        assert_eq!(user.role, "operator");
        assert!(user.permissions.contains(&Permission::CertificatesCreate));
        assert_eq!(
            PasswordHistoryRepository::new(&state.db)
                .recent(&user.id, 5)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn create_user_rejects_duplicates_and_unknown_roles() {
        let state = test_state();
        let (_, auth) = admin(&state);
        let Auth(admin_user) = auth;

        create_user(
            Auth(admin_user.clone()),
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("dup@example.com")),
        )
        .await
        .unwrap();

        let err = create_user(
            Auth(admin_user.clone()),
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("DUP@example.com")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let mut request = create_request("new@example.com");
        request.role = "superuser".to_string();
        let err = create_user(Auth(admin_user), State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn create_user_enforces_password_policy() {
        let state = test_state();
        let (_, auth) = admin(&state);
        let mut request = create_request("weak@example.com");
        request.password = "password".to_string();

        let err = create_user(auth, State(state), HeaderMap::new(), Json(request))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert!(err.details.unwrap()["password"].is_array());
    }

    #[tokio::test]
    async fn supervisor_can_read_but_not_write() {
        let state = test_state();
        let supervisor = seed_user(&state.db, "supervisor", "sup@example.com");

        let Json(page) = list_users(
            caller(&state, &supervisor),
            State(state.clone()),
            Query(UserListParams::default()),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);

        let err = create_user(
            caller(&state, &supervisor),
            State(state),
            HeaderMap::new(),
            Json(create_request("x@example.com")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn list_filters_by_role_and_search() {
        let state = test_state();
        let (_, auth) = admin(&state);
        seed_user(&state.db, "operator", "op1@example.com");
        seed_user(&state.db, "operator", "op2@example.com");
        seed_user(&state.db, "viewer", "viewer@example.com");

        let Json(operators) = list_users(
            Auth(auth.0.clone()),
            State(state.clone()),
            Query(UserListParams {
                role: Some("operator".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(operators.total, 2);

        let Json(found) = list_users(
            auth,
            State(state),
            Query(UserListParams {
                search: Some("VIEWER".to_string()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.total, 1);
        assert_eq!(found.items[0].role, "viewer");
    }

    #[tokio::test]
    async fn update_changes_role_and_status() {
        let state = test_state();
        let (_, auth) = admin(&state);
        let target = seed_user(&state.db, "viewer", "target@example.com");

        let Json(updated) = update_user(
            auth,
            State(state),
            Path(target.id.clone()),
            HeaderMap::new(),
            Json(UpdateUserRequest {
                role: Some("supervisor".to_string()),
                status: Some(UserStatus::Disabled),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(updated.role, "supervisor");
        assert_eq!(updated.status, UserStatus::Disabled);
        assert_eq!(updated.full_name, "Test User");
    }

    #[tokio::test]
    async fn delete_is_soft_and_not_allowed_on_self() {
        let state = test_state();
        let (admin_user, auth) = admin(&state);
        let Auth(caller_user): Auth = auth;
        let target = seed_user(&state.db, "viewer", "gone@example.com");

        let err = delete_user(
            Auth(caller_user.clone()),
            State(state.clone()),
            Path(admin_user.id.clone()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);

        let status = delete_user(
            Auth(caller_user.clone()),
            State(state.clone()),
            Path(target.id.clone()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = get_user(Auth(caller_user), State(state.clone()), Path(target.id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(UserRepository::new(&state.db)
            .get_by_email("gone@example.com")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unlock_resets_lockout() {
        let state = test_state();
        let (_, auth) = admin(&state);
        let target = seed_user(&state.db, "viewer", "locked@example.com");
        let repo = UserRepository::new(&state.db);
        for _ in 0..3 {
            repo.record_failed_login(&target.id, 3, chrono::Duration::minutes(15))
                .unwrap();
        }
        assert!(repo.get(&target.id).unwrap().is_locked(Utc::now()));

        let Json(user) = unlock_user(auth, State(state.clone()), Path(target.id.clone()), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.locked_until.is_none());
    }

    #[test]
    fn user_response_hides_secrets() {
        let role = StoredRole::new("viewer", "", Default::default());
        let mut user = StoredUser::new("a@b.c", "A", "hash".to_string(), role.id.clone());
        user.two_factor_secret = Some("SECRET".to_string());
        let json = serde_json::to_string(&UserResponse::new(&user, &role)).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("SECRET"));
    }
}
