// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role management. All endpoints require `roles:manage`.
//!
//! System roles can have their description and permissions edited but can
//! be neither renamed nor deleted.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::{client_ip, require_permission};
use crate::{
    auth::{Auth, AuthenticatedUser, Permission},
    error::ApiError,
    state::AppState,
    storage::{AuditAction, AuditRepository, OperationLog, RoleRepository, StoredRole},
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    /// Lowercase letters, digits, `_` and `-`.
    #[validate(length(min = 2, max = 50, message = "Role name must be 2-50 characters"))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 255, message = "Description is limited to 255 characters"))]
    pub description: String,
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 2, max = 50, message = "Role name must be 2-50 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 255, message = "Description is limited to 255 characters"))]
    pub description: Option<String>,
    /// Replaces the whole permission set.
    pub permissions: Option<BTreeSet<Permission>>,
}

fn check_name(name: &str) -> Result<(), ApiError> {
    let valid = name
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::validation_field(
            "name",
            "Only letters, digits, '_' and '-' are allowed",
        ))
    }
}

fn audit(state: &AppState, caller: &AuthenticatedUser, action: AuditAction, role: &StoredRole, headers: &HeaderMap) {
    AuditRepository::new(&state.db).record(
        OperationLog::new(action)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_resource("role", &role.id)
            .with_ip(client_ip(headers))
            .with_details(serde_json::json!({
                "name": role.name,
                "permissions": role.permissions,
            })),
    );
}

#[utoipa::path(
    get,
    path = "/v1/roles",
    tag = "Roles",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All roles by name", body = Vec<StoredRole>),
        (status = 403, description = "Missing roles:manage", body = crate::error::ErrorBody)
    )
)]
pub async fn list_roles(
    Auth(caller): Auth,
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredRole>>, ApiError> {
    require_permission(&state, &caller, Permission::RolesManage)?;
    Ok(Json(RoleRepository::new(&state.db).list()?))
}

#[utoipa::path(
    get,
    path = "/v1/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = String, Path, description = "Role ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Role", body = StoredRole),
        (status = 404, description = "Unknown role", body = crate::error::ErrorBody)
    )
)]
pub async fn get_role(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(role_id): Path<String>,
) -> Result<Json<StoredRole>, ApiError> {
    require_permission(&state, &caller, Permission::RolesManage)?;
    Ok(Json(RoleRepository::new(&state.db).get(&role_id)?))
}

#[utoipa::path(
    post,
    path = "/v1/roles",
    tag = "Roles",
    request_body = CreateRoleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Role created", body = StoredRole),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 409, description = "Name already taken", body = crate::error::ErrorBody)
    )
)]
pub async fn create_role(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<StoredRole>), ApiError> {
    require_permission(&state, &caller, Permission::RolesManage)?;
    request.validate()?;
    check_name(&request.name)?;

    let role = StoredRole::new(&request.name, request.description.trim(), request.permissions);
    RoleRepository::new(&state.db).create(&role)?;
    audit(&state, &caller, AuditAction::RoleCreate, &role, &headers);

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    patch,
    path = "/v1/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = String, Path, description = "Role ID")),
    request_body = UpdateRoleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Role updated", body = StoredRole),
        (status = 409, description = "Name already taken", body = crate::error::ErrorBody),
        (status = 422, description = "System roles cannot be renamed", body = crate::error::ErrorBody)
    )
)]
pub async fn update_role(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(role_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<StoredRole>, ApiError> {
    require_permission(&state, &caller, Permission::RolesManage)?;
    request.validate()?;

    let repo = RoleRepository::new(&state.db);
    let mut role = repo.get(&role_id)?;
    if let Some(name) = request.name {
        check_name(&name)?;
        role.name = name;
    }
    if let Some(description) = request.description {
        role.description = description.trim().to_string();
    }
    if let Some(permissions) = request.permissions {
        role.permissions = permissions;
    }

    let role = repo.update(&role)?;
    audit(&state, &caller, AuditAction::RoleUpdate, &role, &headers);
    Ok(Json(role))
}

#[utoipa::path(
    delete,
    path = "/v1/roles/{role_id}",
    tag = "Roles",
    params(("role_id" = String, Path, description = "Role ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Unknown role", body = crate::error::ErrorBody),
        (status = 422, description = "System role or still assigned", body = crate::error::ErrorBody)
    )
)]
pub async fn delete_role(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(role_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_permission(&state, &caller, Permission::RolesManage)?;

    let repo = RoleRepository::new(&state.db);
    let role = repo.get(&role_id)?;
    repo.delete(&role_id)?;
    audit(&state, &caller, AuditAction::RoleDelete, &role, &headers);
    Ok(StatusCode::NO_CONTENT)
}
