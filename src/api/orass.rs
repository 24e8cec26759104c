// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only access to ORASS policies.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use validator::Validate;

use super::require_permission;
use crate::{
    auth::{Auth, Permission},
    error::ApiError,
    orass::{PolicyRecord, PolicySearch},
    state::AppState,
    storage::Page,
};

#[utoipa::path(
    get,
    path = "/v1/orass/policies",
    tag = "ORASS",
    params(PolicySearch),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Matching policies, newest first", body = Page<PolicyRecord>),
        (status = 400, description = "Invalid filters", body = crate::error::ErrorBody),
        (status = 503, description = "ORASS unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn search_policies(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(search): Query<PolicySearch>,
) -> Result<Json<Page<PolicyRecord>>, ApiError> {
    require_permission(&state, &user, Permission::OrassRead)?;
    search.validate()?;
    if let (Some(from), Some(to)) = (search.effective_from, search.effective_to) {
        if from > to {
            return Err(ApiError::validation_field(
                "effective_from",
                "effective_from must not be after effective_to",
            ));
        }
    }
    Ok(Json(state.orass.search_policies(&search).await?))
}

#[utoipa::path(
    get,
    path = "/v1/orass/policies/{policy_number}",
    tag = "ORASS",
    params(("policy_number" = String, Path, description = "Policy number")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Policy", body = PolicyRecord),
        (status = 404, description = "Unknown policy", body = crate::error::ErrorBody),
        (status = 503, description = "ORASS unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn get_policy(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(policy_number): Path<String>,
) -> Result<Json<PolicyRecord>, ApiError> {
    require_permission(&state, &user, Permission::OrassRead)?;
    Ok(Json(state.orass.find_policy(&policy_number).await?))
}
