// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certify-Link endpoints: certificate requests driven from an ORASS policy
//! to an issued ASACI attestation.
//!
//! A request whose pipeline fails is still returned with `201`; its status is
//! `FAILED` and `last_error` says why and whether it will be retried.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{client_ip, require_permission};
use crate::{
    asaci::CertificateType,
    auth::{Auth, AuthenticatedUser, Permission},
    certify::{BatchItemResult, CertificateStats, CertificateStatus},
    error::ApiError,
    state::AppState,
    storage::{
        repository::CertificateRequest, AuditAction, AuditRepository, CertificateAuditLog,
        CertificateRequestFilter, CertificateRequestRepository, OperationLog, Page, PageRequest,
    },
};

/// Window used by `/stats` when no range is given.
const DEFAULT_STATS_DAYS: i64 = 30;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCertificateRequest {
    #[validate(length(min = 1, max = 50, message = "Policy number must be 1-50 characters"))]
    pub policy_number: String,
    pub certificate_type: CertificateType,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BatchCertificateRequest {
    /// Processed in order, one at a time.
    #[validate(length(min = 1, max = 100, message = "A batch holds 1 to 100 policies"))]
    pub policy_numbers: Vec<String>,
    pub certificate_type: CertificateType,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchResponse {
    pub results: Vec<BatchItemResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// A request together with its status history, oldest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct CertificateRequestDetail {
    pub request: CertificateRequest,
    pub history: Vec<CertificateAuditLog>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RequestListParams {
    pub status: Option<CertificateStatus>,
    pub policy_number: Option<String>,
    /// User ID of the requester.
    pub requested_by: Option<String>,
    /// Created at or after (RFC 3339).
    pub from: Option<DateTime<Utc>>,
    /// Created at or before (RFC 3339).
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatsParams {
    /// Defaults to 30 days before `to`.
    pub from: Option<DateTime<Utc>>,
    /// Defaults to now.
    pub to: Option<DateTime<Utc>>,
}

// ============================================================================
// Helpers
// ============================================================================

fn check_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<(), ApiError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => {
            Err(ApiError::validation_field("from", "from must not be after to"))
        }
        _ => Ok(()),
    }
}

fn operation(
    action: AuditAction,
    caller: &AuthenticatedUser,
    headers: &HeaderMap,
    result: &Result<CertificateRequest, ApiError>,
) -> OperationLog {
    let log = OperationLog::new(action)
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(headers));
    match result {
        Ok(request) => log
            .with_resource("certificate_request", &request.id)
            .with_details(serde_json::json!({
                "policy_number": request.policy_number,
                "certificate_type": request.certificate_type,
                "status": request.status,
            })),
        Err(e) => log.failed(&e.message),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a certificate for one policy.
#[utoipa::path(
    post,
    path = "/v1/certify-link/certificates",
    tag = "Certify-Link",
    request_body = CreateCertificateRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Request processed; see status", body = CertificateRequest),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody),
        (status = 409, description = "A request already exists for this policy and type", body = crate::error::ErrorBody)
    )
)]
pub async fn create_request(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateCertificateRequest>,
) -> Result<(StatusCode, Json<CertificateRequest>), ApiError> {
    require_permission(&state, &caller, Permission::CertificatesCreate)?;
    body.validate()?;

    let result = state
        .certify
        .certify(&caller.user_id, &body.policy_number, body.certificate_type)
        .await;
    let log = operation(AuditAction::CertificateRequest, &caller, &headers, &result);
    AuditRepository::new(&state.db).record(log);

    result.map(|request| (StatusCode::CREATED, Json(request)))
}

#[utoipa::path(
    post,
    path = "/v1/certify-link/certificates/batch",
    tag = "Certify-Link",
    request_body = BatchCertificateRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Per-policy results", body = BatchResponse),
        (status = 400, description = "Validation failed", body = crate::error::ErrorBody)
    )
)]
pub async fn create_batch(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BatchCertificateRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesCreate)?;
    body.validate()?;

    let results = state
        .certify
        .certify_batch(&caller.user_id, &body.policy_numbers, body.certificate_type)
        .await;
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - succeeded;

    AuditRepository::new(&state.db).record(
        OperationLog::new(AuditAction::CertificateBatch)
            .with_user(&caller.user_id)
            .with_email(&caller.email)
            .with_ip(client_ip(&headers))
            .with_details(serde_json::json!({
                "certificate_type": body.certificate_type,
                "policies": results.len(),
                "succeeded": succeeded,
                "failed": failed,
            })),
    );

    Ok(Json(BatchResponse {
        results,
        succeeded,
        failed,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/certify-link/certificates",
    tag = "Certify-Link",
    params(RequestListParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Requests, newest first", body = Page<CertificateRequest>)
    )
)]
pub async fn list_requests(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Query(params): Query<RequestListParams>,
) -> Result<Json<Page<CertificateRequest>>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesRead)?;
    check_range(params.from, params.to)?;

    let filter = CertificateRequestFilter {
        status: params.status,
        policy_number: params.policy_number,
        requested_by: params.requested_by,
        from: params.from,
        to: params.to,
    };
    let page = CertificateRequestRepository::new(&state.db)
        .list(&filter, PageRequest::new(params.page, params.per_page))?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/v1/certify-link/certificates/{request_id}",
    tag = "Certify-Link",
    params(("request_id" = String, Path, description = "Certificate request ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Request with its audit trail", body = CertificateRequestDetail),
        (status = 404, description = "Unknown request", body = crate::error::ErrorBody)
    )
)]
pub async fn get_request(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<CertificateRequestDetail>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesRead)?;
    let request = CertificateRequestRepository::new(&state.db).get(&request_id)?;
    let history = AuditRepository::new(&state.db).certificate_history(&request_id)?;
    Ok(Json(CertificateRequestDetail { request, history }))
}

/// Restart a FAILED request. Ignores whether the error was marked
/// retryable; the attempt limit still applies.
#[utoipa::path(
    post,
    path = "/v1/certify-link/certificates/{request_id}/retry",
    tag = "Certify-Link",
    params(("request_id" = String, Path, description = "Certificate request ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pipeline re-run; see status", body = CertificateRequest),
        (status = 409, description = "Request is not FAILED", body = crate::error::ErrorBody),
        (status = 422, description = "Retry limit reached", body = crate::error::ErrorBody)
    )
)]
pub async fn retry_request(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CertificateRequest>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesManage)?;

    let result = state.certify.retry(&request_id, &caller.user_id).await;
    let mut log = operation(AuditAction::CertificateRetry, &caller, &headers, &result);
    if result.is_err() {
        log = log.with_resource("certificate_request", &request_id);
    }
    AuditRepository::new(&state.db).record(log);

    result.map(Json)
}

/// Poll ASACI for a request that is still processing.
#[utoipa::path(
    post,
    path = "/v1/certify-link/certificates/{request_id}/refresh",
    tag = "Certify-Link",
    params(("request_id" = String, Path, description = "Certificate request ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Request after polling", body = CertificateRequest),
        (status = 409, description = "Request is not ASACI_PROCESSING", body = crate::error::ErrorBody)
    )
)]
pub async fn refresh_request(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CertificateRequest>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesManage)?;

    let result = state.certify.refresh(&request_id, &caller.user_id).await;
    let mut log = operation(AuditAction::CertificateRefresh, &caller, &headers, &result);
    if result.is_err() {
        log = log.with_resource("certificate_request", &request_id);
    }
    AuditRepository::new(&state.db).record(log);

    result.map(Json)
}

/// FAILED requests the background poller will retry next.
#[utoipa::path(
    get,
    path = "/v1/certify-link/certificates/retryable",
    tag = "Certify-Link",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Retryable requests, oldest first", body = Vec<CertificateRequest>)
    )
)]
pub async fn list_retryable(
    Auth(caller): Auth,
    State(state): State<AppState>,
) -> Result<Json<Vec<CertificateRequest>>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesRead)?;
    Ok(Json(state.certify.retryable()?))
}

#[utoipa::path(
    get,
    path = "/v1/certify-link/stats",
    tag = "Certify-Link",
    params(StatsParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Counts by status, success rate and daily counts", body = CertificateStats)
    )
)]
pub async fn stats(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<CertificateStats>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesRead)?;
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params
        .from
        .unwrap_or_else(|| to - Duration::days(DEFAULT_STATS_DAYS));
    check_range(Some(from), Some(to))?;
    Ok(Json(state.certify.stats(from, to)?))
}
