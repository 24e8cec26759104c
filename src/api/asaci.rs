// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Direct ASACI access.
//!
//! These endpoints forward to the platform without touching local
//! certificate requests. Reads need `asaci:read`; creating productions and
//! changing a certificate's status need `certificates:manage`.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use validator::Validate;

use super::{client_ip, require_permission};
use crate::{
    asaci::{
        AsaciCertificate, CertificateList, CertificateQuery, CertificateTypeInfo, EditionRequest,
        ProductionResponse, StatusChangeRequest,
    },
    auth::{Auth, AuthenticatedUser, Permission},
    error::ApiError,
    state::AppState,
    storage::{AuditAction, AuditRepository, OperationLog},
};

fn audit(
    state: &AppState,
    caller: &AuthenticatedUser,
    headers: &HeaderMap,
    log: OperationLog,
    result: &Result<impl Sized, ApiError>,
) {
    let log = log
        .with_user(&caller.user_id)
        .with_email(&caller.email)
        .with_ip(client_ip(headers));
    let log = match result {
        Ok(_) => log,
        Err(e) => log.failed(&e.message),
    };
    AuditRepository::new(&state.db).record(log);
}

/// Keep only characters that are safe in a header parameter.
fn file_stem(reference: &str) -> String {
    reference
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

#[utoipa::path(
    post,
    path = "/v1/asaci/productions",
    tag = "ASACI",
    request_body = EditionRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Production submitted", body = ProductionResponse),
        (status = 502, description = "ASACI rejected the request", body = crate::error::ErrorBody),
        (status = 503, description = "ASACI unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn create_production(
    Auth(caller): Auth,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EditionRequest>,
) -> Result<(StatusCode, Json<ProductionResponse>), ApiError> {
    require_permission(&state, &caller, Permission::CertificatesManage)?;
    if request.policy_number.trim().is_empty() {
        return Err(ApiError::validation_field("policy_number", "Policy number is required"));
    }

    let result = state.asaci.create_production(&request).await.map_err(ApiError::from);
    let mut log = OperationLog::new(AuditAction::AsaciProductionCreate)
        .with_details(serde_json::json!({
            "policy_number": request.policy_number,
            "certificate_type": request.certificate_type,
        }));
    if let Ok(production) = &result {
        log = log.with_resource("asaci_production", &production.reference);
    }
    audit(&state, &caller, &headers, log, &result);

    result.map(|production| (StatusCode::CREATED, Json(production)))
}

#[utoipa::path(
    get,
    path = "/v1/asaci/productions/{reference}",
    tag = "ASACI",
    params(("reference" = String, Path, description = "Production reference")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Production", body = ProductionResponse),
        (status = 404, description = "Unknown production", body = crate::error::ErrorBody)
    )
)]
pub async fn get_production(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ProductionResponse>, ApiError> {
    require_permission(&state, &caller, Permission::AsaciRead)?;
    Ok(Json(state.asaci.get_production(&reference).await?))
}

#[utoipa::path(
    get,
    path = "/v1/asaci/certificates",
    tag = "ASACI",
    params(CertificateQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificates", body = CertificateList)
    )
)]
pub async fn list_certificates(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Query(query): Query<CertificateQuery>,
) -> Result<Json<CertificateList>, ApiError> {
    require_permission(&state, &caller, Permission::AsaciRead)?;
    if query.per_page.is_some_and(|n| n == 0 || n > 100) {
        return Err(ApiError::validation_field("per_page", "per_page must be between 1 and 100"));
    }
    Ok(Json(state.asaci.list_certificates(&query).await?))
}

#[utoipa::path(
    get,
    path = "/v1/asaci/certificates/{reference}",
    tag = "ASACI",
    params(("reference" = String, Path, description = "Certificate reference")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate", body = AsaciCertificate),
        (status = 404, description = "Unknown certificate", body = crate::error::ErrorBody)
    )
)]
pub async fn get_certificate(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<AsaciCertificate>, ApiError> {
    require_permission(&state, &caller, Permission::AsaciRead)?;
    Ok(Json(state.asaci.get_certificate(&reference).await?))
}

/// PDF passthrough.
#[utoipa::path(
    get,
    path = "/v1/asaci/certificates/{reference}/download",
    tag = "ASACI",
    params(("reference" = String, Path, description = "Certificate reference")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate PDF", content_type = "application/pdf", body = Vec<u8>),
        (status = 404, description = "Unknown certificate", body = crate::error::ErrorBody)
    )
)]
pub async fn download_certificate(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_permission(&state, &caller, Permission::AsaciRead)?;
    let pdf = state.asaci.download_certificate(&reference).await?;
    let disposition = format!("attachment; filename=\"{}.pdf\"", file_stem(&reference));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        pdf,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/asaci/certificates/{reference}/cancel",
    tag = "ASACI",
    params(("reference" = String, Path, description = "Certificate reference")),
    request_body = StatusChangeRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate cancelled", body = AsaciCertificate),
        (status = 400, description = "Reason missing", body = crate::error::ErrorBody)
    )
)]
pub async fn cancel_certificate(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Json<AsaciCertificate>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesManage)?;
    request.validate()?;

    let result = state
        .asaci
        .cancel_certificate(&reference, request.reason.trim())
        .await
        .map_err(ApiError::from);
    let log = OperationLog::new(AuditAction::AsaciCertificateCancel)
        .with_resource("asaci_certificate", &reference)
        .with_details(serde_json::json!({ "reason": request.reason.trim() }));
    audit(&state, &caller, &headers, log, &result);

    result.map(Json)
}

#[utoipa::path(
    post,
    path = "/v1/asaci/certificates/{reference}/suspend",
    tag = "ASACI",
    params(("reference" = String, Path, description = "Certificate reference")),
    request_body = StatusChangeRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate suspended", body = AsaciCertificate),
        (status = 400, description = "Reason missing", body = crate::error::ErrorBody)
    )
)]
pub async fn suspend_certificate(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(reference): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusChangeRequest>,
) -> Result<Json<AsaciCertificate>, ApiError> {
    require_permission(&state, &caller, Permission::CertificatesManage)?;
    request.validate()?;

    let result = state
        .asaci
        .suspend_certificate(&reference, request.reason.trim())
        .await
        .map_err(ApiError::from);
    let log = OperationLog::new(AuditAction::AsaciCertificateSuspend)
        .with_resource("asaci_certificate", &reference)
        .with_details(serde_json::json!({ "reason": request.reason.trim() }));
    audit(&state, &caller, &headers, log, &result);

    result.map(Json)
}

#[utoipa::path(
    get,
    path = "/v1/asaci/certificates/types",
    tag = "ASACI",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate types", body = Vec<CertificateTypeInfo>)
    )
)]
pub async fn certificate_types(
    Auth(caller): Auth,
    State(state): State<AppState>,
) -> Result<Json<Vec<CertificateTypeInfo>>, ApiError> {
    require_permission(&state, &caller, Permission::AsaciRead)?;
    Ok(Json(state.asaci.certificate_types().await?))
}
