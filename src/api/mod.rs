// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP surface.
//!
//! Everything except health probes and the docs lives under `/v1`:
//!
//! ```text
//! /v1/auth/*          login, tokens, password and two-factor management
//! /v1/users, /v1/roles administration
//! /v1/orass/*         policy lookups
//! /v1/asaci/*         raw ASACI passthrough
//! /v1/certify-link/*  certificate request orchestration
//! /v1/audit/*         operation and certificate audit trails
//! /health/*           probes
//! /docs               Swagger UI (spec at /api-doc/openapi.json)
//! ```

use axum::{
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{require_auth, AuthenticatedUser, Permission},
    error::ApiError,
    state::AppState,
    storage::{AuditAction, AuditRepository, OperationLog},
};

pub mod asaci;
pub mod audit;
pub mod auth;
pub mod certify_link;
pub mod health;
pub mod orass;
pub mod roles;
pub mod users;

pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/2fa/verify", post(auth::verify_two_factor))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/change-password", post(auth::change_password))
        .route("/2fa/setup", post(auth::setup_two_factor))
        .route("/2fa/enable", post(auth::enable_two_factor))
        .route("/2fa/disable", post(auth::disable_two_factor));

    let asaci_routes = Router::new()
        .route("/productions", post(asaci::create_production))
        .route("/productions/{reference}", get(asaci::get_production))
        .route("/certificates", get(asaci::list_certificates))
        .route("/certificates/types", get(asaci::certificate_types))
        .route("/certificates/{reference}", get(asaci::get_certificate))
        .route(
            "/certificates/{reference}/download",
            get(asaci::download_certificate),
        )
        .route(
            "/certificates/{reference}/cancel",
            post(asaci::cancel_certificate),
        )
        .route(
            "/certificates/{reference}/suspend",
            post(asaci::suspend_certificate),
        );

    let certify_routes = Router::new()
        .route(
            "/certificates",
            get(certify_link::list_requests).post(certify_link::create_request),
        )
        .route("/certificates/batch", post(certify_link::create_batch))
        .route("/certificates/retryable", get(certify_link::list_retryable))
        .route("/certificates/{request_id}", get(certify_link::get_request))
        .route(
            "/certificates/{request_id}/retry",
            post(certify_link::retry_request),
        )
        .route(
            "/certificates/{request_id}/refresh",
            post(certify_link::refresh_request),
        )
        .route("/stats", get(certify_link::stats));

    let audit_routes = Router::new()
        .route("/operations", get(audit::list_operations))
        .route("/operations/stats", get(audit::operation_stats))
        .route("/certificates", get(audit::list_certificate_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{user_id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{user_id}/unlock", post(users::unlock_user))
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route(
            "/roles/{role_id}",
            get(roles::get_role)
                .patch(roles::update_role)
                .delete(roles::delete_role),
        )
        .route("/orass/policies", get(orass::search_policies))
        .route("/orass/policies/{policy_number}", get(orass::get_policy))
        .nest("/asaci", asaci_routes)
        .nest("/certify-link", certify_routes)
        .nest("/audit", audit_routes);

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .route("/health/detailed", get(health::detailed));

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Registers the `bearer_auth` scheme referenced by protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Certify-Link API",
        description = "Attestation issuance between ORASS policies and the ASACI platform"
    ),
    modifiers(&SecurityAddon),
    paths(
        health::health,
        health::readiness,
        health::liveness,
        health::detailed,
        auth::register,
        auth::login,
        auth::verify_two_factor,
        auth::refresh,
        auth::logout,
        auth::me,
        auth::change_password,
        auth::setup_two_factor,
        auth::enable_two_factor,
        auth::disable_two_factor,
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        users::unlock_user,
        roles::list_roles,
        roles::get_role,
        roles::create_role,
        roles::update_role,
        roles::delete_role,
        orass::search_policies,
        orass::get_policy,
        asaci::create_production,
        asaci::get_production,
        asaci::list_certificates,
        asaci::get_certificate,
        asaci::download_certificate,
        asaci::cancel_certificate,
        asaci::suspend_certificate,
        asaci::certificate_types,
        certify_link::create_request,
        certify_link::create_batch,
        certify_link::list_requests,
        certify_link::get_request,
        certify_link::retry_request,
        certify_link::refresh_request,
        certify_link::list_retryable,
        certify_link::stats,
        audit::list_operations,
        audit::operation_stats,
        audit::list_certificate_logs,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::auth::Permission,
            crate::storage::UserStatus,
            crate::storage::StoredRole,
            crate::storage::AuditAction,
            crate::storage::OperationLog,
            crate::storage::OperationStats,
            crate::storage::CertificateAuditLog,
            crate::storage::repository::CertificateRequest,
            crate::storage::repository::IssuedCertificate,
            crate::storage::repository::RequestError,
            crate::storage::repository::DailyCount,
            crate::certify::CertificateStatus,
            crate::certify::BatchItemResult,
            crate::certify::CertificateStats,
            crate::orass::PolicyRecord,
            crate::asaci::CertificateType,
            crate::asaci::EditionRequest,
            crate::asaci::ProductionResponse,
            crate::asaci::ProductionStatus,
            crate::asaci::AsaciCertificate,
            crate::asaci::CertificateList,
            crate::asaci::CertificateTypeInfo,
            crate::asaci::StatusChangeRequest,
            crate::asaci::CircuitState,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            health::DetailedHealthResponse,
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::TokenResponse,
            auth::TwoFactorChallenge,
            auth::TwoFactorVerifyRequest,
            auth::RefreshRequest,
            auth::LogoutRequest,
            auth::ChangePasswordRequest,
            auth::TwoFactorSetupResponse,
            auth::TwoFactorCodeRequest,
            auth::TwoFactorDisableRequest,
            users::UserResponse,
            users::CreateUserRequest,
            users::UpdateUserRequest,
            roles::CreateRoleRequest,
            roles::UpdateRoleRequest,
            certify_link::CreateCertificateRequest,
            certify_link::BatchCertificateRequest,
            certify_link::BatchResponse,
            certify_link::CertificateRequestDetail,
        )
    ),
    tags(
        (name = "Health", description = "Service health checks"),
        (name = "Auth", description = "Authentication, tokens and two-factor setup"),
        (name = "Users", description = "User administration"),
        (name = "Roles", description = "Roles and permissions"),
        (name = "ORASS", description = "Insurance policy lookups"),
        (name = "ASACI", description = "Direct access to the ASACI certificate platform"),
        (name = "Certify-Link", description = "Certificate issuance from ORASS policies"),
        (name = "Audit", description = "Operation and certificate audit trails")
    )
)]
pub struct ApiDoc;

/// Caller address as reported by the reverse proxy.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Check a permission, recording a `permission_denied` operation on refusal.
pub(crate) fn require_permission(
    state: &AppState,
    user: &AuthenticatedUser,
    permission: Permission,
) -> Result<(), ApiError> {
    user.require(permission).map_err(|e| {
        AuditRepository::new(&state.db).record(
            OperationLog::new(AuditAction::PermissionDenied)
                .with_user(&user.user_id)
                .with_email(&user.email)
                .with_details(serde_json::json!({ "required_permission": permission }))
                .failed(e.to_string()),
        );
        ApiError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use crate::storage::OperationFilter;
    use crate::storage::PageRequest;
    use crate::test_support::{bearer_for, seed_user};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn openapi_documents_bearer_scheme() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
        assert!(json["paths"]["/v1/certify-link/certificates"].is_object());
        assert!(json["paths"]["/health/ready"].is_object());
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.2"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn live_probe_is_public_and_carries_request_id() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::get("/health/live")
                    .header("x-request-id", "req-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()["x-request-id"], "req-123");
    }

    #[tokio::test]
    async fn protected_route_without_token_is_unauthorized() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::get("/v1/certify-link/certificates")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], 1100);
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden_and_audited() {
        let state = test_state();
        let viewer = seed_user(&state.db, "viewer", "viewer@example.com");
        let token = bearer_for(&state, &viewer);

        let response = router(state.clone())
            .oneshot(
                Request::get("/v1/audit/operations")
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let denied = AuditRepository::new(&state.db)
            .query_operations(
                &OperationFilter {
                    action: Some(AuditAction::PermissionDenied),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(denied.total, 1);
        assert_eq!(denied.items[0].user_id.as_deref(), Some(viewer.id.as_str()));
    }

    #[tokio::test]
    async fn operator_can_request_a_certificate_end_to_end() {
        let state = test_state();
        let operator = seed_user(&state.db, "operator", "op@example.com");
        let token = bearer_for(&state, &operator);

        let response = router(state)
            .oneshot(
                Request::post("/v1/certify-link/certificates")
                    .header("Authorization", format!("Bearer {token}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"policy_number":"POL-1","certificate_type":"cima"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["certificates"][0]["reference"], "CERT-PRD-POL-1");
    }
}
