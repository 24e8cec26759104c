// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail queries. Everything here requires `audit:read`.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use super::require_permission;
use crate::{
    auth::{Auth, Permission},
    certify::CertificateStatus,
    error::ApiError,
    state::AppState,
    storage::{
        AuditAction, AuditRepository, CertificateAuditLog, CertificateLogFilter, OperationFilter,
        OperationLog, OperationStats, Page, PageRequest,
    },
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OperationQuery {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    /// `user`, `role`, `certificate_request`, ...
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatsQuery {
    /// Defaults to 7 days before `to`.
    pub from: Option<DateTime<Utc>>,
    /// Defaults to now.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CertificateLogQuery {
    pub request_id: Option<String>,
    /// Status moved to.
    pub status: Option<CertificateStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

fn check_range(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Result<(), ApiError> {
    if from.zip(to).is_some_and(|(from, to)| from > to) {
        return Err(ApiError::validation_field("from", "from must not be after to"));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/v1/audit/operations",
    tag = "Audit",
    params(OperationQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Operation logs, newest first", body = Page<OperationLog>),
        (status = 403, description = "Missing audit:read", body = crate::error::ErrorBody)
    )
)]
pub async fn list_operations(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<OperationQuery>,
) -> Result<Json<Page<OperationLog>>, ApiError> {
    require_permission(&state, &user, Permission::AuditRead)?;
    check_range(query.from, query.to)?;

    let filter = OperationFilter {
        user_id: query.user_id,
        action: query.action,
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        success: query.success,
        from: query.from,
        to: query.to,
    };
    let page = AuditRepository::new(&state.db)
        .query_operations(&filter, PageRequest::new(query.page, query.per_page))?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/v1/audit/operations/stats",
    tag = "Audit",
    params(StatsQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Aggregated operations", body = OperationStats)
    )
)]
pub async fn operation_stats(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<OperationStats>, ApiError> {
    require_permission(&state, &user, Permission::AuditRead)?;
    let to = query.to.unwrap_or_else(Utc::now);
    let from = query.from.unwrap_or_else(|| to - Duration::days(7));
    check_range(Some(from), Some(to))?;
    Ok(Json(AuditRepository::new(&state.db).operation_stats(from, to)?))
}

#[utoipa::path(
    get,
    path = "/v1/audit/certificates",
    tag = "Audit",
    params(CertificateLogQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Certificate status changes, newest first", body = Page<CertificateAuditLog>)
    )
)]
pub async fn list_certificate_logs(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<CertificateLogQuery>,
) -> Result<Json<Page<CertificateAuditLog>>, ApiError> {
    require_permission(&state, &user, Permission::AuditRead)?;
    check_range(query.from, query.to)?;

    let filter = CertificateLogFilter {
        request_id: query.request_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let page = AuditRepository::new(&state.db)
        .query_certificate_logs(&filter, PageRequest::new(query.page, query.per_page))?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asaci::CertificateType;
    use crate::auth::AuthenticatedUser;
    use crate::error::ErrorCode;
    use crate::state::test_state;
    use crate::test_support::{bearer_for, seed_user};
    use axum::http::StatusCode;

    fn auth(state: &AppState, role: &str) -> AuthenticatedUser {
        let user = seed_user(&state.db, role, &format!("{role}@example.com"));
        state.tokens.verify_access(&bearer_for(state, &user)).unwrap()
    }

    fn seed_logs(state: &AppState, user: &AuthenticatedUser) {
        let repo = AuditRepository::new(&state.db);
        repo.record(OperationLog::new(AuditAction::Login).with_user(&user.user_id));
        repo.record(
            OperationLog::new(AuditAction::Login)
                .with_email("ghost@example.com")
                .failed("Invalid email or password"),
        );
        repo.record(
            OperationLog::new(AuditAction::UserCreate)
                .with_user(&user.user_id)
                .with_resource("user", "u-1"),
        );
    }

    #[tokio::test]
    async fn operations_filter_by_action_and_outcome() {
        let state = test_state();
        let supervisor = auth(&state, "supervisor");
        seed_logs(&state, &supervisor);

        let Json(logins) = list_operations(
            Auth(supervisor.clone()),
            State(state.clone()),
            Query(OperationQuery {
                action: Some(AuditAction::Login),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(logins.total, 2);

        let Json(failures) = list_operations(
            Auth(supervisor),
            State(state),
            Query(OperationQuery {
                success: Some(false),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(failures.total, 1);
        assert_eq!(failures.items[0].user_email.as_deref(), Some("ghost@example.com"));
    }

    #[tokio::test]
    async fn operators_cannot_read_audit() {
        let state = test_state();
        let operator = auth(&state, "operator");
        let err = list_operations(Auth(operator), State(state), Query(OperationQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stats_aggregate_recent_operations() {
        let state = test_state();
        let admin = auth(&state, "admin");
        seed_logs(&state, &admin);

        let Json(stats) = operation_stats(Auth(admin.clone()), State(state.clone()), Query(StatsQuery::default()))
            .await
            .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.by_action["login"], 2);
        assert_eq!(stats.top_users[0].user_id, admin.user_id);

        let now = Utc::now();
        let err = operation_stats(
            Auth(admin),
            State(state),
            Query(StatsQuery {
                from: Some(now),
                to: Some(now - Duration::hours(1)),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn certificate_logs_follow_requests() {
        let state = test_state();
        let admin = auth(&state, "admin");
        let request = state
            .certify
            .certify(&admin.user_id, "POL-1", CertificateType::Cima)
            .await
            .unwrap();

        let Json(completed) = list_certificate_logs(
            Auth(admin.clone()),
            State(state.clone()),
            Query(CertificateLogQuery {
                status: Some(CertificateStatus::Completed),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(completed.total, 1);
        assert_eq!(completed.items[0].request_id, request.id);

        let Json(trail) = list_certificate_logs(
            Auth(admin),
            State(state),
            Query(CertificateLogQuery {
                request_id: Some(request.id),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(trail.total, 5);
    }
}
