// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::require_permission;
use crate::asaci::{AsaciError, CircuitState};
use crate::auth::{Auth, Permission};
use crate::certify::CertificateStatus;
use crate::error::ApiError;
use crate::orass::OrassError;
use crate::state::AppState;
use crate::storage::{CertificateRequestRepository, UserRepository};

/// Upper bound for a single dependency probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe result with one entry per dependency.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// `ok`, or `degraded` when a configured dependency is down.
    pub status: String,
    pub checks: HealthChecks,
}

/// Per-dependency status strings.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    pub service: String,
    /// Local store ("ok" or "error").
    pub database: String,
    /// ORASS gateway ("ok", "unavailable" or "not_configured").
    pub orass: String,
    /// ASACI circuit breaker ("closed", "open", "half_open" or "not_configured").
    pub asaci: String,
}

impl HealthChecks {
    fn healthy(&self) -> bool {
        self.database == "ok" && self.orass != "unavailable" && self.asaci != "open"
    }
}

/// Liveness body.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
    /// Users that are not deleted.
    pub users: u64,
    pub certificate_requests: BTreeMap<CertificateStatus, u64>,
}

fn check_database(state: &AppState) -> String {
    match state.db.health_check() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "error".to_string()
        }
    }
}

async fn check_orass(state: &AppState) -> String {
    match tokio::time::timeout(PROBE_TIMEOUT, state.orass.ping()).await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(OrassError::NotConfigured)) => "not_configured".to_string(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "ORASS health check failed");
            "unavailable".to_string()
        }
        Err(_) => {
            tracing::warn!("ORASS health check timed out");
            "unavailable".to_string()
        }
    }
}

async fn check_asaci(state: &AppState) -> String {
    match state.asaci.circuit_state().await {
        Some(CircuitState::Closed) => "closed",
        Some(CircuitState::Open) => "open",
        Some(CircuitState::HalfOpen) => "half_open",
        None => match state.asaci.ping().await {
            Err(AsaciError::NotConfigured) => "not_configured",
            Err(_) => "open",
            Ok(()) => "closed",
        },
    }
    .to_string()
}

async fn run_checks(state: &AppState) -> HealthChecks {
    let (orass, asaci) = tokio::join!(check_orass(state), check_asaci(state));
    HealthChecks {
        service: "ok".to_string(),
        database: check_database(state),
        orass,
        asaci,
    }
}

fn overall(checks: &HealthChecks) -> (StatusCode, &'static str) {
    if checks.healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    }
}

/// Check the store and both upstreams.
///
/// Returns 200 if all checks pass, 503 if any check fails. Backends that are
/// not configured do not count as failures.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let checks = run_checks(&state).await;
    let (status, label) = overall(&checks);
    (
        status,
        Json(ReadyResponse {
            status: label.to_string(),
            checks,
        }),
    )
}

/// 200 while the process can serve requests at all.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler. Same checks as `/health`.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[utoipa::path(
    get,
    path = "/health/detailed",
    tag = "Health",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Service is healthy", body = DetailedHealthResponse),
        (status = 503, description = "Service is degraded", body = DetailedHealthResponse),
        (status = 403, description = "Missing system:health", body = crate::error::ErrorBody)
    )
)]
pub async fn detailed(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<DetailedHealthResponse>), ApiError> {
    require_permission(&state, &user, Permission::SystemHealth)?;

    let checks = run_checks(&state).await;
    let (status, label) = overall(&checks);
    let response = DetailedHealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        users: UserRepository::new(&state.db).count()?,
        certificate_requests: CertificateRequestRepository::new(&state.db).count_by_status()?,
        checks,
    };
    Ok((status, Json(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asaci::{DisabledAsaci, ProductionStatus};
    use crate::config::AppConfig;
    use crate::orass::DisabledOrass;
    use crate::state::{test_state, test_state_with};
    use crate::test_support::{seed_user, FakeAsaci, FakeOrass};
    use std::sync::Arc;

    #[tokio::test]
    async fn healthy_backends_report_ok() {
        let (status, Json(body)) = health(State(test_state())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.checks.database, "ok");
        assert_eq!(body.checks.orass, "ok");
        assert_eq!(body.checks.asaci, "closed");
    }

    #[tokio::test]
    async fn unconfigured_backends_are_not_failures() {
        let state = test_state_with(AppConfig::for_tests(), Arc::new(DisabledOrass), Arc::new(DisabledAsaci));
        let (status, Json(body)) = readiness(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.checks.orass, "not_configured");
        assert_eq!(body.checks.asaci, "not_configured");
    }

    #[tokio::test]
    async fn open_circuit_degrades() {
        let asaci = FakeAsaci::new(ProductionStatus::Completed);
        asaci.set_circuit(Some(CircuitState::Open));
        let state = test_state_with(
            AppConfig::for_tests(),
            Arc::new(FakeOrass::with_policies(vec![])),
            Arc::new(asaci),
        );

        let (status, Json(body)) = health(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert_eq!(body.checks.asaci, "open");
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness().await.0.status, "ok");
    }

    #[tokio::test]
    async fn detailed_requires_system_health() {
        let state = test_state();
        let viewer = seed_user(&state.db, "viewer", "v@example.com");
        let token = crate::test_support::bearer_for(&state, &viewer);
        let user = state.tokens.verify_access(&token).unwrap();

        let err = detailed(Auth(user), State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn detailed_reports_counts() {
        let state = test_state();
        let admin = seed_user(&state.db, "admin", "a@example.com");
        seed_user(&state.db, "viewer", "v@example.com");
        let token = crate::test_support::bearer_for(&state, &admin);
        let user = state.tokens.verify_access(&token).unwrap();

        let (status, Json(body)) = detailed(Auth(user), State(state)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.users, 2);
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(body.certificate_requests[&CertificateStatus::AsaciPending], 0);
    }
}
