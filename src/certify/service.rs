// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Certification Pipeline
//!
//! Drives one [`CertificateRequest`] from the ORASS lookup to the issued
//! attestation:
//!
//! 1. `ORASS_FETCHING`: read the policy, snapshot it on the request.
//! 2. `ORASS_FETCHED`: map it to an [`EditionRequest`](crate::asaci::EditionRequest).
//! 3. `ASACI_PENDING`: submit the production.
//! 4. `ASACI_PROCESSING`: ASACI accepted it; completes now or on a later
//!    [`CertifyLinkService::refresh`].
//!
//! Any step can end in `FAILED`; the recorded [`RequestError`] says whether
//! the retry poller may pick it up again. Pipeline failures are stored on the
//! request and do not surface as errors to the caller. Only storage failures
//! and precondition violations do.
//!
//! The pipeline runs on its own task, so a caller that goes away mid-flight
//! does not strand the request. Requests left in flight anyway (crash,
//! shutdown) are failed by the retry poller once they go stale.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::CertificateStatus;
use crate::asaci::{
    map_policy_to_edition, AsaciApi, CertificateType, MappingContext, ProductionResponse,
    ProductionStatus,
};
use crate::config::{AppConfig, RetrySettings};
use crate::error::{ApiError, ErrorBody, ErrorCode};
use crate::orass::OrassSource;
use crate::storage::repository::{CertificateRequest, DailyCount, IssuedCertificate, RequestError};
use crate::storage::{CertificateRequestRepository, Database};

/// Actor recorded for transitions made by the background poller.
pub const SYSTEM_ACTOR: &str = "system";

/// Error code of a request failed because its pipeline stopped mid-flight.
pub const PIPELINE_INTERRUPTED: &str = "pipeline_interrupted";

/// Outcome of one policy in a batch.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchItemResult {
    pub policy_number: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<CertificateRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CertificateStats {
    pub total: u64,
    pub by_status: BTreeMap<CertificateStatus, u64>,
    /// Completed over finished (completed + failed), 0 when nothing finished.
    pub success_rate: f64,
    pub daily: Vec<DailyCount>,
}

#[derive(Clone)]
pub struct CertifyLinkService {
    db: Database,
    orass: Arc<dyn OrassSource>,
    asaci: Arc<dyn AsaciApi>,
    office_code: String,
    organization_code: String,
    retry: RetrySettings,
}

impl CertifyLinkService {
    pub fn new(
        config: &AppConfig,
        db: Database,
        orass: Arc<dyn OrassSource>,
        asaci: Arc<dyn AsaciApi>,
    ) -> Self {
        let (office_code, organization_code) = config
            .asaci
            .as_ref()
            .map(|a| (a.office_code.clone(), a.organization_code.clone()))
            .unwrap_or_default();
        Self {
            db,
            orass,
            asaci,
            office_code,
            organization_code,
            retry: config.retry,
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        self.retry
    }

    fn repo(&self) -> CertificateRequestRepository<'_> {
        CertificateRequestRepository::new(&self.db)
    }

    /// Create a request for `policy_number` and run the pipeline.
    ///
    /// A second request for the same policy and certificate type is a
    /// conflict; a failed one must be retried instead.
    pub async fn certify(
        &self,
        requested_by: &str,
        policy_number: &str,
        certificate_type: CertificateType,
    ) -> Result<CertificateRequest, ApiError> {
        if policy_number.trim().is_empty() {
            return Err(ApiError::validation_field(
                "policy_number",
                "Policy number is required",
            ));
        }

        if let Some(existing) = self.repo().find_by_key(policy_number, certificate_type)? {
            return Err(ApiError::conflict(format!(
                "A {} request already exists for policy {}",
                certificate_type, existing.policy_number
            ))
            .with_details(json!({
                "request_id": existing.id,
                "status": existing.status,
            })));
        }

        let request = CertificateRequest::new(policy_number, certificate_type, requested_by);
        self.repo().create(&request, requested_by)?;
        info!(
            request_id = %request.id,
            policy_number = %request.policy_number,
            certificate_type = %certificate_type,
            "Certificate request created"
        );

        self.spawn_pipeline(request, requested_by).await
    }

    /// Certify several policies one after the other.
    pub async fn certify_batch(
        &self,
        requested_by: &str,
        policy_numbers: &[String],
        certificate_type: CertificateType,
    ) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(policy_numbers.len());
        for policy_number in policy_numbers {
            let result = match self.certify(requested_by, policy_number, certificate_type).await {
                Ok(request) => BatchItemResult {
                    policy_number: request.policy_number.clone(),
                    success: request.status != CertificateStatus::Failed,
                    request: Some(request),
                    error: None,
                },
                Err(e) => BatchItemResult {
                    policy_number: policy_number.trim().to_string(),
                    success: false,
                    request: None,
                    error: Some(ErrorBody {
                        error: e.message,
                        error_code: e.code.name().to_string(),
                        code: e.code.as_u16(),
                        details: e.details,
                    }),
                },
            };
            results.push(result);
        }
        results
    }

    /// Restart the pipeline of a FAILED request.
    pub async fn retry(&self, id: &str, actor: &str) -> Result<CertificateRequest, ApiError> {
        let request = self.repo().get(id)?;
        if request.status != CertificateStatus::Failed {
            return Err(ApiError::new(
                ErrorCode::InvalidStatusTransition,
                format!("Only FAILED requests can be retried (status is {})", request.status),
            ));
        }
        if request.attempts >= self.retry.max_attempts {
            return Err(ApiError::unprocessable(format!(
                "Retry limit reached ({} attempts)",
                request.attempts
            )));
        }

        let request = self.repo().transition(
            id,
            CertificateStatus::OrassFetching,
            actor,
            Some("Retry requested"),
            None,
        )?;
        info!(request_id = %id, attempt = request.attempts, "Retrying certificate request");
        self.spawn_pipeline(request, actor).await
    }

    /// Poll ASACI for a request still in `ASACI_PROCESSING`.
    pub async fn refresh(&self, id: &str, actor: &str) -> Result<CertificateRequest, ApiError> {
        let request = self.repo().get(id)?;
        if request.status != CertificateStatus::AsaciProcessing {
            return Err(ApiError::new(
                ErrorCode::InvalidStatusTransition,
                format!("Only ASACI_PROCESSING requests can be refreshed (status is {})", request.status),
            ));
        }
        let Some(reference) = request.production_reference.clone() else {
            return Err(ApiError::internal("Processing request has no production reference"));
        };

        let production = self.asaci.get_production(&reference).await?;
        self.apply_production(request, production, actor)
    }

    pub fn stats(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<CertificateStats, ApiError> {
        let by_status = self.repo().count_by_status()?;
        let total = by_status.values().sum();
        let completed = by_status.get(&CertificateStatus::Completed).copied().unwrap_or(0);
        let failed = by_status.get(&CertificateStatus::Failed).copied().unwrap_or(0);
        let success_rate = if completed + failed == 0 {
            0.0
        } else {
            completed as f64 / (completed + failed) as f64
        };
        Ok(CertificateStats {
            total,
            by_status,
            success_rate,
            daily: self.repo().daily_counts(from, to)?,
        })
    }

    /// FAILED requests the poller would retry right now.
    pub fn retryable(&self) -> Result<Vec<CertificateRequest>, ApiError> {
        Ok(self
            .repo()
            .find_retryable(Utc::now(), self.retry.max_attempts, self.retry.base_delay)?)
    }

    /// Fail a request stuck before `ASACI_PROCESSING` as retryable.
    pub fn abandon(&self, id: &str, actor: &str) -> Result<CertificateRequest, ApiError> {
        let request = self.repo().get(id)?;
        if !request.status.is_in_flight() {
            return Err(ApiError::new(
                ErrorCode::InvalidStatusTransition,
                format!("Request is not in flight (status is {})", request.status),
            ));
        }
        self.fail(
            id,
            actor,
            PIPELINE_INTERRUPTED,
            &format!("Pipeline interrupted during {}", request.status),
            true,
        )
    }

    async fn spawn_pipeline(
        &self,
        request: CertificateRequest,
        actor: &str,
    ) -> Result<CertificateRequest, ApiError> {
        let service = self.clone();
        let actor = actor.to_string();
        let id = request.id.clone();
        tokio::spawn(async move { service.run_pipeline(request, &actor).await })
            .await
            .map_err(|e| {
                warn!(request_id = %id, error = %e, "Certificate pipeline task aborted");
                ApiError::internal("Certificate pipeline aborted")
            })?
    }

    async fn run_pipeline(
        &self,
        request: CertificateRequest,
        actor: &str,
    ) -> Result<CertificateRequest, ApiError> {
        let id = request.id.clone();

        let policy = match self.orass.find_policy(&request.policy_number).await {
            Ok(policy) => policy,
            Err(e) => return self.fail(&id, actor, e.code(), &e.to_string(), e.is_retryable()),
        };
        self.repo().transition_with(
            &id,
            CertificateStatus::OrassFetched,
            actor,
            Some("Policy fetched from ORASS"),
            None,
            |r| r.orass_snapshot = Some(policy.clone()),
        )?;

        let ctx = MappingContext {
            office_code: self.office_code.clone(),
            organization_code: self.organization_code.clone(),
            certificate_type: request.certificate_type,
        };
        let edition = match map_policy_to_edition(&policy, &ctx) {
            Ok(edition) => edition,
            Err(e) => return self.fail(&id, actor, e.code(), &e.to_string(), false),
        };
        self.repo().transition_with(
            &id,
            CertificateStatus::AsaciPending,
            actor,
            Some("Edition request prepared"),
            None,
            |r| r.asaci_payload = Some(edition.clone()),
        )?;

        let production = match self.asaci.create_production(&edition).await {
            Ok(production) => production,
            Err(e) => return self.fail(&id, actor, e.code(), &e.to_string(), e.is_retryable()),
        };
        let request = self.repo().transition_with(
            &id,
            CertificateStatus::AsaciProcessing,
            actor,
            Some("Production accepted by ASACI"),
            Some(json!({ "production_reference": production.reference })),
            |r| r.production_reference = Some(production.reference.clone()),
        )?;

        self.apply_production(request, production, actor)
    }

    /// Complete or fail a processing request from an ASACI production.
    fn apply_production(
        &self,
        request: CertificateRequest,
        production: ProductionResponse,
        actor: &str,
    ) -> Result<CertificateRequest, ApiError> {
        let issued: Vec<IssuedCertificate> = production
            .certificates
            .iter()
            .map(|c| IssuedCertificate {
                reference: c.reference.clone(),
                number: c.number.clone(),
                download_url: c.download_url.clone(),
                status: c.status.clone(),
            })
            .collect();

        match production.status {
            ProductionStatus::Completed => {
                let request = self.repo().transition_with(
                    &request.id,
                    CertificateStatus::Completed,
                    actor,
                    Some("Certificate issued"),
                    Some(json!({ "certificates": issued.len() })),
                    |r| r.certificates = issued,
                )?;
                info!(
                    request_id = %request.id,
                    policy_number = %request.policy_number,
                    "Certificate request completed"
                );
                Ok(request)
            }
            ProductionStatus::Failed => {
                let message = production
                    .message
                    .unwrap_or_else(|| "ASACI rejected the production".to_string());
                self.fail(&request.id, actor, "asaci_production_failed", &message, false)
            }
            ProductionStatus::Pending | ProductionStatus::Processing | ProductionStatus::Unknown => {
                if issued.is_empty() {
                    return Ok(request);
                }
                let mut request = request;
                request.certificates = issued;
                Ok(self.repo().save(&request)?)
            }
        }
    }

    fn fail(
        &self,
        id: &str,
        actor: &str,
        code: &str,
        message: &str,
        retryable: bool,
    ) -> Result<CertificateRequest, ApiError> {
        warn!(request_id = %id, code, retryable, error = %message, "Certificate request failed");
        let error = RequestError {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
        };
        Ok(self.repo().transition_with(
            id,
            CertificateStatus::Failed,
            actor,
            Some(message),
            Some(json!({ "code": code, "retryable": retryable })),
            |r| r.last_error = Some(error),
        )?)
    }
}
