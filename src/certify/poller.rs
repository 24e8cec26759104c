// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retry Poller
//!
//! Background task that keeps certificate requests moving without a user
//! in the loop. Every `poll_interval` it:
//!
//! 1. Refreshes `ASACI_PROCESSING` requests untouched for a full interval.
//! 2. Fails requests stuck in `ORASS_FETCHING`, `ORASS_FETCHED` or
//!    `ASACI_PENDING` for longer than the in-flight timeout, with the
//!    retryable `pipeline_interrupted` error.
//! 3. Retries `FAILED` requests whose error is retryable, that still have
//!    attempts left and whose backoff has elapsed.
//! 4. Purges revoked token IDs that have expired.
//!
//! Backoff is `base_delay * 2^(attempts - 1)`, capped at [`MAX_BACKOFF`].
//!
//! ## Shutdown
//!
//! The loop exits when the `CancellationToken` passed to [`RetryPoller::run`]
//! is cancelled.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::service::{CertifyLinkService, SYSTEM_ACTOR};
use super::CertificateStatus;
use crate::storage::{CertificateRequestRepository, Database, TokenRevocationRepository};

/// Upper bound on the delay between two automatic retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a request may sit in a pipeline-owned state before the poller
/// treats its pipeline as gone.
pub const IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Delay before the next automatic retry of a request that ran `attempts`
/// times.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub abandoned: usize,
    pub retried: usize,
    pub purged_tokens: usize,
    pub errors: usize,
}

pub struct RetryPoller {
    db: Database,
    service: CertifyLinkService,
    poll_interval: Duration,
    in_flight_timeout: Duration,
}

impl RetryPoller {
    pub fn new(db: Database, service: CertifyLinkService) -> Self {
        let poll_interval = service.retry_settings().poll_interval;
        Self {
            db,
            service,
            poll_interval,
            in_flight_timeout: IN_FLIGHT_TIMEOUT,
        }
    }

    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Certificate retry poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Certificate retry poller shutting down");
                return;
            }

            let report = self.sweep().await;
            if report != SweepReport::default() {
                info!(
                    refreshed = report.refreshed,
                    abandoned = report.abandoned,
                    retried = report.retried,
                    purged_tokens = report.purged_tokens,
                    errors = report.errors,
                    "Certificate retry poller sweep finished"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Certificate retry poller shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over stale and retryable requests, then the token deny-list.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let repo = CertificateRequestRepository::new(&self.db);
        let settings = self.service.retry_settings();
        let now = Utc::now();

        let stale_before = now
            - chrono::Duration::from_std(self.poll_interval).unwrap_or(chrono::Duration::zero());
        let stale = match repo.find_stale_processing(stale_before) {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "Retry poller: failed to list processing requests");
                report.errors += 1;
                Vec::new()
            }
        };
        for request in stale {
            match self.service.refresh(&request.id, SYSTEM_ACTOR).await {
                Ok(updated) => {
                    if updated.status != CertificateStatus::AsaciProcessing {
                        report.refreshed += 1;
                    }
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e.message, "Retry poller: refresh failed");
                    report.errors += 1;
                }
            }
        }

        let abandoned_before = now
            - chrono::Duration::from_std(self.in_flight_timeout).unwrap_or(chrono::Duration::zero());
        let stuck = match repo.find_stale_in_flight(abandoned_before) {
            Ok(stuck) => stuck,
            Err(e) => {
                warn!(error = %e, "Retry poller: failed to list in-flight requests");
                report.errors += 1;
                Vec::new()
            }
        };
        for request in stuck {
            match self.service.abandon(&request.id, SYSTEM_ACTOR) {
                Ok(_) => report.abandoned += 1,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e.message, "Retry poller: abandon failed");
                    report.errors += 1;
                }
            }
        }

        let due = match repo.find_retryable(Utc::now(), settings.max_attempts, settings.base_delay) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Retry poller: failed to list retryable requests");
                report.errors += 1;
                Vec::new()
            }
        };
        for request in due {
            match self.service.retry(&request.id, SYSTEM_ACTOR).await {
                Ok(updated) => {
                    info!(
                        request_id = %updated.id,
                        status = %updated.status,
                        attempt = updated.attempts,
                        "Retry poller: retried request"
                    );
                    report.retried += 1;
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e.message, "Retry poller: retry failed");
                    report.errors += 1;
                }
            }
        }

        match TokenRevocationRepository::new(&self.db).purge_expired(Utc::now().timestamp()) {
            Ok(purged) => report.purged_tokens = purged,
            Err(e) => {
                warn!(error = %e, "Retry poller: failed to purge revoked tokens");
                report.errors += 1;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asaci::{AsaciError, CertificateType, ProductionStatus};
    use crate::config::{AppConfig, RetrySettings};
    use crate::storage::repository::CertificateRequest;
    use crate::storage::AuditRepository;
    use crate::test_support::{seed_user, FakeAsaci, FakeOrass};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(480));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }

    fn setup(asaci: Arc<FakeAsaci>) -> (Database, CertifyLinkService, String) {
        let db = Database::in_memory().unwrap();
        let user = seed_user(&db, "operator", "op@example.com").id;
        let mut config = AppConfig::for_tests();
        config.retry = RetrySettings {
            poll_interval: Duration::ZERO,
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        let orass = Arc::new(FakeOrass::with_policies(vec![FakeOrass::policy("POL-1")]));
        let service = CertifyLinkService::new(&config, db.clone(), orass, asaci);
        (db, service, user)
    }

    #[tokio::test]
    async fn sweep_retries_due_failures() {
        let asaci = Arc::new(FakeAsaci::failing(AsaciError::Timeout));
        let (db, service, user) = setup(asaci.clone());
        let failed = service.certify(&user, "POL-1", CertificateType::Cima).await.unwrap();
        assert_eq!(failed.status, CertificateStatus::Failed);

        asaci.set_outcome(Ok(ProductionStatus::Completed));
        let poller = RetryPoller::new(db.clone(), service);
        let report = poller.sweep().await;
        assert_eq!(report.retried, 1);

        let request = CertificateRequestRepository::new(&db).get(&failed.id).unwrap();
        assert_eq!(request.status, CertificateStatus::Completed);
    }

    #[tokio::test]
    async fn sweep_skips_permanent_failures() {
        let asaci = Arc::new(FakeAsaci::new(ProductionStatus::Completed));
        let (db, service, user) = setup(asaci.clone());
        let failed = service.certify(&user, "UNKNOWN", CertificateType::Cima).await.unwrap();
        assert_eq!(failed.status, CertificateStatus::Failed);

        let report = RetryPoller::new(db, service).sweep().await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn sweep_refreshes_processing_requests() {
        let asaci = Arc::new(FakeAsaci::new(ProductionStatus::Processing));
        let (db, service, user) = setup(asaci.clone());
        let processing = service.certify(&user, "POL-1", CertificateType::Cima).await.unwrap();
        assert_eq!(processing.status, CertificateStatus::AsaciProcessing);

        asaci.set_outcome(Ok(ProductionStatus::Completed));
        let report = RetryPoller::new(db.clone(), service).sweep().await;
        assert_eq!(report.refreshed, 1);

        let request = CertificateRequestRepository::new(&db).get(&processing.id).unwrap();
        assert_eq!(request.status, CertificateStatus::Completed);
    }

    #[tokio::test]
    async fn sweep_fails_stuck_requests_then_retries_them() {
        let asaci = Arc::new(FakeAsaci::new(ProductionStatus::Completed));
        let (db, service, user) = setup(asaci.clone());
        let repo = CertificateRequestRepository::new(&db);
        let stuck = CertificateRequest::new("POL-1", CertificateType::Cima, &user);
        repo.create(&stuck, &user).unwrap();

        let idle = RetryPoller::new(db.clone(), service.clone()).sweep().await;
        assert_eq!(idle.abandoned, 0);
        assert_eq!(repo.get(&stuck.id).unwrap().status, CertificateStatus::OrassFetching);

        let poller = RetryPoller::new(db.clone(), service).with_in_flight_timeout(Duration::ZERO);
        let report = poller.sweep().await;
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.retried, 1);

        let request = repo.get(&stuck.id).unwrap();
        assert_eq!(request.status, CertificateStatus::Completed);
        let history = AuditRepository::new(&db).certificate_history(&stuck.id).unwrap();
        let failure = history
            .iter()
            .find(|l| l.to_status == CertificateStatus::Failed)
            .unwrap();
        assert_eq!(failure.actor, SYSTEM_ACTOR);
        assert_eq!(asaci.submissions(), 1);
    }

    #[tokio::test]
    async fn sweep_purges_expired_revocations() {
        let asaci = Arc::new(FakeAsaci::new(ProductionStatus::Completed));
        let (db, service, _) = setup(asaci);
        let revocations = TokenRevocationRepository::new(&db);
        let now = Utc::now().timestamp();
        revocations.revoke("expired", now - 60).unwrap();
        revocations.revoke("live", now + 3600).unwrap();

        let report = RetryPoller::new(db.clone(), service).sweep().await;
        assert_eq!(report.purged_tokens, 1);
        assert!(!revocations.is_revoked("expired").unwrap());
        assert!(revocations.is_revoked("live").unwrap());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let asaci = Arc::new(FakeAsaci::new(ProductionStatus::Completed));
        let (db, service, _) = setup(asaci);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(RetryPoller::new(db, service).run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
