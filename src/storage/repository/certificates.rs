// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certificate requests and their status history.
//!
//! One request exists per `(policy_number, certificate_type)`; the
//! `certificate_requests_by_key` table enforces it. Every status change goes
//! through [`CertificateRequestRepository::transition_with`], which validates
//! the move and appends a [`CertificateAuditLog`] in the same write
//! transaction.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::asaci::{CertificateType, EditionRequest};
use crate::certify::poller::backoff_delay;
use crate::certify::CertificateStatus;
use crate::orass::PolicyRecord;
use crate::storage::audit::{insert_certificate_log, CertificateAuditLog};
use crate::storage::database::{
    Database, DbError, DbResult, CERTIFICATE_REQUESTS, CERTIFICATE_REQUESTS_BY_KEY, USERS,
};
use crate::storage::{Page, PageRequest};

/// Certificate issued by ASACI for a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub status: String,
}

/// Last failure recorded on a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct RequestError {
    /// Stable error identifier (`orass_error`, `mapping_failed`, ...).
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CertificateRequest {
    pub id: String,
    pub policy_number: String,
    pub certificate_type: CertificateType,
    pub status: CertificateStatus,
    /// Pipeline runs so far, including the current one.
    pub attempts: u32,
    /// Policy as read from ORASS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orass_snapshot: Option<PolicyRecord>,
    /// Payload submitted to ASACI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asaci_payload: Option<EditionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_reference: Option<String>,
    #[serde(default)]
    pub certificates: Vec<IssuedCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RequestError>,
    /// User ID of the requester.
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CertificateRequest {
    pub fn new(
        policy_number: &str,
        certificate_type: CertificateType,
        requested_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            policy_number: normalize_policy_number(policy_number),
            certificate_type,
            status: CertificateStatus::OrassFetching,
            attempts: 1,
            orass_snapshot: None,
            asaci_payload: None,
            production_reference: None,
            certificates: Vec::new(),
            last_error: None,
            requested_by: requested_by.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn unique_key(&self) -> String {
        request_key(&self.policy_number, self.certificate_type)
    }

    /// Eligible for an automatic retry at `now`.
    pub fn is_retry_due(&self, now: DateTime<Utc>, max_attempts: u32, base_delay: Duration) -> bool {
        if self.status != CertificateStatus::Failed || self.attempts >= max_attempts {
            return false;
        }
        if !self.last_error.as_ref().is_some_and(|e| e.retryable) {
            return false;
        }
        let delay = chrono::Duration::from_std(backoff_delay(base_delay, self.attempts))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        self.updated_at + delay <= now
    }
}

/// Policy numbers are compared trimmed and uppercase.
pub fn normalize_policy_number(policy_number: &str) -> String {
    policy_number.trim().to_uppercase()
}

/// `POLICY|type`
pub fn request_key(policy_number: &str, certificate_type: CertificateType) -> String {
    format!(
        "{}|{}",
        normalize_policy_number(policy_number),
        certificate_type.code()
    )
}

/// Filters for [`CertificateRequestRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct CertificateRequestFilter {
    pub status: Option<CertificateStatus>,
    pub policy_number: Option<String>,
    pub requested_by: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CertificateRequestFilter {
    fn matches(&self, req: &CertificateRequest) -> bool {
        self.status.is_none_or(|s| req.status == s)
            && self
                .policy_number
                .as_ref()
                .is_none_or(|p| req.policy_number == normalize_policy_number(p))
            && self
                .requested_by
                .as_ref()
                .is_none_or(|u| &req.requested_by == u)
            && self.from.is_none_or(|from| req.created_at >= from)
            && self.to.is_none_or(|to| req.created_at <= to)
    }
}

/// Requests created on one day, by outcome.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct CertificateRequestRepository<'a> {
    db: &'a Database,
}

impl<'a> CertificateRequestRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new request and its initial audit entry.
    ///
    /// Fails with `AlreadyExists` when a request for the same policy and
    /// certificate type is already stored, whatever its status.
    pub fn create(&self, request: &CertificateRequest, actor: &str) -> DbResult<()> {
        let key = request.unique_key();
        let json = serde_json::to_vec(request)?;
        let log = CertificateAuditLog::new(&request.id, None, request.status, actor)
            .with_message("Certificate request created");

        let write_txn = self.db.raw().begin_write()?;
        {
            let mut by_key = write_txn.open_table(CERTIFICATE_REQUESTS_BY_KEY)?;
            if let Some(existing) = by_key.get(key.as_str())? {
                return Err(DbError::AlreadyExists(format!(
                    "Certificate request {} for policy {} ({})",
                    existing.value(),
                    request.policy_number,
                    request.certificate_type.code()
                )));
            }

            let users = write_txn.open_table(USERS)?;
            if users.get(request.requested_by.as_str())?.is_none() {
                return Err(DbError::Constraint(format!(
                    "User {} does not exist",
                    request.requested_by
                )));
            }

            let mut table = write_txn.open_table(CERTIFICATE_REQUESTS)?;
            table.insert(request.id.as_str(), json.as_slice())?;
            by_key.insert(key.as_str(), request.id.as_str())?;
            insert_certificate_log(&write_txn, &log)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> DbResult<CertificateRequest> {
        self.db
            .get_json(CERTIFICATE_REQUESTS, id)?
            .ok_or_else(|| DbError::NotFound(format!("Certificate request {id}")))
    }

    pub fn find_by_key(
        &self,
        policy_number: &str,
        certificate_type: CertificateType,
    ) -> DbResult<Option<CertificateRequest>> {
        let key = request_key(policy_number, certificate_type);
        let id = {
            let read_txn = self.db.raw().begin_read()?;
            let table = read_txn.open_table(CERTIFICATE_REQUESTS_BY_KEY)?;
            match table.get(key.as_str())? {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            }
        };
        self.db.get_json(CERTIFICATE_REQUESTS, &id)
    }

    /// Overwrite non-status fields. A status change must go through
    /// [`Self::transition_with`].
    pub fn save(&self, request: &CertificateRequest) -> DbResult<CertificateRequest> {
        let write_txn = self.db.raw().begin_write()?;
        let saved = {
            let mut table = write_txn.open_table(CERTIFICATE_REQUESTS)?;
            let existing: CertificateRequest = {
                let bytes = table
                    .get(request.id.as_str())?
                    .ok_or_else(|| DbError::NotFound(format!("Certificate request {}", request.id)))?;
                serde_json::from_slice(bytes.value())?
            };
            if existing.status != request.status {
                return Err(DbError::Constraint(
                    "status changes must use transition".to_string(),
                ));
            }
            let mut saved = request.clone();
            saved.updated_at = Utc::now();
            let json = serde_json::to_vec(&saved)?;
            table.insert(saved.id.as_str(), json.as_slice())?;
            saved
        };
        write_txn.commit()?;
        Ok(saved)
    }

    /// Move a request to `to` and log it.
    pub fn transition(
        &self,
        id: &str,
        to: CertificateStatus,
        actor: &str,
        message: Option<&str>,
        details: Option<serde_json::Value>,
    ) -> DbResult<CertificateRequest> {
        self.transition_with(id, to, actor, message, details, |_| {})
    }

    /// Move a request to `to`, applying `update` to the record in the same
    /// transaction.
    ///
    /// Moving `FAILED -> ORASS_FETCHING` counts a new attempt and clears the
    /// last error.
    pub fn transition_with<F>(
        &self,
        id: &str,
        to: CertificateStatus,
        actor: &str,
        message: Option<&str>,
        details: Option<serde_json::Value>,
        update: F,
    ) -> DbResult<CertificateRequest>
    where
        F: FnOnce(&mut CertificateRequest),
    {
        let write_txn = self.db.raw().begin_write()?;
        let request = {
            let mut table = write_txn.open_table(CERTIFICATE_REQUESTS)?;
            let mut request: CertificateRequest = {
                let bytes = table
                    .get(id)?
                    .ok_or_else(|| DbError::NotFound(format!("Certificate request {id}")))?;
                serde_json::from_slice(bytes.value())?
            };

            let from = request.status;
            if !from.can_transition_to(to) {
                return Err(DbError::InvalidTransition { from, to });
            }

            update(&mut request);
            request.status = to;
            request.updated_at = Utc::now();
            match to {
                CertificateStatus::OrassFetching => {
                    request.attempts = request.attempts.saturating_add(1);
                    request.last_error = None;
                }
                CertificateStatus::Completed => {
                    request.completed_at = Some(request.updated_at);
                    request.last_error = None;
                }
                _ => {}
            }

            let json = serde_json::to_vec(&request)?;
            table.insert(id, json.as_slice())?;

            let mut log = CertificateAuditLog::new(id, Some(from), to, actor);
            if let Some(message) = message {
                log = log.with_message(message);
            }
            if let Some(details) = details {
                log = log.with_details(details);
            }
            insert_certificate_log(&write_txn, &log)?;
            request
        };
        write_txn.commit()?;

        tracing::debug!(
            request_id = %request.id,
            status = %request.status,
            "Certificate request transitioned"
        );
        Ok(request)
    }

    fn all(&self) -> DbResult<Vec<CertificateRequest>> {
        self.db.scan_json(CERTIFICATE_REQUESTS)
    }

    /// Filtered, paginated listing, newest first.
    pub fn list(
        &self,
        filter: &CertificateRequestFilter,
        page: PageRequest,
    ) -> DbResult<Page<CertificateRequest>> {
        let mut items: Vec<CertificateRequest> =
            self.all()?.into_iter().filter(|r| filter.matches(r)).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(page.apply(items))
    }

    /// FAILED requests whose error is retryable, that have attempts left and
    /// whose backoff has elapsed. Oldest first.
    pub fn find_retryable(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
        base_delay: Duration,
    ) -> DbResult<Vec<CertificateRequest>> {
        let mut items: Vec<CertificateRequest> = self
            .all()?
            .into_iter()
            .filter(|r| r.is_retry_due(now, max_attempts, base_delay))
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(items)
    }

    /// ASACI_PROCESSING requests untouched since `older_than`.
    pub fn find_stale_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> DbResult<Vec<CertificateRequest>> {
        let mut items: Vec<CertificateRequest> = self
            .all()?
            .into_iter()
            .filter(|r| r.status == CertificateStatus::AsaciProcessing && r.updated_at <= older_than)
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(items)
    }

    /// Requests in ORASS_FETCHING, ORASS_FETCHED or ASACI_PENDING untouched
    /// since `older_than`.
    pub fn find_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
    ) -> DbResult<Vec<CertificateRequest>> {
        let mut items: Vec<CertificateRequest> = self
            .all()?
            .into_iter()
            .filter(|r| r.status.is_in_flight() && r.updated_at <= older_than)
            .collect();
        items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(items)
    }

    /// Count per status; every status is present.
    pub fn count_by_status(&self) -> DbResult<BTreeMap<CertificateStatus, u64>> {
        let mut counts: BTreeMap<CertificateStatus, u64> =
            CertificateStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for request in self.all()? {
            *counts.entry(request.status).or_default() += 1;
        }
        Ok(counts)
    }

    /// Per-day counts of requests created in `[from, to]`, oldest day first.
    pub fn daily_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<DailyCount>> {
        let mut days: BTreeMap<NaiveDate, DailyCount> = BTreeMap::new();
        for request in self.all()? {
            if request.created_at < from || request.created_at > to {
                continue;
            }
            let date = request.created_at.date_naive();
            let day = days.entry(date).or_insert(DailyCount {
                date,
                total: 0,
                completed: 0,
                failed: 0,
            });
            day.total += 1;
            match request.status {
                CertificateStatus::Completed => day.completed += 1,
                CertificateStatus::Failed => day.failed += 1,
                _ => {}
            }
        }
        Ok(days.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AuditRepository, RoleRepository, StoredUser, UserRepository};

    fn setup() -> (Database, String) {
        let db = Database::in_memory().unwrap();
        RoleRepository::new(&db).seed_defaults().unwrap();
        let role = RoleRepository::new(&db).get_by_name("operator").unwrap().unwrap();
        let user = StoredUser::new("op@example.com", "Operator", "hash".to_string(), role.id);
        UserRepository::new(&db).create(&user).unwrap();
        (db, user.id)
    }

    #[test]
    fn duplicate_policy_and_type_is_rejected() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let req = CertificateRequest::new("pol-001", CertificateType::Cima, &user);
        repo.create(&req, &user).unwrap();

        let dup = CertificateRequest::new(" POL-001 ", CertificateType::Cima, &user);
        assert!(matches!(repo.create(&dup, &user), Err(DbError::AlreadyExists(_))));

        let other_type = CertificateRequest::new("POL-001", CertificateType::PoolTpv, &user);
        repo.create(&other_type, &user).unwrap();

        let found = repo.find_by_key("pol-001", CertificateType::Cima).unwrap().unwrap();
        assert_eq!(found.id, req.id);
    }

    #[test]
    fn unknown_requester_is_rejected() {
        let (db, _) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let req = CertificateRequest::new("POL-9", CertificateType::Cima, "ghost");
        assert!(matches!(repo.create(&req, "ghost"), Err(DbError::Constraint(_))));
    }

    #[test]
    fn transitions_are_validated_and_logged() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let req = CertificateRequest::new("POL-002", CertificateType::Cima, &user);
        repo.create(&req, &user).unwrap();

        let err = repo
            .transition(&req.id, CertificateStatus::Completed, &user, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidTransition {
                from: CertificateStatus::OrassFetching,
                to: CertificateStatus::Completed
            }
        ));

        repo.transition(&req.id, CertificateStatus::OrassFetched, &user, Some("fetched"), None)
            .unwrap();
        let failed = repo
            .transition_with(&req.id, CertificateStatus::Failed, "system", None, None, |r| {
                r.last_error = Some(RequestError {
                    code: "asaci_unavailable".to_string(),
                    message: "down".to_string(),
                    retryable: true,
                })
            })
            .unwrap();
        assert_eq!(failed.status, CertificateStatus::Failed);
        assert!(failed.last_error.is_some());

        let retried = repo
            .transition(&req.id, CertificateStatus::OrassFetching, &user, Some("retry"), None)
            .unwrap();
        assert_eq!(retried.attempts, 2);
        assert!(retried.last_error.is_none());

        let history = AuditRepository::new(&db).certificate_history(&req.id).unwrap();
        let statuses: Vec<CertificateStatus> = history.iter().map(|l| l.to_status).collect();
        assert_eq!(
            statuses,
            vec![
                CertificateStatus::OrassFetching,
                CertificateStatus::OrassFetched,
                CertificateStatus::Failed,
                CertificateStatus::OrassFetching,
            ]
        );
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[1].message.as_deref(), Some("fetched"));
    }

    #[test]
    fn save_refuses_status_changes() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let mut req = CertificateRequest::new("POL-003", CertificateType::Cima, &user);
        repo.create(&req, &user).unwrap();

        req.production_reference = Some("PRD-1".to_string());
        let saved = repo.save(&req).unwrap();
        assert_eq!(saved.production_reference.as_deref(), Some("PRD-1"));

        req.status = CertificateStatus::Completed;
        assert!(matches!(repo.save(&req), Err(DbError::Constraint(_))));
    }

    #[test]
    fn retryable_respects_backoff_and_attempts() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let req = CertificateRequest::new("POL-004", CertificateType::Cima, &user);
        repo.create(&req, &user).unwrap();
        repo.transition_with(&req.id, CertificateStatus::Failed, "system", None, None, |r| {
            r.last_error = Some(RequestError {
                code: "asaci_error".to_string(),
                message: "500".to_string(),
                retryable: true,
            })
        })
        .unwrap();

        let base = Duration::from_secs(60);
        let now = Utc::now();
        assert!(repo.find_retryable(now, 5, base).unwrap().is_empty());
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(repo.find_retryable(later, 5, base).unwrap().len(), 1);
        // attempts (1) already at the limit
        assert!(repo.find_retryable(later, 1, base).unwrap().is_empty());
    }

    #[test]
    fn non_retryable_failures_are_skipped() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        let req = CertificateRequest::new("POL-005", CertificateType::Cima, &user);
        repo.create(&req, &user).unwrap();
        repo.transition_with(&req.id, CertificateStatus::Failed, "system", None, None, |r| {
            r.last_error = Some(RequestError {
                code: "mapping_failed".to_string(),
                message: "missing fields".to_string(),
                retryable: false,
            })
        })
        .unwrap();

        let later = Utc::now() + chrono::Duration::days(2);
        assert!(repo
            .find_retryable(later, 5, Duration::from_secs(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn list_and_stats() {
        let (db, user) = setup();
        let repo = CertificateRequestRepository::new(&db);
        for i in 0..3 {
            let req = CertificateRequest::new(&format!("POL-1{i}"), CertificateType::Cima, &user);
            repo.create(&req, &user).unwrap();
        }
        let done = CertificateRequest::new("POL-DONE", CertificateType::Cima, &user);
        repo.create(&done, &user).unwrap();
        for st in [
            CertificateStatus::OrassFetched,
            CertificateStatus::AsaciPending,
            CertificateStatus::AsaciProcessing,
        ] {
            repo.transition(&done.id, st, &user, None, None).unwrap();
        }

        let stale = repo
            .find_stale_processing(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(stale.len(), 1);

        repo.transition(&done.id, CertificateStatus::Completed, &user, None, None)
            .unwrap();

        let filter = CertificateRequestFilter {
            status: Some(CertificateStatus::OrassFetching),
            ..Default::default()
        };
        let page = repo.list(&filter, PageRequest::new(Some(1), Some(2))).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);

        let by_policy = CertificateRequestFilter {
            policy_number: Some("pol-done".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.list(&by_policy, PageRequest::default()).unwrap().total, 1);

        let counts = repo.count_by_status().unwrap();
        assert_eq!(counts[&CertificateStatus::OrassFetching], 3);
        assert_eq!(counts[&CertificateStatus::Completed], 1);
        assert_eq!(counts[&CertificateStatus::Failed], 0);

        let now = Utc::now();
        let days = repo
            .daily_counts(now - chrono::Duration::days(1), now)
            .unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].total, 4);
        assert_eq!(days[0].completed, 1);
    }
}
