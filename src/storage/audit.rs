// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging.
//!
//! Two trails are kept:
//!
//! - [`OperationLog`]: every authentication event and administrative or
//!   certificate action, successful or not.
//! - [`CertificateAuditLog`]: the status history of each certificate request,
//!   written by the certificate repository in the same transaction as the
//!   status change.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    make_prefix, make_prefix_end, make_sequence_key, sequence_of, Database, DbResult,
    CERTIFICATE_AUDIT_LOGS, OPERATION_LOGS,
};
use super::{Page, PageRequest};
use crate::certify::CertificateStatus;

/// Types of auditable operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Auth events
    Register,
    Login,
    TwoFactorVerify,
    TokenRefresh,
    Logout,
    PasswordChange,
    TwoFactorSetup,
    TwoFactorEnable,
    TwoFactorDisable,
    PermissionDenied,

    // User and role administration
    UserCreate,
    UserUpdate,
    UserDelete,
    UserUnlock,
    RoleCreate,
    RoleUpdate,
    RoleDelete,

    // Certificate events
    CertificateRequest,
    CertificateBatch,
    CertificateRetry,
    CertificateRefresh,
    AsaciProductionCreate,
    AsaciCertificateCancel,
    AsaciCertificateSuspend,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::TwoFactorVerify => "two_factor_verify",
            AuditAction::TokenRefresh => "token_refresh",
            AuditAction::Logout => "logout",
            AuditAction::PasswordChange => "password_change",
            AuditAction::TwoFactorSetup => "two_factor_setup",
            AuditAction::TwoFactorEnable => "two_factor_enable",
            AuditAction::TwoFactorDisable => "two_factor_disable",
            AuditAction::PermissionDenied => "permission_denied",
            AuditAction::UserCreate => "user_create",
            AuditAction::UserUpdate => "user_update",
            AuditAction::UserDelete => "user_delete",
            AuditAction::UserUnlock => "user_unlock",
            AuditAction::RoleCreate => "role_create",
            AuditAction::RoleUpdate => "role_update",
            AuditAction::RoleDelete => "role_delete",
            AuditAction::CertificateRequest => "certificate_request",
            AuditAction::CertificateBatch => "certificate_batch",
            AuditAction::CertificateRetry => "certificate_retry",
            AuditAction::CertificateRefresh => "certificate_refresh",
            AuditAction::AsaciProductionCreate => "asaci_production_create",
            AuditAction::AsaciCertificateCancel => "asaci_certificate_cancel",
            AuditAction::AsaciCertificateSuspend => "asaci_certificate_suspend",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown audit action '{s}'"))
    }
}

/// An operation log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OperationLog {
    /// Unique log ID.
    pub id: String,
    /// When the operation happened.
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Acting user (if known).
    pub user_id: Option<String>,
    /// Email of the acting user, or the email attempted on a failed login.
    pub user_email: Option<String>,
    /// Resource affected (user, role, certificate_request, ...).
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub success: bool,
    /// Error message if the operation failed.
    pub error: Option<String>,
}

impl OperationLog {
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            user_id: None,
            user_email: None,
            resource_type: None,
            resource_id: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// One status change of a certificate request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct CertificateAuditLog {
    pub id: String,
    pub request_id: String,
    /// `None` for the creation entry.
    pub from_status: Option<CertificateStatus>,
    pub to_status: CertificateStatus,
    /// User ID, or `system` for the background poller.
    pub actor: String,
    pub message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl CertificateAuditLog {
    pub fn new(
        request_id: &str,
        from_status: Option<CertificateStatus>,
        to_status: CertificateStatus,
        actor: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            from_status,
            to_status,
            actor: actor.to_string(),
            message: None,
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append a certificate log inside an open write transaction.
pub(crate) fn insert_certificate_log(
    write_txn: &WriteTransaction,
    log: &CertificateAuditLog,
) -> DbResult<()> {
    let mut table = write_txn.open_table(CERTIFICATE_AUDIT_LOGS)?;
    let start = make_prefix(&log.request_id);
    let end = make_prefix_end(&log.request_id);
    let next = {
        let mut range = table.range(start.as_slice()..end.as_slice())?;
        match range.next_back() {
            Some(entry) => {
                let (key, _) = entry?;
                sequence_of(key.value()).map_or(0, |seq| seq + 1)
            }
            None => 0,
        }
    };
    let key = make_sequence_key(&log.request_id, next);
    let json = serde_json::to_vec(log)?;
    table.insert(key.as_slice(), json.as_slice())?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OperationFilter {
    fn matches(&self, log: &OperationLog) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|u| log.user_id.as_ref() == Some(u))
            && self.action.is_none_or(|a| log.action == a)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|r| log.resource_type.as_ref() == Some(r))
            && self
                .resource_id
                .as_ref()
                .is_none_or(|r| log.resource_id.as_ref() == Some(r))
            && self.success.is_none_or(|s| log.success == s)
            && self.from.is_none_or(|from| log.timestamp >= from)
            && self.to.is_none_or(|to| log.timestamp <= to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CertificateLogFilter {
    pub request_id: Option<String>,
    /// Matches the status moved to.
    pub status: Option<CertificateStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl CertificateLogFilter {
    fn matches(&self, log: &CertificateAuditLog) -> bool {
        self.request_id
            .as_ref()
            .is_none_or(|r| &log.request_id == r)
            && self.status.is_none_or(|s| log.to_status == s)
            && self.from.is_none_or(|from| log.created_at >= from)
            && self.to.is_none_or(|to| log.created_at <= to)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct UserActivity {
    pub user_id: String,
    pub operations: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct DailyOperations {
    pub date: NaiveDate,
    pub total: u64,
    pub failures: u64,
}

/// Aggregates over a time window.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct OperationStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    /// Count per action name.
    pub by_action: BTreeMap<String, u64>,
    /// Ten most active users, busiest first.
    pub top_users: Vec<UserActivity>,
    pub by_day: Vec<DailyOperations>,
}

/// Number of users reported in [`OperationStats::top_users`].
const TOP_USERS: usize = 10;

/// Repository for both audit trails.
pub struct AuditRepository<'a> {
    db: &'a Database,
}

impl<'a> AuditRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append an operation log entry.
    pub fn log_operation(&self, log: &OperationLog) -> DbResult<()> {
        let json = serde_json::to_vec(log)?;
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut table = write_txn.open_table(OPERATION_LOGS)?;
            let next = match table.last()? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            table.insert(next, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Append an entry, logging instead of failing when the store errors.
    pub fn record(&self, log: OperationLog) {
        if let Err(e) = self.log_operation(&log) {
            tracing::warn!(
                action = %log.action,
                error = %e,
                "Failed to write operation log"
            );
        }
    }

    fn operations(&self) -> DbResult<Vec<OperationLog>> {
        let read_txn = self.db.raw().begin_read()?;
        let table = read_txn.open_table(OPERATION_LOGS)?;
        let mut logs = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            logs.push(serde_json::from_slice(value.value())?);
        }
        Ok(logs)
    }

    /// Filtered, paginated operation logs, newest first.
    pub fn query_operations(
        &self,
        filter: &OperationFilter,
        page: PageRequest,
    ) -> DbResult<Page<OperationLog>> {
        let mut logs: Vec<OperationLog> = self
            .operations()?
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();
        // Insertion order is chronological
        logs.reverse();
        Ok(page.apply(logs))
    }

    /// Totals, failures, per-action counts, top users and per-day counts for
    /// operations in `[from, to]`.
    pub fn operation_stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<OperationStats> {
        let filter = OperationFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        };
        let logs: Vec<OperationLog> = self
            .operations()?
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();

        let mut by_action: BTreeMap<String, u64> = BTreeMap::new();
        let mut per_user: HashMap<String, u64> = HashMap::new();
        let mut per_day: BTreeMap<NaiveDate, DailyOperations> = BTreeMap::new();
        let mut successes = 0;

        for log in &logs {
            if log.success {
                successes += 1;
            }
            *by_action.entry(log.action.to_string()).or_default() += 1;
            if let Some(user) = &log.user_id {
                *per_user.entry(user.clone()).or_default() += 1;
            }
            let date = log.timestamp.date_naive();
            let day = per_day.entry(date).or_insert(DailyOperations {
                date,
                total: 0,
                failures: 0,
            });
            day.total += 1;
            if !log.success {
                day.failures += 1;
            }
        }

        let mut top_users: Vec<UserActivity> = per_user
            .into_iter()
            .map(|(user_id, operations)| UserActivity {
                user_id,
                operations,
            })
            .collect();
        top_users.sort_by(|a, b| {
            b.operations
                .cmp(&a.operations)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        top_users.truncate(TOP_USERS);

        let total = logs.len() as u64;
        Ok(OperationStats {
            total,
            successes,
            failures: total - successes,
            by_action,
            top_users,
            by_day: per_day.into_values().collect(),
        })
    }

    /// Status history of one request, oldest first.
    pub fn certificate_history(&self, request_id: &str) -> DbResult<Vec<CertificateAuditLog>> {
        self.db
            .scan_prefix_json(CERTIFICATE_AUDIT_LOGS, request_id, None)
    }

    /// Filtered, paginated certificate logs, newest first.
    pub fn query_certificate_logs(
        &self,
        filter: &CertificateLogFilter,
        page: PageRequest,
    ) -> DbResult<Page<CertificateAuditLog>> {
        let mut logs: Vec<CertificateAuditLog> = match &filter.request_id {
            Some(request_id) => self.certificate_history(request_id)?,
            None => {
                let read_txn = self.db.raw().begin_read()?;
                let table = read_txn.open_table(CERTIFICATE_AUDIT_LOGS)?;
                let mut logs = Vec::new();
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    logs.push(serde_json::from_slice(value.value())?);
                }
                logs
            }
        };
        logs.retain(|l| filter.matches(l));
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.apply(logs))
    }
}
