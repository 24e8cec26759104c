// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized StoredUser
//! - `users_by_email`: normalized email → user_id (unique)
//! - `roles`: role_id → serialized StoredRole
//! - `roles_by_name`: lowercase name → role_id (unique)
//! - `password_history`: `user_id|!timestamp|entry_id` → serialized entry
//! - `certificate_requests`: request_id → serialized CertificateRequest
//! - `certificate_requests_by_key`: `POLICY|TYPE` → request_id (unique)
//! - `certificate_audit_logs`: `request_id|seq` → serialized log
//! - `operation_logs`: global seq → serialized OperationLog
//! - `revoked_tokens`: jti → expiry (unix seconds)
//!
//! Values are JSON. Unique constraints are enforced by checking the index
//! table inside the same write transaction that inserts the row; redb
//! serializes write transactions so the check and insert are atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;

use crate::certify::CertificateStatus;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USERS_BY_EMAIL: TableDefinition<&str, &str> =
    TableDefinition::new("users_by_email");
pub(crate) const ROLES: TableDefinition<&str, &[u8]> = TableDefinition::new("roles");
pub(crate) const ROLES_BY_NAME: TableDefinition<&str, &str> = TableDefinition::new("roles_by_name");
pub(crate) const PASSWORD_HISTORY: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("password_history");
pub(crate) const CERTIFICATE_REQUESTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("certificate_requests");
pub(crate) const CERTIFICATE_REQUESTS_BY_KEY: TableDefinition<&str, &str> =
    TableDefinition::new("certificate_requests_by_key");
pub(crate) const CERTIFICATE_AUDIT_LOGS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("certificate_audit_logs");
pub(crate) const OPERATION_LOGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("operation_logs");
pub(crate) const REVOKED_TOKENS: TableDefinition<&str, i64> = TableDefinition::new("revoked_tokens");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A referential or business constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: CertificateStatus,
        to: CertificateStatus,
    },
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Key Helpers
// =============================================================================

/// Inverted timestamp so a forward scan returns newest first.
pub(crate) fn inverted_timestamp_key(ts: chrono::DateTime<chrono::Utc>) -> [u8; 8] {
    (!(ts.timestamp_millis().max(0) as u64)).to_be_bytes()
}

/// `prefix|`
pub(crate) fn make_prefix(prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1);
    key.extend_from_slice(prefix.as_bytes());
    key.push(b'|');
    key
}

/// Upper bound for a range scan over every key starting with `prefix|`.
pub(crate) fn make_prefix_end(prefix: &str) -> Vec<u8> {
    let mut key = make_prefix(prefix);
    // '|' + 1, sorts after every key that continues with '|'
    if let Some(last) = key.last_mut() {
        *last = b'|' + 1;
    }
    key
}

/// `prefix|seq` with a big-endian sequence number.
pub(crate) fn make_sequence_key(prefix: &str, seq: u64) -> Vec<u8> {
    let mut key = make_prefix(prefix);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Sequence number stored in the last 8 bytes of a `prefix|seq` key.
pub(crate) fn sequence_of(key: &[u8]) -> Option<u64> {
    let tail: [u8; 8] = key.get(key.len().checked_sub(8)?..)?.try_into().ok()?;
    Some(u64::from_be_bytes(tail))
}

/// `prefix|ts|id`
pub(crate) fn make_composite_key(prefix: &str, ts: [u8; 8], id: &str) -> Vec<u8> {
    let mut key = make_prefix(prefix);
    key.extend_from_slice(&ts);
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the embedded store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    db: Arc<redb::Database>,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = redb::Database::create(path)?;
        Self::initialize(db)
    }

    /// Volatile database, used by tests.
    pub fn in_memory() -> DbResult<Self> {
        let db = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::initialize(db)
    }

    fn initialize(db: redb::Database) -> DbResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERS_BY_EMAIL)?;
            let _ = write_txn.open_table(ROLES)?;
            let _ = write_txn.open_table(ROLES_BY_NAME)?;
            let _ = write_txn.open_table(PASSWORD_HISTORY)?;
            let _ = write_txn.open_table(CERTIFICATE_REQUESTS)?;
            let _ = write_txn.open_table(CERTIFICATE_REQUESTS_BY_KEY)?;
            let _ = write_txn.open_table(CERTIFICATE_AUDIT_LOGS)?;
            let _ = write_txn.open_table(OPERATION_LOGS)?;
            let _ = write_txn.open_table(REVOKED_TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Verify a read transaction can be opened against a known table.
    pub fn health_check(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }

    pub(crate) fn raw(&self) -> &redb::Database {
        &self.db
    }

    /// Fetch and decode one JSON value.
    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> DbResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        match table.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Decode every value of a JSON table.
    pub(crate) fn scan_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> DbResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    /// Decode the values whose keys start with `prefix|`, in key order.
    pub(crate) fn scan_prefix_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &str,
        limit: Option<usize>,
    ) -> DbResult<Vec<T>> {
        let start = make_prefix(prefix);
        let end = make_prefix_end(prefix);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table)?;
        let mut items = Vec::new();
        for entry in table.range(start.as_slice()..end.as_slice())? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
            if limit.is_some_and(|l| items.len() >= l) {
                break;
            }
        }
        Ok(items)
    }
}
