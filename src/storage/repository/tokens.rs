// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deny-list of revoked token IDs (`jti`).
//!
//! Entries are kept until the token would have expired anyway, after which
//! [`TokenRevocationRepository::purge_expired`] drops them.

use redb::{ReadableDatabase, ReadableTable};

use crate::storage::database::{Database, DbResult, REVOKED_TOKENS};

pub struct TokenRevocationRepository<'a> {
    db: &'a Database,
}

impl<'a> TokenRevocationRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Revoke `jti` until `expires_at` (unix seconds).
    ///
    /// Returns `false` when `jti` was already revoked. Check and insert share
    /// one write transaction, so of two concurrent callers exactly one sees
    /// `true`.
    pub fn revoke(&self, jti: &str, expires_at: i64) -> DbResult<bool> {
        let write_txn = self.db.raw().begin_write()?;
        let newly_revoked = {
            let mut table = write_txn.open_table(REVOKED_TOKENS)?;
            let previous = table.insert(jti, expires_at)?;
            previous.is_none()
        };
        write_txn.commit()?;
        Ok(newly_revoked)
    }

    pub fn is_revoked(&self, jti: &str) -> DbResult<bool> {
        let read_txn = self.db.raw().begin_read()?;
        let table = read_txn.open_table(REVOKED_TOKENS)?;
        Ok(table.get(jti)?.is_some())
    }

    /// Remove entries whose expiry is at or before `now`. Returns how many
    /// were removed.
    pub fn purge_expired(&self, now: i64) -> DbResult<usize> {
        let write_txn = self.db.raw().begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(REVOKED_TOKENS)?;
            let expired: Vec<String> = {
                let mut keys = Vec::new();
                for entry in table.iter()? {
                    let (jti, exp) = entry?;
                    if exp.value() <= now {
                        keys.push(jti.value().to_string());
                    }
                }
                keys
            };
            for jti in &expired {
                table.remove(jti.as_str())?;
            }
            expired.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
