// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Previous password hashes, used to refuse password reuse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::database::{
    inverted_timestamp_key, make_composite_key, Database, DbResult, PASSWORD_HISTORY,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordHistoryEntry {
    pub id: String,
    pub user_id: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub struct PasswordHistoryRepository<'a> {
    db: &'a Database,
}

impl<'a> PasswordHistoryRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a hash to the user's history.
    pub fn record(&self, user_id: &str, password_hash: &str) -> DbResult<PasswordHistoryEntry> {
        let entry = PasswordHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        let key = make_composite_key(user_id, inverted_timestamp_key(entry.created_at), &entry.id);
        let json = serde_json::to_vec(&entry)?;

        let write_txn = self.db.raw().begin_write()?;
        {
            let mut table = write_txn.open_table(PASSWORD_HISTORY)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(entry)
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, user_id: &str, n: usize) -> DbResult<Vec<PasswordHistoryEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.db.scan_prefix_json(PASSWORD_HISTORY, user_id, Some(n))
    }
}
