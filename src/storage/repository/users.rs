// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User accounts.
//!
//! Emails are stored NFKC-normalized and lowercased; the `users_by_email`
//! table enforces uniqueness. Soft-deleted users keep their email entry, so
//! an address can never be re-registered.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

use crate::storage::database::{Database, DbError, DbResult, ROLES, USERS, USERS_BY_EMAIL};
use crate::storage::{Page, PageRequest};

/// Account status. Deletion is tracked separately through `deleted_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

/// User record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredUser {
    pub id: String,
    /// Normalized email (see [`normalize_email`]).
    pub email: String,
    pub full_name: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role_id: String,
    pub status: UserStatus,
    #[serde(default)]
    pub failed_login_attempts: u32,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub two_factor_enabled: bool,
    /// Base32 TOTP secret once 2FA is enabled.
    #[serde(default)]
    pub two_factor_secret: Option<String>,
    /// Secret issued by setup, waiting for a confirming code.
    #[serde(default)]
    pub two_factor_pending_secret: Option<String>,
    /// Last TOTP step accepted for this user. Codes at or below it are spent.
    #[serde(default)]
    pub totp_last_step: Option<u64>,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredUser {
    /// New active user with a fresh UUID.
    pub fn new(
        email: &str,
        full_name: impl Into<String>,
        password_hash: String,
        role_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            full_name: full_name.into(),
            password_hash,
            role_id: role_id.into(),
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            two_factor_enabled: false,
            two_factor_secret: None,
            two_factor_pending_secret: None,
            totp_last_step: None,
            password_changed_at: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// NFKC, trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}

/// Filters for [`UserRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role_id: Option<String>,
    pub status: Option<UserStatus>,
    /// Case-insensitive match on email or full name.
    pub search: Option<String>,
    pub include_deleted: bool,
}

impl UserFilter {
    fn matches(&self, user: &StoredUser) -> bool {
        if !self.include_deleted && user.is_deleted() {
            return false;
        }
        if let Some(role_id) = &self.role_id {
            if &user.role_id != role_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if user.status != status {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !user.email.contains(&needle) && !user.full_name.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Repository for user accounts.
pub struct UserRepository<'a> {
    db: &'a Database,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a user. The email must be unused and the role must exist.
    pub fn create(&self, user: &StoredUser) -> DbResult<()> {
        let json = serde_json::to_vec(user)?;
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut by_email = write_txn.open_table(USERS_BY_EMAIL)?;
            if by_email.get(user.email.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!(
                    "User with email {}",
                    user.email
                )));
            }

            let roles = write_txn.open_table(ROLES)?;
            if roles.get(user.role_id.as_str())?.is_none() {
                return Err(DbError::Constraint(format!(
                    "Role {} does not exist",
                    user.role_id
                )));
            }

            let mut users = write_txn.open_table(USERS)?;
            if users.get(user.id.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!("User {}", user.id)));
            }
            users.insert(user.id.as_str(), json.as_slice())?;
            by_email.insert(user.email.as_str(), user.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a user by ID, including soft-deleted ones.
    pub fn get(&self, user_id: &str) -> DbResult<StoredUser> {
        self.db
            .get_json(USERS, user_id)?
            .ok_or_else(|| DbError::NotFound(format!("User {user_id}")))
    }

    /// Look up a user by email (normalized before lookup).
    pub fn get_by_email(&self, email: &str) -> DbResult<Option<StoredUser>> {
        let email = normalize_email(email);
        let user_id = {
            let read_txn = self.db.raw().begin_read()?;
            let table = read_txn.open_table(USERS_BY_EMAIL)?;
            match table.get(email.as_str())? {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            }
        };
        self.db.get_json(USERS, &user_id)
    }

    /// Persist changes to an existing user. Email changes re-check uniqueness.
    pub fn update(&self, user: &StoredUser) -> DbResult<StoredUser> {
        let mut updated = user.clone();
        updated.email = normalize_email(&updated.email);
        updated.updated_at = Utc::now();
        let json = serde_json::to_vec(&updated)?;

        let write_txn = self.db.raw().begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let existing: StoredUser = {
                let bytes = users
                    .get(updated.id.as_str())?
                    .ok_or_else(|| DbError::NotFound(format!("User {}", updated.id)))?;
                serde_json::from_slice(bytes.value())?
            };

            let roles = write_txn.open_table(ROLES)?;
            if roles.get(updated.role_id.as_str())?.is_none() {
                return Err(DbError::Constraint(format!(
                    "Role {} does not exist",
                    updated.role_id
                )));
            }

            if existing.email != updated.email {
                let mut by_email = write_txn.open_table(USERS_BY_EMAIL)?;
                if by_email.get(updated.email.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!(
                        "User with email {}",
                        updated.email
                    )));
                }
                by_email.remove(existing.email.as_str())?;
                by_email.insert(updated.email.as_str(), updated.id.as_str())?;
            }

            users.insert(updated.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(updated)
    }

    /// Read-modify-write a single user in one transaction.
    fn modify<F>(&self, user_id: &str, f: F) -> DbResult<StoredUser>
    where
        F: FnOnce(&mut StoredUser) -> DbResult<()>,
    {
        self.modify_if(user_id, |user| f(user).map(|()| true))?
            .ok_or_else(|| DbError::NotFound(format!("User {user_id}")))
    }

    /// Like [`Self::modify`], but nothing is written when `f` returns
    /// `false`.
    fn modify_if<F>(&self, user_id: &str, f: F) -> DbResult<Option<StoredUser>>
    where
        F: FnOnce(&mut StoredUser) -> DbResult<bool>,
    {
        let write_txn = self.db.raw().begin_write()?;
        let user = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user: StoredUser = {
                let bytes = users
                    .get(user_id)?
                    .ok_or_else(|| DbError::NotFound(format!("User {user_id}")))?;
                serde_json::from_slice(bytes.value())?
            };
            if !f(&mut user)? {
                return Ok(None);
            }
            user.updated_at = Utc::now();
            let json = serde_json::to_vec(&user)?;
            users.insert(user_id, json.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(Some(user))
    }

    /// Swap the password hash, provided it is still `current_hash`.
    pub fn replace_password(
        &self,
        user_id: &str,
        current_hash: &str,
        new_hash: String,
    ) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            if user.password_hash != current_hash {
                return Err(DbError::Constraint(
                    "Password was changed by another request".to_string(),
                ));
            }
            user.password_hash = new_hash;
            user.password_changed_at = Utc::now();
            Ok(())
        })
    }

    /// Store a TOTP secret awaiting confirmation.
    pub fn set_pending_two_factor(&self, user_id: &str, secret: String) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            if user.two_factor_enabled {
                return Err(DbError::Constraint(
                    "Two-factor authentication is already enabled".to_string(),
                ));
            }
            user.two_factor_pending_secret = Some(secret);
            Ok(())
        })
    }

    /// Spend TOTP `step` and apply `change` in the same transaction.
    ///
    /// Returns `None`, writing nothing, when `step` is not newer than the
    /// last accepted one.
    pub fn accept_totp_step<F>(
        &self,
        user_id: &str,
        step: u64,
        change: F,
    ) -> DbResult<Option<StoredUser>>
    where
        F: FnOnce(&mut StoredUser) -> DbResult<()>,
    {
        self.modify_if(user_id, |user| {
            if user.totp_last_step.is_some_and(|last| step <= last) {
                return Ok(false);
            }
            user.totp_last_step = Some(step);
            change(user)?;
            Ok(true)
        })
    }

    /// Mark a user deleted. The email stays reserved.
    pub fn soft_delete(&self, user_id: &str) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            if user.is_deleted() {
                return Err(DbError::NotFound(format!("User {}", user.id)));
            }
            user.deleted_at = Some(Utc::now());
            user.status = UserStatus::Disabled;
            Ok(())
        })
    }

    /// Filtered, paginated listing ordered by creation time.
    pub fn list(&self, filter: &UserFilter, page: PageRequest) -> DbResult<Page<StoredUser>> {
        let mut users: Vec<StoredUser> = self
            .db
            .scan_json::<StoredUser>(USERS)?
            .into_iter()
            .filter(|u| filter.matches(u))
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page.apply(users))
    }

    /// Count a failed login. Once `max_attempts` consecutive failures are
    /// reached the account is locked for `lockout`. A lock that has already
    /// expired restarts the count.
    pub fn record_failed_login(
        &self,
        user_id: &str,
        max_attempts: u32,
        lockout: chrono::Duration,
    ) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            let now = Utc::now();
            if user.locked_until.is_some_and(|until| until <= now) {
                user.locked_until = None;
                user.failed_login_attempts = 0;
            }
            user.failed_login_attempts = user.failed_login_attempts.saturating_add(1);
            if max_attempts > 0 && user.failed_login_attempts >= max_attempts {
                user.locked_until = Some(now + lockout);
            }
            Ok(())
        })
    }

    /// Reset the failure counter, clear any lock, stamp `last_login_at`.
    pub fn record_successful_login(&self, user_id: &str) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.last_login_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn unlock(&self, user_id: &str) -> DbResult<StoredUser> {
        self.modify(user_id, |user| {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            Ok(())
        })
    }

    /// Number of users that are not deleted.
    pub fn count(&self) -> DbResult<u64> {
        Ok(self
            .db
            .scan_json::<StoredUser>(USERS)?
            .iter()
            .filter(|u| !u.is_deleted())
            .count() as u64)
    }
}
