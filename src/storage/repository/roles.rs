// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Roles and their permission sets.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::roles::{Permission, SystemRole};
use crate::storage::database::{Database, DbError, DbResult, ROLES, ROLES_BY_NAME, USERS};

use super::users::StoredUser;

/// Role record as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct StoredRole {
    pub id: String,
    /// Lowercase, unique.
    pub name: String,
    pub description: String,
    pub permissions: BTreeSet<Permission>,
    /// Seeded role. Cannot be renamed or deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRole {
    pub fn new(
        name: &str,
        description: impl Into<String>,
        permissions: BTreeSet<Permission>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_lowercase(),
            description: description.into(),
            permissions,
            is_system: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Repository for roles.
pub struct RoleRepository<'a> {
    db: &'a Database,
}

impl<'a> RoleRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a role with a unique name.
    pub fn create(&self, role: &StoredRole) -> DbResult<()> {
        let json = serde_json::to_vec(role)?;
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut by_name = write_txn.open_table(ROLES_BY_NAME)?;
            if by_name.get(role.name.as_str())?.is_some() {
                return Err(DbError::AlreadyExists(format!("Role {}", role.name)));
            }
            let mut roles = write_txn.open_table(ROLES)?;
            roles.insert(role.id.as_str(), json.as_slice())?;
            by_name.insert(role.name.as_str(), role.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, role_id: &str) -> DbResult<StoredRole> {
        self.db
            .get_json(ROLES, role_id)?
            .ok_or_else(|| DbError::NotFound(format!("Role {role_id}")))
    }

    pub fn get_by_name(&self, name: &str) -> DbResult<Option<StoredRole>> {
        let name = name.trim().to_lowercase();
        let role_id = {
            let read_txn = self.db.raw().begin_read()?;
            let table = read_txn.open_table(ROLES_BY_NAME)?;
            match table.get(name.as_str())? {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            }
        };
        self.db.get_json(ROLES, &role_id)
    }

    /// All roles ordered by name.
    pub fn list(&self) -> DbResult<Vec<StoredRole>> {
        let mut roles: Vec<StoredRole> = self.db.scan_json(ROLES)?;
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Update description, permissions and (for custom roles) name.
    pub fn update(&self, role: &StoredRole) -> DbResult<StoredRole> {
        let mut updated = role.clone();
        updated.name = updated.name.trim().to_lowercase();
        updated.updated_at = Utc::now();

        let write_txn = self.db.raw().begin_write()?;
        {
            let mut roles = write_txn.open_table(ROLES)?;
            let existing: StoredRole = {
                let bytes = roles
                    .get(updated.id.as_str())?
                    .ok_or_else(|| DbError::NotFound(format!("Role {}", updated.id)))?;
                serde_json::from_slice(bytes.value())?
            };

            if existing.name != updated.name {
                if existing.is_system {
                    return Err(DbError::Constraint(format!(
                        "System role {} cannot be renamed",
                        existing.name
                    )));
                }
                let mut by_name = write_txn.open_table(ROLES_BY_NAME)?;
                if by_name.get(updated.name.as_str())?.is_some() {
                    return Err(DbError::AlreadyExists(format!("Role {}", updated.name)));
                }
                by_name.remove(existing.name.as_str())?;
                by_name.insert(updated.name.as_str(), updated.id.as_str())?;
            }

            updated.is_system = existing.is_system;
            updated.created_at = existing.created_at;
            let json = serde_json::to_vec(&updated)?;
            roles.insert(updated.id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete a custom role that no user references.
    pub fn delete(&self, role_id: &str) -> DbResult<()> {
        let write_txn = self.db.raw().begin_write()?;
        {
            let mut roles = write_txn.open_table(ROLES)?;
            let role: StoredRole = {
                let bytes = roles
                    .get(role_id)?
                    .ok_or_else(|| DbError::NotFound(format!("Role {role_id}")))?;
                serde_json::from_slice(bytes.value())?
            };
            if role.is_system {
                return Err(DbError::Constraint(format!(
                    "System role {} cannot be deleted",
                    role.name
                )));
            }

            let users = write_txn.open_table(USERS)?;
            for entry in users.iter()? {
                let (_, value) = entry?;
                let user: StoredUser = serde_json::from_slice(value.value())?;
                if user.role_id == role_id {
                    return Err(DbError::Constraint(format!(
                        "Role {} is assigned to at least one user",
                        role.name
                    )));
                }
            }

            let mut by_name = write_txn.open_table(ROLES_BY_NAME)?;
            by_name.remove(role.name.as_str())?;
            roles.remove(role_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Create any missing system role. Existing ones are left untouched so
    /// edited permission sets survive restarts.
    pub fn seed_defaults(&self) -> DbResult<usize> {
        let mut created = 0;
        for system in SystemRole::ALL {
            if self.get_by_name(system.name())?.is_some() {
                continue;
            }
            let mut role =
                StoredRole::new(system.name(), system.description(), system.permissions());
            role.is_system = true;
            self.create(&role)?;
            created += 1;
        }
        if created > 0 {
            tracing::info!(created, "Seeded system roles");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UserRepository;

    #[test]
    fn seed_defaults_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let repo = RoleRepository::new(&db);
        assert_eq!(repo.seed_defaults().unwrap(), 4);
        assert_eq!(repo.seed_defaults().unwrap(), 0);

        let names: Vec<String> = repo.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["admin", "operator", "supervisor", "viewer"]);
        assert!(repo.get_by_name("Admin").unwrap().unwrap().is_system);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let db = Database::in_memory().unwrap();
        let repo = RoleRepository::new(&db);
        repo.create(&StoredRole::new("auditor", "", BTreeSet::new()))
            .unwrap();
        let err = repo
            .create(&StoredRole::new("AUDITOR", "", BTreeSet::new()))
            .unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[test]
    fn system_role_permissions_editable_but_name_fixed() {
        let db = Database::in_memory().unwrap();
        let repo = RoleRepository::new(&db);
        repo.seed_defaults().unwrap();
        let mut viewer = repo.get_by_name("viewer").unwrap().unwrap();

        viewer.permissions.insert(Permission::AuditRead);
        let updated = repo.update(&viewer).unwrap();
        assert!(updated.has_permission(Permission::AuditRead));

        viewer.name = "reader".to_string();
        assert!(matches!(repo.update(&viewer), Err(DbError::Constraint(_))));
    }

    #[test]
    fn rename_custom_role_moves_index() {
        let db = Database::in_memory().unwrap();
        let repo = RoleRepository::new(&db);
        let mut role = StoredRole::new("claims", "Claims desk", BTreeSet::new());
        repo.create(&role).unwrap();

        role.name = "Claims-Desk".to_string();
        repo.update(&role).unwrap();
        assert!(repo.get_by_name("claims").unwrap().is_none());
        assert_eq!(repo.get_by_name("claims-desk").unwrap().unwrap().id, role.id);
    }

    #[test]
    fn delete_rejects_system_and_in_use_roles() {
        let db = Database::in_memory().unwrap();
        let repo = RoleRepository::new(&db);
        repo.seed_defaults().unwrap();

        let admin = repo.get_by_name("admin").unwrap().unwrap();
        assert!(matches!(repo.delete(&admin.id), Err(DbError::Constraint(_))));

        let custom = StoredRole::new("temp", "", BTreeSet::from([Permission::OrassRead]));
        repo.create(&custom).unwrap();
        let user = StoredUser::new("t@example.com", "T", "hash".to_string(), &custom.id);
        UserRepository::new(&db).create(&user).unwrap();
        assert!(matches!(repo.delete(&custom.id), Err(DbError::Constraint(_))));

        let unused = StoredRole::new("unused", "", BTreeSet::new());
        repo.create(&unused).unwrap();
        repo.delete(&unused.id).unwrap();
        assert!(matches!(repo.get(&unused.id), Err(DbError::NotFound(_))));
        assert!(repo.get_by_name("unused").unwrap().is_none());
    }
}
