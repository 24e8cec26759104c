// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Permissions and the built-in roles.
//!
//! Roles are stored records (see `storage::repository::roles`) holding a set
//! of [`Permission`]s. The four [`SystemRole`]s are seeded at startup and
//! cannot be deleted or renamed; their permission sets stay editable.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single grantable capability.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Permission {
    #[serde(rename = "users:read")]
    UsersRead,
    #[serde(rename = "users:write")]
    UsersWrite,
    #[serde(rename = "roles:manage")]
    RolesManage,
    #[serde(rename = "certificates:create")]
    CertificatesCreate,
    #[serde(rename = "certificates:read")]
    CertificatesRead,
    /// Cancel, suspend and retry certificates.
    #[serde(rename = "certificates:manage")]
    CertificatesManage,
    #[serde(rename = "orass:read")]
    OrassRead,
    #[serde(rename = "asaci:read")]
    AsaciRead,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "system:health")]
    SystemHealth,
}

impl Permission {
    pub const ALL: [Permission; 10] = [
        Permission::UsersRead,
        Permission::UsersWrite,
        Permission::RolesManage,
        Permission::CertificatesCreate,
        Permission::CertificatesRead,
        Permission::CertificatesManage,
        Permission::OrassRead,
        Permission::AsaciRead,
        Permission::AuditRead,
        Permission::SystemHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UsersRead => "users:read",
            Permission::UsersWrite => "users:write",
            Permission::RolesManage => "roles:manage",
            Permission::CertificatesCreate => "certificates:create",
            Permission::CertificatesRead => "certificates:read",
            Permission::CertificatesManage => "certificates:manage",
            Permission::OrassRead => "orass:read",
            Permission::AsaciRead => "asaci:read",
            Permission::AuditRead => "audit:read",
            Permission::SystemHealth => "system:health",
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles seeded into every store.
///
/// ## Role Hierarchy
///
/// - `Admin` - Every permission
/// - `Supervisor` - Everything except user and role administration
/// - `Operator` - Requests certificates and reads policies
/// - `Viewer` - Read-only access to certificates and policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemRole {
    Admin,
    Supervisor,
    Operator,
    Viewer,
}

impl SystemRole {
    pub const ALL: [SystemRole; 4] = [
        SystemRole::Admin,
        SystemRole::Supervisor,
        SystemRole::Operator,
        SystemRole::Viewer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SystemRole::Admin => "admin",
            SystemRole::Supervisor => "supervisor",
            SystemRole::Operator => "operator",
            SystemRole::Viewer => "viewer",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SystemRole::Admin => "Full administrative access",
            SystemRole::Supervisor => "Oversees certificate issuance and audit trails",
            SystemRole::Operator => "Requests certificates from ORASS policies",
            SystemRole::Viewer => "Read-only access to certificates and policies",
        }
    }

    /// Default permission set.
    pub fn permissions(&self) -> BTreeSet<Permission> {
        use Permission::*;
        match self {
            SystemRole::Admin => Permission::ALL.into_iter().collect(),
            SystemRole::Supervisor => Permission::ALL
                .into_iter()
                .filter(|p| !matches!(p, UsersWrite | RolesManage))
                .collect(),
            SystemRole::Operator => [CertificatesCreate, CertificatesRead, OrassRead, AsaciRead]
                .into_iter()
                .collect(),
            SystemRole::Viewer => [CertificatesRead, OrassRead].into_iter().collect(),
        }
    }

    /// Parse a role name (case-insensitive).
    pub fn from_name(s: &str) -> Option<SystemRole> {
        SystemRole::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for SystemRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
