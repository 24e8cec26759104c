// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the embedded store.
//!
//! Each repository provides CRUD operations for a specific entity type and
//! borrows the [`Database`](super::Database) for every call.

pub mod certificates;
pub mod password_history;
pub mod roles;
pub mod tokens;
pub mod users;

pub use certificates::{
    CertificateRequest, CertificateRequestFilter, CertificateRequestRepository, DailyCount,
    IssuedCertificate, RequestError,
};
pub use password_history::{PasswordHistoryEntry, PasswordHistoryRepository};
pub use roles::{RoleRepository, StoredRole};
pub use tokens::TokenRevocationRepository;
pub use users::{normalize_email, StoredUser, UserFilter, UserRepository, UserStatus};
