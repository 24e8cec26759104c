// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single redb file (`certify-link.redb`) under
//! `DATA_DIR`. [`Database`] owns the handle and the table layout; each
//! repository provides typed operations for one entity and borrows the
//! database for the duration of a call.
//!
//! ## Entities
//!
//! ```text
//! users                  StoredUser, unique normalized email
//! roles                  StoredRole, unique name
//! password_history       previous password hashes per user
//! certificate_requests   CertificateRequest, unique (policy, certificate type)
//! certificate_audit_logs status history per request
//! operation_logs         who did what, when, and whether it worked
//! revoked_tokens         jti deny-list until natural expiry
//! ```

use serde::Serialize;
use utoipa::ToSchema;

pub mod audit;
pub mod database;
pub mod repository;

pub use audit::{
    AuditAction, AuditRepository, CertificateAuditLog, CertificateLogFilter, OperationFilter,
    OperationLog, OperationStats,
};
pub use database::{Database, DbError, DbResult};
pub use repository::{
    normalize_email, CertificateRequestFilter, CertificateRequestRepository,
    PasswordHistoryRepository, RoleRepository, StoredRole, StoredUser,
    TokenRevocationRepository, UserFilter, UserRepository, UserStatus,
};

/// Default and maximum page sizes for list endpoints.
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    /// Clamp caller-supplied values: page >= 1, per_page in 1..=100.
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }

    /// Slice an already-filtered, already-sorted result set.
    pub fn apply<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.per_page as usize)
            .collect();
        Page {
            items,
            total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page as u64) as u32
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps_values() {
        assert_eq!(PageRequest::new(None, None), PageRequest::default());
        assert_eq!(
            PageRequest::new(Some(0), Some(1000)),
            PageRequest {
                page: 1,
                per_page: MAX_PER_PAGE
            }
        );
        assert_eq!(PageRequest::new(Some(3), Some(0)).per_page, 1);
    }

    #[test]
    fn apply_slices_and_counts() {
        let page = PageRequest::new(Some(2), Some(3)).apply((1..=8).collect::<Vec<_>>());
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 8);
        assert_eq!(page.total_pages(), 3);

        let past_end = PageRequest::new(Some(5), Some(3)).apply((1..=8).collect::<Vec<_>>());
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 8);
    }
}
