// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # ORASS Policy Source
//!
//! ORASS is the Oracle database holding insurance policies. It is reached
//! through Oracle REST Data Services ([`OrdsClient`]), optionally behind an
//! LRU cache ([`CachedPolicySource`]). Everything else depends on the
//! [`OrassSource`] trait only.

pub mod cache;
pub mod client;
pub mod error;
pub mod query;
pub mod types;

use async_trait::async_trait;

pub use cache::CachedPolicySource;
pub use client::OrdsClient;
pub use error::OrassError;
pub use query::{PolicyQuery, Statement};
pub use types::{PolicyRecord, PolicySearch};

use crate::storage::Page;

#[async_trait]
pub trait OrassSource: Send + Sync {
    /// Policy by number; [`OrassError::NotFound`] when absent.
    async fn find_policy(&self, policy_number: &str) -> Result<PolicyRecord, OrassError>;

    async fn search_policies(&self, search: &PolicySearch) -> Result<Page<PolicyRecord>, OrassError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), OrassError>;
}

/// Stand-in used when `ORASS_GATEWAY_URL` is unset.
pub struct DisabledOrass;

#[async_trait]
impl OrassSource for DisabledOrass {
    async fn find_policy(&self, _policy_number: &str) -> Result<PolicyRecord, OrassError> {
        Err(OrassError::NotConfigured)
    }

    async fn search_policies(&self, _search: &PolicySearch) -> Result<Page<PolicyRecord>, OrassError> {
        Err(OrassError::NotConfigured)
    }

    async fn ping(&self) -> Result<(), OrassError> {
        Err(OrassError::NotConfigured)
    }
}
