// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # ASACI Certificate Provider
//!
//! ASACI edits the attestations. [`AsaciClient`] talks to its REST API behind
//! a [`CircuitBreaker`]; [`mapping`] turns an ORASS policy into the edition
//! request ASACI expects. Callers depend on the [`AsaciApi`] trait.

pub mod breaker;
pub mod client;
pub mod error;
pub mod mapping;
pub mod types;

use async_trait::async_trait;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::AsaciClient;
pub use error::AsaciError;
pub use mapping::{map_policy_to_edition, MappingContext, MappingError};
pub use types::{
    AsaciCertificate, CertificateList, CertificateQuery, CertificateType, CertificateTypeInfo,
    EditionRequest, ProductionResponse, ProductionStatus, StatusChangeRequest, SubscriberType,
};

#[async_trait]
pub trait AsaciApi: Send + Sync {
    /// Submit one edition request.
    async fn create_production(&self, request: &EditionRequest) -> Result<ProductionResponse, AsaciError>;

    async fn get_production(&self, reference: &str) -> Result<ProductionResponse, AsaciError>;

    async fn list_certificates(&self, query: &CertificateQuery) -> Result<CertificateList, AsaciError>;

    async fn get_certificate(&self, reference: &str) -> Result<AsaciCertificate, AsaciError>;

    /// Raw PDF bytes.
    async fn download_certificate(&self, reference: &str) -> Result<Vec<u8>, AsaciError>;

    async fn cancel_certificate(&self, reference: &str, reason: &str) -> Result<AsaciCertificate, AsaciError>;

    async fn suspend_certificate(&self, reference: &str, reason: &str) -> Result<AsaciCertificate, AsaciError>;

    async fn certificate_types(&self) -> Result<Vec<CertificateTypeInfo>, AsaciError>;

    async fn ping(&self) -> Result<(), AsaciError>;

    /// Breaker state, if the implementation has one.
    async fn circuit_state(&self) -> Option<CircuitState> {
        None
    }
}

/// Stand-in used when `ASACI_BASE_URL` is unset.
pub struct DisabledAsaci;

#[async_trait]
impl AsaciApi for DisabledAsaci {
    async fn create_production(&self, _request: &EditionRequest) -> Result<ProductionResponse, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn get_production(&self, _reference: &str) -> Result<ProductionResponse, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn list_certificates(&self, _query: &CertificateQuery) -> Result<CertificateList, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn get_certificate(&self, _reference: &str) -> Result<AsaciCertificate, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn download_certificate(&self, _reference: &str) -> Result<Vec<u8>, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn cancel_certificate(&self, _reference: &str, _reason: &str) -> Result<AsaciCertificate, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn suspend_certificate(&self, _reference: &str, _reason: &str) -> Result<AsaciCertificate, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn certificate_types(&self) -> Result<Vec<CertificateTypeInfo>, AsaciError> {
        Err(AsaciError::NotConfigured)
    }

    async fn ping(&self) -> Result<(), AsaciError> {
        Err(AsaciError::NotConfigured)
    }
}
