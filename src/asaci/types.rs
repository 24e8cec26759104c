// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ASACI request and response types.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Kind of attestation ASACI can edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum CertificateType {
    /// Yellow CIMA card.
    #[serde(rename = "cima")]
    Cima,
    /// Red pool TPV card.
    #[serde(rename = "pooltpv")]
    PoolTpv,
    /// Blue pool TPV card.
    #[serde(rename = "pooltpvbleu")]
    PoolTpvBleu,
    /// Green MATCA card.
    #[serde(rename = "matca")]
    Matca,
}

impl CertificateType {
    pub const ALL: [CertificateType; 4] = [
        CertificateType::Cima,
        CertificateType::PoolTpv,
        CertificateType::PoolTpvBleu,
        CertificateType::Matca,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            CertificateType::Cima => "cima",
            CertificateType::PoolTpv => "pooltpv",
            CertificateType::PoolTpvBleu => "pooltpvbleu",
            CertificateType::Matca => "matca",
        }
    }

    /// Card colour sent as `certificate_variant`.
    pub fn colour(&self) -> &'static str {
        match self {
            CertificateType::Cima => "cima-jaune",
            CertificateType::PoolTpv => "pool-tpv-rouge",
            CertificateType::PoolTpvBleu => "pool-tpv-bleu",
            CertificateType::Matca => "matca-verte",
        }
    }

    /// Accepts the code, the colour, or common spellings (`POOL_TPV`, ...).
    pub fn parse(s: &str) -> Option<CertificateType> {
        let norm: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "cima" | "cimajaune" | "jaune" => Some(CertificateType::Cima),
            "pooltpv" | "pooltpvrouge" | "rouge" => Some(CertificateType::PoolTpv),
            "pooltpvbleu" | "bleu" => Some(CertificateType::PoolTpvBleu),
            "matca" | "matcaverte" | "verte" => Some(CertificateType::Matca),
            _ => None,
        }
    }
}

impl std::fmt::Display for CertificateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberType {
    /// Natural person (`P` in ORASS).
    Physical,
    /// Legal entity (`M` in ORASS).
    Moral,
}

/// Body of `POST /api/v1/productions`: one vehicle, one attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EditionRequest {
    pub office_code: String,
    pub organization_code: String,
    pub certificate_type: CertificateType,
    pub certificate_variant: String,
    pub policy_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsement_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediary_code: Option<String>,

    pub subscriber_type: SubscriberType,
    pub subscriber_name: String,
    pub subscriber_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_postal_box: Option<String>,

    pub insured_name: String,
    pub insured_phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insured_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insured_postal_box: Option<String>,

    pub registration_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chassis_number: Option<String>,
    pub vehicle_make: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_model: Option<String>,
    pub vehicle_type: String,
    pub vehicle_genre: String,
    pub vehicle_category: String,
    pub vehicle_usage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_energy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_seats: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_fiscal_power: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_payload: Option<f64>,

    /// `YYYY-MM-DD`
    pub starts_at: String,
    /// `YYYY-MM-DD`
    pub ends_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc_premium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_reduction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circulation_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProductionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AsaciCertificate {
    pub reference: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub certificate_type: Option<String>,
    #[serde(default)]
    pub policy_number: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductionResponse {
    pub reference: String,
    pub status: ProductionStatus,
    #[serde(default)]
    pub certificates: Vec<AsaciCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Filters for `GET /api/v1/certificates`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CertificateQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CertificateList {
    pub items: Vec<AsaciCertificate>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CertificateTypeInfo {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of the cancel and suspend calls.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, validator::Validate)]
pub struct StatusChangeRequest {
    #[validate(length(min = 3, max = 500, message = "Reason must be 3-500 characters"))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_type_codes_and_colours() {
        assert_eq!(serde_json::to_string(&CertificateType::PoolTpvBleu).unwrap(), "\"pooltpvbleu\"");
        assert_eq!(CertificateType::Matca.colour(), "matca-verte");
        assert_eq!(CertificateType::parse("POOL_TPV"), Some(CertificateType::PoolTpv));
        assert_eq!(CertificateType::parse("cima-jaune"), Some(CertificateType::Cima));
        assert_eq!(CertificateType::parse("brown"), None);
    }

    #[test]
    fn unknown_production_status_is_tolerated() {
        let resp: ProductionResponse =
            serde_json::from_str(r#"{"reference":"P-1","status":"queued"}"#).unwrap();
        assert_eq!(resp.status, ProductionStatus::Unknown);
        assert!(resp.certificates.is_empty());
    }
}
