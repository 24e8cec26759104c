// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ORASS policy → ASACI edition request.

use chrono::NaiveDate;

use super::types::{CertificateType, EditionRequest, SubscriberType};
use crate::error::ApiError;
use crate::orass::PolicyRecord;

/// Country calling code prepended to local numbers (Côte d'Ivoire).
pub const DEFAULT_COUNTRY_CODE: &str = "225";

/// Values that come from configuration and the caller rather than ORASS.
#[derive(Debug, Clone)]
pub struct MappingContext {
    pub office_code: String,
    pub organization_code: String,
    pub certificate_type: CertificateType,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("Policy is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Validity period is empty: {starts} to {ends}")]
    InvalidPeriod { starts: NaiveDate, ends: NaiveDate },
}

impl MappingError {
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::MissingFields(_) => "mapping_missing_fields",
            MappingError::InvalidField { .. } => "mapping_invalid_field",
            MappingError::InvalidPeriod { .. } => "mapping_invalid_period",
        }
    }
}

impl From<MappingError> for ApiError {
    fn from(err: MappingError) -> Self {
        let details = match &err {
            MappingError::MissingFields(fields) => serde_json::json!({ "missing_fields": fields }),
            MappingError::InvalidField { field, value } => {
                serde_json::json!({ "field": field, "value": value })
            }
            MappingError::InvalidPeriod { starts, ends } => {
                serde_json::json!({ "starts_at": starts, "ends_at": ends })
            }
        };
        ApiError::unprocessable(err.to_string()).with_details(details)
    }
}

/// Collects missing required fields so they can be reported together.
#[derive(Default)]
struct Required {
    missing: Vec<String>,
}

impl Required {
    fn text(&mut self, field: &str, value: Option<&String>) -> String {
        match value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => {
                self.missing.push(field.to_string());
                String::new()
            }
        }
    }

    fn phone(&mut self, field: &str, value: Option<&String>) -> String {
        match value.and_then(|v| normalize_phone(v)) {
            Some(v) => v,
            None => {
                self.missing.push(field.to_string());
                String::new()
            }
        }
    }

    fn date(&mut self, field: &str, value: Option<NaiveDate>) -> Option<NaiveDate> {
        if value.is_none() {
            self.missing.push(field.to_string());
        }
        value
    }
}

fn present(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.trim().is_empty())
}

fn optional(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Digits only, international prefix stripped, country code prepended.
/// `None` when nothing dialable is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.strip_prefix("00").unwrap_or(&digits);
    if digits.len() < 8 {
        return None;
    }
    if digits.starts_with(DEFAULT_COUNTRY_CODE) && digits.len() > 10 {
        Some(digits.to_string())
    } else {
        Some(format!("{DEFAULT_COUNTRY_CODE}{digits}"))
    }
}

fn subscriber_type(raw: Option<&String>) -> Result<SubscriberType, MappingError> {
    match raw.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
        None | Some("") | Some("P") => Ok(SubscriberType::Physical),
        Some("M") => Ok(SubscriberType::Moral),
        Some(other) => Err(MappingError::InvalidField {
            field: "subscriber_type",
            value: other.to_string(),
        }),
    }
}

pub fn map_policy_to_edition(
    policy: &PolicyRecord,
    ctx: &MappingContext,
) -> Result<EditionRequest, MappingError> {
    let mut req = Required::default();

    let subscriber_name = req.text("subscriber_name", policy.subscriber_name.as_ref());
    let subscriber_phone = req.phone("subscriber_phone", policy.subscriber_phone.as_ref());
    // the insured defaults to the subscriber when ORASS leaves it blank
    let insured_name = req.text(
        "insured_name",
        present(&policy.insured_name).or(policy.subscriber_name.as_ref()),
    );
    let insured_phone = req.phone(
        "insured_phone",
        present(&policy.insured_phone).or(policy.subscriber_phone.as_ref()),
    );

    let registration_number = req.text("registration_number", policy.registration_number.as_ref());
    let vehicle_make = req.text("vehicle_make", policy.vehicle_make.as_ref());
    let vehicle_type = req.text("vehicle_type", policy.vehicle_type.as_ref());
    let vehicle_genre = req.text("vehicle_genre", policy.vehicle_genre.as_ref());
    let vehicle_category = req.text("vehicle_category", policy.vehicle_category.as_ref());
    let vehicle_usage = req.text("vehicle_usage", policy.vehicle_usage.as_ref());

    let starts = req.date("effective_date", policy.effective_date);
    let ends = req.date("expiry_date", policy.expiry_date);

    if !req.missing.is_empty() {
        return Err(MappingError::MissingFields(req.missing));
    }
    let (Some(starts), Some(ends)) = (starts, ends) else {
        return Err(MappingError::MissingFields(vec![
            "effective_date".to_string(),
            "expiry_date".to_string(),
        ]));
    };
    if ends <= starts {
        return Err(MappingError::InvalidPeriod { starts, ends });
    }

    Ok(EditionRequest {
        office_code: ctx.office_code.clone(),
        organization_code: ctx.organization_code.clone(),
        certificate_type: ctx.certificate_type,
        certificate_variant: ctx.certificate_type.colour().to_string(),
        policy_number: policy.policy_number.trim().to_string(),
        endorsement_number: optional(policy.endorsement_number.as_ref()),
        intermediary_code: optional(policy.intermediary_code.as_ref()),

        subscriber_type: subscriber_type(policy.subscriber_type.as_ref())?,
        subscriber_name,
        subscriber_phone,
        subscriber_email: optional(policy.subscriber_email.as_ref()),
        subscriber_postal_box: optional(policy.subscriber_postal_box.as_ref()),

        insured_name,
        insured_phone,
        insured_email: optional(policy.insured_email.as_ref()),
        insured_postal_box: optional(policy.insured_postal_box.as_ref()),

        registration_number: registration_number.to_ascii_uppercase(),
        chassis_number: optional(policy.chassis_number.as_ref()),
        vehicle_make,
        vehicle_model: optional(policy.vehicle_model.as_ref()),
        vehicle_type,
        vehicle_genre,
        vehicle_category,
        vehicle_usage,
        vehicle_energy: optional(policy.vehicle_energy.as_ref()),
        vehicle_seats: policy.vehicle_seats,
        vehicle_fiscal_power: policy.vehicle_fiscal_power,
        vehicle_payload: policy.vehicle_payload,

        starts_at: starts.format("%Y-%m-%d").to_string(),
        ends_at: ends.format("%Y-%m-%d").to_string(),
        rc_premium: policy.rc_premium,
        fleet_reduction: policy.fleet_reduction,
        circulation_zone: optional(policy.circulation_zone.as_ref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeOrass;

    fn ctx(certificate_type: CertificateType) -> MappingContext {
        MappingContext {
            office_code: "OFF-01".to_string(),
            organization_code: "ORG-01".to_string(),
            certificate_type,
        }
    }

    #[test]
    fn maps_complete_policy() {
        let policy = FakeOrass::policy("POL-1");
        let edition = map_policy_to_edition(&policy, &ctx(CertificateType::PoolTpv)).unwrap();

        assert_eq!(edition.policy_number, "POL-1");
        assert_eq!(edition.certificate_variant, "pool-tpv-rouge");
        assert_eq!(edition.office_code, "OFF-01");
        assert_eq!(edition.subscriber_type, SubscriberType::Physical);
        assert_eq!(edition.subscriber_phone, "2250701020304");
        assert_eq!(edition.starts_at, "2025-01-01");
        assert_eq!(edition.ends_at, "2025-12-31");
    }

    #[test]
    fn reports_every_missing_field() {
        let policy = PolicyRecord {
            policy_number: "POL-2".to_string(),
            ..Default::default()
        };
        let err = map_policy_to_edition(&policy, &ctx(CertificateType::Cima)).unwrap_err();
        let MappingError::MissingFields(fields) = err else {
            panic!("expected missing fields");
        };
        assert!(fields.contains(&"subscriber_name".to_string()));
        assert!(fields.contains(&"registration_number".to_string()));
        assert!(fields.contains(&"effective_date".to_string()));
        assert!(fields.contains(&"expiry_date".to_string()));
        assert_eq!(fields.len(), 12);
    }

    #[test]
    fn insured_falls_back_to_subscriber() {
        let mut policy = FakeOrass::policy("POL-1");
        policy.insured_name = None;
        policy.insured_phone = Some("  ".to_string());
        policy.subscriber_type = Some("m".to_string());

        let edition = map_policy_to_edition(&policy, &ctx(CertificateType::Matca)).unwrap();
        assert_eq!(edition.insured_name, edition.subscriber_name);
        assert_eq!(edition.subscriber_type, SubscriberType::Moral);
    }

    #[test]
    fn rejects_inverted_period() {
        let mut policy = FakeOrass::policy("POL-1");
        policy.expiry_date = policy.effective_date;
        let err = map_policy_to_edition(&policy, &ctx(CertificateType::Cima)).unwrap_err();
        assert!(matches!(err, MappingError::InvalidPeriod { .. }));
    }

    #[test]
    fn rejects_unknown_subscriber_type() {
        let mut policy = FakeOrass::policy("POL-1");
        policy.subscriber_type = Some("X".to_string());
        let err = map_policy_to_edition(&policy, &ctx(CertificateType::Cima)).unwrap_err();
        assert_eq!(err.code(), "mapping_invalid_field");
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("07 01 02 03 04").as_deref(), Some("2250701020304"));
        assert_eq!(normalize_phone("+225 07 01 02 03 04").as_deref(), Some("2250701020304"));
        assert_eq!(normalize_phone("00225-0701020304").as_deref(), Some("2250701020304"));
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn missing_fields_are_unprocessable() {
        let err = ApiError::from(MappingError::MissingFields(vec!["vehicle_make".into()]));
        assert_eq!(err.status, axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.details.unwrap()["missing_fields"][0], "vehicle_make");
    }
}
