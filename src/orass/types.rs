// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Policy records as read from ORASS.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// One motor insurance policy line (one vehicle).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PolicyRecord {
    pub policy_number: String,
    pub endorsement_number: Option<String>,
    pub branch_code: Option<String>,
    pub office_code: Option<String>,
    pub intermediary_code: Option<String>,

    pub subscriber_name: Option<String>,
    /// `P` (natural person) or `M` (legal entity).
    pub subscriber_type: Option<String>,
    pub subscriber_phone: Option<String>,
    pub subscriber_email: Option<String>,
    pub subscriber_postal_box: Option<String>,

    pub insured_name: Option<String>,
    pub insured_phone: Option<String>,
    pub insured_email: Option<String>,
    pub insured_postal_box: Option<String>,

    pub registration_number: Option<String>,
    pub chassis_number: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_type: Option<String>,
    pub vehicle_genre: Option<String>,
    pub vehicle_category: Option<String>,
    pub vehicle_usage: Option<String>,
    pub vehicle_energy: Option<String>,
    pub vehicle_seats: Option<u32>,
    pub vehicle_fiscal_power: Option<u32>,
    pub vehicle_payload: Option<f64>,

    pub effective_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub rc_premium: Option<f64>,
    pub fleet_reduction: Option<f64>,
    pub circulation_zone: Option<String>,
    /// Attestation kind recorded in ORASS, if any.
    pub certificate_type: Option<String>,
}

/// Row shape returned by ORDS (lowercased column names).
#[derive(Debug, Deserialize)]
pub(crate) struct PolicyRow {
    num_police: String,
    #[serde(default, deserialize_with = "text")]
    num_avenant: Option<String>,
    #[serde(default, deserialize_with = "text")]
    code_branche: Option<String>,
    #[serde(default, deserialize_with = "text")]
    code_agence: Option<String>,
    #[serde(default, deserialize_with = "text")]
    code_intermediaire: Option<String>,
    #[serde(default, deserialize_with = "text")]
    nom_souscripteur: Option<String>,
    #[serde(default, deserialize_with = "text")]
    type_souscripteur: Option<String>,
    #[serde(default, deserialize_with = "text")]
    tel_souscripteur: Option<String>,
    #[serde(default, deserialize_with = "text")]
    email_souscripteur: Option<String>,
    #[serde(default, deserialize_with = "text")]
    bp_souscripteur: Option<String>,
    #[serde(default, deserialize_with = "text")]
    nom_assure: Option<String>,
    #[serde(default, deserialize_with = "text")]
    tel_assure: Option<String>,
    #[serde(default, deserialize_with = "text")]
    email_assure: Option<String>,
    #[serde(default, deserialize_with = "text")]
    bp_assure: Option<String>,
    #[serde(default, deserialize_with = "text")]
    immatriculation: Option<String>,
    #[serde(default, deserialize_with = "text")]
    num_chassis: Option<String>,
    #[serde(default, deserialize_with = "text")]
    marque: Option<String>,
    #[serde(default, deserialize_with = "text")]
    modele: Option<String>,
    #[serde(default, deserialize_with = "text")]
    type_vehicule: Option<String>,
    #[serde(default, deserialize_with = "text")]
    genre_vehicule: Option<String>,
    #[serde(default, deserialize_with = "text")]
    categorie: Option<String>,
    #[serde(default, deserialize_with = "text")]
    usage: Option<String>,
    #[serde(default, deserialize_with = "text")]
    energie: Option<String>,
    #[serde(default)]
    nb_places: Option<f64>,
    #[serde(default)]
    puissance_fiscale: Option<f64>,
    #[serde(default)]
    charge_utile: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    date_effet: Option<String>,
    #[serde(default, deserialize_with = "text")]
    date_echeance: Option<String>,
    #[serde(default)]
    prime_rc: Option<f64>,
    #[serde(default)]
    reduction_flotte: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    zone_circulation: Option<String>,
    #[serde(default, deserialize_with = "text")]
    type_attestation: Option<String>,
}

/// Column list selected from the policy view, in [`PolicyRow`] order.
pub(crate) const POLICY_COLUMNS: &[&str] = &[
    "NUM_POLICE",
    "NUM_AVENANT",
    "CODE_BRANCHE",
    "CODE_AGENCE",
    "CODE_INTERMEDIAIRE",
    "NOM_SOUSCRIPTEUR",
    "TYPE_SOUSCRIPTEUR",
    "TEL_SOUSCRIPTEUR",
    "EMAIL_SOUSCRIPTEUR",
    "BP_SOUSCRIPTEUR",
    "NOM_ASSURE",
    "TEL_ASSURE",
    "EMAIL_ASSURE",
    "BP_ASSURE",
    "IMMATRICULATION",
    "NUM_CHASSIS",
    "MARQUE",
    "MODELE",
    "TYPE_VEHICULE",
    "GENRE_VEHICULE",
    "CATEGORIE",
    "USAGE",
    "ENERGIE",
    "NB_PLACES",
    "PUISSANCE_FISCALE",
    "CHARGE_UTILE",
    "DATE_EFFET",
    "DATE_ECHEANCE",
    "PRIME_RC",
    "REDUCTION_FLOTTE",
    "ZONE_CIRCULATION",
    "TYPE_ATTESTATION",
];

/// Trimmed text; numbers are rendered, blanks become `None`.
fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// ORDS renders DATE columns as ISO timestamps (`2025-01-01T00:00:00Z`).
fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y"))
        .ok()
}

fn whole(n: Option<f64>) -> Option<u32> {
    n.filter(|v| *v >= 0.0 && v.is_finite()).map(|v| v.round() as u32)
}

impl From<PolicyRow> for PolicyRecord {
    fn from(row: PolicyRow) -> Self {
        PolicyRecord {
            policy_number: row.num_police.trim().to_string(),
            endorsement_number: row.num_avenant,
            branch_code: row.code_branche,
            office_code: row.code_agence,
            intermediary_code: row.code_intermediaire,
            subscriber_name: row.nom_souscripteur,
            subscriber_type: row.type_souscripteur,
            subscriber_phone: row.tel_souscripteur,
            subscriber_email: row.email_souscripteur,
            subscriber_postal_box: row.bp_souscripteur,
            insured_name: row.nom_assure,
            insured_phone: row.tel_assure,
            insured_email: row.email_assure,
            insured_postal_box: row.bp_assure,
            registration_number: row.immatriculation,
            chassis_number: row.num_chassis,
            vehicle_make: row.marque,
            vehicle_model: row.modele,
            vehicle_type: row.type_vehicule,
            vehicle_genre: row.genre_vehicule,
            vehicle_category: row.categorie,
            vehicle_usage: row.usage,
            vehicle_energy: row.energie,
            vehicle_seats: whole(row.nb_places),
            vehicle_fiscal_power: whole(row.puissance_fiscale),
            vehicle_payload: row.charge_utile,
            effective_date: parse_date(row.date_effet),
            expiry_date: parse_date(row.date_echeance),
            rc_premium: row.prime_rc,
            fleet_reduction: row.reduction_flotte,
            circulation_zone: row.zone_circulation,
            certificate_type: row.type_attestation,
        }
    }
}

/// Policy search filters.
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PolicySearch {
    /// Exact policy number.
    pub policy_number: Option<String>,
    /// Case-insensitive substring of the insured name.
    #[validate(length(min = 2, max = 100, message = "Insured name must be 2-100 characters"))]
    pub insured_name: Option<String>,
    /// Exact registration number.
    pub registration: Option<String>,
    pub intermediary_code: Option<String>,
    /// Earliest effective date (inclusive).
    pub effective_from: Option<NaiveDate>,
    /// Latest effective date (inclusive).
    pub effective_to: Option<NaiveDate>,
    #[validate(range(min = 1, message = "Page starts at 1"))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100, message = "per_page must be between 1 and 100"))]
    pub per_page: Option<u32>,
}
