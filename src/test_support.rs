// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fakes and helpers shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::NaiveDate;
use tokio::sync::Notify;

use crate::asaci::{
    map_policy_to_edition, AsaciApi, AsaciCertificate, AsaciError, CertificateList,
    CertificateQuery, CertificateType, CertificateTypeInfo, CircuitState, EditionRequest,
    MappingContext, ProductionResponse, ProductionStatus,
};
use crate::orass::{OrassError, OrassSource, PolicyRecord, PolicySearch};
use crate::state::AppState;
use crate::storage::repository::certificates::normalize_policy_number;
use crate::storage::{Database, Page, PageRequest, RoleRepository, StoredUser, UserRepository};

/// Serve `router` on an ephemeral local port; returns `http://127.0.0.1:<port>`.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Create a user with the given system role and a placeholder hash.
pub(crate) fn seed_user(db: &Database, role: &str, email: &str) -> StoredUser {
    RoleRepository::new(db).seed_defaults().unwrap();
    let role = RoleRepository::new(db).get_by_name(role).unwrap().unwrap();
    let user = StoredUser::new(email, "Test User", "not-a-hash".to_string(), role.id);
    UserRepository::new(db).create(&user).unwrap();
    user
}

/// Create a user whose password actually verifies.
pub(crate) async fn seed_account(state: &AppState, role: &str, email: &str, password: &str) -> StoredUser {
    let mut user = seed_user(&state.db, role, email);
    user.password_hash = state.hasher.hash(password).await.unwrap();
    UserRepository::new(&state.db).update(&user).unwrap()
}

/// Access token for `user`.
pub(crate) fn bearer_for(state: &AppState, user: &StoredUser) -> String {
    let role = RoleRepository::new(&state.db).get(&user.role_id).unwrap();
    state.tokens.issue_pair(user, &role).unwrap().access_token
}

/// Edition request built from [`FakeOrass::policy`].
pub(crate) fn sample_edition(certificate_type: CertificateType) -> EditionRequest {
    let ctx = MappingContext {
        office_code: "OFF".to_string(),
        organization_code: "ORG".to_string(),
        certificate_type,
    };
    map_policy_to_edition(&FakeOrass::policy("POL-1"), &ctx).unwrap()
}

/// In-memory policy source counting single-policy lookups.
pub(crate) struct FakeOrass {
    policies: Vec<PolicyRecord>,
    lookups: AtomicUsize,
}

impl FakeOrass {
    pub(crate) fn with_policies(policies: Vec<PolicyRecord>) -> Self {
        Self {
            policies,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Complete, mappable policy.
    pub(crate) fn policy(number: &str) -> PolicyRecord {
        PolicyRecord {
            policy_number: number.to_string(),
            endorsement_number: Some("0".to_string()),
            branch_code: Some("AUTO".to_string()),
            office_code: Some("ABJ".to_string()),
            intermediary_code: Some("INT-7".to_string()),
            subscriber_name: Some("KOUASSI Jean".to_string()),
            subscriber_type: Some("P".to_string()),
            subscriber_phone: Some("07 01 02 03 04".to_string()),
            subscriber_email: Some("jean.kouassi@example.com".to_string()),
            subscriber_postal_box: None,
            insured_name: Some("KOUASSI Jean".to_string()),
            insured_phone: Some("0701020304".to_string()),
            insured_email: None,
            insured_postal_box: None,
            registration_number: Some("1234ab01".to_string()),
            chassis_number: Some("VF1RFB00012345678".to_string()),
            vehicle_make: Some("TOYOTA".to_string()),
            vehicle_model: Some("COROLLA".to_string()),
            vehicle_type: Some("VP".to_string()),
            vehicle_genre: Some("VOITURE".to_string()),
            vehicle_category: Some("01".to_string()),
            vehicle_usage: Some("PROMENADE".to_string()),
            vehicle_energy: Some("ESSENCE".to_string()),
            vehicle_seats: Some(5),
            vehicle_fiscal_power: Some(7),
            vehicle_payload: None,
            effective_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            expiry_date: NaiveDate::from_ymd_opt(2025, 12, 31),
            rc_premium: Some(85_000.0),
            fleet_reduction: None,
            circulation_zone: Some("A".to_string()),
            certificate_type: Some("cima".to_string()),
        }
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrassSource for FakeOrass {
    async fn find_policy(&self, policy_number: &str) -> Result<PolicyRecord, OrassError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted = normalize_policy_number(policy_number);
        self.policies
            .iter()
            .find(|p| normalize_policy_number(&p.policy_number) == wanted)
            .cloned()
            .ok_or(OrassError::NotFound(wanted))
    }

    async fn search_policies(&self, search: &PolicySearch) -> Result<Page<PolicyRecord>, OrassError> {
        let name = search.insured_name.as_ref().map(|n| n.to_lowercase());
        let items = self
            .policies
            .iter()
            .filter(|p| {
                search
                    .policy_number
                    .as_ref()
                    .is_none_or(|n| normalize_policy_number(n) == p.policy_number)
            })
            .filter(|p| {
                name.as_ref().is_none_or(|n| {
                    p.insured_name
                        .as_ref()
                        .is_some_and(|i| i.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();
        Ok(PageRequest::new(search.page, search.per_page).apply(items))
    }

    async fn ping(&self) -> Result<(), OrassError> {
        Ok(())
    }
}

/// Scripted ASACI. Every production resolves to the configured outcome.
pub(crate) struct FakeAsaci {
    outcome: Mutex<Result<ProductionStatus, AsaciError>>,
    circuit: Mutex<Option<CircuitState>>,
    submissions: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeAsaci {
    pub(crate) fn new(status: ProductionStatus) -> Self {
        Self {
            outcome: Mutex::new(Ok(status)),
            circuit: Mutex::new(Some(CircuitState::Closed)),
            submissions: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub(crate) fn failing(err: AsaciError) -> Self {
        Self {
            outcome: Mutex::new(Err(err)),
            circuit: Mutex::new(Some(CircuitState::Closed)),
            submissions: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub(crate) fn set_outcome(&self, outcome: Result<ProductionStatus, AsaciError>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub(crate) fn set_circuit(&self, state: Option<CircuitState>) {
        *self.circuit.lock().unwrap() = state;
    }

    /// Make `create_production` wait until the returned gate is notified.
    pub(crate) fn hold_submissions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> Result<ProductionStatus, AsaciError> {
        self.outcome.lock().unwrap().clone()
    }

    fn certificate(reference: &str, status: &str) -> AsaciCertificate {
        AsaciCertificate {
            reference: reference.to_string(),
            number: Some("0000001".to_string()),
            status: status.to_string(),
            certificate_type: Some("cima".to_string()),
            policy_number: Some("POL-1".to_string()),
            registration_number: Some("1234AB01".to_string()),
            download_url: Some(format!("https://asaci.test/certificates/{reference}/download")),
            issued_at: None,
        }
    }

    fn production(&self, reference: String) -> Result<ProductionResponse, AsaciError> {
        let status = self.outcome()?;
        let certificates = if status == ProductionStatus::Completed {
            vec![Self::certificate(&format!("CERT-{reference}"), "active")]
        } else {
            Vec::new()
        };
        let message = (status == ProductionStatus::Failed).then(|| "Vehicle already insured".to_string());
        Ok(ProductionResponse {
            reference,
            status,
            certificates,
            message,
        })
    }
}

#[async_trait]
impl AsaciApi for FakeAsaci {
    async fn create_production(&self, request: &EditionRequest) -> Result<ProductionResponse, AsaciError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.production(format!("PRD-{}", request.policy_number))
    }

    async fn get_production(&self, reference: &str) -> Result<ProductionResponse, AsaciError> {
        self.production(reference.to_string())
    }

    async fn list_certificates(&self, query: &CertificateQuery) -> Result<CertificateList, AsaciError> {
        self.outcome()?;
        Ok(CertificateList {
            items: vec![Self::certificate("C-1", "active")],
            page: query.page.unwrap_or(1),
            per_page: query.per_page.unwrap_or(20),
            total: 1,
        })
    }

    async fn get_certificate(&self, reference: &str) -> Result<AsaciCertificate, AsaciError> {
        if reference == "missing" {
            return Err(AsaciError::Api {
                status: 404,
                message: "Certificate not found".to_string(),
            });
        }
        Ok(Self::certificate(reference, "active"))
    }

    async fn download_certificate(&self, _reference: &str) -> Result<Vec<u8>, AsaciError> {
        Ok(b"%PDF-1.4 test".to_vec())
    }

    async fn cancel_certificate(&self, reference: &str, _reason: &str) -> Result<AsaciCertificate, AsaciError> {
        Ok(Self::certificate(reference, "cancelled"))
    }

    async fn suspend_certificate(&self, reference: &str, _reason: &str) -> Result<AsaciCertificate, AsaciError> {
        Ok(Self::certificate(reference, "suspended"))
    }

    async fn certificate_types(&self) -> Result<Vec<CertificateTypeInfo>, AsaciError> {
        Ok(CertificateType::ALL
            .iter()
            .map(|t| CertificateTypeInfo {
                code: t.code().to_string(),
                name: t.colour().to_string(),
                description: None,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), AsaciError> {
        self.outcome().map(|_| ())
    }

    async fn circuit_state(&self) -> Option<CircuitState> {
        *self.circuit.lock().unwrap()
    }
}
