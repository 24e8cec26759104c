// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Instant;

use crate::asaci::AsaciApi;
use crate::auth::{PasswordHasher, TokenService};
use crate::certify::CertifyLinkService;
use crate::config::AppConfig;
use crate::orass::OrassSource;
use crate::storage::Database;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub tokens: TokenService,
    pub hasher: PasswordHasher,
    pub orass: Arc<dyn OrassSource>,
    pub asaci: Arc<dyn AsaciApi>,
    pub certify: CertifyLinkService,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        orass: Arc<dyn OrassSource>,
        asaci: Arc<dyn AsaciApi>,
    ) -> Self {
        Self::with_hasher(config, db, orass, asaci, PasswordHasher::new())
    }

    pub fn with_hasher(
        config: AppConfig,
        db: Database,
        orass: Arc<dyn OrassSource>,
        asaci: Arc<dyn AsaciApi>,
        hasher: PasswordHasher,
    ) -> Self {
        let certify = CertifyLinkService::new(&config, db.clone(), orass.clone(), asaci.clone());
        Self {
            tokens: TokenService::new(&config.auth),
            config: Arc::new(config),
            db,
            hasher,
            orass,
            asaci,
            certify,
            started_at: Instant::now(),
        }
    }
}

/// In-memory state with seeded roles and fake ORASS/ASACI backends.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::asaci::ProductionStatus;
    use crate::test_support::{FakeAsaci, FakeOrass};

    test_state_with(
        AppConfig::for_tests(),
        Arc::new(FakeOrass::with_policies(vec![
            FakeOrass::policy("POL-1"),
            FakeOrass::policy("POL-2"),
        ])),
        Arc::new(FakeAsaci::new(ProductionStatus::Completed)),
    )
}

#[cfg(test)]
pub(crate) fn test_state_with(
    config: AppConfig,
    orass: Arc<dyn OrassSource>,
    asaci: Arc<dyn AsaciApi>,
) -> AppState {
    let db = Database::in_memory().expect("in-memory database");
    crate::storage::RoleRepository::new(&db)
        .seed_defaults()
        .expect("seed roles");
    AppState::with_hasher(config, db, orass, asaci, crate::auth::password::test_hasher())
}
