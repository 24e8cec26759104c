// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Process startup: store, seed data, backends and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api;
use crate::asaci::{AsaciApi, AsaciClient, AsaciError, CircuitBreaker, DisabledAsaci};
use crate::auth::password::ensure_strength;
use crate::auth::{PasswordError, PasswordHasher};
use crate::certify::RetryPoller;
use crate::config::{AppConfig, SeedAdmin};
use crate::orass::{CachedPolicySource, DisabledOrass, OrassError, OrassSource, OrdsClient};
use crate::state::AppState;
use crate::storage::{
    AuditAction, AuditRepository, Database, DbError, OperationLog, PasswordHistoryRepository,
    RoleRepository, StoredUser, UserRepository,
};

/// In-flight requests get this long to finish after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

const SEED_ADMIN_NAME: &str = "Administrator";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("seed admin: {0}")]
    SeedAdmin(#[from] PasswordError),

    #[error("ORASS client: {0}")]
    Orass(#[from] OrassError),

    #[error("ASACI client: {0}")]
    Asaci(#[from] AsaciError),

    #[error("invalid bind address {0}")]
    BindAddress(String),

    #[error("TLS material: {0}")]
    Tls(std::io::Error),

    #[error("server: {0}")]
    Server(std::io::Error),
}

/// ORASS gateway behind the policy cache, or the disabled stand-in.
pub fn build_orass(config: &AppConfig) -> Result<Arc<dyn OrassSource>, OrassError> {
    match &config.orass {
        Some(settings) => {
            let client: Arc<dyn OrassSource> = Arc::new(OrdsClient::new(settings)?);
            info!(
                gateway = %settings.gateway_url,
                cache_capacity = settings.cache_capacity,
                "ORASS gateway configured"
            );
            Ok(Arc::new(CachedPolicySource::new(
                client,
                settings.cache_capacity,
                settings.cache_ttl,
            )))
        }
        None => {
            warn!("ORASS is not configured; policy lookups will fail");
            Ok(Arc::new(DisabledOrass))
        }
    }
}

pub fn build_asaci(config: &AppConfig) -> Result<Arc<dyn AsaciApi>, AsaciError> {
    match &config.asaci {
        Some(settings) => {
            let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
            info!(base_url = %settings.base_url, "ASACI API configured");
            Ok(Arc::new(AsaciClient::new(settings, breaker)?))
        }
        None => {
            warn!("ASACI is not configured; certificate issuance will fail");
            Ok(Arc::new(DisabledAsaci))
        }
    }
}

/// Create the configured administrator when the user table is empty.
///
/// Returns the new account, or `None` when users already exist.
pub async fn seed_admin(
    db: &Database,
    hasher: &PasswordHasher,
    seed: &SeedAdmin,
) -> Result<Option<StoredUser>, BootstrapError> {
    let users = UserRepository::new(db);
    if users.count()? > 0 {
        return Ok(None);
    }

    ensure_strength(&seed.password)?;
    let role = RoleRepository::new(db)
        .get_by_name("admin")?
        .ok_or_else(|| DbError::NotFound("role admin".to_string()))?;

    let hash = hasher.hash(&seed.password).await?;
    let user = StoredUser::new(&seed.email, SEED_ADMIN_NAME, hash, role.id);
    users.create(&user)?;
    PasswordHistoryRepository::new(db).record(&user.id, &user.password_hash)?;
    AuditRepository::new(db).record(
        OperationLog::new(AuditAction::UserCreate)
            .with_email(&user.email)
            .with_resource("user", &user.id)
            .with_details(serde_json::json!({ "source": "seed_admin" })),
    );

    info!(user_id = %user.id, email = %user.email, "seeded administrator account");
    Ok(Some(user))
}

/// Open the store, seed it and wire the backends into an [`AppState`].
pub async fn build_state(config: AppConfig) -> Result<AppState, BootstrapError> {
    let path = config.database_path();
    let db = Database::open(&path)?;
    info!(path = %path.display(), "database opened");

    let created = RoleRepository::new(&db).seed_defaults()?;
    if created > 0 {
        info!(created, "seeded system roles");
    }

    let orass = build_orass(&config)?;
    let asaci = build_asaci(&config)?;
    let state = AppState::new(config, db, orass, asaci);

    if let Some(seed) = &state.config.seed_admin {
        seed_admin(&state.db, &state.hasher, seed).await?;
    }
    Ok(state)
}

/// Run the server until SIGINT/SIGTERM, then drain and stop the poller.
pub async fn serve(config: AppConfig) -> Result<(), BootstrapError> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| BootstrapError::BindAddress(format!("{}:{}", config.host, config.port)))?;
    let tls = config.tls.clone();

    let state = build_state(config).await?;
    let shutdown = CancellationToken::new();

    let poller = RetryPoller::new(state.db.clone(), state.certify.clone());
    let poller_task = tokio::spawn(poller.run(shutdown.clone()));

    let app = api::router(state);
    let handle = axum_server::Handle::new();
    let signal_handle = handle.clone();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
        signal_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    let served = match tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .map_err(BootstrapError::Tls)?;
            info!(%addr, "Certify-Link listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            warn!(%addr, "TLS is not configured; serving plain http");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    shutdown.cancel();
    if poller_task.await.is_err() {
        warn!("retry poller task panicked");
    }
    served.map_err(BootstrapError::Server)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
