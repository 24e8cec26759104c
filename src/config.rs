// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup and passed to
//! the rest of the application through [`AppConfig`].
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `certify-link.redb` | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files enabling TLS | unset |
//! | `JWT_ACCESS_SECRET` | HS256 secret for access tokens (>= 32 bytes) | Required |
//! | `JWT_REFRESH_SECRET` | HS256 secret for refresh tokens (>= 32 bytes) | Required |
//! | `JWT_ISSUER` | `iss` claim | `certify-link` |
//! | `ACCESS_TOKEN_TTL_SECS` | Access token lifetime | `900` |
//! | `REFRESH_TOKEN_TTL_SECS` | Refresh token lifetime | `604800` |
//! | `AUTH_ALLOW_REGISTRATION` | Open self-registration | `true` |
//! | `AUTH_DEFAULT_ROLE` | Role of self-registered users | `viewer` |
//! | `AUTH_MAX_FAILED_ATTEMPTS` | Failed logins before lockout | `5` |
//! | `AUTH_LOCKOUT_MINUTES` | Lockout duration | `15` |
//! | `AUTH_PASSWORD_HISTORY_DEPTH` | Previous passwords that cannot be reused | `5` |
//! | `TOTP_ISSUER` | Issuer label in otpauth URLs | `Certify-Link` |
//! | `ASACI_BASE_URL` | ASACI API base URL | unset (ASACI disabled) |
//! | `ASACI_EMAIL` / `ASACI_PASSWORD` | ASACI credentials | Required with base URL |
//! | `ASACI_CLIENT_NAME` | Client name sent when requesting a token | `certify-link` |
//! | `ASACI_OFFICE_CODE` / `ASACI_ORGANIZATION_CODE` | Producer identifiers | Required with base URL |
//! | `ASACI_TIMEOUT_SECS` | Outbound request timeout | `30` |
//! | `ORASS_GATEWAY_URL` | ORDS base URL | unset (ORASS disabled) |
//! | `ORASS_SCHEMA` / `ORASS_USERNAME` / `ORASS_PASSWORD` | ORDS schema alias and credentials | Required with gateway |
//! | `ORASS_POLICY_VIEW` | View queried for policies | `V_CERTIFY_POLICIES` |
//! | `ORASS_CACHE_TTL_SECS` / `ORASS_CACHE_CAPACITY` | Policy cache | `300` / `512` |
//! | `CIRCUIT_BREAKER_FAILURE_THRESHOLD` | Consecutive failures that open the breaker | `5` |
//! | `CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECS` | Open to half-open delay | `60` |
//! | `CIRCUIT_BREAKER_HALF_OPEN_MAX_REQUESTS` | Probes allowed while half-open | `3` |
//! | `RETRY_POLL_INTERVAL_SECS` | Retry poller period | `60` |
//! | `RETRY_MAX_ATTEMPTS` | Attempts before a request stops being retried | `5` |
//! | `RETRY_BASE_DELAY_SECS` | Exponential backoff base | `60` |
//! | `SEED_ADMIN_EMAIL` / `SEED_ADMIN_PASSWORD` | Bootstrap admin for an empty store | unset |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// File name of the embedded store inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "certify-link.redb";

/// Minimum length of the HS256 signing secrets.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{section} is partially configured, missing: {missing}")]
    Partial {
        section: &'static str,
        missing: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("expected json or pretty, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub allow_registration: bool,
    pub default_role: String,
    pub max_failed_attempts: u32,
    pub lockout: Duration,
    pub password_history_depth: usize,
    pub totp_issuer: String,
}

#[derive(Debug, Clone)]
pub struct AsaciSettings {
    pub base_url: url::Url,
    pub email: String,
    pub password: String,
    pub client_name: String,
    pub office_code: String,
    pub organization_code: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OrassSettings {
    pub gateway_url: url::Url,
    pub schema: String,
    pub username: String,
    pub password: String,
    pub policy_view: String,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub tls: Option<TlsSettings>,
    pub auth: AuthSettings,
    pub asaci: Option<AsaciSettings>,
    pub orass: Option<OrassSettings>,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub seed_admin: Option<SeedAdmin>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let auth = AuthSettings {
            access_secret: env.secret("JWT_ACCESS_SECRET")?,
            refresh_secret: env.secret("JWT_REFRESH_SECRET")?,
            issuer: env.or_default("JWT_ISSUER", "certify-link"),
            access_ttl: Duration::from_secs(env.parse_or("ACCESS_TOKEN_TTL_SECS", 900)?),
            refresh_ttl: Duration::from_secs(env.parse_or("REFRESH_TOKEN_TTL_SECS", 604_800)?),
            allow_registration: env.parse_or("AUTH_ALLOW_REGISTRATION", true)?,
            default_role: env.or_default("AUTH_DEFAULT_ROLE", "viewer"),
            max_failed_attempts: env.parse_or("AUTH_MAX_FAILED_ATTEMPTS", 5)?,
            lockout: Duration::from_secs(env.parse_or::<u64>("AUTH_LOCKOUT_MINUTES", 15)? * 60),
            password_history_depth: env.parse_or("AUTH_PASSWORD_HISTORY_DEPTH", 5)?,
            totp_issuer: env.or_default("TOTP_ISSUER", "Certify-Link"),
        };

        let asaci = match env.optional("ASACI_BASE_URL") {
            None => None,
            Some(base) => {
                env.require_group(
                    "ASACI",
                    &[
                        "ASACI_EMAIL",
                        "ASACI_PASSWORD",
                        "ASACI_OFFICE_CODE",
                        "ASACI_ORGANIZATION_CODE",
                    ],
                )?;
                Some(AsaciSettings {
                    base_url: parse_url("ASACI_BASE_URL", &base)?,
                    email: env.required("ASACI_EMAIL")?,
                    password: env.required("ASACI_PASSWORD")?,
                    client_name: env.or_default("ASACI_CLIENT_NAME", "certify-link"),
                    office_code: env.required("ASACI_OFFICE_CODE")?,
                    organization_code: env.required("ASACI_ORGANIZATION_CODE")?,
                    timeout: Duration::from_secs(env.parse_or("ASACI_TIMEOUT_SECS", 30)?),
                })
            }
        };

        let orass = match env.optional("ORASS_GATEWAY_URL") {
            None => None,
            Some(gateway) => {
                env.require_group("ORASS", &["ORASS_SCHEMA", "ORASS_USERNAME", "ORASS_PASSWORD"])?;
                let policy_view = env.or_default("ORASS_POLICY_VIEW", "V_CERTIFY_POLICIES");
                if !is_sql_identifier(&policy_view) {
                    return Err(ConfigError::Invalid {
                        var: "ORASS_POLICY_VIEW",
                        reason: "must be a plain (optionally schema-qualified) identifier"
                            .to_string(),
                    });
                }
                Some(OrassSettings {
                    gateway_url: parse_url("ORASS_GATEWAY_URL", &gateway)?,
                    schema: env.required("ORASS_SCHEMA")?,
                    username: env.required("ORASS_USERNAME")?,
                    password: env.required("ORASS_PASSWORD")?,
                    policy_view,
                    cache_ttl: Duration::from_secs(env.parse_or("ORASS_CACHE_TTL_SECS", 300)?),
                    cache_capacity: env.parse_or("ORASS_CACHE_CAPACITY", 512)?,
                })
            }
        };

        let circuit_breaker = CircuitBreakerSettings {
            failure_threshold: env.parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            recovery_timeout: Duration::from_secs(
                env.parse_or("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_SECS", 60)?,
            ),
            half_open_max_requests: env.parse_or("CIRCUIT_BREAKER_HALF_OPEN_MAX_REQUESTS", 3)?,
        };

        let retry = RetrySettings {
            poll_interval: Duration::from_secs(env.parse_or("RETRY_POLL_INTERVAL_SECS", 60)?),
            max_attempts: env.parse_or("RETRY_MAX_ATTEMPTS", 5)?,
            base_delay: Duration::from_secs(env.parse_or("RETRY_BASE_DELAY_SECS", 60)?),
        };

        let tls = match (env.optional("TLS_CERT_PATH"), env.optional("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsSettings {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Partial {
                    section: "TLS",
                    missing: "TLS_KEY_PATH".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Partial {
                    section: "TLS",
                    missing: "TLS_CERT_PATH".to_string(),
                })
            }
        };

        let seed_admin = match (
            env.optional("SEED_ADMIN_EMAIL"),
            env.optional("SEED_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(SeedAdmin { email, password }),
            _ => None,
        };

        Ok(Self {
            host: env.or_default(HOST_ENV, "0.0.0.0"),
            port: env.parse_or(PORT_ENV, 8080)?,
            data_dir: env.or_default(DATA_DIR_ENV, "./data").into(),
            log_format: env.parse_or(LOG_FORMAT_ENV, LogFormat::Pretty)?,
            tls,
            auth,
            asaci,
            orass,
            circuit_breaker,
            retry,
            seed_admin,
        })
    }

    /// Path of the redb file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Configuration with fixed secrets and no external services.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: PathBuf::from("./target/test-data"),
            log_format: LogFormat::Pretty,
            tls: None,
            auth: AuthSettings {
                access_secret: "test-access-secret-0123456789abcdef".to_string(),
                refresh_secret: "test-refresh-secret-0123456789abcdef".to_string(),
                issuer: "certify-link".to_string(),
                access_ttl: Duration::from_secs(900),
                refresh_ttl: Duration::from_secs(604_800),
                allow_registration: true,
                default_role: "viewer".to_string(),
                max_failed_attempts: 3,
                lockout: Duration::from_secs(15 * 60),
                password_history_depth: 3,
                totp_issuer: "Certify-Link".to_string(),
            },
            asaci: None,
            orass: None,
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            seed_admin: None,
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key,
                reason: e.to_string(),
            }),
        }
    }

    fn secret(&self, key: &'static str) -> Result<String, ConfigError> {
        let value = self.required(key)?;
        if value.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: key,
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }
        Ok(value)
    }

    fn require_group(&self, section: &'static str, keys: &[&str]) -> Result<(), ConfigError> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| self.optional(k).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Partial {
                section,
                missing: missing.join(", "),
            })
        }
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<url::Url, ConfigError> {
    url::Url::parse(raw).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

/// `NAME` or `SCHEMA.NAME`, letters, digits, `_`, `$`, `#`.
fn is_sql_identifier(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'))
        })
}
