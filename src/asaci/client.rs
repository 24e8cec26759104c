// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ASACI HTTP client.
//!
//! A bearer token is obtained from `POST /api/v1/auth/tokens` and cached
//! until a minute before it expires. A 401 on any call drops the cached
//! token and replays the call once with a fresh one. Every call runs
//! through the shared [`CircuitBreaker`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::breaker::{CircuitBreaker, CircuitState};
use super::types::{
    AsaciCertificate, CertificateList, CertificateQuery, CertificateTypeInfo, EditionRequest,
    ProductionResponse,
};
use super::{AsaciApi, AsaciError};
use crate::config::AsaciSettings;

/// Tokens are refreshed this long before their stated expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Assumed lifetime when the token response carries none.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// ASACI wraps most payloads in `{"data": ...}`, but not all of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaybeEnveloped<T> {
    Enveloped { data: T },
    Bare(T),
}

impl<T> MaybeEnveloped<T> {
    fn into_inner(self) -> T {
        match self {
            MaybeEnveloped::Enveloped { data } => data,
            MaybeEnveloped::Bare(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    #[serde(default)]
    current_page: Option<u32>,
    #[serde(default)]
    per_page: Option<u32>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<AsaciCertificate>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct AsaciClient {
    base_url: url::Url,
    email: String,
    password: String,
    client_name: String,
    http: Client,
    breaker: Arc<CircuitBreaker>,
    token: Mutex<Option<CachedToken>>,
}

impl AsaciClient {
    pub fn new(settings: &AsaciSettings, breaker: Arc<CircuitBreaker>) -> Result<Self, AsaciError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| AsaciError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: settings.base_url.clone(),
            email: settings.email.clone(),
            password: settings.password.clone(),
            client_name: settings.client_name.clone(),
            http,
            breaker,
            token: Mutex::new(None),
        })
    }

    /// `{base}/api/v1/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<url::Url, AsaciError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AsaciError::Network("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn access_token(&self, force: bool) -> Result<String, AsaciError> {
        let mut cached = self.token.lock().await;
        if !force {
            if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .post(self.url(&["auth", "tokens"])?)
            .json(&json!({
                "email": self.email,
                "password": self.password,
                "client_name": self.client_name,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AsaciError::Auth(format!(
                "token request returned {status}: {}",
                error_message(&body)
            )));
        }

        let token: TokenResponse = response
            .json::<MaybeEnveloped<TokenResponse>>()
            .await
            .map_err(|e| AsaciError::Auth(format!("invalid token response: {e}")))?
            .into_inner();
        if token.token.trim().is_empty() {
            return Err(AsaciError::Auth(
                "token response did not include a token".to_string(),
            ));
        }

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        info!(ttl_secs = ttl.as_secs(), "ASACI token obtained");

        *cached = Some(CachedToken {
            value: token.token.clone(),
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.token)
    }

    /// Authenticated call with one re-authentication on 401.
    async fn send<F>(&self, method: Method, url: url::Url, build: F) -> Result<Response, AsaciError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let token = self.access_token(false).await?;
        let response = build(self.http.request(method.clone(), url.clone()).bearer_auth(token))
            .send()
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            debug!("ASACI rejected cached token, re-authenticating");
            let token = self.access_token(true).await?;
            build(self.http.request(method, url).bearer_auth(token))
                .send()
                .await?
        } else {
            response
        };

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AsaciError::Api {
            status,
            message: error_message(&body),
        })
    }

    async fn call_json<T, F>(&self, method: Method, segments: &[&str], build: F) -> Result<T, AsaciError>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(segments)?;
        self.breaker
            .execute(|| async {
                let response = self.send(method, url, build).await?;
                response
                    .json::<MaybeEnveloped<T>>()
                    .await
                    .map(MaybeEnveloped::into_inner)
                    .map_err(|e| AsaciError::InvalidResponse(e.to_string()))
            })
            .await
    }
}

/// Best human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[async_trait]
impl AsaciApi for AsaciClient {
    async fn create_production(&self, request: &EditionRequest) -> Result<ProductionResponse, AsaciError> {
        info!(policy_number = %request.policy_number, certificate_type = %request.certificate_type, "ASACI create production");
        self.call_json(Method::POST, &["productions"], |b| b.json(request))
            .await
    }

    async fn get_production(&self, reference: &str) -> Result<ProductionResponse, AsaciError> {
        self.call_json(Method::GET, &["productions", reference], |b| b)
            .await
    }

    async fn list_certificates(&self, query: &CertificateQuery) -> Result<CertificateList, AsaciError> {
        let list: ListResponse = self
            .call_json(Method::GET, &["certificates"], |b| b.query(query))
            .await?;
        let meta = list.meta;
        let returned = list.data.len() as u64;
        Ok(CertificateList {
            page: meta
                .as_ref()
                .and_then(|m| m.current_page)
                .or(query.page)
                .unwrap_or(1),
            per_page: meta
                .as_ref()
                .and_then(|m| m.per_page)
                .or(query.per_page)
                .unwrap_or(list.data.len() as u32),
            total: meta.and_then(|m| m.total).unwrap_or(returned),
            items: list.data,
        })
    }

    async fn get_certificate(&self, reference: &str) -> Result<AsaciCertificate, AsaciError> {
        self.call_json(Method::GET, &["certificates", reference], |b| b)
            .await
    }

    async fn download_certificate(&self, reference: &str) -> Result<Vec<u8>, AsaciError> {
        let url = self.url(&["certificates", reference, "download"])?;
        self.breaker
            .execute(|| async {
                let response = self.send(Method::GET, url, |b| b).await?;
                Ok::<_, AsaciError>(response.bytes().await?.to_vec())
            })
            .await
    }

    async fn cancel_certificate(&self, reference: &str, reason: &str) -> Result<AsaciCertificate, AsaciError> {
        info!(reference = %reference, "ASACI cancel certificate");
        let body = json!({ "reason": reason });
        self.call_json(Method::POST, &["certificates", reference, "cancel"], |b| {
            b.json(&body)
        })
        .await
    }

    async fn suspend_certificate(&self, reference: &str, reason: &str) -> Result<AsaciCertificate, AsaciError> {
        info!(reference = %reference, "ASACI suspend certificate");
        let body = json!({ "reason": reason });
        self.call_json(Method::POST, &["certificates", reference, "suspend"], |b| {
            b.json(&body)
        })
        .await
    }

    async fn certificate_types(&self) -> Result<Vec<CertificateTypeInfo>, AsaciError> {
        self.call_json(Method::GET, &["certificates", "types"], |b| b)
            .await
    }

    async fn ping(&self) -> Result<(), AsaciError> {
        self.certificate_types().await.map(|_| ())
    }

    async fn circuit_state(&self) -> Option<CircuitState> {
        Some(self.breaker.state().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asaci::types::{CertificateType, ProductionStatus};
    use crate::config::CircuitBreakerSettings;
    use crate::test_support::{sample_edition, spawn_server};
    use axum::{
        extract::{Path, State},
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Counters {
        tokens: Arc<AtomicUsize>,
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn issue_token(State(c): State<Counters>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if body["password"] != "pw" {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad credentials"})));
        }
        let n = c.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        (
            StatusCode::OK,
            Json(json!({"data": {"token": format!("tok-{n}"), "expires_in": 3600}})),
        )
    }

    async fn create_production(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        // the first token is treated as revoked server-side
        if bearer(&headers) != "Bearer tok-2" {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "expired"})));
        }
        assert_eq!(body["certificate_type"], "cima");
        (
            StatusCode::CREATED,
            Json(json!({"data": {
                "reference": "PRD-1",
                "status": "completed",
                "certificates": [{"reference": "C-1", "number": "0001", "status": "active"}]
            }})),
        )
    }

    async fn get_certificate(Path(reference): Path<String>) -> (StatusCode, Json<Value>) {
        if reference == "missing" {
            return (StatusCode::NOT_FOUND, Json(json!({"message": "Certificate not found"})));
        }
        // bare, unenveloped payload
        (StatusCode::OK, Json(json!({"reference": reference, "status": "active"})))
    }

    async fn list_certificates() -> Json<Value> {
        Json(json!({
            "data": [{"reference": "C-1", "status": "active"}, {"reference": "C-2", "status": "cancelled"}],
            "meta": {"current_page": 1, "per_page": 2, "total": 7}
        }))
    }

    async fn download() -> Vec<u8> {
        b"%PDF-1.4 fake".to_vec()
    }

    async fn unavailable() -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    async fn client_with(password: &str, threshold: u32) -> AsaciClient {
        let router = Router::new()
            .route("/api/v1/auth/tokens", post(issue_token))
            .route("/api/v1/productions", post(create_production))
            .route("/api/v1/certificates", get(list_certificates))
            .route("/api/v1/certificates/types", get(unavailable))
            .route("/api/v1/certificates/{reference}", get(get_certificate))
            .route("/api/v1/certificates/{reference}/download", get(download))
            .with_state(Counters::default());
        let base = spawn_server(router).await;
        let settings = AsaciSettings {
            base_url: url::Url::parse(&base).unwrap(),
            email: "api@example.com".to_string(),
            password: password.to_string(),
            client_name: "certify-link".to_string(),
            office_code: "OFF".to_string(),
            organization_code: "ORG".to_string(),
            timeout: Duration::from_secs(5),
        };
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerSettings {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_requests: 1,
        }));
        AsaciClient::new(&settings, breaker).unwrap()
    }

    #[tokio::test]
    async fn reauthenticates_once_on_401() {
        let client = client_with("pw", 5).await;
        let production = client
            .create_production(&sample_edition(CertificateType::Cima))
            .await
            .unwrap();
        assert_eq!(production.reference, "PRD-1");
        assert_eq!(production.status, ProductionStatus::Completed);
        assert_eq!(production.certificates[0].number.as_deref(), Some("0001"));
    }

    #[tokio::test]
    async fn token_is_cached_between_calls() {
        let client = client_with("pw", 5).await;
        client.get_certificate("C-1").await.unwrap();
        client.get_certificate("C-2").await.unwrap();
        let cached = client.token.lock().await;
        assert_eq!(cached.as_ref().unwrap().value, "tok-1");
    }

    #[tokio::test]
    async fn bad_credentials_are_auth_errors() {
        let client = client_with("wrong", 5).await;
        let err = client.get_certificate("C-1").await.unwrap_err();
        assert!(matches!(err, AsaciError::Auth(ref m) if m.contains("bad credentials")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn not_found_carries_upstream_message() {
        let client = client_with("pw", 5).await;
        let err = client.get_certificate("missing").await.unwrap_err();
        assert!(
            matches!(err, AsaciError::Api { status: 404, ref message } if message == "Certificate not found")
        );
    }

    #[tokio::test]
    async fn list_reads_pagination_meta() {
        let client = client_with("pw", 5).await;
        let list = client
            .list_certificates(&CertificateQuery::default())
            .await
            .unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.total, 7);
        assert_eq!(list.per_page, 2);
    }

    #[tokio::test]
    async fn download_returns_raw_bytes() {
        let client = client_with("pw", 5).await;
        let bytes = client.download_certificate("C-1").await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn server_errors_open_the_circuit() {
        let client = client_with("pw", 2).await;
        assert!(client.ping().await.is_err());
        assert!(client.ping().await.is_err());
        assert_eq!(client.circuit_state().await, Some(CircuitState::Open));
        assert!(matches!(client.ping().await, Err(AsaciError::Unavailable)));
    }

    #[test]
    fn url_encodes_segments() {
        let settings = AsaciSettings {
            base_url: url::Url::parse("https://asaci.example.com/").unwrap(),
            email: String::new(),
            password: String::new(),
            client_name: String::new(),
            office_code: String::new(),
            organization_code: String::new(),
            timeout: Duration::from_secs(1),
        };
        let client = AsaciClient::new(
            &settings,
            Arc::new(CircuitBreaker::new(CircuitBreakerSettings::default())),
        )
        .unwrap();
        assert_eq!(
            client.url(&["certificates", "A/B C"]).unwrap().as_str(),
            "https://asaci.example.com/api/v1/certificates/A%2FB%20C"
        );
    }
}
