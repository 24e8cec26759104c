// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ORASS access through Oracle REST Data Services.
//!
//! Statements are posted to the REST-enabled SQL endpoint
//! (`POST {gateway}/ords/{schema}/_/sql`) with basic auth. Each response
//! item carries either a `resultSet` or an `errorCode`/`errorMessage` pair.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::query::{PolicyQuery, Statement};
use super::types::{PolicyRecord, PolicyRow, PolicySearch};
use super::{OrassError, OrassSource};
use crate::config::OrassSettings;
use crate::storage::{Page, PageRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    items: Vec<SqlItem>,
}

#[derive(Debug, Deserialize)]
struct SqlItem {
    #[serde(default, rename = "resultSet")]
    result_set: Option<ResultSet>,
    #[serde(default, rename = "errorCode")]
    error_code: Option<i64>,
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultSet {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct OrdsClient {
    endpoint: url::Url,
    username: String,
    password: String,
    policy_view: String,
    http: Client,
}

impl OrdsClient {
    pub fn new(settings: &OrassSettings) -> Result<Self, OrassError> {
        let mut endpoint = settings.gateway_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| OrassError::Network("gateway URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["ords", settings.schema.as_str(), "_", "sql"]);

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OrassError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            username: settings.username.clone(),
            password: settings.password.clone(),
            policy_view: settings.policy_view.clone(),
            http,
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Run one statement and return its rows.
    async fn execute(&self, statement: &Statement) -> Result<Vec<Value>, OrassError> {
        debug!(sql = %statement.sql, binds = statement.binds.len(), "ORDS statement");

        let response = self
            .http
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .json(statement)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OrassError::Gateway {
                status,
                message: error_message(&body),
            });
        }

        let parsed: SqlResponse = response.json().await?;
        let item = parsed
            .items
            .into_iter()
            .next()
            .ok_or_else(|| OrassError::InvalidResponse("no statement result".to_string()))?;

        if let Some(code) = item.error_code {
            return Err(OrassError::Sql {
                code,
                message: item.error_message.unwrap_or_default(),
            });
        }

        item.result_set
            .map(|rs| rs.items)
            .ok_or_else(|| OrassError::InvalidResponse("statement returned no result set".to_string()))
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn to_record(row: Value) -> Result<PolicyRecord, OrassError> {
    serde_json::from_value::<PolicyRow>(row)
        .map(PolicyRecord::from)
        .map_err(|e| OrassError::InvalidResponse(format!("unexpected policy row: {e}")))
}

#[async_trait]
impl OrassSource for OrdsClient {
    async fn find_policy(&self, policy_number: &str) -> Result<PolicyRecord, OrassError> {
        let statement = PolicyQuery::by_policy_number(&self.policy_view, policy_number);
        let row = self
            .execute(&statement)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrassError::NotFound(policy_number.trim().to_string()))?;
        to_record(row)
    }

    async fn search_policies(&self, search: &PolicySearch) -> Result<Page<PolicyRecord>, OrassError> {
        let page = PageRequest::new(search.page, search.per_page);
        let query = PolicyQuery::from_search(&self.policy_view, search);

        let total = self
            .execute(&query.count())
            .await?
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_u64)
            .ok_or_else(|| OrassError::InvalidResponse("missing count".to_string()))?;

        let items = self
            .execute(&query.select(page))
            .await?
            .into_iter()
            .map(to_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn ping(&self) -> Result<(), OrassError> {
        self.execute(&Statement {
            sql: "SELECT 1 AS OK FROM DUAL".to_string(),
            binds: Vec::new(),
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{http::HeaderMap, routing::post, Json, Router};

    fn settings(base: &str) -> OrassSettings {
        OrassSettings {
            gateway_url: url::Url::parse(base).unwrap(),
            schema: "certify".to_string(),
            username: "reader".to_string(),
            password: "secret".to_string(),
            policy_view: "V_CERTIFY_POLICIES".to_string(),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 8,
        }
    }

    async fn fake_ords(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        assert!(headers.get("authorization").is_some());
        let sql = body["statementText"].as_str().unwrap_or_default().to_string();
        let result = if sql.contains("COUNT(*)") {
            serde_json::json!({"items": [{"resultSet": {"items": [{"total": 1}]}}]})
        } else if sql.contains("FROM DUAL") {
            serde_json::json!({"items": [{"resultSet": {"items": [{"ok": 1}]}}]})
        } else if body["binds"][0]["value"] == "MISSING" {
            serde_json::json!({"items": [{"resultSet": {"items": []}}]})
        } else if body["binds"][0]["value"] == "BROKEN" {
            serde_json::json!({"items": [{"errorCode": 942, "errorMessage": "table or view does not exist"}]})
        } else {
            serde_json::json!({"items": [{"resultSet": {"items": [{
                "num_police": "POL-1",
                "nom_assure": "KOUASSI Jean",
                "immatriculation": "AB-123-CD",
                "date_effet": "2025-01-01T00:00:00Z"
            }]}}]})
        };
        Json(result)
    }

    async fn client() -> OrdsClient {
        let base = spawn_server(Router::new().route("/ords/certify/_/sql", post(fake_ords))).await;
        OrdsClient::new(&settings(&base)).unwrap()
    }

    #[test]
    fn endpoint_appends_ords_path() {
        let client = OrdsClient::new(&settings("https://gw.example.com/base/")).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://gw.example.com/base/ords/certify/_/sql"
        );
    }

    #[tokio::test]
    async fn finds_policy() {
        let record = client().await.find_policy("POL-1").await.unwrap();
        assert_eq!(record.policy_number, "POL-1");
        assert_eq!(record.registration_number.as_deref(), Some("AB-123-CD"));
    }

    #[tokio::test]
    async fn missing_policy_is_not_found() {
        let err = client().await.find_policy("MISSING").await.unwrap_err();
        assert!(matches!(err, OrassError::NotFound(p) if p == "MISSING"));
    }

    #[tokio::test]
    async fn sql_errors_surface() {
        let err = client().await.find_policy("BROKEN").await.unwrap_err();
        assert!(matches!(err, OrassError::Sql { code: 942, .. }));
    }

    #[tokio::test]
    async fn search_returns_page_and_total() {
        let search = PolicySearch {
            insured_name: Some("kouassi".to_string()),
            per_page: Some(5),
            ..Default::default()
        };
        let page = client().await.search_policies(&search).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.per_page, 5);
        assert_eq!(page.items[0].insured_name.as_deref(), Some("KOUASSI Jean"));
    }

    #[tokio::test]
    async fn ping_succeeds() {
        assert!(client().await.ping().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_network_error() {
        let client = OrdsClient::new(&settings("http://127.0.0.1:1")).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
