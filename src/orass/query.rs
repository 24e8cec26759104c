// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Oracle SQL for policy lookups.
//!
//! User input only ever travels as named binds. The view name comes from
//! configuration and is validated as an identifier at startup.

use serde::Serialize;

use super::types::{PolicySearch, POLICY_COLUMNS};
use crate::storage::PageRequest;

/// A named bind as understood by the ORDS REST-enabled SQL endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bind {
    pub name: String,
    pub data_type: &'static str,
    pub value: serde_json::Value,
}

impl Bind {
    fn text(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            data_type: "VARCHAR2",
            value: serde_json::Value::String(value.into()),
        }
    }

    fn number(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            data_type: "NUMBER",
            value: serde_json::Value::from(value),
        }
    }
}

/// SQL text plus its binds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    #[serde(rename = "statementText")]
    pub sql: String,
    pub binds: Vec<Bind>,
}

/// Builder for the policy search `WHERE` clause.
#[derive(Debug, Clone)]
pub struct PolicyQuery {
    view: String,
    conditions: Vec<String>,
    binds: Vec<Bind>,
}

impl PolicyQuery {
    pub fn new(view: &str) -> Self {
        Self {
            view: view.to_string(),
            conditions: Vec::new(),
            binds: Vec::new(),
        }
    }

    /// Single policy by number. The most recent endorsement wins.
    pub fn by_policy_number(view: &str, policy_number: &str) -> Statement {
        Statement {
            sql: format!(
                "SELECT {} FROM {view} WHERE NUM_POLICE = :policy_number \
                 ORDER BY DATE_EFFET DESC FETCH FIRST 1 ROWS ONLY",
                POLICY_COLUMNS.join(", ")
            ),
            binds: vec![Bind::text("policy_number", policy_number.trim())],
        }
    }

    pub fn from_search(view: &str, search: &PolicySearch) -> Self {
        let mut query = Self::new(view);
        if let Some(number) = non_blank(&search.policy_number) {
            query = query.equals("NUM_POLICE", "policy_number", number);
        }
        if let Some(name) = non_blank(&search.insured_name) {
            query = query.contains("NOM_ASSURE", "insured_name", name);
        }
        if let Some(reg) = non_blank(&search.registration) {
            query = query.equals("IMMATRICULATION", "registration", &reg.to_uppercase());
        }
        if let Some(code) = non_blank(&search.intermediary_code) {
            query = query.equals("CODE_INTERMEDIAIRE", "intermediary_code", code);
        }
        if let Some(from) = search.effective_from {
            query = query.date_bound(">=", "effective_from", from);
        }
        if let Some(to) = search.effective_to {
            query = query.date_bound("<=", "effective_to", to);
        }
        query
    }

    pub fn equals(mut self, column: &str, bind: &str, value: &str) -> Self {
        self.conditions.push(format!("{column} = :{bind}"));
        self.binds.push(Bind::text(bind, value));
        self
    }

    /// Case-insensitive substring match.
    pub fn contains(mut self, column: &str, bind: &str, value: &str) -> Self {
        self.conditions
            .push(format!("UPPER({column}) LIKE UPPER(:{bind}) ESCAPE '\\'"));
        self.binds
            .push(Bind::text(bind, format!("%{}%", escape_like(value))));
        self
    }

    fn date_bound(mut self, op: &str, bind: &str, date: chrono::NaiveDate) -> Self {
        self.conditions
            .push(format!("DATE_EFFET {op} TO_DATE(:{bind}, 'YYYY-MM-DD')"));
        self.binds
            .push(Bind::text(bind, date.format("%Y-%m-%d").to_string()));
        self
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// One page of matching policies.
    pub fn select(&self, page: PageRequest) -> Statement {
        let mut binds = self.binds.clone();
        binds.push(Bind::number("offset", page.offset() as u64));
        binds.push(Bind::number("limit", u64::from(page.per_page)));
        Statement {
            sql: format!(
                "SELECT {} FROM {}{} ORDER BY DATE_EFFET DESC, NUM_POLICE \
                 OFFSET :offset ROWS FETCH NEXT :limit ROWS ONLY",
                POLICY_COLUMNS.join(", "),
                self.view,
                self.where_clause()
            ),
            binds,
        }
    }

    /// Total number of matching policies.
    pub fn count(&self) -> Statement {
        Statement {
            sql: format!(
                "SELECT COUNT(*) AS TOTAL FROM {}{}",
                self.view,
                self.where_clause()
            ),
            binds: self.binds.clone(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Escape `LIKE` wildcards with `\`.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
