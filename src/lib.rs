// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certify-Link - Insurance Attestation Broker
//!
//! Pulls policies from the ORASS policy database, turns them into
//! attestation requests for the ASACI certificate API, and tracks every
//! request through a persisted status machine with retries.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Local accounts, JWT sessions, TOTP and role permissions
//! - `orass` - ORASS gateway client and policy cache
//! - `asaci` - ASACI client, circuit breaker and policy mapping
//! - `certify` - Request orchestration and the retry poller
//! - `storage` - Embedded redb store and audit trail

pub mod api;
pub mod asaci;
pub mod auth;
pub mod bootstrap;
pub mod certify;
pub mod config;
pub mod error;
pub mod logging;
pub mod orass;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
