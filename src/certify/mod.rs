// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certificate issuance: the request lifecycle, the ORASS → ASACI pipeline
//! and the background retry poller.

pub mod poller;
pub mod service;
pub mod status;

pub use poller::{backoff_delay, RetryPoller};
pub use service::{BatchItemResult, CertificateStats, CertifyLinkService};
pub use status::CertificateStatus;
