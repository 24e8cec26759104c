// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certificate request lifecycle.
//!
//! ```text
//! ORASS_FETCHING -> ORASS_FETCHED -> ASACI_PENDING -> ASACI_PROCESSING -> COMPLETED
//!        \               \                \                  \
//!         +---------------+----------------+------------------+--> FAILED
//!
//! FAILED -> ORASS_FETCHING   (retry)
//! ```

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    OrassFetching,
    OrassFetched,
    AsaciPending,
    AsaciProcessing,
    Completed,
    Failed,
}

impl CertificateStatus {
    pub const ALL: [CertificateStatus; 6] = [
        CertificateStatus::OrassFetching,
        CertificateStatus::OrassFetched,
        CertificateStatus::AsaciPending,
        CertificateStatus::AsaciProcessing,
        CertificateStatus::Completed,
        CertificateStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::OrassFetching => "ORASS_FETCHING",
            CertificateStatus::OrassFetched => "ORASS_FETCHED",
            CertificateStatus::AsaciPending => "ASACI_PENDING",
            CertificateStatus::AsaciProcessing => "ASACI_PROCESSING",
            CertificateStatus::Completed => "COMPLETED",
            CertificateStatus::Failed => "FAILED",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: CertificateStatus) -> bool {
        use CertificateStatus::*;
        matches!(
            (self, next),
            (OrassFetching, OrassFetched)
                | (OrassFetched, AsaciPending)
                | (AsaciPending, AsaciProcessing)
                | (AsaciProcessing, Completed)
                | (OrassFetching | OrassFetched | AsaciPending | AsaciProcessing, Failed)
                | (Failed, OrassFetching)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CertificateStatus::Completed)
    }

    /// Owned by a running pipeline; nothing else moves it forward.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            CertificateStatus::OrassFetching
                | CertificateStatus::OrassFetched
                | CertificateStatus::AsaciPending
        )
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CertificateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        CertificateStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| format!("unknown certificate status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::CertificateStatus::*;
    use super::*;

    #[test]
    fn happy_path_follows_fixed_order() {
        let path = [OrassFetching, OrassFetched, AsaciPending, AsaciProcessing, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn steps_cannot_be_skipped_or_reversed() {
        assert!(!OrassFetching.can_transition_to(AsaciPending));
        assert!(!OrassFetched.can_transition_to(Completed));
        assert!(!AsaciProcessing.can_transition_to(AsaciPending));
        assert!(!OrassFetched.can_transition_to(OrassFetching));
    }

    #[test]
    fn any_in_flight_state_can_fail() {
        for st in [OrassFetching, OrassFetched, AsaciPending, AsaciProcessing] {
            assert!(st.can_transition_to(Failed));
        }
    }

    #[test]
    fn completed_is_terminal_and_failed_only_retries() {
        for st in CertificateStatus::ALL {
            assert!(!Completed.can_transition_to(st));
        }
        assert!(Completed.is_terminal());
        assert!(Failed.can_transition_to(OrassFetching));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn only_pipeline_owned_states_are_in_flight() {
        let in_flight: Vec<_> = CertificateStatus::ALL
            .into_iter()
            .filter(CertificateStatus::is_in_flight)
            .collect();
        assert_eq!(in_flight, vec![OrassFetching, OrassFetched, AsaciPending]);
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&AsaciProcessing).unwrap(),
            "\"ASACI_PROCESSING\""
        );
        assert_eq!("orass_fetched".parse::<CertificateStatus>(), Ok(OrassFetched));
        assert!("DONE".parse::<CertificateStatus>().is_err());
    }
}
