// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Circuit breaker guarding outbound ASACI calls.
//!
//! - **Closed**: calls pass through; consecutive retryable failures are
//!   counted and the breaker opens at `failure_threshold`.
//! - **Open**: calls fail immediately with [`AsaciError::Unavailable`] until
//!   `recovery_timeout` has elapsed since the last failure.
//! - **HalfOpen**: up to `half_open_max_requests` probes are let through.
//!   A success closes the breaker, a failure reopens it.
//!
//! Non-retryable errors (4xx, malformed responses) are the caller's fault and
//! do not count as failures.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use utoipa::ToSchema;

use super::AsaciError;
use crate::config::CircuitBreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    current: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_requests: u32,
    /// Bumped on every entry into half-open.
    half_open_epoch: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    state: Mutex<BreakerState>,
}

/// Admission for one call. A half-open probe that is dropped before it
/// reports an outcome gives its slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe_epoch: Option<u64>,
}

impl Permit<'_> {
    fn settle(mut self) {
        self.probe_epoch = None;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(epoch) = self.probe_epoch {
            self.breaker.release_probe(epoch);
        }
    }
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(BreakerState {
                current: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_requests: 0,
                half_open_epoch: 0,
            }),
        }
    }

    /// Run `operation` under breaker protection.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, AsaciError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AsaciError>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(AsaciError::Unavailable);
        };

        let result = operation().await;
        permit.settle();
        match &result {
            Ok(_) => self.on_success(),
            Err(err) if err.is_retryable() => self.on_failure(),
            Err(_) => self.on_success(),
        }
        result
    }

    pub async fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.refresh(&mut state);
        state.current
    }

    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open to half-open once the recovery timeout has elapsed.
    fn refresh(&self, state: &mut BreakerState) {
        if state.current == CircuitState::Open
            && state
                .last_failure
                .is_some_and(|t| t.elapsed() >= self.settings.recovery_timeout)
        {
            state.current = CircuitState::HalfOpen;
            state.half_open_requests = 0;
            state.half_open_epoch += 1;
            tracing::info!("ASACI circuit half-open");
        }
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.lock();
        self.refresh(&mut state);

        let probe_epoch = match state.current {
            CircuitState::Closed => None,
            CircuitState::Open => return None,
            CircuitState::HalfOpen => {
                if state.half_open_requests >= self.settings.half_open_max_requests {
                    return None;
                }
                state.half_open_requests += 1;
                Some(state.half_open_epoch)
            }
        };
        Some(Permit {
            breaker: self,
            probe_epoch,
        })
    }

    fn release_probe(&self, epoch: u64) {
        let mut state = self.lock();
        if state.current == CircuitState::HalfOpen && state.half_open_epoch == epoch {
            state.half_open_requests = state.half_open_requests.saturating_sub(1);
            tracing::debug!("abandoned ASACI probe released");
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        if state.current != CircuitState::Closed {
            tracing::info!("ASACI circuit closed");
        }
        state.current = CircuitState::Closed;
        state.failure_count = 0;
        state.half_open_requests = 0;
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());

        match state.current {
            CircuitState::Closed if state.failure_count >= self.settings.failure_threshold => {
                state.current = CircuitState::Open;
                tracing::warn!(failures = state.failure_count, "ASACI circuit opened");
            }
            CircuitState::HalfOpen => {
                state.current = CircuitState::Open;
                state.half_open_requests = 0;
                tracing::warn!("ASACI probe failed, circuit reopened");
            }
            _ => {}
        }
    }
}
