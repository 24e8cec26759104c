// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Argon2id password hashing and the password strength policy.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password does not meet the policy: {}", .0.join(", "))]
    Weak(Vec<String>),
    #[error("Password was used recently")]
    Reused,
    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// Argon2id hasher running on the blocking pool.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// OWASP parameters (19 MiB, 2 iterations, 1 lane).
    pub fn new() -> Self {
        Self {
            params: Params::DEFAULT,
        }
    }

    /// Custom cost parameters, mostly for tests.
    pub fn with_params(
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Result<Self, PasswordError> {
        let params = Params::new(memory_cost, time_cost, parallelism, None)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let params = self.params.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| PasswordError::Hashing(e.to_string()))
        })
        .await
        .map_err(|e| PasswordError::Hashing(format!("hash task failed: {e}")))?
    }

    /// `Ok(false)` on mismatch; errors only when the stored hash is unreadable.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&hash).map_err(|e| PasswordError::Hashing(e.to_string()))?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .map_err(|e| PasswordError::Hashing(format!("verify task failed: {e}")))?
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Policy violations for `password`; empty when it is acceptable.
pub fn validate_strength(password: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        violations.push(format!("must be at least {MIN_PASSWORD_LEN} characters"));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push("must contain an uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push("must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("must contain a digit".to_string());
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        violations.push("must contain a symbol".to_string());
    }
    violations
}

/// [`validate_strength`] as a `Result`.
pub fn ensure_strength(password: &str) -> Result<(), PasswordError> {
    let violations = validate_strength(password);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(PasswordError::Weak(violations))
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> PasswordHasher {
    PasswordHasher::with_params(1024, 1, 1).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() {
        let hasher = test_hasher();
        let hash = hasher.hash("Sup3r$ecret").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Sup3r$ecret", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn hashes_are_salted() {
        let hasher = test_hasher();
        let a = hasher.hash("Same-pass1").await.unwrap();
        let b = hasher.hash("Same-pass1").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unreadable_hash_is_an_error() {
        assert!(test_hasher().verify("x", "not-a-phc-string").await.is_err());
    }

    #[test]
    fn strength_policy_lists_every_violation() {
        assert!(validate_strength("Str0ng!Pass").is_empty());
        assert_eq!(validate_strength("abc").len(), 4);
        assert_eq!(
            validate_strength("alllowercase1!"),
            vec!["must contain an uppercase letter".to_string()]
        );
        assert!(matches!(
            ensure_strength("NoDigits!!"),
            Err(PasswordError::Weak(v)) if v == vec!["must contain a digit".to_string()]
        ));
    }
}
