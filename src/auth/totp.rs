// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RFC 6238 time-based one-time passwords.
//!
//! HMAC-SHA1, 30 second step, 6 digits. Verification accepts the previous,
//! current and next step. Callers pass the last step they accepted so a
//! code cannot be used twice. Secrets are 160 random bits, shared with
//! authenticator apps as unpadded RFC 4648 base32.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

pub const STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;
/// Steps accepted on each side of the current one.
pub const WINDOW: i64 = 1;
pub const SECRET_LEN: usize = 20;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("secret is not valid base32")]
    InvalidSecret,
    #[error("random generator failure")]
    Rng,
}

/// Fresh base32-encoded secret.
pub fn generate_secret() -> Result<String, TotpError> {
    let mut bytes = [0u8; SECRET_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| TotpError::Rng)?;
    Ok(base32_encode(&bytes))
}

/// `otpauth://` URL understood by authenticator apps.
pub fn provisioning_url(secret: &str, account: &str, issuer: &str) -> String {
    let label = format!("{issuer}:{account}");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string())
        .finish();
    format!("otpauth://totp/{}?{query}", encode_component(&label))
}

/// Code for the step containing `unix_time`.
pub fn code_at(secret: &str, unix_time: u64) -> Result<String, TotpError> {
    let key_bytes = base32_decode(secret).ok_or(TotpError::InvalidSecret)?;
    Ok(hotp(&key_bytes, unix_time / STEP_SECS))
}

/// Check `code` against the steps around `unix_time`.
pub fn verify(secret: &str, code: &str, unix_time: u64) -> Result<bool, TotpError> {
    Ok(matching_step(secret, code, unix_time, None)?.is_some())
}

/// Step around `unix_time` that `code` belongs to, ignoring steps at or
/// below `last_accepted`.
pub fn matching_step(
    secret: &str,
    code: &str,
    unix_time: u64,
    last_accepted: Option<u64>,
) -> Result<Option<u64>, TotpError> {
    let key_bytes = base32_decode(secret).ok_or(TotpError::InvalidSecret)?;
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let current = (unix_time / STEP_SECS) as i64;
    Ok((-WINDOW..=WINDOW)
        .filter_map(|offset| u64::try_from(current + offset).ok())
        .filter(|counter| last_accepted.is_none_or(|last| *counter > last))
        .find(|counter| hotp(&key_bytes, *counter) == code))
}

/// [`matching_step`] against the wall clock.
pub fn matching_step_now(
    secret: &str,
    code: &str,
    last_accepted: Option<u64>,
) -> Result<Option<u64>, TotpError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    matching_step(secret, code, now, last_accepted)
}

fn hotp(key_bytes: &[u8], counter: u64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key_bytes);
    let tag = hmac::sign(&key, &counter.to_be_bytes());
    let digest = tag.as_ref();

    // dynamic truncation, RFC 4226 section 5.3
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    format!(
        "{:0width$}",
        binary % 10u32.pow(DIGITS),
        width = DIGITS as usize
    )
}

fn encode_component(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Case-insensitive; ignores spaces, dashes and `=` padding.
pub fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for c in input.chars() {
        if matches!(c, ' ' | '-' | '=') {
            continue;
        }
        let upper = c.to_ascii_uppercase() as u8;
        let value = BASE32_ALPHABET.iter().position(|&a| a == upper)? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B, SHA1 seed "12345678901234567890"
    fn rfc_secret() -> String {
        base32_encode(b"12345678901234567890")
    }

    #[test]
    fn matches_rfc_6238_vectors() {
        let secret = rfc_secret();
        assert_eq!(code_at(&secret, 59).unwrap(), "287082");
        assert_eq!(code_at(&secret, 1111111109).unwrap(), "081804");
        assert_eq!(code_at(&secret, 1234567890).unwrap(), "005924");
        assert_eq!(code_at(&secret, 2000000000).unwrap(), "279037");
    }

    #[test]
    fn accepts_adjacent_steps_only() {
        let secret = rfc_secret();
        let t = 1111111109;
        let code = code_at(&secret, t).unwrap();

        assert!(verify(&secret, &code, t).unwrap());
        assert!(verify(&secret, &code, t + STEP_SECS).unwrap());
        assert!(verify(&secret, &code, t - STEP_SECS).unwrap());
        assert!(!verify(&secret, &code, t + 3 * STEP_SECS).unwrap());
    }

    #[test]
    fn accepted_step_cannot_be_reused() {
        let secret = rfc_secret();
        let t = 1111111109;
        let step = t / STEP_SECS;
        let code = code_at(&secret, t).unwrap();

        assert_eq!(matching_step(&secret, &code, t, None).unwrap(), Some(step));
        assert_eq!(matching_step(&secret, &code, t, Some(step)).unwrap(), None);
        assert_eq!(matching_step(&secret, &code, t + STEP_SECS, Some(step)).unwrap(), None);

        let next = code_at(&secret, t + STEP_SECS).unwrap();
        assert_eq!(matching_step(&secret, &next, t, Some(step)).unwrap(), Some(step + 1));
    }

    #[test]
    fn rejects_malformed_codes() {
        let secret = rfc_secret();
        assert!(!verify(&secret, "12345", 59).unwrap());
        assert!(!verify(&secret, "abcdef", 59).unwrap());
        assert_eq!(verify("!!!", "287082", 59), Err(TotpError::InvalidSecret));
    }

    #[test]
    fn base32_known_values() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("mzxw6ytboi======").unwrap(), b"foobar");
        assert_eq!(
            base32_encode(b"12345678901234567890"),
            "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"
        );
    }

    #[test]
    fn generated_secret_is_160_bits() {
        let secret = generate_secret().unwrap();
        assert_eq!(secret.len(), 32);
        assert_eq!(base32_decode(&secret).unwrap().len(), SECRET_LEN);
    }

    #[test]
    fn provisioning_url_carries_secret_and_issuer() {
        let url = provisioning_url("JBSWY3DPEHPK3PXP", "ops@example.com", "Certify-Link");
        assert!(url.starts_with("otpauth://totp/Certify-Link%3Aops%40example.com?"));
        assert!(url.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(url.contains("issuer=Certify-Link"));
        assert!(url.contains("digits=6"));
    }
}
