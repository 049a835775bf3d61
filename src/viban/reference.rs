// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment reference generation and normalization.

use ring::rand::{SecureRandom, SystemRandom};
use unicode_normalization::UnicodeNormalization;

use super::error::{VibanError, VibanResult};

pub const TOPUP_REFERENCE_PREFIX: &str = "TU-";

/// Crockford-style alphabet without look-alike characters (no I, O, 0, 1).
const REFERENCE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERENCE_RANDOM_LEN: usize = 10;

/// Canonical matching form: NFKC, case-folded, alphanumerics only.
///
/// `" TU-abc 123 "` and `"tuABC123"` both normalize to `"tuabc123"`.
pub fn normalize_reference(raw: &str) -> String {
    raw.nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Draw a fresh `TU-XXXXXXXXXX` reference from the system CSPRNG.
///
/// Uniqueness is not guaranteed here; callers check the reference indexes
/// inside the write transaction that stores the request.
pub fn generate_reference(rng: &SystemRandom) -> VibanResult<String> {
    let mut bytes = [0u8; REFERENCE_RANDOM_LEN];
    rng.fill(&mut bytes)
        .map_err(|_| VibanError::RandomUnavailable)?;
    let body: String = bytes
        .iter()
        .map(|b| char::from(REFERENCE_ALPHABET[usize::from(*b) % REFERENCE_ALPHABET.len()]))
        .collect();
    Ok(format!("{TOPUP_REFERENCE_PREFIX}{body}"))
}
