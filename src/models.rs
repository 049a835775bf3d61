// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Money Models
//!
//! Amounts are carried internally as signed integer minor units (`i64`,
//! cents for EUR/GBP). The API accepts and returns decimal strings with
//! exactly two fraction digits, e.g. `"100.00"`.
//!
//! Currency codes are three uppercase ASCII letters (ISO 4217 shape). No
//! registry lookup is performed.

/// Errors produced while parsing money inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount must be a valid positive number")]
    InvalidAmount,

    #[error("amount must have at most 2 decimal places")]
    TooManyDecimals,

    #[error("amount is too large")]
    Overflow,

    #[error("currency must be a 3-letter ISO 4217 code")]
    InvalidCurrency,
}

/// Parse a positive decimal string (`"25"`, `"25.5"`, `"25.50"`) into minor units.
pub fn parse_amount_to_minor(amount: &str) -> Result<i64, MoneyError> {
    let minor = parse_unsigned(amount.trim())?;
    if minor == 0 {
        return Err(MoneyError::InvalidAmount);
    }
    Ok(minor)
}

/// Parse a balance-style decimal string that may be zero or negative.
pub fn parse_signed_amount_to_minor(amount: &str) -> Result<i64, MoneyError> {
    let trimmed = amount.trim();
    match trimmed.strip_prefix('-') {
        Some(rest) => Ok(-parse_unsigned(rest)?),
        None => parse_unsigned(trimmed),
    }
}

fn parse_unsigned(trimmed: &str) -> Result<i64, MoneyError> {
    let (whole_part, fraction_part) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    if whole_part.is_empty() || !whole_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidAmount);
    }
    if !fraction_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidAmount);
    }
    if fraction_part.len() > 2 {
        return Err(MoneyError::TooManyDecimals);
    }

    let whole = whole_part
        .parse::<i64>()
        .map_err(|_| MoneyError::Overflow)?;
    let fraction = match fraction_part.len() {
        0 => 0,
        1 => fraction_part.parse::<i64>().map_err(|_| MoneyError::InvalidAmount)? * 10,
        _ => fraction_part.parse::<i64>().map_err(|_| MoneyError::InvalidAmount)?,
    };

    whole
        .checked_mul(100)
        .and_then(|base| base.checked_add(fraction))
        .ok_or(MoneyError::Overflow)
}

/// Render minor units as a two-decimal string (`-1050` → `"-10.50"`).
pub fn format_minor(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Validate and uppercase a currency code.
pub fn normalize_currency(code: &str) -> Result<String, MoneyError> {
    let trimmed = code.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(MoneyError::InvalidCurrency)
    }
}
