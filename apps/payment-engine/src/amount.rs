// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Native asset amount parsing and formatting.
//!
//! Amounts travel as decimal strings and are converted to stroops
//! (1 XLM = 10^7 stroops) for arithmetic and transaction building.

use crate::error::EngineError;

/// Number of fractional digits of the native asset.
pub const DECIMALS: u32 = 7;

pub const STROOPS_PER_XLM: i64 = 10_000_000;

/// Smallest payment the ledger accepts.
pub const MIN_PAYMENT_STROOPS: i64 = 1;

/// Minimum amount that can fund a new account.
pub const MIN_CREATE_ACCOUNT_STROOPS: i64 = STROOPS_PER_XLM;

/// Minimum amount for a relay payment: one account reserve plus fees for the claim.
pub const MIN_RELAY_STROOPS: i64 = 20_100_000;

/// Parse a human-readable amount (e.g. `"1.5"`) into stroops.
///
/// Rejects negative values, more than seven fractional digits and overflow.
pub fn parse_amount(amount: &str) -> Result<i64, EngineError> {
    let amount = amount.trim();
    let invalid = |reason: &str| EngineError::InvalidAmount(format!("{reason}: {amount:?}"));

    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty amount"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid("invalid amount format"));
    }
    if fraction.len() > DECIMALS as usize {
        return Err(invalid("too many decimal places"));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("invalid whole number"))?
    };
    let fraction: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = DECIMALS as usize)
            .parse()
            .map_err(|_| invalid("invalid decimal"))?
    };

    whole
        .checked_mul(STROOPS_PER_XLM)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| invalid("amount overflow"))
}

/// Format stroops as a decimal amount without trailing zeros.
pub fn format_amount(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let divisor = STROOPS_PER_XLM as u64;
    let whole = abs / divisor;
    let remainder = abs % divisor;

    if remainder == 0 {
        return format!("{sign}{whole}");
    }
    let decimal = format!("{:0>width$}", remainder, width = DECIMALS as usize);
    format!("{sign}{whole}.{}", decimal.trim_end_matches('0'))
}

/// Parse `amount` and require it to be at least `minimum` stroops.
pub fn require_minimum(amount: &str, minimum: i64, kind: &'static str) -> Result<i64, EngineError> {
    let stroops = parse_amount(amount)?;
    if stroops < minimum {
        return Err(EngineError::AmountBelowMinimum {
            amount: amount.trim().to_string(),
            minimum: format_amount(minimum),
            kind,
        });
    }
    Ok(stroops)
}
