// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::remote::RemoteError;
use crate::types::AccountId;

/// Errors returned by the payment engine.
///
/// Per-payment failures inside a batch are carried as data in
/// [`crate::types::BatchPaymentResult`]; only conditions that stop an
/// operation from running at all surface as `Err`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("sequence number lock is not held")]
    SeqnoLockNotHeld,

    #[error("account refresh queue is full")]
    RefreshQueueFull,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount {amount} is below the minimum of {minimum} for {kind}")]
    AmountBelowMinimum {
        amount: String,
        minimum: String,
        kind: &'static str,
    },

    #[error("recipient lookup failed: {0}")]
    Recipient(String),

    #[error("sender key unavailable: {0}")]
    SenderKey(String),

    #[error("relay key unavailable: {0}")]
    RelayKey(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("transaction build failed: {0}")]
    Build(String),

    #[error("claim rejected: {0}")]
    Claim(String),

    #[error("operation canceled")]
    Canceled,

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    pub fn is_account_not_found(&self) -> bool {
        matches!(self, EngineError::AccountNotFound(_))
    }
}
