// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet server API.
//!
//! [`Remoter`] is the seam between the engine and the server. Production
//! code uses [`http::HttpRemote`]; tests substitute an in-memory fake.

pub mod http;

use async_trait::async_trait;

use crate::types::{
    AccountDetails, AccountId, AutoClaim, Balance, KeybaseTransactionId, PaymentDirectPost,
    PaymentMultiPost, PaymentRelayPost, PaymentResult, PaymentSummary, RelayClaimPost,
    RelayClaimResult, SubmitMultiResult, TimeboundsRecommendation, UserId,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("server error {code}: {desc}")]
    App { code: i32, desc: String },

    #[error("invalid server response: {0}")]
    Decode(String),

    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait Remoter: Send + Sync {
    /// Current ledger sequence number of `account`.
    async fn account_seqno(&self, account: &AccountId) -> Result<u64, RemoteError>;

    async fn balances(&self, account: &AccountId) -> Result<Vec<Balance>, RemoteError>;

    async fn details(&self, account: &AccountId) -> Result<AccountDetails, RemoteError>;

    async fn submit_payment(&self, post: PaymentDirectPost) -> Result<PaymentResult, RemoteError>;

    async fn submit_relay_payment(
        &self,
        post: PaymentRelayPost,
    ) -> Result<PaymentResult, RemoteError>;

    async fn submit_multi_payment(
        &self,
        post: PaymentMultiPost,
    ) -> Result<SubmitMultiResult, RemoteError>;

    async fn submit_relay_claim(
        &self,
        post: RelayClaimPost,
    ) -> Result<RelayClaimResult, RemoteError>;

    /// Try to take the per-user auto-claim lock. An empty token means someone
    /// else holds it.
    async fn acquire_auto_claim_lock(&self, user: &UserId) -> Result<String, RemoteError>;

    async fn release_auto_claim_lock(&self, user: &UserId, token: &str) -> Result<(), RemoteError>;

    async fn next_auto_claim(&self, user: &UserId) -> Result<Option<AutoClaim>, RemoteError>;

    async fn payment_details(
        &self,
        kb_tx_id: &KeybaseTransactionId,
    ) -> Result<PaymentSummary, RemoteError>;

    async fn server_timebounds_recommendation(
        &self,
    ) -> Result<TimeboundsRecommendation, RemoteError>;
}
