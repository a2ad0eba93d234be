// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Claiming relay payments.
//!
//! A relay escrow is emptied into `into` by a relocate transaction signed
//! with the escrow's own key: an account merge, preceded by a create-account
//! when the destination does not exist yet.

use tracing::{debug, info};

use crate::amount::MIN_CREATE_ACCOUNT_STROOPS;
use crate::build::TransactionBuilder;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::relay::open_box;
use crate::seqno::ClaimSeqnoProvider;
use crate::types::{
    AccountId, KeybaseTransactionId, PaymentStatus, PaymentSummary, RelayClaimPost,
    RelayClaimResult, RelayDirection, RelayPaymentSummary,
};

impl Engine {
    /// Claim (or yank back) the relay payment `kb_tx_id` into `into`.
    ///
    /// Without an explicit `dir` the direction is `Yank` when the current
    /// user sent the payment and `Claim` otherwise.
    pub async fn claim(
        &self,
        kb_tx_id: &KeybaseTransactionId,
        into: &AccountId,
        dir: Option<RelayDirection>,
        auto_claim_token: Option<String>,
    ) -> Result<RelayClaimResult, EngineError> {
        debug!(kb_tx_id = %kb_tx_id, into = %into, ?dir, "claim");

        let relay = match self.wallet_state.payment_details(kb_tx_id).await? {
            PaymentSummary::Stellar(_) => {
                return Err(EngineError::Claim(
                    "payment was found on the ledger but has no relay to claim".to_string(),
                ))
            }
            PaymentSummary::Direct(direct) => {
                let reason = match direct.tx_status {
                    PaymentStatus::Completed => "the direct transfer already happened",
                    PaymentStatus::Pending => "the direct transfer is still pending",
                    _ => "the direct transfer failed",
                };
                return Err(EngineError::Claim(format!("payment cannot be claimed: {reason}")));
            }
            PaymentSummary::Relay(relay) => relay,
        };

        self.claim_relay(relay, into, dir, auto_claim_token).await
    }

    async fn claim_relay(
        &self,
        relay: RelayPaymentSummary,
        into: &AccountId,
        dir: Option<RelayDirection>,
        auto_claim_token: Option<String>,
    ) -> Result<RelayClaimResult, EngineError> {
        if let Some(claim) = relay.claim.as_ref() {
            if claim.tx_status == PaymentStatus::Completed {
                return Err(EngineError::Claim(format!(
                    "payment already claimed into {}",
                    claim.to_stellar
                )));
            }
        }

        let key = self
            .collaborators
            .relay_keys
            .key_for_team(&relay.team_id)
            .await?;
        let escrow_key = open_box(&relay.box_b64, &key)?.secret_key()?;

        let funded = self.wallet_state.is_account_funded(into).await?;
        let dir = dir.unwrap_or(if relay.from_user == self.me {
            RelayDirection::Yank
        } else {
            RelayDirection::Claim
        });

        let timebounds = self.timebounds_for_sending().await?;
        let (seqno_provider, lease) = ClaimSeqnoProvider::new(&self.wallet_state).await;

        let mut builder = TransactionBuilder::new(self.config.base_fee).timebounds(timebounds);
        if !funded {
            builder = builder.create_account(into.clone(), MIN_CREATE_ACCOUNT_STROOPS);
        }
        let sig = builder
            .account_merge(into.clone())
            .sign(&escrow_key, &seqno_provider)
            .await?;

        let result = self
            .wallet_state
            .submit_relay_claim(RelayClaimPost {
                keybase_id: relay.kb_tx_id.clone(),
                dir,
                signed_transaction: sig.signed,
                auto_claim_token,
            })
            .await?;
        lease.unlock();

        info!(
            kb_tx_id = %relay.kb_tx_id,
            claim_tx_id = %result.claim_stellar_id,
            ?dir,
            "relay payment claimed"
        );
        Ok(result)
    }
}
