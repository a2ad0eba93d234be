// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment preparation and submission.
//!
//! A payment goes **direct** when the recipient has a ledger account and
//! through a **relay** escrow otherwise. Preparation resolves the recipient,
//! validates the amount, then builds and signs the transaction; submission
//! hands it to the wallet server while the seqno lease is held.
//!
//! - [`Engine::send_payment`]: one payment.
//! - [`Engine::batch`]: many payments, one transaction each.
//! - [`Engine::batch_multi`]: many payments in one multi-operation transaction.

mod batch;

use tracing::{debug, info};

use crate::amount::{
    require_minimum, MIN_CREATE_ACCOUNT_STROOPS, MIN_PAYMENT_STROOPS, MIN_RELAY_STROOPS,
};
use crate::build::{SequenceProvider, Timebounds, TransactionBuilder};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::lookup::Recipient;
use crate::relay::create_relay_transfer;
use crate::seqno::SeqnoProvider;
use crate::types::{
    AccountId, KeybaseTransactionId, PaymentDirectPost, PaymentRelayPost, SecretKey, TeamId,
    TransactionId,
};

/// Everything needed to prepare one payment.
#[derive(Debug, Clone, Default)]
pub struct PaymentRequest {
    /// Recipient as typed by the user.
    pub to: String,
    /// Decimal XLM amount.
    pub amount: String,
    /// Note delivered with the payment.
    pub note: String,
    /// Public memo stamped on the ledger transaction.
    pub memo: Option<String>,
    /// Use a relay even if the recipient has an account.
    pub force_relay: bool,
    /// Let the server return before the ledger confirms.
    pub quick_return: bool,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum PreparedKind {
    Direct(PaymentDirectPost),
    Relay(PaymentRelayPost),
}

/// A signed payment ready for submission.
#[derive(Debug, Clone)]
pub(crate) struct PreparedPayment {
    pub kind: PreparedKind,
    pub seqno: u64,
    pub tx_id: TransactionId,
}

impl PreparedPayment {
    pub fn is_relay(&self) -> bool {
        matches!(self.kind, PreparedKind::Relay(_))
    }
}

/// Outcome of submitting one prepared payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Submission {
    pub kb_tx_id: KeybaseTransactionId,
    pub tx_id: TransactionId,
    pub pending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SendPaymentArg {
    /// Sending account. Defaults to the primary account.
    pub from: Option<AccountId>,
    pub request: PaymentRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPaymentResult {
    pub kb_tx_id: KeybaseTransactionId,
    /// Payment transaction for direct sends, escrow funding transaction for relays.
    pub tx_id: TransactionId,
    pub pending: bool,
    /// Team the relay secret is sealed for, when the payment went through a relay.
    pub relay_team_id: Option<TeamId>,
}

impl Engine {
    pub(crate) async fn lookup_sender(
        &self,
        from: Option<&AccountId>,
    ) -> Result<(AccountId, SecretKey), EngineError> {
        let keys = &self.collaborators.sender_keys;
        match from {
            Some(account) => Ok((account.clone(), keys.secret_key(account).await?)),
            None => keys.primary_account().await,
        }
    }

    /// Resolve the recipient and build a signed payment for it.
    ///
    /// Amount checks run before signing so a rejected payment never consumes
    /// a sequence number.
    pub(crate) async fn prepare_payment(
        &self,
        sender: &SecretKey,
        seqno_provider: &dyn SequenceProvider,
        timebounds: Option<Timebounds>,
        request: &PaymentRequest,
    ) -> Result<(PreparedPayment, Option<TeamId>), EngineError> {
        let recipient = self
            .collaborators
            .recipients
            .lookup_recipient(&request.to)
            .await?;

        match recipient.account_id.clone() {
            Some(destination) if !request.force_relay => {
                let prepared = self
                    .prepare_direct(sender, seqno_provider, timebounds, request, &recipient, destination)
                    .await?;
                Ok((prepared, None))
            }
            _ => {
                self.prepare_relay(sender, seqno_provider, timebounds, request, &recipient)
                    .await
            }
        }
    }

    async fn prepare_direct(
        &self,
        sender: &SecretKey,
        seqno_provider: &dyn SequenceProvider,
        timebounds: Option<Timebounds>,
        request: &PaymentRequest,
        recipient: &Recipient,
        destination: AccountId,
    ) -> Result<PreparedPayment, EngineError> {
        let funded = self.wallet_state.is_account_funded(&destination).await?;

        let mut builder = TransactionBuilder::new(self.config.base_fee).timebounds(timebounds);
        if let Some(memo) = &request.memo {
            builder = builder.memo(memo.clone());
        }
        builder = if funded {
            let amount = require_minimum(&request.amount, MIN_PAYMENT_STROOPS, "payment")?;
            builder.payment(destination, amount)
        } else {
            let amount = require_minimum(&request.amount, MIN_CREATE_ACCOUNT_STROOPS, "new account")?;
            builder.create_account(destination, amount)
        };

        let sig = builder.sign(sender, seqno_provider).await?;
        let post = PaymentDirectPost {
            to_user: recipient.user.clone(),
            signed_transaction: sig.signed,
            quick_return: request.quick_return,
            note: (!request.note.is_empty()).then(|| request.note.clone()),
            batch_id: request.batch_id.clone(),
        };
        Ok(PreparedPayment {
            kind: PreparedKind::Direct(post),
            seqno: sig.seqno,
            tx_id: sig.tx_hash,
        })
    }

    async fn prepare_relay(
        &self,
        sender: &SecretKey,
        seqno_provider: &dyn SequenceProvider,
        timebounds: Option<Timebounds>,
        request: &PaymentRequest,
        recipient: &Recipient,
    ) -> Result<(PreparedPayment, Option<TeamId>), EngineError> {
        let amount = require_minimum(&request.amount, MIN_RELAY_STROOPS, "relay")?;
        let key = self
            .collaborators
            .relay_keys
            .key_for_recipient(recipient)
            .await?;

        let relay = create_relay_transfer(
            sender,
            amount,
            &request.note,
            &key,
            seqno_provider,
            timebounds,
            self.config.base_fee,
        )
        .await?;

        let post = PaymentRelayPost {
            to_assertion: recipient.input.clone(),
            relay_account: relay.escrow.account_id,
            team_id: key.team_id.clone(),
            box_b64: relay.escrow.box_b64,
            signed_transaction: relay.sign.signed,
            quick_return: request.quick_return,
            batch_id: request.batch_id.clone(),
        };
        let prepared = PreparedPayment {
            kind: PreparedKind::Relay(post),
            seqno: relay.sign.seqno,
            tx_id: relay.sign.tx_hash,
        };
        Ok((prepared, Some(key.team_id)))
    }

    /// Submit a prepared payment, tracking it as pending on `sender` while
    /// the server has it. The caller must hold the seqno lease.
    pub(crate) async fn submit_prepared(
        &self,
        sender: &AccountId,
        prepared: PreparedPayment,
    ) -> Result<Submission, EngineError> {
        let ws = &self.wallet_state;
        if let Err(e) = ws
            .add_pending_tx(sender, prepared.tx_id.clone(), prepared.seqno)
            .await
        {
            debug!(error = %e, "add_pending_tx failed");
        }

        let result = match prepared.kind {
            PreparedKind::Direct(post) => ws.submit_payment(post).await,
            PreparedKind::Relay(post) => ws.submit_relay_payment(post).await,
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                if let Err(rerr) = ws.remove_pending_tx(sender, &prepared.tx_id).await {
                    debug!(error = %rerr, "remove_pending_tx failed");
                }
                return Err(e);
            }
        };

        if !result.pending {
            if let Err(e) = ws.remove_pending_tx(sender, &prepared.tx_id).await {
                debug!(error = %e, "remove_pending_tx failed");
            }
        }
        Ok(Submission {
            kb_tx_id: result.keybase_id,
            tx_id: result.stellar_id,
            pending: result.pending,
        })
    }

    /// Send a single payment.
    pub async fn send_payment(&self, arg: SendPaymentArg) -> Result<SendPaymentResult, EngineError> {
        let (sender_account, sender_key) = self.lookup_sender(arg.from.as_ref()).await?;
        let timebounds = self.timebounds_for_sending().await?;

        let (seqno_provider, lease) = SeqnoProvider::new(&self.wallet_state).await;
        let (prepared, relay_team_id) = self
            .prepare_payment(&sender_key, &seqno_provider, timebounds, &arg.request)
            .await?;
        let relay = prepared.is_relay();
        let submission = self.submit_prepared(&sender_account, prepared).await?;
        lease.unlock();

        if let Err(e) = self.wallet_state.refresh(&sender_account, "send_payment").await {
            debug!(account = %sender_account, error = %e, "refresh after payment failed");
        }

        info!(
            kb_tx_id = %submission.kb_tx_id,
            tx_id = %submission.tx_id,
            pending = submission.pending,
            relay,
            "payment sent"
        );

        Ok(SendPaymentResult {
            kb_tx_id: submission.kb_tx_id,
            tx_id: submission.tx_id,
            pending: submission.pending,
            relay_team_id,
        })
    }
}
