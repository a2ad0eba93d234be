// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Batch payments
//!
//! A batch runs in four phases:
//!
//! 1. **Prepare**: one task per entry, all sharing one [`SeqnoProvider`].
//!    Outcomes are fanned in over a single channel.
//! 2. **Submit**: outcomes are sorted by sequence number and submitted one
//!    by one while the seqno lease is held, so the ledger sees them in order.
//! 3. **Wait**: pending entries are resolved by status notifications until
//!    the batch deadline passes.
//! 4. **Summarize**: counts and durations.
//!
//! `results.payments` is always in request order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PaymentRequest, PreparedPayment};
use crate::amount::{
    require_minimum, MIN_CREATE_ACCOUNT_STROOPS, MIN_PAYMENT_STROOPS, MIN_RELAY_STROOPS,
};
use crate::build::{Operation, Timebounds, TransactionBuilder};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::relay::RelayEscrow;
use crate::seqno::SeqnoProvider;
use crate::types::{
    now_ms, AccountId, BatchArg, BatchPaymentArg, BatchPaymentError, BatchPaymentResult,
    BatchResultLocal, PaymentMultiPost, PaymentOp, PaymentStatus, PaymentStatusUpdate, RelayOp,
    SecretKey, TimeMs, TransactionId,
};
use crate::wallet_state::SeqnoLease;

struct PrepareOutcome {
    index: usize,
    start_time: TimeMs,
    result: Result<PreparedPayment, EngineError>,
}

impl PrepareOutcome {
    /// Failed preparations have no seqno and sort first.
    fn seqno(&self) -> Option<u64> {
        self.result.as_ref().ok().map(|p| p.seqno)
    }
}

fn resolve_batch_id(arg: &BatchArg) -> String {
    if arg.batch_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        arg.batch_id.clone()
    }
}

fn empty_results(payments: &[BatchPaymentArg]) -> Vec<BatchPaymentResult> {
    payments
        .iter()
        .map(|p| BatchPaymentResult {
            recipient: p.recipient.clone(),
            ..Default::default()
        })
        .collect()
}

fn mark_error(entry: &mut BatchPaymentResult, err: &EngineError) {
    entry.set_status(PaymentStatus::Error);
    entry.error = Some(BatchPaymentError {
        message: err.to_string(),
    });
    entry.end_time = now_ms();
}

fn mark_completed(entry: &mut BatchPaymentResult, tx_id: TransactionId) {
    entry.tx_id = tx_id;
    entry.set_status(PaymentStatus::Completed);
    entry.end_time = now_ms();
}

impl Engine {
    fn batch_timeout(&self, arg: &BatchArg) -> Duration {
        if arg.timeout_secs == 0 {
            self.config.batch_timeout
        } else {
            Duration::from_secs(arg.timeout_secs)
        }
    }

    async fn seqno_provider_or_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(SeqnoProvider, SeqnoLease), EngineError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Canceled),
            acquired = SeqnoProvider::new(&self.wallet_state) => Ok(acquired),
        }
    }

    /// Send every payment in `arg` as its own transaction.
    ///
    /// Per-entry failures are reported in the result. Only a failure to
    /// start (sender key, timebounds), cancellation during preparation, or
    /// a lost preparation task fails the whole call.
    pub async fn batch(
        &self,
        arg: BatchArg,
        cancel: CancellationToken,
    ) -> Result<BatchResultLocal, EngineError> {
        if arg.use_multi {
            return self.batch_multi(arg, cancel).await;
        }

        let started = Instant::now();
        let deadline = started + self.batch_timeout(&arg);
        let batch_id = resolve_batch_id(&arg);
        let mut result = BatchResultLocal {
            start_time: now_ms(),
            payments: empty_results(&arg.payments),
            ..Default::default()
        };
        info!(batch_id = %batch_id, count = arg.payments.len(), "batch started");

        let (sender_account, sender_key) = self.lookup_sender(None).await?;
        let timebounds = self.timebounds_for_sending().await?;
        let (seqno_provider, lease) = self.seqno_provider_or_cancel(&cancel).await?;

        let outcomes = self
            .prepare_batch(&arg, &batch_id, &sender_key, &seqno_provider, timebounds, &cancel)
            .await?;
        result.prepared_time = now_ms();
        debug!(batch_id = %batch_id, "batch prepared");

        // subscribe before the first submission so no confirmation is missed
        let updates = self.notifier.subscribe();
        let mut waiting = HashMap::new();
        for outcome in outcomes {
            let entry = &mut result.payments[outcome.index];
            entry.start_time = outcome.start_time;
            let prepared = match outcome.result {
                Ok(prepared) => prepared,
                Err(e) => {
                    debug!(batch_id = %batch_id, recipient = %entry.recipient, error = %e, "payment preparation failed");
                    mark_error(entry, &e);
                    continue;
                }
            };

            entry.relay = prepared.is_relay();
            entry.tx_id = prepared.tx_id.clone();
            entry.submitted_time = now_ms();
            match self.submit_prepared(&sender_account, prepared).await {
                Ok(sub) if sub.pending => {
                    entry.tx_id = sub.tx_id.clone();
                    entry.set_status(PaymentStatus::Pending);
                    waiting.insert(sub.tx_id, outcome.index);
                }
                Ok(sub) => mark_completed(entry, sub.tx_id),
                Err(e) => {
                    warn!(batch_id = %batch_id, recipient = %entry.recipient, error = %e, "payment submission failed");
                    mark_error(entry, &e);
                }
            }
        }
        lease.unlock();
        result.all_submitted_time = now_ms();
        info!(batch_id = %batch_id, pending = waiting.len(), "batch submitted");

        self.wait_for_payments(&batch_id, &mut result, waiting, updates, deadline, &cancel)
            .await;

        result.end_time = now_ms();
        summarize(&mut result);
        info!(
            batch_id = %batch_id,
            success = result.count_success,
            error = result.count_error,
            pending = result.count_pending,
            duration_ms = result.overall_duration_ms,
            "batch finished"
        );
        Ok(result)
    }

    async fn prepare_batch(
        &self,
        arg: &BatchArg,
        batch_id: &str,
        sender: &SecretKey,
        seqno_provider: &SeqnoProvider,
        timebounds: Option<Timebounds>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PrepareOutcome>, EngineError> {
        let expected = arg.payments.len();
        let (tx, mut rx) = mpsc::channel(expected.max(1));
        let mut tasks = JoinSet::new();

        for (index, payment) in arg.payments.iter().enumerate() {
            let engine = self.clone();
            let sender = sender.clone();
            let seqno_provider = seqno_provider.clone();
            let tx = tx.clone();
            let request = PaymentRequest {
                to: payment.recipient.clone(),
                amount: payment.amount.clone(),
                note: payment.message.clone(),
                memo: None,
                force_relay: false,
                quick_return: true,
                batch_id: Some(batch_id.to_string()),
            };
            tasks.spawn(async move {
                let start_time = now_ms();
                let result = engine
                    .prepare_payment(&sender, &seqno_provider, timebounds, &request)
                    .await
                    .map(|(prepared, _)| prepared);
                // the receiver is only gone once the batch was canceled
                let _ = tx
                    .send(PrepareOutcome {
                        index,
                        start_time,
                        result,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(expected);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!(batch_id = %batch_id, prepared = outcomes.len(), "batch canceled during preparation");
                    return Err(EngineError::Canceled);
                }
                outcome = rx.recv() => match outcome {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(batch_id = %batch_id, error = %e, "payment preparation task died");
            }
        }

        if outcomes.len() != expected {
            return Err(EngineError::Invariant(format!(
                "prepared {} of {} payments",
                outcomes.len(),
                expected
            )));
        }

        outcomes.sort_by_key(PrepareOutcome::seqno);
        Ok(outcomes)
    }

    async fn wait_for_payments(
        &self,
        batch_id: &str,
        result: &mut BatchResultLocal,
        mut waiting: HashMap<TransactionId, usize>,
        mut updates: broadcast::Receiver<PaymentStatusUpdate>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let period = self.config.batch_poll_interval.max(Duration::from_millis(1));
        let mut poll = tokio::time::interval(period);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut updates_open = true;

        while !waiting.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(batch_id = %batch_id, pending = waiting.len(), "batch wait canceled");
                    return;
                }
                _ = poll.tick() => {
                    if Instant::now() >= deadline {
                        info!(batch_id = %batch_id, pending = waiting.len(), "batch wait timed out");
                        return;
                    }
                }
                update = updates.recv(), if updates_open => match update {
                    Ok(update) => {
                        if let Some(&index) = waiting.get(&update.tx_id) {
                            let entry = &mut result.payments[index];
                            entry.set_status(update.status);
                            if update.status != PaymentStatus::Pending {
                                entry.end_time = now_ms();
                                waiting.remove(&update.tx_id);
                                debug!(batch_id = %batch_id, tx_id = %update.tx_id, status = %update.status, "batch payment resolved");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(batch_id = %batch_id, skipped, "missed payment status updates");
                    }
                    Err(RecvError::Closed) => updates_open = false,
                },
            }
        }

        result.all_complete_time = now_ms();
    }

    /// Send every payment in `arg` as one operation of a single transaction.
    pub async fn batch_multi(
        &self,
        arg: BatchArg,
        cancel: CancellationToken,
    ) -> Result<BatchResultLocal, EngineError> {
        let batch_id = resolve_batch_id(&arg);
        let mut result = BatchResultLocal {
            start_time: now_ms(),
            payments: empty_results(&arg.payments),
            ..Default::default()
        };
        info!(batch_id = %batch_id, count = arg.payments.len(), "multi batch started");

        let (sender_account, sender_key) = self.lookup_sender(None).await?;
        let timebounds = self.timebounds_for_sending().await?;

        let mut builder = TransactionBuilder::new(self.config.base_fee).timebounds(timebounds);
        let mut operations = Vec::new();
        let mut included = Vec::new();
        for (index, payment) in arg.payments.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(batch_id = %batch_id, "multi batch canceled during preparation");
                return Err(EngineError::Canceled);
            }
            let entry = &mut result.payments[index];
            entry.start_time = now_ms();
            match self.prepare_multi_op(payment).await {
                Ok((op, payment_op)) => {
                    entry.relay = payment_op.relay.is_some();
                    builder = builder.operation(op);
                    operations.push(payment_op);
                    included.push(index);
                }
                Err(e) => {
                    debug!(batch_id = %batch_id, recipient = %entry.recipient, error = %e, "multi operation rejected");
                    mark_error(entry, &e);
                }
            }
        }
        result.prepared_time = now_ms();

        if included.is_empty() {
            info!(batch_id = %batch_id, "no payments left to submit");
        } else {
            let (seqno_provider, lease) = self.seqno_provider_or_cancel(&cancel).await?;
            let outcome = match builder.sign(&sender_key, &seqno_provider).await {
                Ok(sig) => {
                    let submitted_time = now_ms();
                    for &index in &included {
                        result.payments[index].tx_id = sig.tx_hash.clone();
                        result.payments[index].submitted_time = submitted_time;
                    }
                    let post = PaymentMultiPost {
                        signed_transaction: sig.signed,
                        operations,
                        batch_id: Some(batch_id.clone()),
                    };
                    self.submit_multi(&sender_account, post, sig.tx_hash, sig.seqno)
                        .await
                }
                Err(e) => Err(e),
            };
            lease.unlock();
            result.all_submitted_time = now_ms();

            match outcome {
                Ok(tx_id) => {
                    for &index in &included {
                        mark_completed(&mut result.payments[index], tx_id.clone());
                    }
                    result.all_complete_time = now_ms();
                }
                Err(e) => {
                    warn!(batch_id = %batch_id, error = %e, "multi payment submission failed");
                    for &index in &included {
                        mark_error(&mut result.payments[index], &e);
                    }
                }
            }
        }

        result.end_time = now_ms();
        summarize(&mut result);
        info!(
            batch_id = %batch_id,
            success = result.count_success,
            error = result.count_error,
            "multi batch finished"
        );
        Ok(result)
    }

    async fn prepare_multi_op(
        &self,
        payment: &BatchPaymentArg,
    ) -> Result<(Operation, PaymentOp), EngineError> {
        let recipient = self
            .collaborators
            .recipients
            .lookup_recipient(&payment.recipient)
            .await?;

        if let Some(destination) = recipient.account_id.clone() {
            let op = if self.wallet_state.is_account_funded(&destination).await? {
                Operation::Payment {
                    destination,
                    amount: require_minimum(&payment.amount, MIN_PAYMENT_STROOPS, "payment")?,
                }
            } else {
                Operation::CreateAccount {
                    destination,
                    starting_balance: require_minimum(
                        &payment.amount,
                        MIN_CREATE_ACCOUNT_STROOPS,
                        "new account",
                    )?,
                }
            };
            let payment_op = PaymentOp {
                to_user: recipient.user,
                relay: None,
            };
            return Ok((op, payment_op));
        }

        let amount = require_minimum(&payment.amount, MIN_RELAY_STROOPS, "relay")?;
        let key = self
            .collaborators
            .relay_keys
            .key_for_recipient(&recipient)
            .await?;
        let escrow = RelayEscrow::generate(&payment.message, &key)?;
        let op = Operation::CreateAccount {
            destination: escrow.account_id.clone(),
            starting_balance: amount,
        };
        let payment_op = PaymentOp {
            to_user: recipient.user,
            relay: Some(RelayOp {
                to_assertion: recipient.input,
                relay_account: escrow.account_id,
                team_id: key.team_id,
                box_b64: escrow.box_b64,
            }),
        };
        Ok((op, payment_op))
    }

    async fn submit_multi(
        &self,
        sender: &AccountId,
        post: PaymentMultiPost,
        tx_id: TransactionId,
        seqno: u64,
    ) -> Result<TransactionId, EngineError> {
        let ws = &self.wallet_state;
        if let Err(e) = ws.add_pending_tx(sender, tx_id.clone(), seqno).await {
            debug!(error = %e, "add_pending_tx failed");
        }
        let result = ws.submit_multi_payment(post).await;
        if let Err(e) = ws.remove_pending_tx(sender, &tx_id).await {
            debug!(error = %e, "remove_pending_tx failed");
        }
        Ok(result?.tx_id)
    }
}

#[derive(Default)]
struct Mean {
    total: TimeMs,
    count: TimeMs,
}

impl Mean {
    fn add(&mut self, value: TimeMs) {
        self.total += value;
        self.count += 1;
    }

    fn value(&self) -> TimeMs {
        if self.count == 0 {
            0
        } else {
            self.total / self.count
        }
    }
}

fn summarize(result: &mut BatchResultLocal) {
    let mut all = Mean::default();
    let mut success = Mean::default();
    let mut direct = Mean::default();
    let mut relay = Mean::default();
    let mut error = Mean::default();

    for payment in &result.payments {
        let duration = payment.duration_ms();
        if let Some(d) = duration {
            all.add(d);
        }
        match payment.status {
            PaymentStatus::Completed | PaymentStatus::Claimable => {
                result.count_success += 1;
                if payment.relay {
                    result.count_relay += 1;
                } else {
                    result.count_direct += 1;
                }
                if let Some(d) = duration {
                    success.add(d);
                    if payment.relay {
                        relay.add(d);
                    } else {
                        direct.add(d);
                    }
                }
            }
            PaymentStatus::Error => {
                result.count_error += 1;
                if let Some(d) = duration {
                    error.add(d);
                }
            }
            PaymentStatus::Pending => result.count_pending += 1,
            _ => {}
        }
    }

    result.avg_duration_ms = all.value();
    result.avg_success_duration_ms = success.value();
    result.avg_direct_duration_ms = direct.value();
    result.avg_relay_duration_ms = relay.value();
    result.avg_error_duration_ms = error.value();

    let since = |t: TimeMs, from: TimeMs| if t > 0 && from > 0 { t - from } else { 0 };
    result.overall_duration_ms = since(result.end_time, result.start_time);
    result.prepare_duration_ms = since(result.prepared_time, result.start_time);
    result.submit_duration_ms = since(result.all_submitted_time, result.prepared_time);
    result.wait_payments_duration_ms = if result.all_complete_time > 0 {
        since(result.all_complete_time, result.all_submitted_time)
    } else {
        since(result.end_time, result.all_submitted_time)
    };
}
