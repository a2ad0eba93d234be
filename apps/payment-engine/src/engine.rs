// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::build::Timebounds;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::lookup::{NotificationDismisser, RecipientLookup, RelayKeyLookup, SenderKeyLookup};
use crate::notify::PaymentNotifier;
use crate::remote::http::HttpRemote;
use crate::remote::{RemoteError, Remoter};
use crate::types::{PaymentStatus, PaymentStatusUpdate, UserId};
use crate::wallet_state::WalletState;

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub sender_keys: Arc<dyn SenderKeyLookup>,
    pub recipients: Arc<dyn RecipientLookup>,
    pub relay_keys: Arc<dyn RelayKeyLookup>,
    pub dismisser: Arc<dyn NotificationDismisser>,
}

/// Shared handle to everything a payment operation needs. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) wallet_state: Arc<WalletState>,
    pub(crate) collaborators: Collaborators,
    pub(crate) notifier: PaymentNotifier,
    pub(crate) me: UserId,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn Remoter>,
        collaborators: Collaborators,
        me: UserId,
    ) -> Self {
        Self {
            config,
            wallet_state: Arc::new(WalletState::new(remote)),
            collaborators,
            notifier: PaymentNotifier::default(),
            me,
        }
    }

    /// Engine talking to the wallet server over HTTPS.
    pub fn with_http_remote(
        config: EngineConfig,
        collaborators: Collaborators,
        me: UserId,
    ) -> Result<Self, RemoteError> {
        let remote = Arc::new(HttpRemote::new(&config)?);
        Ok(Self::new(config, remote, collaborators, me))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn wallet_state(&self) -> &Arc<WalletState> {
        &self.wallet_state
    }

    pub fn notifier(&self) -> &PaymentNotifier {
        &self.notifier
    }

    pub fn user(&self) -> &UserId {
        &self.me
    }

    /// Spawn the background account refresher.
    pub fn spawn_background_refresh(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let wallet_state = self.wallet_state.clone();
        tokio::spawn(async move { wallet_state.run_background_refresh(shutdown).await })
    }

    /// Entry point for payment status push notifications.
    ///
    /// Finished transactions stop counting against the account's seqno
    /// bookkeeping, then the update is fanned out to batch waiters.
    pub async fn handle_payment_status(&self, update: PaymentStatusUpdate) {
        if update.status != PaymentStatus::Pending {
            if let Err(e) = self
                .wallet_state
                .remove_pending_tx(&update.account_id, &update.tx_id)
                .await
            {
                debug!(account = %update.account_id, error = %e, "status update for untracked account");
            }
        }
        self.notifier.publish(update);
    }

    /// Timebounds for a transaction about to be submitted, based on the
    /// server clock offset by the latency of asking for it.
    ///
    /// `None` when the server recommends no timeout.
    pub(crate) async fn timebounds_for_sending(&self) -> Result<Option<Timebounds>, EngineError> {
        let start = Instant::now();
        let rec = self.wallet_state.server_timebounds_recommendation().await?;
        let took = start.elapsed();

        if rec.time_now == 0 {
            return Err(EngineError::Build(
                "invalid server response for transaction timebounds".to_string(),
            ));
        }
        if rec.timeout == 0 {
            return Ok(None);
        }

        let deadline = rec.time_now + took.as_secs() as i64 + rec.timeout;
        debug!(time_now = rec.time_now, timeout = rec.timeout, deadline, "transaction timebounds");
        Ok(Some(Timebounds {
            min_time: 0,
            max_time: deadline,
        }))
    }
}
