// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sequence number providers handed to the transaction builder.
//!
//! Both providers are created together with a [`SeqnoLease`]; the caller
//! keeps the lease until the last transaction built with the provider has
//! been submitted.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::build::SequenceProvider;
use crate::error::EngineError;
use crate::types::AccountId;
use crate::wallet_state::{SeqnoLease, WalletState};

/// Allocates consecutive sequence numbers from the wallet state cache.
///
/// The first allocation forces a seqno refresh from the network; clones
/// share that latch so concurrent preparation tasks refresh only once.
#[derive(Clone)]
pub struct SeqnoProvider {
    wallet_state: Arc<WalletState>,
    refreshed: Arc<OnceCell<()>>,
}

impl SeqnoProvider {
    pub async fn new(wallet_state: &Arc<WalletState>) -> (Self, SeqnoLease) {
        let lease = wallet_state.seqno_lock().await;
        let provider = Self {
            wallet_state: wallet_state.clone(),
            refreshed: Arc::new(OnceCell::new()),
        };
        (provider, lease)
    }
}

#[async_trait]
impl SequenceProvider for SeqnoProvider {
    async fn sequence_for_account(&self, account: &AccountId) -> Result<u64, EngineError> {
        self.refreshed
            .get_or_init(|| async {
                if let Err(e) = self.wallet_state.force_seqno_refresh(account).await {
                    debug!(account = %account, error = %e, "seqno refresh failed, using cached value");
                }
            })
            .await;

        let seqno = self.wallet_state.account_seqno_and_bump(account).await?;
        debug!(account = %account, seqno, "allocated seqno");
        Ok(seqno)
    }
}

/// Reads the sequence number straight from the network, for relay escrow
/// accounts the wallet does not track.
pub struct ClaimSeqnoProvider {
    wallet_state: Arc<WalletState>,
}

impl ClaimSeqnoProvider {
    pub async fn new(wallet_state: &Arc<WalletState>) -> (Self, SeqnoLease) {
        let lease = wallet_state.seqno_lock().await;
        (
            Self {
                wallet_state: wallet_state.clone(),
            },
            lease,
        )
    }
}

#[async_trait]
impl SequenceProvider for ClaimSeqnoProvider {
    async fn sequence_for_account(&self, account: &AccountId) -> Result<u64, EngineError> {
        let seqno = self.wallet_state.remote().account_seqno(account).await?;
        debug!(account = %account, seqno, "claim seqno from network");
        Ok(seqno)
    }
}
