// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fan-out of payment status push notifications.
//!
//! The embedding service forwards server push messages here; batch waits
//! subscribe before submitting so no update is missed.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::PaymentStatusUpdate;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PaymentNotifier {
    tx: broadcast::Sender<PaymentStatusUpdate>,
}

impl Default for PaymentNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PaymentNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentStatusUpdate> {
        self.tx.subscribe()
    }

    /// Deliver `update` to every current subscriber. Returns how many received it.
    pub fn publish(&self, update: PaymentStatusUpdate) -> usize {
        match self.tx.send(update) {
            Ok(n) => n,
            Err(broadcast::error::SendError(update)) => {
                debug!(tx_id = %update.tx_id, "no subscribers for payment status update");
                0
            }
        }
    }
}
