// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Payment Engine - wallet transaction sequencing
//!
//! Client-side engine that keeps ledger sequence numbers in order across
//! concurrent payments, submits batches, waits for their confirmation and
//! claims relay payments in the background.
//!
//! ## Modules
//!
//! - `wallet_state` - cached account state, seqno bookkeeping and the seqno lease
//! - `seqno` - sequence number providers for the transaction builder
//! - `payments` - single payments, batches and multi-operation batches
//! - `claim` / `autoclaim` - manual and background relay claims
//! - `remote` - wallet server client (`Remoter` trait, HTTP implementation)
//! - `build` / `relay` - transaction envelopes and relay escrow boxes
//! - `engine` - the service handle tying everything together

pub mod amount;
pub mod autoclaim;
pub mod build;
pub mod claim;
pub mod config;
pub mod engine;
pub mod error;
pub mod lookup;
pub mod notify;
pub mod payments;
pub mod relay;
pub mod remote;
pub mod seqno;
pub mod telemetry;
pub mod types;
pub mod wallet_state;

#[cfg(test)]
mod test_support;

pub use autoclaim::AutoClaimRunner;
pub use engine::{Collaborators, Engine};
pub use error::EngineError;
pub use payments::{PaymentRequest, SendPaymentArg, SendPaymentResult};
