// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Collaborators the engine consumes but does not implement: the encrypted
//! account bundle, recipient resolution, relay key derivation and client
//! notifications.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::{AccountId, NotificationId, SecretKey, TeamId, UserId};

/// Resolves the signing key of one of the user's own accounts.
#[async_trait]
pub trait SenderKeyLookup: Send + Sync {
    /// Primary account of the current user and its secret key.
    async fn primary_account(&self) -> Result<(AccountId, SecretKey), EngineError>;

    async fn secret_key(&self, account: &AccountId) -> Result<SecretKey, EngineError>;
}

/// Outcome of resolving a recipient string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// What the caller typed.
    pub input: String,
    /// Ledger account to pay directly, if the recipient has one.
    pub account_id: Option<AccountId>,
    /// Wallet user behind the recipient, if known.
    pub user: Option<UserId>,
}

#[async_trait]
pub trait RecipientLookup: Send + Sync {
    async fn lookup_recipient(&self, input: &str) -> Result<Recipient, EngineError>;
}

/// Symmetric key material used to seal relay escrow secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayKey {
    pub team_id: TeamId,
    pub key: [u8; 32],
}

impl std::fmt::Debug for RelayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayKey")
            .field("team_id", &self.team_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait RelayKeyLookup: Send + Sync {
    /// Key shared between the current user and `recipient`.
    async fn key_for_recipient(&self, recipient: &Recipient) -> Result<RelayKey, EngineError>;

    /// Key of an existing relay's team, used when claiming.
    async fn key_for_team(&self, team_id: &TeamId) -> Result<RelayKey, EngineError>;
}

#[async_trait]
pub trait NotificationDismisser: Send + Sync {
    async fn dismiss(&self, id: &NotificationId) -> Result<(), EngineError>;
}
