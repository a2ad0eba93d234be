// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger and wallet-server value types shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimeMs = i64;

pub fn now_ms() -> TimeMs {
    chrono::Utc::now().timestamp_millis()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Public ledger account identifier: `G` followed by the hex Ed25519 public key.
    AccountId
);
string_id!(
    /// Ledger transaction hash.
    TransactionId
);
string_id!(
    /// Wallet-server identifier for a payment.
    KeybaseTransactionId
);
string_id!(TeamId);
string_id!(UserId);
string_id!(
    /// Identifier of a client notification that can be dismissed.
    NotificationId
);

const ACCOUNT_PREFIX: char = 'G';
const SECRET_PREFIX: char = 'S';

impl AccountId {
    pub fn from_public_key(key: &[u8]) -> Self {
        Self(format!("{ACCOUNT_PREFIX}{}", hex::encode_upper(key)))
    }

    /// Decode the Ed25519 public key, if this id is well formed.
    pub fn public_key(&self) -> Option<[u8; 32]> {
        let encoded = self.0.strip_prefix(ACCOUNT_PREFIX)?;
        hex::decode(encoded).ok()?.try_into().ok()
    }
}

/// Ed25519 seed for a ledger account. `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(format!("{SECRET_PREFIX}{}", hex::encode_upper(seed)))
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = Self(value.trim().to_string());
        key.seed().map(|_| key)
    }

    pub fn seed(&self) -> Option<[u8; 32]> {
        let encoded = self.0.strip_prefix(SECRET_PREFIX)?;
        hex::decode(encoded).ok()?.try_into().ok()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    None,
    Pending,
    Claimable,
    Completed,
    Error,
    Unknown,
    Canceled,
}

impl PaymentStatus {
    pub fn description(&self) -> &'static str {
        match self {
            PaymentStatus::None => "none",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Claimable => "claimable",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Error => "error",
            PaymentStatus::Unknown => "unknown",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Which party is taking the funds out of a relay escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayDirection {
    /// The recipient claims the relay.
    Claim,
    /// The sender takes the relay back.
    Yank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset_code: String,
    /// Decimal amount string with up to seven fractional digits.
    pub amount: String,
}

impl Balance {
    pub fn native(amount: impl Into<String>) -> Self {
        Self {
            asset_code: "XLM".to_string(),
            amount: amount.into(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.asset_code == "XLM"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountDetails {
    pub account_id: AccountId,
    /// Current ledger sequence number, as a decimal string. Empty for unfunded accounts.
    #[serde(default)]
    pub seqno: String,
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub unread_payments: u32,
}

impl AccountDetails {
    pub fn parsed_seqno(&self) -> Result<u64, std::num::ParseIntError> {
        if self.seqno.is_empty() {
            Ok(0)
        } else {
            self.seqno.parse()
        }
    }
}

/// Direct payment submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDirectPost {
    pub to_user: Option<UserId>,
    pub signed_transaction: String,
    pub quick_return: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// Relay payment submission: funds an escrow account the recipient can claim later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRelayPost {
    pub to_assertion: String,
    pub relay_account: AccountId,
    pub team_id: TeamId,
    pub box_b64: String,
    pub signed_transaction: String,
    pub quick_return: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOp {
    pub to_user: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOp {
    pub to_assertion: String,
    pub relay_account: AccountId,
    pub team_id: TeamId,
    pub box_b64: String,
}

/// One transaction carrying several payment operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMultiPost {
    pub signed_transaction: String,
    pub operations: Vec<PaymentOp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub stellar_id: TransactionId,
    pub keybase_id: KeybaseTransactionId,
    /// The server returned before the ledger confirmed the transaction.
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMultiResult {
    pub tx_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayClaimPost {
    pub keybase_id: KeybaseTransactionId,
    pub dir: RelayDirection,
    pub signed_transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_claim_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayClaimResult {
    pub claim_stellar_id: TransactionId,
}

/// A relay payment the server wants claimed on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoClaim {
    pub kb_tx_id: KeybaseTransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeboundsRecommendation {
    /// Server wall clock, in Unix seconds.
    pub time_now: i64,
    /// Seconds the transaction should stay valid.
    pub timeout: i64,
}

/// Payment as recorded by the wallet server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "lowercase")]
pub enum PaymentSummary {
    Stellar(StellarPaymentSummary),
    Direct(DirectPaymentSummary),
    Relay(RelayPaymentSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StellarPaymentSummary {
    pub tx_id: TransactionId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectPaymentSummary {
    pub kb_tx_id: KeybaseTransactionId,
    pub tx_id: TransactionId,
    pub tx_status: PaymentStatus,
    pub from_user: UserId,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPaymentSummary {
    pub kb_tx_id: KeybaseTransactionId,
    pub tx_id: TransactionId,
    pub tx_status: PaymentStatus,
    pub from_user: UserId,
    pub from_stellar: AccountId,
    pub relay_account: AccountId,
    pub team_id: TeamId,
    pub box_b64: String,
    pub amount: String,
    #[serde(default)]
    pub claim: Option<ClaimSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub tx_id: TransactionId,
    pub tx_status: PaymentStatus,
    pub dir: RelayDirection,
    pub to_stellar: AccountId,
}

/// Push notification about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusUpdate {
    pub account_id: AccountId,
    pub tx_id: TransactionId,
    pub status: PaymentStatus,
}

/// One entry of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPaymentArg {
    pub recipient: String,
    /// Decimal XLM amount.
    pub amount: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchArg {
    pub batch_id: String,
    pub timeout_secs: u64,
    pub payments: Vec<BatchPaymentArg>,
    #[serde(default)]
    pub use_multi: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPaymentError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchPaymentResult {
    pub recipient: String,
    pub start_time: TimeMs,
    pub submitted_time: TimeMs,
    pub end_time: TimeMs,
    pub tx_id: TransactionId,
    pub status: PaymentStatus,
    pub status_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchPaymentError>,
    /// Funds went to an escrow account rather than directly.
    #[serde(default)]
    pub relay: bool,
}

impl BatchPaymentResult {
    pub fn set_status(&mut self, status: PaymentStatus) {
        self.status = status;
        self.status_description = status.description().to_string();
    }

    pub fn duration_ms(&self) -> Option<TimeMs> {
        (self.end_time > 0).then(|| self.end_time - self.start_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchResultLocal {
    pub start_time: TimeMs,
    pub prepared_time: TimeMs,
    pub all_submitted_time: TimeMs,
    pub all_complete_time: TimeMs,
    pub end_time: TimeMs,
    pub payments: Vec<BatchPaymentResult>,
    pub overall_duration_ms: TimeMs,
    pub prepare_duration_ms: TimeMs,
    pub submit_duration_ms: TimeMs,
    pub wait_payments_duration_ms: TimeMs,
    pub count_success: usize,
    pub count_direct: usize,
    pub count_relay: usize,
    pub count_error: usize,
    pub count_pending: usize,
    pub avg_duration_ms: TimeMs,
    pub avg_success_duration_ms: TimeMs,
    pub avg_direct_duration_ms: TimeMs,
    pub avg_relay_duration_ms: TimeMs,
    pub avg_error_duration_ms: TimeMs,
}
