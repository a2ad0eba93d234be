// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction building and signing.
//!
//! Transactions are serialized as a JSON body, hashed with SHA-256 and
//! signed with the source account's Ed25519 key. The signed envelope is the
//! base64 encoding of `{body, signature, public_key}`.
//!
//! Sequence numbers come from a [`SequenceProvider`]. The provider returns
//! the account's current sequence number and the builder stamps the
//! transaction with that value plus one.

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;
use crate::types::{AccountId, SecretKey, TimeboundsRecommendation, TransactionId};

/// Source of sequence numbers for transactions built from an account.
#[async_trait]
pub trait SequenceProvider: Send + Sync {
    async fn sequence_for_account(&self, account: &AccountId) -> Result<u64, EngineError>;
}

/// Validity window of a transaction, in Unix seconds. `max_time == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebounds {
    pub min_time: i64,
    pub max_time: i64,
}

impl Timebounds {
    pub fn from_recommendation(rec: TimeboundsRecommendation) -> Self {
        Self {
            min_time: 0,
            max_time: rec.time_now + rec.timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Payment {
        destination: AccountId,
        amount: i64,
    },
    CreateAccount {
        destination: AccountId,
        starting_balance: i64,
    },
    /// Move every remaining stroop to `destination` and close the source account.
    AccountMerge { destination: AccountId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBody {
    pub source: AccountId,
    pub seqno: u64,
    pub fee: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timebounds: Option<Timebounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignedEnvelope {
    body: TransactionBody,
    public_key: String,
    signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResult {
    /// Base64 signed envelope ready for submission.
    pub signed: String,
    pub tx_hash: TransactionId,
    /// Sequence number stamped on the transaction.
    pub seqno: u64,
}

pub(crate) fn keypair(secret: &SecretKey) -> Result<Ed25519KeyPair, EngineError> {
    let seed = secret
        .seed()
        .ok_or_else(|| EngineError::Crypto("malformed secret key".to_string()))?;
    Ed25519KeyPair::from_seed_unchecked(&seed)
        .map_err(|e| EngineError::Crypto(format!("invalid ed25519 seed: {e}")))
}

/// Account id controlled by `secret`.
pub fn account_for_secret(secret: &SecretKey) -> Result<AccountId, EngineError> {
    Ok(AccountId::from_public_key(keypair(secret)?.public_key().as_ref()))
}

/// Accumulates operations for a single transaction.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    base_fee: u32,
    timebounds: Option<Timebounds>,
    memo: Option<String>,
    operations: Vec<Operation>,
}

impl TransactionBuilder {
    pub fn new(base_fee: u32) -> Self {
        Self {
            base_fee,
            timebounds: None,
            memo: None,
            operations: Vec::new(),
        }
    }

    pub fn timebounds(mut self, timebounds: Option<Timebounds>) -> Self {
        self.timebounds = timebounds;
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    pub fn payment(self, destination: AccountId, amount: i64) -> Self {
        self.operation(Operation::Payment {
            destination,
            amount,
        })
    }

    pub fn create_account(self, destination: AccountId, starting_balance: i64) -> Self {
        self.operation(Operation::CreateAccount {
            destination,
            starting_balance,
        })
    }

    pub fn account_merge(self, destination: AccountId) -> Self {
        self.operation(Operation::AccountMerge { destination })
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Allocate a sequence number for `source` and sign the transaction.
    pub async fn sign(
        self,
        source: &SecretKey,
        seqno_provider: &dyn SequenceProvider,
    ) -> Result<SignResult, EngineError> {
        if self.operations.is_empty() {
            return Err(EngineError::Build("transaction has no operations".to_string()));
        }
        let keypair = keypair(source)?;
        let source_account = AccountId::from_public_key(keypair.public_key().as_ref());

        let current = seqno_provider.sequence_for_account(&source_account).await?;
        let seqno = current
            .checked_add(1)
            .ok_or_else(|| EngineError::Build("sequence number overflow".to_string()))?;

        let body = TransactionBody {
            source: source_account,
            seqno,
            fee: u64::from(self.base_fee) * self.operations.len() as u64,
            timebounds: self.timebounds,
            memo: self.memo,
            operations: self.operations,
        };

        let body_bytes =
            serde_json::to_vec(&body).map_err(|e| EngineError::Build(e.to_string()))?;
        let hash = Sha256::digest(&body_bytes);
        let sig = keypair.sign(&hash);

        let envelope = SignedEnvelope {
            body,
            public_key: hex::encode_upper(keypair.public_key()),
            signature: hex::encode_upper(sig),
        };
        let envelope_bytes =
            serde_json::to_vec(&envelope).map_err(|e| EngineError::Build(e.to_string()))?;

        Ok(SignResult {
            signed: Base64::encode_string(&envelope_bytes),
            tx_hash: TransactionId(hex::encode(&hash)),
            seqno,
        })
    }
}

/// Decode a signed envelope and check its signature against the source account.
pub fn verify_envelope(signed: &str) -> Result<(TransactionBody, TransactionId), EngineError> {
    let bytes = Base64::decode_vec(signed)
        .map_err(|e| EngineError::Build(format!("invalid envelope encoding: {e}")))?;
    let envelope: SignedEnvelope =
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Build(e.to_string()))?;

    let public_key = hex::decode(&envelope.public_key)
        .map_err(|e| EngineError::Crypto(format!("malformed public key: {e}")))?;
    if envelope.body.source.public_key().map(|k| k.to_vec()) != Some(public_key.clone()) {
        return Err(EngineError::Crypto(
            "envelope key does not match source account".to_string(),
        ));
    }
    let signature = hex::decode(&envelope.signature)
        .map_err(|e| EngineError::Crypto(format!("malformed signature: {e}")))?;

    let body_bytes =
        serde_json::to_vec(&envelope.body).map_err(|e| EngineError::Build(e.to_string()))?;
    let hash = Sha256::digest(&body_bytes);
    UnparsedPublicKey::new(&signature::ED25519, &public_key)
        .verify(&hash, &signature)
        .map_err(|_| EngineError::Crypto("signature verification failed".to_string()))?;

    Ok((envelope.body, TransactionId(hex::encode(&hash))))
}
