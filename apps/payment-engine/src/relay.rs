// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay escrow accounts.
//!
//! A relay payment funds a fresh escrow account whose secret key is sealed
//! with a key shared between sender and recipient. Whoever can open the box
//! can later merge the escrow into their own account.
//!
//! Box format: `base64(nonce || ciphertext || tag)` using ChaCha20-Poly1305.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::build::{account_for_secret, SequenceProvider, SignResult, Timebounds, TransactionBuilder};
use crate::error::EngineError;
use crate::lookup::RelayKey;
use crate::types::{AccountId, SecretKey};

const BOX_VERSION: u32 = 1;

/// Plaintext sealed inside a relay box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayContents {
    pub v: u32,
    pub account_id: AccountId,
    pub secret: String,
    #[serde(default)]
    pub note: String,
}

impl RelayContents {
    pub fn secret_key(&self) -> Result<SecretKey, EngineError> {
        SecretKey::parse(&self.secret)
            .ok_or_else(|| EngineError::Crypto("relay box holds a malformed key".to_string()))
    }
}

/// Freshly generated escrow account plus its sealed secret.
#[derive(Debug, Clone)]
pub struct RelayEscrow {
    pub account_id: AccountId,
    pub box_b64: String,
}

impl RelayEscrow {
    pub fn generate(note: &str, key: &RelayKey) -> Result<Self, EngineError> {
        let rng = SystemRandom::new();
        let mut seed = [0u8; 32];
        rng.fill(&mut seed)
            .map_err(|_| EngineError::Crypto("failed to generate escrow key".to_string()))?;
        let secret = SecretKey::from_seed(&seed);
        let account_id = account_for_secret(&secret)?;

        let contents = RelayContents {
            v: BOX_VERSION,
            account_id: account_id.clone(),
            secret: secret.expose().to_string(),
            note: note.to_string(),
        };
        let box_b64 = seal(&contents, key, &rng)?;

        Ok(Self {
            account_id,
            box_b64,
        })
    }
}

/// Signed funding transaction for a relay payment.
#[derive(Debug, Clone)]
pub struct RelayPaymentBuild {
    pub escrow: RelayEscrow,
    pub sign: SignResult,
}

/// Generate an escrow and sign the transaction that creates it with `amount` stroops.
pub async fn create_relay_transfer(
    from: &SecretKey,
    amount: i64,
    note: &str,
    key: &RelayKey,
    seqno_provider: &dyn SequenceProvider,
    timebounds: Option<Timebounds>,
    base_fee: u32,
) -> Result<RelayPaymentBuild, EngineError> {
    let escrow = RelayEscrow::generate(note, key)?;
    let sign = TransactionBuilder::new(base_fee)
        .timebounds(timebounds)
        .create_account(escrow.account_id.clone(), amount)
        .sign(from, seqno_provider)
        .await?;
    Ok(RelayPaymentBuild { escrow, sign })
}

fn aead_key(key: &RelayKey) -> Result<LessSafeKey, EngineError> {
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, &key.key)
        .map_err(|_| EngineError::Crypto("invalid relay key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(contents: &RelayContents, key: &RelayKey, rng: &SystemRandom) -> Result<String, EngineError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EngineError::Crypto("failed to generate nonce".to_string()))?;

    let mut in_out =
        serde_json::to_vec(contents).map_err(|e| EngineError::Crypto(e.to_string()))?;
    aead_key(key)?
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| EngineError::Crypto("failed to seal relay box".to_string()))?;

    let mut sealed = nonce_bytes.to_vec();
    sealed.extend_from_slice(&in_out);
    Ok(Base64::encode_string(&sealed))
}

/// Open a relay box with `key`.
pub fn open_box(box_b64: &str, key: &RelayKey) -> Result<RelayContents, EngineError> {
    let sealed = Base64::decode_vec(box_b64)
        .map_err(|e| EngineError::Crypto(format!("invalid relay box encoding: {e}")))?;
    if sealed.len() <= NONCE_LEN {
        return Err(EngineError::Crypto("relay box too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| EngineError::Crypto("invalid relay box nonce".to_string()))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = aead_key(key)?
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| EngineError::Crypto("failed to open relay box".to_string()))?;

    let contents: RelayContents =
        serde_json::from_slice(plaintext).map_err(|e| EngineError::Crypto(e.to_string()))?;
    if contents.v != BOX_VERSION {
        return Err(EngineError::Crypto(format!(
            "unsupported relay box version {}",
            contents.v
        )));
    }
    Ok(contents)
}
