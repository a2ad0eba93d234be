// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::build::{account_for_secret, verify_envelope};
use crate::error::EngineError;
use crate::lookup::{
    NotificationDismisser, Recipient, RecipientLookup, RelayKey, RelayKeyLookup, SenderKeyLookup,
};
use crate::remote::{RemoteError, Remoter};
use crate::types::{
    AccountDetails, AccountId, AutoClaim, Balance, KeybaseTransactionId, NotificationId,
    PaymentDirectPost, PaymentMultiPost, PaymentRelayPost, PaymentResult, PaymentSummary,
    RelayClaimPost, RelayClaimResult, SecretKey, SubmitMultiResult, TeamId,
    TimeboundsRecommendation, TransactionId, UserId,
};

pub fn secret(n: u8) -> SecretKey {
    SecretKey::from_seed(&[n; 32])
}

pub fn account(n: u8) -> AccountId {
    account_for_secret(&secret(n)).unwrap()
}

/// A transaction accepted by [`MockRemote`].
#[derive(Debug, Clone)]
pub struct Submitted {
    pub kind: &'static str,
    pub source: AccountId,
    pub seqno: u64,
    pub tx_id: TransactionId,
}

#[derive(Default)]
struct MockState {
    seqnos: HashMap<AccountId, u64>,
    balances: HashMap<AccountId, Vec<Balance>>,
    submitted: Vec<Submitted>,
    direct_posts: Vec<PaymentDirectPost>,
    relay_posts: Vec<PaymentRelayPost>,
    multi_posts: Vec<PaymentMultiPost>,
    claim_posts: Vec<RelayClaimPost>,
    fail_seqnos: HashSet<u64>,
    lock_tokens: VecDeque<String>,
    released: Vec<String>,
    auto_claims: VecDeque<AutoClaim>,
    payments: HashMap<KeybaseTransactionId, PaymentSummary>,
    details_delay: Option<Duration>,
}

/// Scriptable [`Remoter`].
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
    details_calls: AtomicUsize,
    seqno_calls: AtomicUsize,
    fail_details: AtomicBool,
    fail_seqno: AtomicBool,
    pending: AtomicBool,
    fail_next_auto_claim: AtomicBool,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_seqno(&self, account: &AccountId, seqno: u64) {
        self.state().seqnos.insert(account.clone(), seqno);
    }

    pub fn set_balance(&self, account: &AccountId, amount: &str) {
        self.state()
            .balances
            .insert(account.clone(), vec![Balance::native(amount)]);
    }

    pub fn fail_details(&self, fail: bool) {
        self.fail_details.store(fail, Ordering::SeqCst);
    }

    pub fn fail_account_seqno(&self, fail: bool) {
        self.fail_seqno.store(fail, Ordering::SeqCst);
    }

    pub fn set_details_delay(&self, delay: Duration) {
        self.state().details_delay = Some(delay);
    }

    /// Submissions report the transaction as still pending on the ledger.
    pub fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    /// Reject the next submission of a transaction stamped with `seqno`.
    pub fn fail_submit_for_seqno(&self, seqno: u64) {
        self.state().fail_seqnos.insert(seqno);
    }

    pub fn push_lock_token(&self, token: &str) {
        self.state().lock_tokens.push_back(token.to_string());
    }

    pub fn push_auto_claim(&self, kb_tx_id: &str) {
        self.state().auto_claims.push_back(AutoClaim {
            kb_tx_id: KeybaseTransactionId::from(kb_tx_id),
        });
    }

    pub fn fail_next_auto_claim(&self) {
        self.fail_next_auto_claim.store(true, Ordering::SeqCst);
    }

    pub fn set_payment(&self, kb_tx_id: &str, summary: PaymentSummary) {
        self.state()
            .payments
            .insert(KeybaseTransactionId::from(kb_tx_id), summary);
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }

    pub fn seqno_calls(&self) -> usize {
        self.seqno_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.state().submitted.clone()
    }

    pub fn submitted_seqnos(&self) -> Vec<u64> {
        self.state().submitted.iter().map(|s| s.seqno).collect()
    }

    pub fn direct_posts(&self) -> Vec<PaymentDirectPost> {
        self.state().direct_posts.clone()
    }

    pub fn relay_posts(&self) -> Vec<PaymentRelayPost> {
        self.state().relay_posts.clone()
    }

    pub fn multi_posts(&self) -> Vec<PaymentMultiPost> {
        self.state().multi_posts.clone()
    }

    pub fn claim_posts(&self) -> Vec<RelayClaimPost> {
        self.state().claim_posts.clone()
    }

    pub fn released_tokens(&self) -> Vec<String> {
        self.state().released.clone()
    }

    pub fn remaining_auto_claims(&self) -> usize {
        self.state().auto_claims.len()
    }

    /// Verify `signed` and record it, advancing the ledger seqno of its source.
    ///
    /// Like the ledger, only the seqno right after the source's current one
    /// is accepted. Rejected transactions leave the ledger seqno alone.
    fn accept(&self, kind: &'static str, signed: &str) -> Result<Submitted, RemoteError> {
        let (body, tx_id) =
            verify_envelope(signed).map_err(|e| RemoteError::App { code: 100, desc: e.to_string() })?;
        let mut state = self.state();
        if state.fail_seqnos.remove(&body.seqno) {
            return Err(RemoteError::App {
                code: 3000,
                desc: format!("tx_failed seqno {}", body.seqno),
            });
        }
        let ledger = state.seqnos.entry(body.source.clone()).or_insert(0);
        if body.seqno != *ledger + 1 {
            return Err(RemoteError::App {
                code: 3000,
                desc: format!("tx_bad_seq seqno {} ledger {}", body.seqno, *ledger),
            });
        }
        *ledger = body.seqno;
        let submitted = Submitted {
            kind,
            source: body.source,
            seqno: body.seqno,
            tx_id,
        };
        state.submitted.push(submitted.clone());
        Ok(submitted)
    }

    fn payment_result(&self, submitted: &Submitted) -> PaymentResult {
        PaymentResult {
            stellar_id: submitted.tx_id.clone(),
            keybase_id: KeybaseTransactionId(format!("kb-{}", submitted.tx_id)),
            pending: self.pending.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Remoter for MockRemote {
    async fn account_seqno(&self, account: &AccountId) -> Result<u64, RemoteError> {
        self.seqno_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_seqno.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("seqno unavailable".to_string()));
        }
        self.state()
            .seqnos
            .get(account)
            .copied()
            .ok_or_else(|| RemoteError::App {
                code: 3101,
                desc: format!("account not found: {account}"),
            })
    }

    async fn balances(&self, account: &AccountId) -> Result<Vec<Balance>, RemoteError> {
        Ok(self.state().balances.get(account).cloned().unwrap_or_default())
    }

    async fn details(&self, account: &AccountId) -> Result<AccountDetails, RemoteError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().details_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_details.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("details unavailable".to_string()));
        }
        let state = self.state();
        let seqno = state.seqnos.get(account).copied().ok_or_else(|| RemoteError::App {
            code: 3101,
            desc: format!("account not found: {account}"),
        })?;
        Ok(AccountDetails {
            account_id: account.clone(),
            seqno: seqno.to_string(),
            balances: state.balances.get(account).cloned().unwrap_or_default(),
            unread_payments: 0,
        })
    }

    async fn submit_payment(&self, post: PaymentDirectPost) -> Result<PaymentResult, RemoteError> {
        let submitted = self.accept("direct", &post.signed_transaction)?;
        self.state().direct_posts.push(post);
        Ok(self.payment_result(&submitted))
    }

    async fn submit_relay_payment(
        &self,
        post: PaymentRelayPost,
    ) -> Result<PaymentResult, RemoteError> {
        let submitted = self.accept("relay", &post.signed_transaction)?;
        self.state().relay_posts.push(post);
        Ok(self.payment_result(&submitted))
    }

    async fn submit_multi_payment(
        &self,
        post: PaymentMultiPost,
    ) -> Result<SubmitMultiResult, RemoteError> {
        let submitted = self.accept("multi", &post.signed_transaction)?;
        self.state().multi_posts.push(post);
        Ok(SubmitMultiResult {
            tx_id: submitted.tx_id,
        })
    }

    async fn submit_relay_claim(
        &self,
        post: RelayClaimPost,
    ) -> Result<RelayClaimResult, RemoteError> {
        let submitted = self.accept("claim", &post.signed_transaction)?;
        self.state().claim_posts.push(post);
        Ok(RelayClaimResult {
            claim_stellar_id: submitted.tx_id,
        })
    }

    async fn acquire_auto_claim_lock(&self, _user: &UserId) -> Result<String, RemoteError> {
        Ok(self
            .state()
            .lock_tokens
            .pop_front()
            .unwrap_or_else(|| "lock-token".to_string()))
    }

    async fn release_auto_claim_lock(&self, _user: &UserId, token: &str) -> Result<(), RemoteError> {
        self.state().released.push(token.to_string());
        Ok(())
    }

    async fn next_auto_claim(&self, _user: &UserId) -> Result<Option<AutoClaim>, RemoteError> {
        if self.fail_next_auto_claim.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transport("next auto claim failed".to_string()));
        }
        Ok(self.state().auto_claims.pop_front())
    }

    async fn payment_details(
        &self,
        kb_tx_id: &KeybaseTransactionId,
    ) -> Result<PaymentSummary, RemoteError> {
        self.state()
            .payments
            .get(kb_tx_id)
            .cloned()
            .ok_or_else(|| RemoteError::App {
                code: 3404,
                desc: format!("payment not found: {kb_tx_id}"),
            })
    }

    async fn server_timebounds_recommendation(
        &self,
    ) -> Result<TimeboundsRecommendation, RemoteError> {
        Ok(TimeboundsRecommendation {
            time_now: chrono::Utc::now().timestamp(),
            timeout: 30,
        })
    }
}

/// Sender whose primary account is `account(1)`.
pub struct FakeKeys;

#[async_trait]
impl SenderKeyLookup for FakeKeys {
    async fn primary_account(&self) -> Result<(AccountId, SecretKey), EngineError> {
        Ok((account(1), secret(1)))
    }

    async fn secret_key(&self, account_id: &AccountId) -> Result<SecretKey, EngineError> {
        if *account_id == account(1) {
            Ok(secret(1))
        } else {
            Err(EngineError::SenderKey(format!("not our account: {account_id}")))
        }
    }
}

/// Resolves `"acct:<n>"` to `account(n)`, `"user:<name>"` to a user without
/// an account and fails on anything else.
#[derive(Default)]
pub struct FakeRecipients {
    pub delay: Option<Duration>,
}

#[async_trait]
impl RecipientLookup for FakeRecipients {
    async fn lookup_recipient(&self, input: &str) -> Result<Recipient, EngineError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(n) = input.strip_prefix("acct:") {
            let n: u8 = n
                .parse()
                .map_err(|_| EngineError::Recipient(format!("bad account input {input}")))?;
            return Ok(Recipient {
                input: input.to_string(),
                account_id: Some(account(n)),
                user: None,
            });
        }
        if let Some(name) = input.strip_prefix("user:") {
            return Ok(Recipient {
                input: input.to_string(),
                account_id: None,
                user: Some(UserId::from(name)),
            });
        }
        Err(EngineError::Recipient(format!("no such recipient: {input}")))
    }
}

pub fn relay_key() -> RelayKey {
    RelayKey {
        team_id: TeamId::from("team-relay"),
        key: [42u8; 32],
    }
}

pub struct FakeRelayKeys;

#[async_trait]
impl RelayKeyLookup for FakeRelayKeys {
    async fn key_for_recipient(&self, _recipient: &Recipient) -> Result<RelayKey, EngineError> {
        Ok(relay_key())
    }

    async fn key_for_team(&self, team_id: &TeamId) -> Result<RelayKey, EngineError> {
        let key = relay_key();
        if *team_id == key.team_id {
            Ok(key)
        } else {
            Err(EngineError::RelayKey(format!("unknown team {team_id}")))
        }
    }
}

#[derive(Default)]
pub struct FakeDismisser {
    dismissed: Mutex<Vec<NotificationId>>,
}

impl FakeDismisser {
    pub fn dismissed(&self) -> Vec<NotificationId> {
        self.dismissed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationDismisser for FakeDismisser {
    async fn dismiss(&self, id: &NotificationId) -> Result<(), EngineError> {
        self.dismissed.lock().unwrap().push(id.clone());
        Ok(())
    }
}
