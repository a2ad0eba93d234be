// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Wallet State
//!
//! In-memory cache of the user's ledger accounts layered over a [`Remoter`].
//!
//! ## Locking
//!
//! - The account map lock is held only to look up or insert an entry, never
//!   across a network call.
//! - Each [`AccountState`] guards its data with its own lock, and serializes
//!   refreshes with a separate async mutex so concurrent refresh requests
//!   share one network round trip.
//! - A single coarse seqno lock, held through a [`SeqnoLease`], orders
//!   "allocate sequence number then submit" across the whole process.
//!
//! ## Sequence numbers
//!
//! A full refresh never lowers the cached sequence number: it applies a
//! network value only if it is greater than the cached one. A forced seqno
//! refresh may move the cache back to the network value, but only once no
//! pending transaction or in-use sequence number is left in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::amount::parse_amount;
use crate::config::{
    BACKGROUND_REFRESH_MIN_AGE, PENDING_TX_MAX_AGE, REFRESH_ENQUEUE_TIMEOUT,
    REFRESH_QUEUE_CAPACITY,
};
use crate::error::EngineError;
use crate::remote::{RemoteError, Remoter};
use crate::types::{
    AccountDetails, AccountId, Balance, PaymentDirectPost, PaymentMultiPost, PaymentRelayPost,
    PaymentResult, PaymentSummary, KeybaseTransactionId, RelayClaimPost, RelayClaimResult,
    SubmitMultiResult, TimeboundsRecommendation, TransactionId,
};

/// Proof that the caller holds the process-wide seqno lock.
///
/// The lock is released exactly once, when the lease is dropped or passed
/// to [`SeqnoLease::unlock`]. Dropping covers early returns, panics and
/// task cancellation.
pub struct SeqnoLease {
    held: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl SeqnoLease {
    pub fn unlock(self) {}
}

impl Drop for SeqnoLease {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for SeqnoLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeqnoLease")
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTx {
    seqno: u64,
    ctime: Instant,
}

#[derive(Debug, Default)]
struct AccountData {
    seqno: u64,
    balances: Vec<Balance>,
    details: Option<AccountDetails>,
    /// Time of last successful refresh. `None` forces the next background refresh.
    rtime: Option<Instant>,
    pending_txs: HashMap<TransactionId, PendingTx>,
    inuse_seqnos: HashMap<u64, Instant>,
}

/// Cached data for one ledger account.
pub struct AccountState {
    account_id: AccountId,
    remote: Arc<dyn Remoter>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_generation: AtomicU64,
    data: RwLock<AccountData>,
}

impl AccountState {
    fn new(account_id: AccountId, remote: Arc<dyn Remoter>) -> Self {
        Self {
            account_id,
            remote,
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            data: RwLock::new(AccountData::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AccountData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccountData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Re-fetch details from the server. Callers that arrive while another
    /// refresh is in flight wait for it and reuse its result.
    pub async fn refresh(&self, reason: &str) -> Result<(), EngineError> {
        let observed = self.refresh_generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::SeqCst) != observed {
            debug!(account = %self.account_id, reason, "refresh satisfied by concurrent refresh");
            return Ok(());
        }

        let details = self.remote.details(&self.account_id).await?;
        let seqno = details.parsed_seqno().map_err(|e| {
            RemoteError::Decode(format!("invalid seqno {:?}: {e}", details.seqno))
        })?;

        {
            let mut data = self.write();
            if seqno > data.seqno {
                data.seqno = seqno;
            }
            data.balances = details.balances.clone();
            data.details = Some(details);
            data.rtime = Some(Instant::now());
        }
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);

        debug!(account = %self.account_id, reason, network_seqno = seqno, "account refreshed");
        Ok(())
    }

    /// Fetch only the sequence number and reconcile the cache with it.
    ///
    /// A network value ahead of the cache is applied. When the network is
    /// behind, pending transactions and in-use sequence numbers that are
    /// older than the pending max age, or already reached by the network,
    /// are dropped. If nothing is left in flight the network value is
    /// authoritative and the cache moves back to it.
    pub async fn force_seqno_refresh(&self) -> Result<(), EngineError> {
        let network = self.remote.account_seqno(&self.account_id).await?;

        let mut data = self.write();
        if network > data.seqno {
            debug!(
                account = %self.account_id,
                cached = data.seqno,
                network,
                "seqno advanced from network"
            );
            data.seqno = network;
            return Ok(());
        }
        if network == data.seqno {
            return Ok(());
        }

        let now = Instant::now();
        data.pending_txs.retain(|_, tx| {
            tx.seqno > network && now.duration_since(tx.ctime) <= PENDING_TX_MAX_AGE
        });
        data.inuse_seqnos.retain(|seqno, ctime| {
            *seqno >= network && now.duration_since(*ctime) <= PENDING_TX_MAX_AGE
        });

        if data.pending_txs.is_empty() && data.inuse_seqnos.is_empty() {
            info!(
                account = %self.account_id,
                cached = data.seqno,
                network,
                "nothing in flight, seqno corrected to network"
            );
            data.seqno = network;
            return Ok(());
        }

        debug!(
            account = %self.account_id,
            cached = data.seqno,
            network,
            pending_txs = data.pending_txs.len(),
            inuse_seqnos = data.inuse_seqnos.len(),
            "network seqno behind cache, keeping cached value while transactions are in flight"
        );
        Ok(())
    }

    pub fn seqno(&self) -> u64 {
        self.read().seqno
    }

    /// Return the current sequence number and advance the cache by one.
    ///
    /// The value handed out plus one is recorded as in use until a pending
    /// transaction takes it over.
    fn seqno_and_bump(&self) -> u64 {
        let mut data = self.write();
        let result = data.seqno;
        data.seqno += 1;
        let inuse = data.seqno;
        data.inuse_seqnos.insert(inuse, Instant::now());
        result
    }

    fn add_pending_tx(&self, tx_id: TransactionId, seqno: u64) {
        let mut data = self.write();
        data.inuse_seqnos.remove(&seqno);
        data.pending_txs.insert(
            tx_id,
            PendingTx {
                seqno,
                ctime: Instant::now(),
            },
        );
    }

    fn remove_pending_tx(&self, tx_id: &TransactionId) {
        self.write().pending_txs.remove(tx_id);
    }

    pub fn pending_tx_count(&self) -> usize {
        self.read().pending_txs.len()
    }

    pub fn inuse_seqno_count(&self) -> usize {
        self.read().inuse_seqnos.len()
    }

    pub fn balances(&self) -> Vec<Balance> {
        self.read().balances.clone()
    }

    pub fn details(&self) -> AccountDetails {
        self.read().details.clone().unwrap_or_else(|| AccountDetails {
            account_id: self.account_id.clone(),
            ..Default::default()
        })
    }

    fn refreshed_recently(&self) -> bool {
        self.read()
            .rtime
            .is_some_and(|t| t.elapsed() < BACKGROUND_REFRESH_MIN_AGE)
    }

    fn clear_refresh_time(&self) {
        self.write().rtime = None;
    }

    /// Apply a sequence number learned by another instance of this account.
    fn merge_seqno(&self, seqno: u64) {
        let mut data = self.write();
        if seqno > data.seqno {
            data.seqno = seqno;
        }
    }

    fn reset(&self) {
        *self.write() = AccountData::default();
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read();
        write!(
            f,
            "{}: seqno {}, balances {}, pending txs {}, inuse seqnos {}",
            self.account_id,
            data.seqno,
            data.balances.len(),
            data.pending_txs.len(),
            data.inuse_seqnos.len()
        )
    }
}

/// Registry of account states plus cache-aware pass-through to the server.
pub struct WalletState {
    remote: Arc<dyn Remoter>,
    accounts: Mutex<HashMap<AccountId, Arc<AccountState>>>,
    seqno_mu: Arc<tokio::sync::Mutex<()>>,
    seqno_lock_held: Arc<AtomicBool>,
    refresh_count: AtomicU64,
    refresh_tx: mpsc::Sender<AccountId>,
    refresh_rx: Mutex<Option<mpsc::Receiver<AccountId>>>,
}

impl WalletState {
    pub fn new(remote: Arc<dyn Remoter>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(REFRESH_QUEUE_CAPACITY);
        Self {
            remote,
            accounts: Mutex::new(HashMap::new()),
            seqno_mu: Arc::new(tokio::sync::Mutex::new(())),
            seqno_lock_held: Arc::new(AtomicBool::new(false)),
            refresh_count: AtomicU64::new(0),
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
        }
    }

    pub fn remote(&self) -> &Arc<dyn Remoter> {
        &self.remote
    }

    fn lock_accounts(&self) -> MutexGuard<'_, HashMap<AccountId, Arc<AccountState>>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the coarse seqno lock.
    pub async fn seqno_lock(&self) -> SeqnoLease {
        let guard = self.seqno_mu.clone().lock_owned().await;
        self.seqno_lock_held.store(true, Ordering::SeqCst);
        SeqnoLease {
            held: self.seqno_lock_held.clone(),
            _guard: guard,
        }
    }

    pub fn seqno_lock_held(&self) -> bool {
        self.seqno_lock_held.load(Ordering::SeqCst)
    }

    fn require_seqno_lock(&self) -> Result<(), EngineError> {
        if self.seqno_lock_held() {
            Ok(())
        } else {
            Err(EngineError::SeqnoLockNotHeld)
        }
    }

    pub fn account_state(&self, account: &AccountId) -> Option<Arc<AccountState>> {
        self.lock_accounts().get(account).cloned()
    }

    /// Return the state for `account`, creating and refreshing it first if
    /// it is not cached yet. The refresh runs outside the map lock.
    async fn account_state_refresh(
        &self,
        account: &AccountId,
        reason: &str,
    ) -> Result<Arc<AccountState>, EngineError> {
        if let Some(state) = self.account_state(account) {
            return Ok(state);
        }

        let fresh = Arc::new(AccountState::new(account.clone(), self.remote.clone()));
        if let Err(e) = fresh.refresh(reason).await {
            debug!(account = %account, error = %e, "error refreshing new account state");
            return Err(e);
        }

        let mut accounts = self.lock_accounts();
        match accounts.get(account) {
            Some(existing) => {
                existing.merge_seqno(fresh.seqno());
                Ok(existing.clone())
            }
            None => {
                accounts.insert(account.clone(), fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Register `account` without contacting the server.
    pub fn track_account(&self, account: &AccountId) -> Arc<AccountState> {
        self.lock_accounts()
            .entry(account.clone())
            .or_insert_with(|| Arc::new(AccountState::new(account.clone(), self.remote.clone())))
            .clone()
    }

    pub fn primed(&self) -> bool {
        self.refresh_count.load(Ordering::SeqCst) > 0
    }

    pub async fn account_seqno(&self, account: &AccountId) -> Result<u64, EngineError> {
        Ok(self.account_state_refresh(account, "account_seqno").await?.seqno())
    }

    /// Return the cached sequence number and advance it. Requires a held [`SeqnoLease`].
    pub async fn account_seqno_and_bump(&self, account: &AccountId) -> Result<u64, EngineError> {
        self.require_seqno_lock()?;
        let state = self
            .account_state_refresh(account, "account_seqno_and_bump")
            .await?;
        Ok(state.seqno_and_bump())
    }

    pub async fn refresh(&self, account: &AccountId, reason: &str) -> Result<(), EngineError> {
        let state = self
            .account_state(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        state.refresh(reason).await
    }

    /// Refresh every known account. Returns the last error, if any.
    pub async fn refresh_all(&self, reason: &str) -> Result<(), EngineError> {
        let states: Vec<Arc<AccountState>> = self.lock_accounts().values().cloned().collect();

        let mut last_err = None;
        for state in states {
            if let Err(e) = state.refresh(reason).await {
                debug!(account = %state.account_id(), error = %e, "error refreshing account");
                last_err = Some(e);
            }
        }
        if let Some(e) = last_err {
            return Err(e);
        }

        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn force_seqno_refresh(&self, account: &AccountId) -> Result<(), EngineError> {
        let state = self
            .account_state(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        state.force_seqno_refresh().await
    }

    /// Ask the background refresher to refresh `account`, even if it was refreshed recently.
    pub async fn refresh_async(&self, account: &AccountId, reason: &str) -> Result<(), EngineError> {
        let state = self
            .account_state(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        state.clear_refresh_time();

        match tokio::time::timeout(REFRESH_ENQUEUE_TIMEOUT, self.refresh_tx.send(account.clone()))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                debug!(account = %account, reason, "refresh queue clogged");
                Err(EngineError::RefreshQueueFull)
            }
        }
    }

    /// Drain refresh requests until `shutdown` fires. Only one runner may
    /// consume the queue; later calls return immediately.
    pub async fn run_background_refresh(&self, shutdown: CancellationToken) {
        let rx = self
            .refresh_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut rx) = rx else {
            warn!("background refresh already running");
            return;
        };
        info!("background account refresh starting");

        loop {
            let account = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(account) => account,
                    None => break,
                },
            };

            let Some(state) = self.account_state(&account) else {
                continue;
            };
            if state.refreshed_recently() {
                debug!(account = %account, "skipping background refresh, refreshed recently");
                continue;
            }
            if let Err(e) = state.refresh("background").await {
                debug!(account = %account, error = %e, "background refresh failed");
            }
        }

        info!("background account refresh shutting down");
    }

    pub async fn add_pending_tx(
        &self,
        account: &AccountId,
        tx_id: TransactionId,
        seqno: u64,
    ) -> Result<(), EngineError> {
        let state = self
            .account_state(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        debug!(account = %account, tx_id = %tx_id, seqno, "adding pending tx");
        state.add_pending_tx(tx_id, seqno);
        Ok(())
    }

    pub async fn remove_pending_tx(
        &self,
        account: &AccountId,
        tx_id: &TransactionId,
    ) -> Result<(), EngineError> {
        let state = self
            .account_state(account)
            .ok_or_else(|| EngineError::AccountNotFound(account.clone()))?;
        debug!(account = %account, tx_id = %tx_id, "removing pending tx");
        state.remove_pending_tx(tx_id);
        Ok(())
    }

    /// Cached balances for known accounts, server balances for anyone else.
    pub async fn balances(&self, account: &AccountId) -> Result<Vec<Balance>, EngineError> {
        match self.account_state(account) {
            Some(state) => {
                if self.refresh_tx.try_send(account.clone()).is_err() {
                    debug!(account = %account, "refresh queue full, balances served from cache");
                }
                Ok(state.balances())
            }
            None => Ok(self.remote.balances(account).await?),
        }
    }

    pub async fn details(&self, account: &AccountId) -> Result<AccountDetails, EngineError> {
        let details = self.account_state_refresh(account, "details").await?.details();
        if &details.account_id != account {
            debug!(account = %account, returned = %details.account_id, "details account id mismatch");
        }
        Ok(details)
    }

    /// Whether `account` holds a positive native balance.
    pub async fn is_account_funded(&self, account: &AccountId) -> Result<bool, EngineError> {
        for balance in self.balances(account).await? {
            if balance.is_native() && parse_amount(&balance.amount)? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn submit_payment(&self, post: PaymentDirectPost) -> Result<PaymentResult, EngineError> {
        self.require_seqno_lock()?;
        Ok(self.remote.submit_payment(post).await?)
    }

    pub async fn submit_relay_payment(
        &self,
        post: PaymentRelayPost,
    ) -> Result<PaymentResult, EngineError> {
        self.require_seqno_lock()?;
        Ok(self.remote.submit_relay_payment(post).await?)
    }

    pub async fn submit_multi_payment(
        &self,
        post: PaymentMultiPost,
    ) -> Result<SubmitMultiResult, EngineError> {
        self.require_seqno_lock()?;
        Ok(self.remote.submit_multi_payment(post).await?)
    }

    /// Submit a relay claim, then refresh every account since one of ours
    /// probably received funds.
    pub async fn submit_relay_claim(
        &self,
        post: RelayClaimPost,
    ) -> Result<RelayClaimResult, EngineError> {
        self.require_seqno_lock()?;
        let result = self.remote.submit_relay_claim(post).await?;
        if let Err(e) = self.refresh_all("submit_relay_claim").await {
            debug!(error = %e, "refresh_all after relay claim failed");
        }
        Ok(result)
    }

    pub async fn payment_details(
        &self,
        kb_tx_id: &KeybaseTransactionId,
    ) -> Result<PaymentSummary, EngineError> {
        Ok(self.remote.payment_details(kb_tx_id).await?)
    }

    pub async fn server_timebounds_recommendation(
        &self,
    ) -> Result<TimeboundsRecommendation, EngineError> {
        Ok(self.remote.server_timebounds_recommendation().await?)
    }

    /// Forget every cached account.
    pub fn reset(&self) {
        let mut accounts = self.lock_accounts();
        for state in accounts.values() {
            state.reset();
        }
        accounts.clear();
    }
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accounts = self.lock_accounts();
        let pieces: Vec<String> = accounts.values().map(|a| a.to_string()).collect();
        write!(
            f,
            "WalletState (# accts: {}): {}",
            accounts.len(),
            pieces.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, MockRemote};
    use std::time::Duration;

    fn wallet(remote: &Arc<MockRemote>) -> WalletState {
        WalletState::new(remote.clone())
    }

    #[tokio::test]
    async fn account_seqno_creates_and_caches_state() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 100);
        let ws = wallet(&remote);

        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 100);
        assert_eq!(remote.details_calls(), 1);

        // cached on the second call
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 100);
        assert_eq!(remote.details_calls(), 1);
    }

    #[tokio::test]
    async fn bump_requires_seqno_lock() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 5);
        let ws = wallet(&remote);

        let err = ws.account_seqno_and_bump(&alice).await.unwrap_err();
        assert!(matches!(err, EngineError::SeqnoLockNotHeld));

        let lease = ws.seqno_lock().await;
        assert_eq!(ws.account_seqno_and_bump(&alice).await.unwrap(), 5);
        assert_eq!(ws.account_seqno_and_bump(&alice).await.unwrap(), 6);
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 7);
        lease.unlock();

        assert!(!ws.seqno_lock_held());
        assert!(ws.account_seqno_and_bump(&alice).await.is_err());
    }

    #[tokio::test]
    async fn dropped_lease_releases_lock_on_abort() {
        let remote = MockRemote::new();
        let ws = Arc::new(wallet(&remote));

        let held = ws.clone();
        let task = tokio::spawn(async move {
            let _lease = held.seqno_lock().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ws.seqno_lock_held());

        task.abort();
        let _ = task.await;

        let lease = tokio::time::timeout(Duration::from_secs(1), ws.seqno_lock())
            .await
            .expect("lock released by aborted task");
        assert!(ws.seqno_lock_held());
        drop(lease);
        assert!(!ws.seqno_lock_held());
    }

    #[tokio::test]
    async fn refresh_never_lowers_seqno() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 50);
        let ws = wallet(&remote);
        ws.account_seqno(&alice).await.unwrap();

        remote.set_seqno(&alice, 40);
        ws.refresh(&alice, "test").await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 50);

        remote.set_seqno(&alice, 60);
        ws.refresh(&alice, "test").await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn force_seqno_refresh_keeps_cache_while_seqnos_in_use() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 10);
        let ws = wallet(&remote);

        let lease = ws.seqno_lock().await;
        ws.account_seqno_and_bump(&alice).await.unwrap();
        ws.account_seqno_and_bump(&alice).await.unwrap();
        drop(lease);
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 12);

        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 12);

        remote.set_seqno(&alice, 20);
        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn force_refresh_prunes_inuse_seqnos_behind_network() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 10);
        let ws = wallet(&remote);

        let lease = ws.seqno_lock().await;
        ws.account_seqno_and_bump(&alice).await.unwrap(); // in use: 11
        ws.account_seqno_and_bump(&alice).await.unwrap(); // in use: 12
        ws.account_seqno_and_bump(&alice).await.unwrap(); // in use: 13
        drop(lease);

        let state = ws.account_state(&alice).unwrap();
        assert_eq!(state.inuse_seqno_count(), 3);

        remote.set_seqno(&alice, 12);
        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(state.inuse_seqno_count(), 2);
        assert_eq!(state.seqno(), 13);
    }

    #[tokio::test]
    async fn force_refresh_falls_back_to_network_when_nothing_in_flight() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 100);
        let ws = wallet(&remote);

        let lease = ws.seqno_lock().await;
        let current = ws.account_seqno_and_bump(&alice).await.unwrap();
        drop(lease);
        let tx = TransactionId::from("tx-rejected");
        ws.add_pending_tx(&alice, tx.clone(), current + 1).await.unwrap();

        // still pending: the cache stays ahead of the network
        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 101);

        // the server rejected it
        ws.remove_pending_tx(&alice, &tx).await.unwrap();
        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn force_refresh_drops_pending_tx_reached_by_network() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 100);
        let ws = wallet(&remote);

        let lease = ws.seqno_lock().await;
        ws.account_seqno_and_bump(&alice).await.unwrap();
        ws.account_seqno_and_bump(&alice).await.unwrap();
        drop(lease);
        ws.add_pending_tx(&alice, TransactionId::from("tx-101"), 101).await.unwrap();
        ws.add_pending_tx(&alice, TransactionId::from("tx-102"), 102).await.unwrap();

        // 101 landed and its notification was missed, 102 never made it
        remote.set_seqno(&alice, 101);
        ws.force_seqno_refresh(&alice).await.unwrap();
        let state = ws.account_state(&alice).unwrap();
        assert_eq!(state.pending_tx_count(), 1);
        assert_eq!(state.seqno(), 102);

        ws.remove_pending_tx(&alice, &TransactionId::from("tx-102")).await.unwrap();
        ws.force_seqno_refresh(&alice).await.unwrap();
        assert_eq!(state.seqno(), 101);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let remote = MockRemote::new();
        let ws = wallet(&remote);
        let ghost = account(9);

        let err = ws.refresh(&ghost, "test").await.unwrap_err();
        assert!(err.is_account_not_found());
        assert!(ws.force_seqno_refresh(&ghost).await.unwrap_err().is_account_not_found());
        assert!(ws
            .add_pending_tx(&ghost, TransactionId::from("tx"), 1)
            .await
            .unwrap_err()
            .is_account_not_found());
        assert!(ws.refresh_async(&ghost, "test").await.unwrap_err().is_account_not_found());
    }

    #[tokio::test]
    async fn network_error_is_distinct_from_not_found() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 1);
        let ws = wallet(&remote);
        ws.account_seqno(&alice).await.unwrap();

        remote.fail_details(true);
        let err = ws.refresh(&alice, "test").await.unwrap_err();
        assert!(matches!(err, EngineError::Remote(_)));
    }

    #[tokio::test]
    async fn pending_tx_takes_over_inuse_seqno() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 100);
        let ws = wallet(&remote);

        let lease = ws.seqno_lock().await;
        let current = ws.account_seqno_and_bump(&alice).await.unwrap();
        drop(lease);

        let state = ws.account_state(&alice).unwrap();
        assert_eq!(state.inuse_seqno_count(), 1);

        let tx = TransactionId::from("tx-1");
        ws.add_pending_tx(&alice, tx.clone(), current + 1).await.unwrap();
        assert_eq!(state.inuse_seqno_count(), 0);
        assert_eq!(state.pending_tx_count(), 1);

        ws.remove_pending_tx(&alice, &tx).await.unwrap();
        assert_eq!(state.pending_tx_count(), 0);
    }

    #[tokio::test]
    async fn balances_fall_back_to_remote_for_unknown_accounts() {
        let remote = MockRemote::new();
        let stranger = account(3);
        remote.set_balance(&stranger, "12.5");
        let ws = wallet(&remote);

        let balances = ws.balances(&stranger).await.unwrap();
        assert_eq!(balances, vec![Balance::native("12.5")]);
        assert!(ws.account_state(&stranger).is_none());
        assert!(ws.is_account_funded(&stranger).await.unwrap());
        assert!(!ws.is_account_funded(&account(4)).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_all_counts_full_refreshes() {
        let remote = MockRemote::new();
        let alice = account(1);
        let bob = account(2);
        remote.set_seqno(&alice, 1);
        remote.set_seqno(&bob, 2);
        let ws = wallet(&remote);
        ws.track_account(&alice);
        ws.track_account(&bob);

        assert!(!ws.primed());
        ws.refresh_all("test").await.unwrap();
        assert!(ws.primed());
        assert_eq!(ws.account_seqno(&bob).await.unwrap(), 2);

        remote.fail_details(true);
        assert!(ws.refresh_all("test").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_share_one_fetch() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 1);
        remote.set_details_delay(Duration::from_millis(50));
        let ws = Arc::new(wallet(&remote));
        let state = ws.track_account(&alice);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.refresh("test").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(remote.details_calls() < 5);
    }

    #[tokio::test]
    async fn submit_requires_seqno_lock() {
        let remote = MockRemote::new();
        let ws = wallet(&remote);
        let post = PaymentDirectPost {
            to_user: None,
            signed_transaction: String::new(),
            quick_return: false,
            note: None,
            batch_id: None,
        };
        assert!(matches!(
            ws.submit_payment(post).await,
            Err(EngineError::SeqnoLockNotHeld)
        ));
    }

    #[tokio::test]
    async fn background_refresh_skips_recent_and_stops_on_shutdown() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 1);
        let ws = Arc::new(wallet(&remote));
        ws.account_seqno(&alice).await.unwrap();
        assert_eq!(remote.details_calls(), 1);

        let shutdown = CancellationToken::new();
        let runner = {
            let ws = ws.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { ws.run_background_refresh(shutdown).await })
        };

        // balances enqueues a refresh, skipped because the account is fresh
        ws.balances(&alice).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.details_calls(), 1);

        // refresh_async clears the refresh time so the request goes through
        remote.set_seqno(&alice, 9);
        ws.refresh_async(&alice, "test").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.details_calls(), 2);
        assert_eq!(ws.account_seqno(&alice).await.unwrap(), 9);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reset_forgets_accounts() {
        let remote = MockRemote::new();
        let alice = account(1);
        remote.set_seqno(&alice, 3);
        let ws = wallet(&remote);
        ws.account_seqno(&alice).await.unwrap();
        assert!(ws.to_string().contains("# accts: 1"));

        ws.reset();
        assert!(ws.account_state(&alice).is_none());
        assert!(ws.to_string().contains("# accts: 0"));
    }
}
