// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Auto-claim runner
//!
//! Background loop that drains the server's queue of relay payments waiting
//! to be claimed by the current user.
//!
//! ## States
//!
//! | State       | Entered after                         | Next round starts            |
//! |-------------|---------------------------------------|------------------------------|
//! | `Fast`      | a claim went through                  | immediately                  |
//! | `Hibernate` | the queue was empty                   | on the next kick             |
//! | `Snooze`    | the lock was busy or something failed | after the snooze or on kick  |
//!
//! Every round holds the server-side auto-claim lock through an
//! [`AutoClaimLease`], released when the round ends.
//!
//! ## Kicks
//!
//! [`AutoClaimRunner::kick`] starts the loop on first use. Later kicks go
//! through a channel of capacity one; a kick that finds it full is dropped,
//! the queued one already guarantees another round.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::remote::{RemoteError, Remoter};
use crate::types::{NotificationId, RelayDirection, UserId};

/// Outcome of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fast,
    Hibernate,
    Snooze,
}

/// Holder of the server-side auto-claim lock.
///
/// Released by [`AutoClaimLease::release`]; a lease dropped without it
/// (a panicking round) releases in a spawned task.
struct AutoClaimLease {
    remote: Arc<dyn Remoter>,
    user: UserId,
    token: Option<String>,
}

impl AutoClaimLease {
    /// `None` when another client holds the lock.
    async fn acquire(remote: &Arc<dyn Remoter>, user: &UserId) -> Result<Option<Self>, RemoteError> {
        let token = remote.acquire_auto_claim_lock(user).await?;
        if token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            remote: remote.clone(),
            user: user.clone(),
            token: Some(token),
        }))
    }

    fn token(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }

    async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.remote.release_auto_claim_lock(&self.user, &token).await {
                warn!(error = %e, "failed to release auto-claim lock");
            }
        }
    }
}

impl Drop for AutoClaimLease {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if let Ok(handle) = Handle::try_current() {
            let remote = self.remote.clone();
            let user = self.user.clone();
            handle.spawn(async move {
                if let Err(e) = remote.release_auto_claim_lock(&user, &token).await {
                    warn!(error = %e, "failed to release auto-claim lock");
                }
            });
        }
    }
}

struct Worker {
    engine: Engine,
    kicks: mpsc::Receiver<Option<NotificationId>>,
    shutdown: CancellationToken,
    /// Notifications that triggered work not yet known to be drained.
    triggers: Vec<NotificationId>,
}

impl Worker {
    fn add_trigger(&mut self, trigger: Option<NotificationId>) {
        if let Some(id) = trigger {
            if !self.triggers.contains(&id) {
                self.triggers.push(id);
            }
        }
    }

    async fn run(mut self, trigger: Option<NotificationId>) {
        info!(
            snooze_secs = self.engine.config.autoclaim_snooze.as_secs(),
            "auto-claim runner starting"
        );
        self.add_trigger(trigger);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let step = self.step().await;
            debug!(?step, "auto-claim round finished");

            let kick = match step {
                Step::Fast => continue,
                Step::Hibernate => tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    kick = self.kicks.recv() => kick,
                },
                Step::Snooze => tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.engine.config.autoclaim_snooze) => continue,
                    kick = self.kicks.recv() => kick,
                },
            };
            match kick {
                Some(trigger) => self.add_trigger(trigger),
                None => break,
            }
        }

        info!("auto-claim runner shutting down");
    }

    async fn step(&mut self) -> Step {
        let remote = self.engine.wallet_state.remote().clone();
        let lease = match AutoClaimLease::acquire(&remote, &self.engine.me).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!("auto-claim lock busy");
                return Step::Snooze;
            }
            Err(e) => {
                warn!(error = %e, "failed to acquire auto-claim lock");
                return Step::Snooze;
            }
        };

        let step = self.claim_next(&lease).await;
        lease.release().await;
        step
    }

    async fn claim_next(&mut self, lease: &AutoClaimLease) -> Step {
        let remote = self.engine.wallet_state.remote();
        let item = match remote.next_auto_claim(&self.engine.me).await {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "failed to fetch next auto-claim");
                return Step::Snooze;
            }
        };

        let Some(item) = item else {
            for id in self.triggers.drain(..) {
                if let Err(e) = self.engine.collaborators.dismisser.dismiss(&id).await {
                    warn!(notification = %id, error = %e, "failed to dismiss auto-claim notification");
                }
            }
            return Step::Hibernate;
        };

        let into = match self.engine.collaborators.sender_keys.primary_account().await {
            Ok((account, _)) => account,
            Err(e) => {
                warn!(error = %e, "no primary account to claim into");
                return Step::Snooze;
            }
        };

        match self
            .engine
            .claim(
                &item.kb_tx_id,
                &into,
                Some(RelayDirection::Claim),
                Some(lease.token().to_string()),
            )
            .await
        {
            Ok(result) => {
                info!(
                    kb_tx_id = %item.kb_tx_id,
                    claim_tx_id = %result.claim_stellar_id,
                    "auto-claimed relay payment"
                );
                Step::Fast
            }
            Err(e) => {
                warn!(kb_tx_id = %item.kb_tx_id, error = %e, "auto-claim failed");
                Step::Snooze
            }
        }
    }
}

pub struct AutoClaimRunner {
    engine: Engine,
    /// Runtime the loop is spawned on, so `kick` works from any thread.
    runtime: Option<Handle>,
    started: AtomicBool,
    kick_tx: mpsc::Sender<Option<NotificationId>>,
    kick_rx: Mutex<Option<mpsc::Receiver<Option<NotificationId>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    dropped_kicks: AtomicU64,
}

impl AutoClaimRunner {
    /// Create a runner bound to the current Tokio runtime, if there is one.
    /// Without one, the loop starts on the runtime of the first kick made
    /// from inside a runtime.
    pub fn new(engine: Engine) -> Self {
        let (kick_tx, kick_rx) = mpsc::channel(1);
        Self {
            engine,
            runtime: Handle::try_current().ok(),
            started: AtomicBool::new(false),
            kick_tx,
            kick_rx: Mutex::new(Some(kick_rx)),
            handle: Mutex::new(None),
            shutdown: CancellationToken::new(),
            dropped_kicks: AtomicU64::new(0),
        }
    }

    /// Wake the runner, starting it on first call. `trigger` is dismissed
    /// once the queue has been drained. Safe to call from any thread.
    pub fn kick(&self, trigger: Option<NotificationId>) {
        if !self.started.load(Ordering::SeqCst) && self.start(&trigger) {
            return;
        }

        match self.kick_tx.try_send(trigger) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_kicks.fetch_add(1, Ordering::Relaxed);
                debug!("auto-claim kick coalesced");
            }
            Err(TrySendError::Closed(_)) => debug!("auto-claim runner already stopped"),
        }
    }

    /// Spawn the loop with `trigger`. Returns false when the loop was
    /// already started or cannot be spawned yet; the caller queues the kick.
    fn start(&self, trigger: &Option<NotificationId>) -> bool {
        let mut kicks = self.kick_rx.lock().unwrap_or_else(PoisonError::into_inner);
        if kicks.is_none() {
            return false;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("no async runtime to start the auto-claim runner on, kick queued");
            return false;
        };
        let Some(kicks) = kicks.take() else {
            return false;
        };

        let worker = Worker {
            engine: self.engine.clone(),
            kicks,
            shutdown: self.shutdown.clone(),
            triggers: Vec::new(),
        };
        let handle = runtime.spawn(worker.run(trigger.clone()));
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.started.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Kicks dropped because one was already queued.
    pub fn dropped_kicks(&self) -> u64 {
        self.dropped_kicks.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "auto-claim runner task failed");
            }
        }
    }
}
