//! Per-owner concurrency guard
//!
//! Every ledger mutation for an owner (top-up creation, confirmation,
//! rejection, purchase debit) runs while holding that owner's exclusive
//! lock, so at most one such mutation is in flight per owner. Owners do not
//! contend with each other.
//!
//! The guard also keeps a per-owner "last action" timestamp used as a
//! cooldown: the lock prevents overlapping requests, the cooldown throttles
//! rapid sequential ones (duplicate button presses, resubmitted top-ups).
//!
//! # Design
//!
//! Entries live in a `DashMap` keyed by owner. Each entry holds an
//! `Arc<tokio::sync::Mutex<()>>`; [`OwnerLock`] owns a guard on it, so the
//! lock is released whenever the handle is dropped: normal return, `?`
//! early return, panic unwinding or a cancelled future.
//!
//! Idle entries are removed by [`ConcurrencyGuard::sweep`]. An entry is only
//! removed while nobody holds a clone of its mutex, which is checked under
//! the map's shard lock, so a lock can never be split between an old and a
//! recreated entry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::Clock;
use crate::types::{LedgerError, OwnerId};

#[derive(Debug)]
struct GuardEntry {
    lock: Arc<Mutex<()>>,
    /// Last guarded mutation, drives the cooldown
    last_action: Option<DateTime<Utc>>,
    /// Last acquire or action, drives the idle sweep
    last_seen: DateTime<Utc>,
}

impl GuardEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            last_action: None,
            last_seen: now,
        }
    }
}

/// Proof that the caller holds an owner's exclusive lock
///
/// Released on drop.
#[derive(Debug)]
pub struct OwnerLock {
    owner: OwnerId,
    _guard: OwnedMutexGuard<()>,
}

impl OwnerLock {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Release the lock explicitly (same as dropping it)
    pub fn release(self) {}
}

/// Per-owner exclusive locks plus action cooldown timestamps
#[derive(Debug)]
pub struct ConcurrencyGuard {
    entries: DashMap<OwnerId, GuardEntry>,
    clock: Arc<dyn Clock>,
}

impl ConcurrencyGuard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Wait until the owner's lock is held, creating it on first use
    pub async fn acquire(&self, owner: OwnerId) -> OwnerLock {
        let lock = self.lock_for(owner);
        let guard = lock.lock_owned().await;
        OwnerLock {
            owner,
            _guard: guard,
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`
    ///
    /// # Returns
    ///
    /// * `Ok(OwnerLock)` - The lock is held
    /// * `Err(LedgerError::LockTimeout)` - Nothing ran; the caller may retry
    pub async fn acquire_timeout(
        &self,
        owner: OwnerId,
        timeout: Duration,
    ) -> Result<OwnerLock, LedgerError> {
        tokio::time::timeout(timeout, self.acquire(owner))
            .await
            .map_err(|_| LedgerError::LockTimeout { owner })
    }

    // The shard lock is released before anyone awaits the mutex.
    fn lock_for(&self, owner: OwnerId) -> Arc<Mutex<()>> {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(owner)
            .or_insert_with(|| GuardEntry::new(now));
        entry.last_seen = now;
        Arc::clone(&entry.lock)
    }

    /// Check whether the owner's last action is older than `window`
    ///
    /// Read-only. The remaining delay is reported in whole seconds, rounded up.
    pub fn check_cooldown(&self, owner: OwnerId, window: Duration) -> Result<(), LedgerError> {
        let Some(last_action) = self.entries.get(&owner).and_then(|entry| entry.last_action)
        else {
            return Ok(());
        };

        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let elapsed = self.clock.now().signed_duration_since(last_action);
        if elapsed < window {
            let remaining = window.checked_sub(&elapsed).unwrap_or(window);
            let remaining_secs = remaining.num_seconds().max(0) as u64 + 1;
            return Err(LedgerError::rate_limited(owner, remaining_secs));
        }
        Ok(())
    }

    /// Stamp the owner's last action with the current time
    ///
    /// Takes the held lock so the stamp reflects the mutation that is about
    /// to run, not the time spent waiting for the lock.
    pub fn record_action(&self, lock: &OwnerLock) {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(lock.owner())
            .or_insert_with(|| GuardEntry::new(now));
        entry.last_action = Some(now);
        entry.last_seen = now;
    }

    /// Remove entries idle for longer than `retention`
    ///
    /// Entries whose lock is held or awaited are kept regardless of age.
    ///
    /// # Returns
    ///
    /// The number of removed entries.
    pub fn sweep(&self, retention: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| self.clock.now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.entries.len();

        self.entries.retain(|_, entry| {
            let in_use = Arc::strong_count(&entry.lock) > 1 || entry.lock.try_lock().is_err();
            in_use || entry.last_seen >= cutoff
        });

        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked owners
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
