//! Position store.
//!
//! The only owner of the monitored-position map and the exited set.
//! Admission and exit settlement for the same identity take that
//! identity's lock, so an admit racing a `mark_exited` sees either the
//! state before the exit or the state after it, never a mix.
//!
//! The in-flight exit set is separate: [`PositionStore::try_begin_exit`]
//! claims an identity atomically through the `DashMap` entry API and the
//! returned [`ExitGuard`] releases it on drop, whatever the outcome.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use autoexit_core::{PositionKey, Price};
use autoexit_persistence::{ExitedLedger, ExitedLedgerEntry};
use autoexit_telemetry::Metrics;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PositionError, PositionResult};
use crate::position::Position;

type PendingSet = Arc<DashMap<PositionKey, DateTime<Utc>>>;

/// Number of identity lock stripes.
const LOCK_STRIPES: usize = 64;

/// Membership of one identity in the in-flight exit set.
///
/// Dropping the guard clears the membership.
#[derive(Debug)]
pub struct ExitGuard {
    key: PositionKey,
    pending: PendingSet,
}

impl ExitGuard {
    #[must_use]
    pub fn key(&self) -> &PositionKey {
        &self.key
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Monitored positions, exited identities and in-flight exits.
pub struct PositionStore {
    positions: DashMap<PositionKey, Position>,
    /// Identities vetoed from admission, with the time they were exited.
    exited: DashMap<PositionKey, DateTime<Utc>>,
    /// Identities dropped from monitoring after repeated unexpected errors.
    /// Vetoed until restart; not persisted.
    evicted: DashMap<PositionKey, DateTime<Utc>>,
    /// Per-identity locks, striped by key hash so the set stays bounded.
    locks: Box<[Mutex<()>]>,
    pending: PendingSet,
    ledger: Arc<dyn ExitedLedger>,
}

impl PositionStore {
    pub fn new(ledger: Arc<dyn ExitedLedger>) -> Self {
        Self {
            positions: DashMap::new(),
            exited: DashMap::new(),
            evicted: DashMap::new(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            pending: Arc::new(DashMap::new()),
            ledger,
        }
    }

    /// Load every ledger entry into the exited set.
    ///
    /// Call once at startup, before the loops run. Any position already
    /// admitted for a loaded identity is dropped.
    pub fn load_ledger(&self) -> PositionResult<usize> {
        let entries = self.ledger.load_all()?;
        let count = entries.len();
        for entry in entries {
            let key = entry.key();
            let lock = self.lock_for(&key);
            let _held = lock.lock();
            self.positions.remove(&key);
            self.exited.insert(key, entry.exited_at);
        }
        self.report_size();
        info!(entries = count, "Loaded exited ledger");
        Ok(count)
    }

    /// Start monitoring `position`.
    ///
    /// Returns `false` if the identity is already monitored, already
    /// exited, or evicted.
    pub fn admit(&self, position: Position) -> bool {
        let key = position.key.clone();
        let lock = self.lock_for(&key);
        let _held = lock.lock();

        if self.exited.contains_key(&key) {
            debug!(position = %key, "Admission vetoed: already exited");
            return false;
        }
        if self.evicted.contains_key(&key) {
            debug!(position = %key, "Admission vetoed: evicted");
            return false;
        }

        let admitted = match self.positions.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                info!(
                    owner = %key.owner,
                    asset = %key.asset,
                    rule_id = %position.rule_id,
                    entry_price = %position.entry_price,
                    highest = %position.highest_price_seen,
                    quantity = %position.quantity,
                    "Position admitted"
                );
                vacant.insert(position);
                true
            }
            Entry::Occupied(_) => false,
        };
        if admitted {
            self.report_size();
        }
        admitted
    }

    #[must_use]
    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn contains(&self, key: &PositionKey) -> bool {
        self.positions.contains_key(key)
    }

    /// Whether `key` is in the exited set.
    #[must_use]
    pub fn is_exited(&self, key: &PositionKey) -> bool {
        self.exited.contains_key(key)
    }

    /// Record a price observation and raise the high-water mark if it is
    /// higher. Returns the updated position, or `None` if not monitored.
    pub fn update_high_water_mark(&self, key: &PositionKey, price: Price) -> Option<Position> {
        let mut entry = self.positions.get_mut(key)?;
        let previous = entry.highest_price_seen;
        if entry.observe_price(price, Utc::now()) {
            debug!(position = %key, from = %previous, to = %price, "High-water mark raised");
        }
        Some(entry.clone())
    }

    /// Stop monitoring `key` without recording an exit.
    pub fn remove(&self, key: &PositionKey) -> Option<Position> {
        let lock = self.lock_for(key);
        let _held = lock.lock();
        let removed = self.positions.remove(key).map(|(_, p)| p);
        if removed.is_some() {
            self.report_size();
        }
        removed
    }

    /// Drop `key` from monitoring and veto its re-admission until restart.
    pub fn evict(&self, key: &PositionKey) -> Option<Position> {
        let lock = self.lock_for(key);
        let _held = lock.lock();
        self.evicted.insert(key.clone(), Utc::now());
        let removed = self.positions.remove(key).map(|(_, p)| p);
        self.report_size();
        warn!(position = %key, "Position evicted from monitoring");
        removed
    }

    /// Record a confirmed exit: write the ledger entry, veto re-admission,
    /// and remove the position.
    ///
    /// If the ledger write fails the identity is still vetoed and removed
    /// in memory (the sell has happened) and the error is returned so the
    /// caller can alert. The veto will then not survive a restart.
    ///
    /// Blocks on the ledger's durable write while holding the identity
    /// lock; async callers run it on a blocking thread.
    pub fn mark_exited(&self, key: &PositionKey) -> PositionResult<Option<Position>> {
        let lock = self.lock_for(key);
        let _held = lock.lock();

        let exited_at = Utc::now();
        let written = self.ledger.upsert(&ExitedLedgerEntry::new(key, exited_at));

        self.exited.insert(key.clone(), exited_at);
        let removed = self.positions.remove(key).map(|(_, p)| p);
        self.report_size();

        match written {
            Ok(()) => {
                info!(owner = %key.owner, asset = %key.asset, "Position marked exited");
                Ok(removed)
            }
            Err(e) => {
                warn!(
                    owner = %key.owner,
                    asset = %key.asset,
                    error = %e,
                    "Exited ledger write failed; veto held in memory only"
                );
                Err(PositionError::Ledger(e))
            }
        }
    }

    /// Claim `key` for an exit. `None` if an exit is already in flight.
    #[must_use]
    pub fn try_begin_exit(&self, key: &PositionKey) -> Option<ExitGuard> {
        match self.pending.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Utc::now());
                Some(ExitGuard {
                    key: key.clone(),
                    pending: Arc::clone(&self.pending),
                })
            }
            Entry::Occupied(_) => None,
        }
    }

    #[must_use]
    pub fn is_exit_pending(&self, key: &PositionKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Identities currently monitored. A copy, safe to iterate while the
    /// store changes.
    #[must_use]
    pub fn snapshot_keys(&self) -> Vec<PositionKey> {
        self.positions.iter().map(|r| r.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Lock serializing admission and exit for `key`. Identities sharing a
    /// stripe only serialize with each other; no caller holds two.
    fn lock_for(&self, key: &PositionKey) -> &Mutex<()> {
        &self.locks[stripe_of(key)]
    }

    fn report_size(&self) {
        Metrics::positions_monitored(self.positions.len());
    }
}

fn stripe_of(key: &PositionKey) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % LOCK_STRIPES as u64) as usize
}
