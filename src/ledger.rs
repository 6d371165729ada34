//! Incremental maintenance of the per-(date, supervisor, type) daily detail.
//!
//! Every create/update/delete of a tapper entry becomes a signed delta on the
//! factory-side totals. Each read-modify-write runs under the key's lock and
//! is saved with a version check, so concurrent events on one key never lose
//! updates.
use crate::error::{Result, SadapError};
use crate::store::Store;
use crate::types::{AggregateKey, LedgerAggregate, Supervisor, TapperEntry, Yields};
use log::{debug, error, warn};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        })
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(EventKind::Create),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            other => Err(format!("unknown event {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Create(TapperEntry),
    Update { old: TapperEntry, new: TapperEntry },
    Delete(TapperEntry),
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::Create(_) => EventKind::Create,
            LedgerEvent::Update { .. } => EventKind::Update,
            LedgerEvent::Delete(_) => EventKind::Delete,
        }
    }
}

/// One mutex per aggregate key, created on first use and dropped again when
/// the last holder or waiter lets go.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<AggregateKey, Arc<Mutex<()>>>>,
}

/// Held key lock. Dropping it releases the key and prunes its map slot when
/// nobody else is holding or waiting for it.
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: AggregateKey,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, key: &AggregateKey) -> KeyGuard<'_> {
        // The map lock is released before blocking on the key.
        let handle = Arc::clone(self.locks.lock().entry(*key).or_default());
        KeyGuard {
            owner: self,
            key: *key,
            guard: Some(handle.lock_arc()),
        }
    }

    /// Lock two keys in key order, so two moves in opposite directions
    /// cannot deadlock. Equal keys are locked once.
    pub fn lock_pair(
        &self,
        a: &AggregateKey,
        b: &AggregateKey,
    ) -> (KeyGuard<'_>, Option<KeyGuard<'_>>) {
        match a.cmp(b) {
            Ordering::Equal => (self.lock(a), None),
            Ordering::Less => {
                let first = self.lock(a);
                (first, Some(self.lock(b)))
            }
            Ordering::Greater => {
                let first = self.lock(b);
                (first, Some(self.lock(a)))
            }
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Holding the map lock while releasing means no new handle can be
        // cloned between the release and the count check.
        let mut locks = self.owner.locks.lock();
        drop(self.guard.take());
        if locks.get(&self.key).is_some_and(|h| Arc::strong_count(h) == 1) {
            locks.remove(&self.key);
        }
    }
}

pub struct LedgerReconciler<S: Store> {
    store: Arc<S>,
    locks: Arc<KeyLocks>,
}

impl<S: Store> LedgerReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_locks(store, Arc::new(KeyLocks::new()))
    }

    pub fn with_locks(store: Arc<S>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> Arc<KeyLocks> {
        Arc::clone(&self.locks)
    }

    /// Entry point for collaborators that pass the event kind and an optional
    /// prior snapshot. An update without its prior version is logged and
    /// ignored.
    pub fn apply_raw(
        &self,
        kind: EventKind,
        entry: TapperEntry,
        prior: Option<TapperEntry>,
    ) -> Result<()> {
        let event = match (kind, prior) {
            (EventKind::Create, _) => LedgerEvent::Create(entry),
            (EventKind::Delete, _) => LedgerEvent::Delete(entry),
            (EventKind::Update, Some(old)) => LedgerEvent::Update { old, new: entry },
            (EventKind::Update, None) => {
                warn!("update of entry {} has no prior snapshot; ledger left unchanged", entry.id);
                return Ok(());
            }
        };
        self.apply(event)
    }

    pub fn apply(&self, event: LedgerEvent) -> Result<()> {
        debug!("ledger {} event", event.kind());
        match event {
            LedgerEvent::Create(entry) => {
                let supervisor = self.supervisor(entry.supervisor_id)?;
                self.adjust(entry.aggregate_key(), entry.yields, Some(&supervisor))?;
            }
            LedgerEvent::Delete(entry) => {
                self.supervisor(entry.supervisor_id)?;
                let key = entry.aggregate_key();
                if self.adjust(key, negate(entry.yields), None)?.is_none() {
                    warn!("delete of entry {} against missing aggregate {}", entry.id, key);
                }
            }
            LedgerEvent::Update { old, new } => {
                let supervisor = self.supervisor(new.supervisor_id)?;
                let old_key = old.aggregate_key();
                let new_key = new.aggregate_key();
                if old_key == new_key {
                    if self.adjust(new_key, new.yields - old.yields, None)?.is_none() {
                        warn!("update of entry {} against missing aggregate {}", new.id, new_key);
                    }
                } else {
                    let out = negate(old.yields);
                    self.move_between(old_key, out, new_key, new.yields, &supervisor)?;
                }
            }
        }
        Ok(())
    }

    fn supervisor(&self, id: u64) -> Result<Supervisor> {
        self.store
            .supervisor(id)
            .ok_or(SadapError::SupervisorNotFound(id))
    }

    /// Read-modify-write of one aggregate under its key lock. Returns `None`
    /// when the aggregate is missing and `create_with` is not given.
    fn adjust(
        &self,
        key: AggregateKey,
        delta: Yields,
        create_with: Option<&Supervisor>,
    ) -> Result<Option<LedgerAggregate>> {
        let _guard = self.locks.lock(&key);
        match self.prepare(key, delta, create_with) {
            Some((aggregate, expected)) => {
                Ok(Some(self.store.save_aggregate(aggregate, expected)?))
            }
            None => Ok(None),
        }
    }

    /// Move an entry's value from one key to another as one unit. Both keys
    /// are held for the whole move; if the target cannot be written the
    /// source is put back and the error returned.
    fn move_between(
        &self,
        old_key: AggregateKey,
        old_delta: Yields,
        new_key: AggregateKey,
        new_delta: Yields,
        supervisor: &Supervisor,
    ) -> Result<()> {
        let _guards = self.locks.lock_pair(&old_key, &new_key);

        let original = self.store.aggregate(&old_key);
        let (target, target_version) = match self.prepare(new_key, new_delta, Some(supervisor)) {
            Some(prepared) => prepared,
            None => return Ok(()),
        };

        let moved_out = match &original {
            Some(source) => {
                let mut updated = source.clone();
                updated.apply_delta(old_delta);
                updated.recompute_derived();
                Some(self.store.save_aggregate(updated, source.version)?)
            }
            None => {
                warn!("move found no aggregate {} to move out of", old_key);
                None
            }
        };

        if let Err(e) = self.store.save_aggregate(target, target_version) {
            if let (Some(source), Some(saved)) = (original, moved_out) {
                if let Err(undo) = self.store.save_aggregate(source, saved.version) {
                    error!("could not restore {} after failed move: {}", old_key, undo);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Current aggregate with `delta` applied, plus the version to save
    /// against. Caller holds the key lock.
    fn prepare(
        &self,
        key: AggregateKey,
        delta: Yields,
        create_with: Option<&Supervisor>,
    ) -> Option<(LedgerAggregate, u64)> {
        let (mut aggregate, expected) = match self.store.aggregate(&key) {
            Some(existing) => {
                let version = existing.version;
                (existing, version)
            }
            None => (LedgerAggregate::empty(key, create_with?), 0),
        };
        aggregate.apply_delta(delta);
        aggregate.recompute_derived();
        Some((aggregate, expected))
    }
}

fn negate(y: Yields) -> Yields {
    Yields::default() - y
}
