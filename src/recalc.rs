//! From-scratch garden-side totals for one ledger key.
use crate::error::{Result, SadapError};
use crate::ledger::KeyLocks;
use crate::store::Store;
use crate::types::{AggregateKey, LedgerAggregate, ProductionType, Yields};
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct RecalculationService<S: Store> {
    store: Arc<S>,
    locks: Arc<KeyLocks>,
}

impl<S: Store> RecalculationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_locks(store, Arc::new(KeyLocks::new()))
    }

    /// Share the key locks of a `LedgerReconciler` working on the same store.
    pub fn with_locks(store: Arc<S>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// Sum every tapper entry of the key into the garden-side totals and
    /// refresh the derived fields. Nothing is written when the result equals
    /// what is already stored, so repeated calls leave the aggregate as is.
    pub fn recalculate(
        &self,
        date: NaiveDate,
        supervisor_id: u64,
        production_type: ProductionType,
    ) -> Result<LedgerAggregate> {
        let supervisor = self
            .store
            .supervisor(supervisor_id)
            .ok_or(SadapError::SupervisorNotFound(supervisor_id))?;
        let key = AggregateKey {
            date,
            supervisor_id,
            production_type,
        };

        let _guard = self.locks.lock(&key);

        let garden: Yields = self.store.entries_for(&key).into_iter().map(|e| e.yields).sum();
        let existing = self.store.aggregate(&key);
        let expected = existing.as_ref().map(|a| a.version).unwrap_or(0);
        let mut aggregate = existing
            .clone()
            .unwrap_or_else(|| LedgerAggregate::empty(key, &supervisor));

        aggregate.garden_latex = garden.latex;
        aggregate.garden_lump = garden.lump;
        aggregate.recompute_derived();

        if existing.as_ref() == Some(&aggregate) {
            debug!("recalculate {}: unchanged", key);
            return Ok(aggregate);
        }
        self.store.save_aggregate(aggregate, expected)
    }

    /// Recalculate every key that has entries or an aggregate on `date`.
    pub fn recalculate_all(&self, date: NaiveDate) -> Result<Vec<LedgerAggregate>> {
        let mut keys: BTreeSet<AggregateKey> = self.store.entry_keys_on(date).into_iter().collect();
        keys.extend(self.store.aggregates_on(date).into_iter().map(|a| a.key));

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.recalculate(key.date, key.supervisor_id, key.production_type)?);
        }
        info!("recalculated {} ledger keys for {}", out.len(), date);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerEvent, LedgerReconciler};
    use crate::store::MemoryStore;
    use crate::types::{Supervisor, TapperEntry};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 27).unwrap()
    }

    fn setup() -> (
        Arc<MemoryStore>,
        LedgerReconciler<MemoryStore>,
        RecalculationService<MemoryStore>,
    ) {
        let store = Arc::new(MemoryStore::new());
        store.put_supervisor(Supervisor {
            id: 1,
            name: "SUTRISNO".to_string(),
            national_id: String::new(),
            region: "Setro".to_string(),
            year_planted: 2009,
            production_type: ProductionType::Baku,
        });
        let ledger = LedgerReconciler::new(store.clone());
        let recalc = RecalculationService::with_locks(store.clone(), ledger.locks());
        (store, ledger, recalc)
    }

    fn entry(id: u64, latex: f64, lump: f64) -> TapperEntry {
        TapperEntry {
            id,
            supervisor_id: 1,
            tapper_id: id,
            date: date(),
            production_type: ProductionType::Baku,
            year_planted: 2009,
            yields: Yields::new(latex, 1.0, lump, 0.5),
        }
    }

    #[test]
    fn garden_totals_come_from_entries() {
        let (store, ledger, recalc) = setup();
        for e in [entry(1, 10.0, 4.0), entry(2, 30.0, 6.0)] {
            store.put_entry(e.clone());
            ledger.apply(LedgerEvent::Create(e)).unwrap();
        }
        // Factory side drifts from a double-counted event.
        ledger.apply(LedgerEvent::Create(entry(1, 10.0, 4.0))).unwrap();

        let agg = recalc.recalculate(date(), 1, ProductionType::Baku).unwrap();
        assert_eq!(agg.garden_latex, 40.0);
        assert_eq!(agg.garden_lump, 10.0);
        assert_eq!(agg.factory_latex, 50.0);
        assert_eq!(agg.latex_discrepancy, 10.0);
        assert_eq!(agg.latex_discrepancy_pct, 25.0);
        assert_eq!(agg.lump_discrepancy, 4.0);
        assert_eq!(agg.lump_discrepancy_pct, 40.0);
    }

    #[test]
    fn recalculation_is_idempotent() {
        let (store, ledger, recalc) = setup();
        let e = entry(1, 12.5, 3.0);
        store.put_entry(e.clone());
        ledger.apply(LedgerEvent::Create(e)).unwrap();

        let first = recalc.recalculate(date(), 1, ProductionType::Baku).unwrap();
        let second = recalc.recalculate(date(), 1, ProductionType::Baku).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(store.aggregate(&first.key).unwrap(), second);
    }

    #[test]
    fn creates_missing_aggregate_and_rejects_unknown_supervisor() {
        let (store, _ledger, recalc) = setup();
        store.put_entry(entry(1, 5.0, 0.0));
        let agg = recalc.recalculate(date(), 1, ProductionType::Baku).unwrap();
        assert_eq!(agg.garden_latex, 5.0);
        assert_eq!(agg.factory_latex, 0.0);
        assert_eq!(agg.latex_discrepancy, -5.0);
        assert_eq!(agg.latex_discrepancy_pct, -100.0);

        assert!(matches!(
            recalc.recalculate(date(), 42, ProductionType::Baku),
            Err(SadapError::SupervisorNotFound(42))
        ));
    }

    #[test]
    fn recalculate_all_covers_keys_with_deleted_entries() {
        let (store, ledger, recalc) = setup();
        let e = entry(1, 8.0, 2.0);
        store.put_entry(e.clone());
        ledger.apply(LedgerEvent::Create(e.clone())).unwrap();
        recalc.recalculate_all(date()).unwrap();

        store.remove_entry(1);
        ledger.apply(LedgerEvent::Delete(e)).unwrap();
        let out = recalc.recalculate_all(date()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].garden_latex, 0.0);
        assert_eq!(out[0].factory_latex, 0.0);
        assert_eq!(out[0].latex_discrepancy_pct, 0.0);
    }
}
