//! Persistence seam shared by the pipeline, the ledger and recalculation.
//!
//! The core only talks to [`Store`]; [`MemoryStore`] is the in-process
//! implementation used by the CLI and the tests.
use crate::error::{Result, SadapError};
use crate::types::{
    AggregateKey, LedgerAggregate, ProductionRecord, RecapKey, RecapRecord, RecordKey, Supervisor,
    TapperEntry,
};
use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

pub trait Store: Send + Sync {
    /// Insert or replace by natural key, keeping the original `created_at`.
    fn upsert_record(&self, record: ProductionRecord) -> Result<Upsert>;
    fn records_on(&self, date: NaiveDate) -> Vec<ProductionRecord>;
    fn record_count(&self) -> usize;

    /// Upsert a batch of recap lines by natural key, keeping `created_at`.
    /// The batch is written as a whole or not at all.
    fn save_recaps(&self, recaps: Vec<RecapRecord>) -> Result<usize>;
    fn recaps_on(&self, date: NaiveDate) -> Vec<RecapRecord>;

    fn supervisor(&self, id: u64) -> Option<Supervisor>;
    fn put_supervisor(&self, supervisor: Supervisor);

    fn entry(&self, id: u64) -> Option<TapperEntry>;
    /// Returns the previous version of the entry, if any.
    fn put_entry(&self, entry: TapperEntry) -> Option<TapperEntry>;
    fn remove_entry(&self, id: u64) -> Option<TapperEntry>;
    fn entries_for(&self, key: &AggregateKey) -> Vec<TapperEntry>;
    fn entry_keys_on(&self, date: NaiveDate) -> Vec<AggregateKey>;

    fn aggregate(&self, key: &AggregateKey) -> Option<LedgerAggregate>;
    /// Compare-and-swap write: fails with `StaleAggregate` unless the stored
    /// version (0 when absent) equals `expected_version`. The stored copy gets
    /// `expected_version + 1`. Discrepancies and K3 ratios are recomputed from
    /// the stored totals, whatever the caller put in them.
    fn save_aggregate(
        &self,
        aggregate: LedgerAggregate,
        expected_version: u64,
    ) -> Result<LedgerAggregate>;
    fn aggregates_on(&self, date: NaiveDate) -> Vec<LedgerAggregate>;
    fn aggregates_for_supervisor(
        &self,
        date: NaiveDate,
        supervisor_id: u64,
    ) -> Vec<LedgerAggregate>;
    fn aggregates_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<LedgerAggregate>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordKey, ProductionRecord>>,
    recaps: RwLock<BTreeMap<RecapKey, RecapRecord>>,
    supervisors: RwLock<HashMap<u64, Supervisor>>,
    entries: RwLock<BTreeMap<u64, TapperEntry>>,
    aggregates: RwLock<BTreeMap<AggregateKey, LedgerAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_records(&self) -> Vec<ProductionRecord> {
        self.records.read().values().cloned().collect()
    }
}

impl Store for MemoryStore {
    fn upsert_record(&self, mut record: ProductionRecord) -> Result<Upsert> {
        let now = Local::now().naive_local();
        let mut records = self.records.write();
        let key = record.key();
        record.updated_at = Some(now);
        match records.get(&key) {
            Some(existing) => {
                record.created_at = existing.created_at;
                records.insert(key, record);
                Ok(Upsert::Updated)
            }
            None => {
                record.created_at = Some(now);
                records.insert(key, record);
                Ok(Upsert::Inserted)
            }
        }
    }

    fn records_on(&self, date: NaiveDate) -> Vec<ProductionRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect()
    }

    fn record_count(&self) -> usize {
        self.records.read().len()
    }

    fn save_recaps(&self, batch: Vec<RecapRecord>) -> Result<usize> {
        let now = Local::now().naive_local();
        let mut recaps = self.recaps.write();
        let count = batch.len();
        for mut recap in batch {
            let key = recap.key();
            recap.created_at = recaps.get(&key).and_then(|r| r.created_at).or(Some(now));
            recap.updated_at = Some(now);
            recaps.insert(key, recap);
        }
        Ok(count)
    }

    fn recaps_on(&self, date: NaiveDate) -> Vec<RecapRecord> {
        self.recaps
            .read()
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect()
    }

    fn supervisor(&self, id: u64) -> Option<Supervisor> {
        self.supervisors.read().get(&id).cloned()
    }

    fn put_supervisor(&self, supervisor: Supervisor) {
        self.supervisors.write().insert(supervisor.id, supervisor);
    }

    fn entry(&self, id: u64) -> Option<TapperEntry> {
        self.entries.read().get(&id).cloned()
    }

    fn put_entry(&self, entry: TapperEntry) -> Option<TapperEntry> {
        self.entries.write().insert(entry.id, entry)
    }

    fn remove_entry(&self, id: u64) -> Option<TapperEntry> {
        self.entries.write().remove(&id)
    }

    fn entries_for(&self, key: &AggregateKey) -> Vec<TapperEntry> {
        self.entries
            .read()
            .values()
            .filter(|e| e.aggregate_key() == *key)
            .cloned()
            .collect()
    }

    fn entry_keys_on(&self, date: NaiveDate) -> Vec<AggregateKey> {
        let keys: BTreeSet<AggregateKey> = self
            .entries
            .read()
            .values()
            .filter(|e| e.date == date)
            .map(|e| e.aggregate_key())
            .collect();
        keys.into_iter().collect()
    }

    fn aggregate(&self, key: &AggregateKey) -> Option<LedgerAggregate> {
        self.aggregates.read().get(key).cloned()
    }

    fn save_aggregate(
        &self,
        mut aggregate: LedgerAggregate,
        expected_version: u64,
    ) -> Result<LedgerAggregate> {
        let mut aggregates = self.aggregates.write();
        let found = aggregates.get(&aggregate.key).map(|a| a.version).unwrap_or(0);
        if found != expected_version {
            return Err(SadapError::StaleAggregate {
                key: aggregate.key,
                expected: expected_version,
                found,
            });
        }
        aggregate.recompute_derived();
        aggregate.version = expected_version + 1;
        aggregates.insert(aggregate.key, aggregate.clone());
        Ok(aggregate)
    }

    fn aggregates_on(&self, date: NaiveDate) -> Vec<LedgerAggregate> {
        self.aggregates
            .read()
            .values()
            .filter(|a| a.key.date == date)
            .cloned()
            .collect()
    }

    fn aggregates_for_supervisor(
        &self,
        date: NaiveDate,
        supervisor_id: u64,
    ) -> Vec<LedgerAggregate> {
        self.aggregates
            .read()
            .values()
            .filter(|a| a.key.date == date && a.key.supervisor_id == supervisor_id)
            .cloned()
            .collect()
    }

    fn aggregates_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<LedgerAggregate>> {
        if start > end {
            return Err(SadapError::InvalidDateRange { start, end });
        }
        Ok(self
            .aggregates
            .read()
            .values()
            .filter(|a| a.key.date >= start && a.key.date <= end)
            .cloned()
            .collect())
    }
}
