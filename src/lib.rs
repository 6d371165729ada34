//! Daily rubber-tapping yield sheets in, per-supervisor ledger out.
//!
//! `loader` turns exported spreadsheet CSVs into [`types::ProductionRecord`]s
//! and `recap` reads the daily recap sheet into [`types::RecapRecord`]s;
//! `ledger` and `recalc` keep the factory-vs-garden daily detail in step with
//! manually entered tapper entries.
pub mod config;
pub mod error;
pub mod extractor;
pub mod journal;
pub mod ledger;
pub mod loader;
pub mod locator;
pub mod output;
pub mod recalc;
pub mod recap;
pub mod reports;
pub mod store;
pub mod types;
pub mod util;

pub use error::{Result, SadapError};
pub use ledger::{EventKind, KeyGuard, KeyLocks, LedgerEvent, LedgerReconciler};
pub use loader::{import_batch, process_file, BatchReport, FileReport, ImportRequest};
pub use recalc::RecalculationService;
pub use recap::{import_recap, process_recap_file, RecapReport};
pub use store::{MemoryStore, Store, Upsert};
pub use types::{
    AggregateKey, LedgerAggregate, ProductionRecord, ProductionType, RecapRecord, RecapSection,
    Supervisor, TapperEntry, Yields,
};
