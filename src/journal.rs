//! CSV journals that stand in for the supervisor registry and the tapper
//! entry CRUD screen: supervisors are loaded into the store, entry events are
//! replayed through the ledger in file order.
use crate::error::{Result, SadapError};
use crate::ledger::{EventKind, LedgerEvent, LedgerReconciler};
use crate::store::Store;
use crate::types::{EntryRow, ProductionType, Supervisor, SupervisorRow, TapperEntry, Yields};
use crate::util::{format_int, parse_date_safe, parse_number, parse_u32_safe, parse_u64_safe};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded: usize,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub total_rows: usize,
    pub applied: usize,
    pub failed: Vec<String>,
    /// Dates whose aggregates may need recalculation.
    pub touched_dates: BTreeSet<NaiveDate>,
}

fn invalid(line: usize, details: impl Into<String>) -> SadapError {
    SadapError::InvalidJournalRow {
        line,
        details: details.into(),
    }
}

fn required<T>(value: Option<T>, line: usize, field: &str) -> Result<T> {
    value.ok_or_else(|| invalid(line, format!("missing or invalid {}", field)))
}

fn production_type(raw: Option<&str>, line: usize) -> Result<ProductionType> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(ProductionType::default()),
        Some(s) => s.parse().map_err(|e: String| invalid(line, e)),
    }
}

/// Journal quantities are machine-written: blank is zero, anything else must
/// parse.
fn quantity(raw: Option<&str>, line: usize, field: &str) -> Result<f64> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0.0),
        Some(s) => parse_number(s).map_err(|_| invalid(line, format!("bad {} {:?}", field, s))),
    }
}

pub fn supervisor_from_row(row: SupervisorRow, line: usize) -> Result<Supervisor> {
    let id = required(parse_u64_safe(row.id.as_deref()), line, "id")?;
    let name = required(
        row.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        line,
        "name",
    )?;
    Ok(Supervisor {
        id,
        name,
        national_id: row.national_id.unwrap_or_default().trim().to_string(),
        region: row
            .region
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        year_planted: parse_u32_safe(row.year_planted.as_deref()).unwrap_or(0),
        production_type: production_type(row.production_type.as_deref(), line)?,
    })
}

pub fn entry_from_row(row: EntryRow, line: usize) -> Result<(EventKind, TapperEntry)> {
    let kind: EventKind = required(row.event.as_deref(), line, "event")?
        .parse()
        .map_err(|e: String| invalid(line, e))?;
    let entry = TapperEntry {
        id: required(parse_u64_safe(row.id.as_deref()), line, "id")?,
        supervisor_id: required(
            parse_u64_safe(row.supervisor_id.as_deref()),
            line,
            "supervisor_id",
        )?,
        tapper_id: parse_u64_safe(row.tapper_id.as_deref()).unwrap_or(0),
        date: required(parse_date_safe(row.date.as_deref()), line, "date")?,
        production_type: production_type(row.production_type.as_deref(), line)?,
        year_planted: parse_u32_safe(row.year_planted.as_deref()).unwrap_or(0),
        yields: Yields::new(
            quantity(row.latex.as_deref(), line, "latex")?,
            quantity(row.sheet.as_deref(), line, "sheet")?,
            quantity(row.lump.as_deref(), line, "lump")?,
            quantity(row.br_cr.as_deref(), line, "br_cr")?,
        ),
    };
    Ok((kind, entry))
}

/// Load `id,name,national_id,region,year_planted,production_type` rows into
/// the store. Bad rows are reported and skipped.
pub fn load_supervisors<S: Store + ?Sized>(path: &Path, store: &S) -> Result<LoadReport> {
    let mut rdr = ReaderBuilder::new().flexible(true).trim(Trim::All).from_path(path)?;
    let mut report = LoadReport::default();

    for (result, line) in rdr.deserialize::<SupervisorRow>().zip(2..) {
        report.total_rows += 1;
        let parsed = result
            .map_err(|e| invalid(line, e.to_string()))
            .and_then(|row| supervisor_from_row(row, line));
        match parsed {
            Ok(supervisor) => {
                store.put_supervisor(supervisor);
                report.loaded += 1;
            }
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                report.rejected.push(e.to_string());
            }
        }
    }

    info!(
        "loaded {} supervisors ({} rejected)",
        format_int(report.loaded),
        report.rejected.len()
    );
    Ok(report)
}

/// Replay `event,id,supervisor_id,...` rows through the ledger, keeping the
/// store's entry set in step so updates and deletes see the prior version.
pub fn replay_entries<S: Store>(
    path: &Path,
    store: &S,
    ledger: &LedgerReconciler<S>,
) -> Result<ReplayReport> {
    let mut rdr = ReaderBuilder::new().flexible(true).trim(Trim::All).from_path(path)?;
    let mut report = ReplayReport::default();

    for (result, line) in rdr.deserialize::<EntryRow>().zip(2..) {
        report.total_rows += 1;
        let parsed = result
            .map_err(|e| invalid(line, e.to_string()))
            .and_then(|row| entry_from_row(row, line));
        let (kind, entry) = match parsed {
            Ok(v) => v,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                report.failed.push(e.to_string());
                continue;
            }
        };

        if store.supervisor(entry.supervisor_id).is_none() {
            let e = SadapError::SupervisorNotFound(entry.supervisor_id);
            warn!("{} line {}: {}", path.display(), line, e);
            report.failed.push(format!("line {}: {}", line, e));
            continue;
        }

        report.touched_dates.insert(entry.date);
        let event = match kind {
            EventKind::Create => match store.put_entry(entry.clone()) {
                Some(old) => {
                    warn!("line {}: entry {} already exists; applied as update", line, entry.id);
                    report.touched_dates.insert(old.date);
                    LedgerEvent::Update { old, new: entry }
                }
                None => LedgerEvent::Create(entry),
            },
            // Ids the store does not hold are rejected without touching it.
            EventKind::Update => match store.entry(entry.id) {
                Some(old) => {
                    report.touched_dates.insert(old.date);
                    store.put_entry(entry.clone());
                    LedgerEvent::Update { old, new: entry }
                }
                None => {
                    let msg = format!("line {}: update of unknown entry {}", line, entry.id);
                    warn!("{}", msg);
                    report.failed.push(msg);
                    continue;
                }
            },
            // The stored version carries the yields that were actually counted.
            EventKind::Delete => match store.remove_entry(entry.id) {
                Some(old) => LedgerEvent::Delete(old),
                None => {
                    let msg = format!("line {}: delete of unknown entry {}", line, entry.id);
                    warn!("{}", msg);
                    report.failed.push(msg);
                    continue;
                }
            },
        };

        match ledger.apply(event) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                error!("line {}: {}", line, e);
                report.failed.push(format!("line {}: {}", line, e));
            }
        }
    }

    info!(
        "replayed {} entry events ({} failed)",
        format_int(report.applied),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::AggregateKey;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn csv_file(body: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const SUPERVISORS: &str = "id,name,national_id,region,year_planted,production_type\n\
        1,SUTRISNO,3509010101800001,Setro,2009,BAKU\n\
        2,WAHYU,,Setro,2011,TETES_LANJUT\n\
        x,BROKEN,,,,\n";

    #[test]
    fn supervisors_load_and_bad_rows_are_reported() {
        let store = MemoryStore::new();
        let file = csv_file(SUPERVISORS);
        let report = load_supervisors(file.path(), &store).unwrap();
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].contains("row 4"));
        assert_eq!(store.supervisor(2).unwrap().production_type, ProductionType::TetesLanjut);
    }

    #[test]
    fn replay_tracks_prior_versions() {
        let store = Arc::new(MemoryStore::new());
        load_supervisors(csv_file(SUPERVISORS).path(), store.as_ref()).unwrap();
        let ledger = LedgerReconciler::new(store.clone());
        let journal = csv_file(
            "event,id,supervisor_id,tapper_id,date,production_type,year_planted,latex,sheet,lump,br_cr\n\
             create,10,1,100,2025-10-27,BAKU,2009,10,1,4,0\n\
             create,11,1,101,2025-10-27,BAKU,2009,\"5,5\",1,2,0\n\
             update,10,1,100,2025-10-27,BAKU,2009,12,1,4,0\n\
             delete,11,1,101,2025-10-27,BAKU,2009,,,,\n\
             create,12,9,102,2025-10-27,BAKU,2009,1,1,1,1\n\
             create,13,1,103,27-10-2025,BAKU,2009,abc,1,1,1\n",
        );
        let report = replay_entries(journal.path(), store.as_ref(), &ledger).unwrap();
        assert_eq!(report.total_rows, 6);
        assert_eq!(report.applied, 4);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.touched_dates.len(), 1);

        let key = AggregateKey {
            date: NaiveDate::from_ymd_opt(2025, 10, 27).unwrap(),
            supervisor_id: 1,
            production_type: ProductionType::Baku,
        };
        let agg = store.aggregate(&key).unwrap();
        assert_eq!(agg.factory_latex, 12.0);
        assert_eq!(agg.factory_lump, 4.0);
        assert_eq!(agg.sheet_total, 1.0);
        assert!(store.entry(11).is_none());
        assert_eq!(store.entry(10).unwrap().yields.latex, 12.0);
    }

    #[test]
    fn update_and_delete_of_unknown_entries_change_nothing() {
        let store = Arc::new(MemoryStore::new());
        load_supervisors(csv_file(SUPERVISORS).path(), store.as_ref()).unwrap();
        let ledger = LedgerReconciler::new(store.clone());
        let journal = csv_file(
            "event,id,supervisor_id,tapper_id,date,production_type,year_planted,latex,sheet,lump,br_cr\n\
             create,1,1,100,2025-10-27,BAKU,2009,10,0,0,0\n\
             update,2,1,101,2025-10-27,BAKU,2009,50,0,0,0\n\
             delete,2,1,101,2025-10-27,BAKU,2009,50,0,0,0\n",
        );
        let report = replay_entries(journal.path(), store.as_ref(), &ledger).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].contains("unknown entry 2"));
        assert!(store.entry(2).is_none());

        let key = AggregateKey {
            date: NaiveDate::from_ymd_opt(2025, 10, 27).unwrap(),
            supervisor_id: 1,
            production_type: ProductionType::Baku,
        };
        assert_eq!(store.aggregate(&key).unwrap().factory_latex, 10.0);
    }
}
