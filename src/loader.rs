use crate::error::{Result, SadapError};
use crate::extractor::{extract_record, RowContext};
use crate::locator::{guess_id_column, locate, Grid};
use crate::recap::is_recap_file;
use crate::store::{Store, Upsert};
use crate::types::ProductionType;
use crate::util::{clean_cell, format_int, is_blank_row};
use chrono::{Datelike, Local, NaiveDate};
use csv::ReaderBuilder;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

/// Supervisor-cell keywords that mark sheet-level summary rows.
pub const SUMMARY_KEYWORDS: &[&str] = &[
    "jumlah", "total", "selisih", "%", "rata", "rekap", "pabrik", "k3",
];

/// Filename keywords, most specific first.
const TYPE_RULES: &[(&str, ProductionType)] = &[
    ("BAKU BORONG", ProductionType::BakuBorong),
    ("BORONG MINGGU", ProductionType::BorongMinggu),
    ("BORONG INTERNAL", ProductionType::BorongInternal),
    ("BORONG EKSTERNAL", ProductionType::BorongEksternal),
    ("TETES LANJUT", ProductionType::TetesLanjut),
    ("BAKU", ProductionType::Baku),
];

static FILE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2})-(\d{2})-(\d{4})").expect("valid file date regex"));

/// What the caller hands the pipeline for one import run.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub target_day: u32,
    pub region: String,
    pub batch_ref: String,
    /// Month used when a file name carries no date.
    pub today: NaiveDate,
}

impl ImportRequest {
    pub fn new(target_day: u32, region: impl Into<String>, batch_ref: impl Into<String>) -> Self {
        Self {
            target_day,
            region: region.into(),
            batch_ref: batch_ref.into(),
            today: Local::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileReport {
    pub file: String,
    pub production_type: ProductionType,
    pub date: Option<NaiveDate>,
    pub total_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped_blank: usize,
    pub skipped_summary: usize,
    pub skipped_unnamed: usize,
}

impl FileReport {
    pub fn saved(&self) -> usize {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub saved: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub files: Vec<FileReport>,
}

pub fn resolve_production_type(file_name: &str) -> ProductionType {
    let name = file_name.to_uppercase().replace(['_', '-'], " ");
    TYPE_RULES
        .iter()
        .find(|(kw, _)| name.contains(kw))
        .map(|(_, t)| *t)
        .unwrap_or_default()
}

/// `DD-MM-YYYY` from the file name, else the target day in `today`'s month.
pub fn resolve_file_date(file_name: &str, target_day: u32, today: NaiveDate) -> Result<NaiveDate> {
    let date = match FILE_DATE_RE.captures(file_name) {
        Some(caps) => {
            let day: u32 = caps[1].parse().unwrap_or(0);
            let month: u32 = caps[2].parse().unwrap_or(0);
            let year: i32 = caps[3].parse().unwrap_or(0);
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => NaiveDate::from_ymd_opt(today.year(), today.month(), target_day),
    };
    date.ok_or_else(|| SadapError::InvalidFileDate(file_name.to_string()))
}

pub fn is_summary_row(supervisor: &str) -> bool {
    let lower = supervisor.trim().to_lowercase();
    SUMMARY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Read a sheet as a ragged grid of cells. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn read_grid(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in rdr.byte_records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        );
    }
    if rows.is_empty() {
        return Err(SadapError::EmptyFile(path.display().to_string()));
    }
    Ok(rows)
}

/// Carry the last non-blank value of column `idx` down into blank cells.
fn forward_fill(row: &mut Vec<String>, idx: Option<usize>, last: &mut String) {
    let Some(idx) = idx else { return };
    if row.len() <= idx {
        row.resize(idx + 1, String::new());
    }
    let value = clean_cell(&row[idx]);
    if value.is_empty() {
        row[idx] = last.clone();
    } else {
        *last = value;
    }
}

/// Run one already-read sheet through locate / fill / filter / extract / upsert.
pub fn process_grid<S: Store + ?Sized>(
    store: &S,
    rows: &Grid,
    file_name: &str,
    req: &ImportRequest,
) -> Result<FileReport> {
    let production_type = resolve_production_type(file_name);
    let date = resolve_file_date(file_name, req.target_day, req.today)?;
    let layout = locate(rows, req.target_day)?;

    let mut report = FileReport {
        file: file_name.to_string(),
        production_type,
        date: Some(date),
        ..FileReport::default()
    };

    let mut columns = layout.columns.clone();
    let mut last_year = String::new();
    let mut last_supervisor = String::new();

    for (idx, raw) in rows.iter().enumerate().skip(layout.data_start) {
        report.total_rows += 1;
        if is_blank_row(raw) {
            report.skipped_blank += 1;
            continue;
        }

        let mut row = raw.clone();
        forward_fill(&mut row, columns.year_planted, &mut last_year);
        forward_fill(&mut row, columns.supervisor, &mut last_supervisor);

        let supervisor = columns.supervisor.map(|i| clean_cell(&row[i])).unwrap_or_default();
        if is_summary_row(&supervisor) {
            debug!("{} row {}: summary row {:?} skipped", file_name, idx + 1, supervisor);
            report.skipped_summary += 1;
            continue;
        }

        if columns.national_id.is_none() {
            columns.national_id = guess_id_column(&row);
            if let Some(ci) = columns.national_id {
                debug!("{}: guessed ID column {} from row {}", file_name, ci, idx + 1);
            }
        }

        let cell = |i: Option<usize>| {
            i.and_then(|i| row.get(i))
                .map(|c| clean_cell(c))
                .unwrap_or_default()
        };
        if cell(columns.national_id).is_empty() && cell(columns.tapper_name).is_empty() {
            report.skipped_unnamed += 1;
            continue;
        }

        let ctx = RowContext {
            columns: &columns,
            first_day_column: layout.first_day_column,
            date,
            production_type,
            region: &req.region,
            batch_ref: &req.batch_ref,
        };
        let record = extract_record(&row, &ctx);

        if !record.has_identity() {
            debug!("{} row {}: incomplete identity", file_name, idx + 1);
            report.failed += 1;
            continue;
        }
        if record.yields.is_zero() {
            debug!("{} row {}: no production for day {}", file_name, idx + 1, req.target_day);
            report.failed += 1;
            continue;
        }

        match store.upsert_record(record) {
            Ok(Upsert::Inserted) => report.inserted += 1,
            Ok(Upsert::Updated) => report.updated += 1,
            Err(e) => {
                debug!("{} row {}: save failed: {}", file_name, idx + 1, e);
                report.failed += 1;
            }
        }
    }

    info!(
        "{}: {} saved ({} new, {} updated), {} failed [{} {}]",
        file_name,
        format_int(report.saved()),
        format_int(report.inserted),
        format_int(report.updated),
        format_int(report.failed),
        production_type,
        date
    );
    Ok(report)
}

pub fn process_file<S: Store + ?Sized>(
    store: &S,
    path: &Path,
    req: &ImportRequest,
) -> Result<FileReport> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let rows = read_grid(path)?;
    process_grid(store, &rows, &file_name, req)
}

/// Import every daily sheet (`*.csv`, except the recap sheet) in `dir`.
///
/// Structural problems in one file are collected as `"<file>: <error>"` and
/// the batch carries on. Only a run that neither saved nor failed a single
/// row is an error.
pub fn import_batch<S: Store + ?Sized>(
    store: &S,
    dir: &Path,
    req: &ImportRequest,
) -> Result<BatchReport> {
    if !(1..=31).contains(&req.target_day) {
        return Err(SadapError::InvalidTargetDay(req.target_day));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // The recap sheet has its own importer.
        if !name.to_uppercase().ends_with(".CSV") || is_recap_file(&name) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();

    let mut batch = BatchReport::default();
    for path in &paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match process_file(store, path, req) {
            Ok(report) => {
                batch.saved += report.saved();
                batch.failed += report.failed;
                batch.files.push(report);
            }
            Err(e) => {
                error!("{}: {}", name, e);
                batch.errors.push(format!("{}: {}", name, e));
            }
        }
    }

    if batch.saved == 0 && batch.failed == 0 {
        return Err(SadapError::NothingProcessed {
            dir: dir.display().to_string(),
            errors: batch.errors,
        });
    }

    info!(
        "batch {}: {} files, {} saved, {} failed, {} file errors",
        req.batch_ref,
        paths.len(),
        format_int(batch.saved),
        format_int(batch.failed),
        batch.errors.len()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn req(day: u32) -> ImportRequest {
        ImportRequest {
            target_day: day,
            region: "Setro".to_string(),
            batch_ref: "b1".to_string(),
            today: NaiveDate::from_ymd_opt(2025, 10, 15).unwrap(),
        }
    }

    const HEADER: &[&[&str]] = &[
        &["", "", "", "", "", "Tanggal", "", "", ""],
        &["", "", "", "", "", "27", "", "", ""],
        &["No", "Tahun Tanam", "Mandor", "NIK", "Nama Penyadap", "", "", "", ""],
        &["", "", "", "", "", "Basah Latek", "Sheet", "Basah Lump", "Br.Cr"],
    ];

    fn sheet(data: &[&[&str]]) -> Vec<Vec<String>> {
        let mut rows = grid(HEADER);
        rows.extend(grid(data));
        rows
    }

    #[test]
    fn production_type_rules_most_specific_first() {
        assert_eq!(resolve_production_type("Pantauan_27-10-2025_Baku.csv"), ProductionType::Baku);
        assert_eq!(resolve_production_type("PANTAUAN BAKU BORONG.csv"), ProductionType::BakuBorong);
        assert_eq!(resolve_production_type("pantauan_baku_borong.csv"), ProductionType::BakuBorong);
        assert_eq!(
            resolve_production_type("Borong Minggu Setro.csv"),
            ProductionType::BorongMinggu
        );
        assert_eq!(resolve_production_type("borong-internal.csv"), ProductionType::BorongInternal);
        assert_eq!(
            resolve_production_type("BORONG EKSTERNAL.csv"),
            ProductionType::BorongEksternal
        );
        assert_eq!(resolve_production_type("tetes lanjut.csv"), ProductionType::TetesLanjut);
        assert_eq!(resolve_production_type("sheet1.csv"), ProductionType::Baku);
    }

    #[test]
    fn file_date_from_name_or_target_day() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(
            resolve_file_date("Pantauan_Afd_Setro_27-10-2025_Baku.csv", 5, today).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, 27).unwrap()
        );
        assert_eq!(
            resolve_file_date("baku.csv", 5, today).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 5).unwrap()
        );
        assert!(matches!(
            resolve_file_date("baku.csv", 31, today),
            Err(SadapError::InvalidFileDate(_))
        ));
        assert!(resolve_file_date("x_31-02-2025.csv", 5, today).is_err());
    }

    #[test]
    fn forward_fill_attributes_rows_to_last_supervisor() {
        let store = MemoryStore::new();
        let rows = sheet(&[
            &["1", "2009", "SUTRISNO", "1001001001", "AHMAD", "10", "1", "2", "0"],
            &["2", "", "", "1001001002", "BUDI", "11", "1", "2", "0"],
            &["", "", "", "", "", "", "", "", ""],
            &["3", "", "", "1001001003", "CANDRA", "12", "1", "2", "0"],
        ]);
        let report = process_grid(&store, &rows, "Setro_Baku.csv", &req(27)).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.skipped_blank, 1);
        let records = store.all_records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.supervisor == "SUTRISNO" && r.year_planted == "2009"));
    }

    #[test]
    fn summary_rows_never_become_records() {
        let store = MemoryStore::new();
        let rows = sheet(&[
            &["1", "2009", "SUTRISNO", "1001001001", "AHMAD", "10", "1", "2", "0"],
            &["", "", "JUMLAH KESELURUHAN", "", "", "10", "1", "2", "0"],
            &["", "", "Selisih %", "", "", "1", "1", "1", "1"],
        ]);
        let report = process_grid(&store, &rows, "Baku.csv", &req(27)).unwrap();
        assert_eq!(report.saved(), 1);
        assert_eq!(report.skipped_summary, 2);
        assert!(store
            .all_records()
            .iter()
            .all(|r| !r.supervisor.to_lowercase().contains("jumlah")));
    }

    #[test]
    fn incomplete_and_all_zero_rows_count_as_failed() {
        let store = MemoryStore::new();
        let rows = sheet(&[
            &["1", "2009", "SUTRISNO", "", "AHMAD", "10", "1", "2", "0"],
            &["2", "2009", "SUTRISNO", "1001001002", "BUDI", "-", "", "0", "x"],
            &["3", "2009", "SUTRISNO", "", "", "5", "5", "5", "5"],
            &["4", "2009", "SUTRISNO", "1001001004", "DEDI", "3", "0", "0", "0"],
        ]);
        let report = process_grid(&store, &rows, "Baku.csv", &req(27)).unwrap();
        assert_eq!(report.saved(), 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped_unnamed, 1);
    }

    #[test]
    fn reimport_updates_instead_of_duplicating() {
        let store = MemoryStore::new();
        let rows = sheet(&[&[
            "1", "2009", "SUTRISNO", "1001001001", "AHMAD", "10", "20", "15", "5",
        ]]);
        process_grid(&store, &rows, "Setro_27-10-2025_Baku.csv", &req(27)).unwrap();
        let rows = sheet(&[&[
            "1", "2009", "SUTRISNO", "1001001001", "AHMAD", "12", "20", "15", "5",
        ]]);
        let report = process_grid(&store, &rows, "Setro_27-10-2025_Baku.csv", &req(27)).unwrap();
        assert_eq!(report.updated, 1);
        let records = store.all_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].yields.latex, 12.0);
        assert_eq!(records[0].total_production, 35.0);
    }

    #[test]
    fn unresolved_id_column_is_guessed_from_digits() {
        let store = MemoryStore::new();
        let mut rows = grid(&[
            &["", "", "", "Tanggal", "", "", ""],
            &["", "", "", "27", "", "", ""],
            &["Tahun Tanam", "Mandor", "Nomor Induk", "", "", "", ""],
        ]);
        rows.extend(grid(&[&["2009", "SUTRISNO", "3509010101800001", "4", "1", "1", "0"]]));
        let report = process_grid(&store, &rows, "Baku.csv", &req(27)).unwrap();
        assert_eq!(report.saved(), 1);
        assert_eq!(store.all_records()[0].national_id, "3509010101800001");
    }

    #[test]
    fn short_rows_still_forward_fill() {
        let mut row = vec!["1".to_string()];
        let mut last = "SUTRISNO".to_string();
        forward_fill(&mut row, Some(2), &mut last);
        assert_eq!(row, vec!["1", "", "SUTRISNO"]);
    }
}
