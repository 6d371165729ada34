//! Importer for the daily recap sheet (`REKAP.csv`).
//!
//! The recap carries one line per supervisor with today's and month-to-date
//! garden/factory figures, grouped under production-type banner rows. All
//! columns sit at fixed offsets from the `Tahun Tanam` column, which is found
//! the same way the daily sheets find their headers: ordered strategies, first
//! hit wins.
use crate::error::{Result, SadapError};
use crate::loader::{read_grid, resolve_file_date, ImportRequest};
use crate::locator::{first_hit, Grid};
use crate::store::Store;
use crate::types::{ProductionType, RecapFigures, RecapRecord, RecapSection};
use crate::util::{clean_cell, format_int, is_blank_row, parse_number, parse_yield_cell};
use chrono::NaiveDate;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const RECAP_FILE_NAME: &str = "REKAP.csv";
/// Rows scanned when looking for the anchor header.
pub const RECAP_HEADER_SCAN_ROWS: usize = 30;
/// Anchor header plus its two sub-header rows.
pub const RECAP_HEADER_ROWS: usize = 3;
pub const RECAP_BATCH_SIZE: usize = 100;

// Offsets from the year-planted column.
const NATIONAL_ID: usize = 1;
const SUPERVISOR: usize = 2;
const WORKDAYS_TODAY: usize = 3;
const WORKDAYS_TO_DATE: usize = 4;
const TODAY: usize = 5;
const TO_DATE: usize = 15;
const PER_TAPPER_TODAY: usize = 25;
const PER_TAPPER_TO_DATE: usize = 26;

static YEAR_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}$").expect("valid year regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("valid year regex"));
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digits regex"));
static SHORT_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z ]+$").expect("valid label regex"));

/// Banner keywords, most specific first.
const SECTION_RULES: &[(&str, RecapSection)] = &[
    ("REKAPITULASI", RecapSection::Overall),
    ("TETES LANJUT", RecapSection::Production(ProductionType::TetesLanjut)),
    ("BORONG EKSTERNAL", RecapSection::Production(ProductionType::BorongEksternal)),
    ("BORONG INTERNAL", RecapSection::Production(ProductionType::BorongInternal)),
    ("BORONG MINGGU", RecapSection::Production(ProductionType::BorongMinggu)),
    ("BAKU BORONG", RecapSection::Production(ProductionType::BakuBorong)),
    ("PRODUKSI BAKU", RecapSection::Production(ProductionType::Baku)),
];

/// Keywords in the ID cell that mark totals and ratio lines.
const SUMMARY_KEYWORDS: &[&str] = &[
    "JUMLAH", "SELISIH", "TOTAL", "K3", "%", "RATA", "REKAPITULASI", "OW",
];
/// Keywords in the year cell when the ID cell is blank.
const SUMMARY_LEAD_KEYWORDS: &[&str] = &["JUMLAH", "SELISIH", "%", "K3"];

pub type AnchorFn = fn(&[String]) -> Option<usize>;

pub const RECAP_ANCHOR_STRATEGIES: &[(&str, AnchorFn)] = &[
    ("tahun tanam", anchor_by_year_planted as AnchorFn),
    ("nik", anchor_by_nik as AnchorFn),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecapAnchor {
    pub header_row: usize,
    /// Column of `Tahun Tanam`; every other column is an offset from here.
    pub base_column: usize,
}

impl RecapAnchor {
    pub fn data_start(&self) -> usize {
        self.header_row + RECAP_HEADER_ROWS
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecapReport {
    pub file: String,
    pub date: Option<NaiveDate>,
    pub total_rows: usize,
    pub saved: usize,
    pub failed: usize,
    pub sections: usize,
    pub skipped_blank: usize,
    pub skipped_summary: usize,
    pub skipped_invalid: usize,
    pub skipped_idle: usize,
}

/// What a recap line needs besides its own cells.
#[derive(Debug, Clone, Copy)]
pub struct RecapContext<'a> {
    pub base_column: usize,
    pub date: NaiveDate,
    pub section: RecapSection,
    pub region: &'a str,
    pub batch_ref: &'a str,
}

pub fn is_recap_file(file_name: &str) -> bool {
    file_name.eq_ignore_ascii_case(RECAP_FILE_NAME)
}

fn header_cell(cell: &str) -> String {
    cell.to_uppercase().replace('_', " ").replace('"', "").trim().to_string()
}

pub fn anchor_by_year_planted(row: &[String]) -> Option<usize> {
    row.iter().position(|c| {
        let c = header_cell(c);
        c.contains("TAHUN TANAM") || c == "TAHUN"
    })
}

/// `NIK` sits one column right of the year planted.
pub fn anchor_by_nik(row: &[String]) -> Option<usize> {
    row.iter().position(|c| header_cell(c) == "NIK")?.checked_sub(1)
}

pub fn locate_recap(rows: &Grid) -> Result<RecapAnchor> {
    rows.iter()
        .take(RECAP_HEADER_SCAN_ROWS)
        .enumerate()
        .find_map(|(header_row, row)| {
            first_hit("recap header", RECAP_ANCHOR_STRATEGIES, |s| s(row))
                .map(|base_column| RecapAnchor { header_row, base_column })
        })
        .ok_or(SadapError::RecapHeaderNotFound(RECAP_HEADER_SCAN_ROWS))
}

fn cell_at(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|c| c.trim()).unwrap_or("")
}

/// First banner keyword found in any cell of the row.
pub fn detect_section(row: &[String]) -> Option<RecapSection> {
    row.iter()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .find_map(|cell| {
            SECTION_RULES
                .iter()
                .find(|(kw, _)| cell.contains(kw))
                .map(|(_, section)| *section)
        })
}

/// A banner row names a section and carries no real year planted, so a
/// data line that merely mentions a type in some cell is not a banner.
pub fn section_banner(row: &[String], base: usize) -> Option<RecapSection> {
    let section = detect_section(row)?;
    let year = cell_at(row, base);
    if year.is_empty() && cell_at(row, base + NATIONAL_ID).is_empty() {
        return Some(section);
    }
    if YEAR_ONLY_RE.is_match(year) {
        return None;
    }
    Some(section)
}

/// Totals, differences and ratio lines. Banner rows must be handled first.
pub fn is_recap_summary_row(row: &[String], base: usize) -> bool {
    let Some(raw) = row.get(base + NATIONAL_ID) else {
        return false;
    };
    let cell = raw.trim().to_uppercase();
    if cell.is_empty() {
        let lead = cell_at(row, base).to_uppercase();
        return SUMMARY_LEAD_KEYWORDS.iter().any(|kw| lead.contains(kw))
            || lead.starts_with('\u{221A}')
            || lead == "OW";
    }
    SUMMARY_KEYWORDS.iter().any(|kw| cell.contains(kw))
        || (cell.len() <= 6 && SHORT_LABEL_RE.is_match(&cell))
}

/// A year between 1900 and 2100 in the year cell and a run of at least four
/// digits in the ID cell.
pub fn is_valid_data_row(row: &[String], base: usize) -> bool {
    let year_ok = YEAR_RE
        .find(cell_at(row, base))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .is_some_and(|y| (1900..=2100).contains(&y));
    let national_id: String = cell_at(row, base + NATIONAL_ID)
        .chars()
        .filter(|c| *c != '.' && *c != ' ')
        .collect();
    let id_ok = DIGITS_RE
        .find(&national_id)
        .is_some_and(|m| m.as_str().len() >= 4);
    year_ok && id_ok
}

/// Workday counts: quotes and dashes dropped, blank is zero, `.` groups
/// thousands.
pub fn parse_count(cell: &str) -> u32 {
    let text: String = clean_cell(cell)
        .chars()
        .filter(|c| !matches!(c, '-' | '\u{2014}'))
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }
    if let Ok(n) = text.replace('.', "").parse::<u32>() {
        return n;
    }
    parse_number(text).map(|f| f.max(0.0) as u32).unwrap_or(0)
}

/// Lines with no workdays today and none to date carry no production.
pub fn has_workdays(row: &[String], base: usize) -> bool {
    parse_count(cell_at(row, base + WORKDAYS_TODAY)) != 0
        || parse_count(cell_at(row, base + WORKDAYS_TO_DATE)) != 0
}

fn figures(row: &[String], start: usize) -> RecapFigures {
    let at = |offset: usize| parse_yield_cell(cell_at(row, start + offset));
    RecapFigures {
        garden_latex: at(0),
        factory_latex: at(1),
        latex_pct: at(2),
        garden_lump: at(3),
        factory_lump: at(4),
        lump_pct: at(5),
        k3_sheet: at(6),
        dry_sheet: at(7),
        dry_br_cr: at(8),
        dry_total: at(9),
    }
}

/// Build a recap record from one data line. Missing or unreadable figures
/// are zero.
pub fn extract_recap(row: &[String], ctx: &RecapContext<'_>) -> RecapRecord {
    let base = ctx.base_column;
    let text = |offset: usize| clean_cell(cell_at(row, base + offset));
    let today = figures(row, base + TODAY);
    RecapRecord {
        date: ctx.date,
        section: ctx.section,
        year_planted: text(0),
        national_id: text(NATIONAL_ID),
        supervisor: text(SUPERVISOR),
        workdays_today: parse_count(cell_at(row, base + WORKDAYS_TODAY)),
        workdays_to_date: parse_count(cell_at(row, base + WORKDAYS_TO_DATE)),
        today,
        to_date: figures(row, base + TO_DATE),
        per_tapper_today: parse_yield_cell(cell_at(row, base + PER_TAPPER_TODAY)),
        per_tapper_to_date: parse_yield_cell(cell_at(row, base + PER_TAPPER_TO_DATE)),
        total_production: today.dry_sheet + today.factory_lump,
        region: ctx.region.to_string(),
        batch_ref: ctx.batch_ref.to_string(),
        created_at: None,
        updated_at: None,
    }
}

/// Save what is pending. A failed save counts the whole batch as failed.
fn flush<S: Store + ?Sized>(store: &S, pending: &mut Vec<RecapRecord>, report: &mut RecapReport) {
    if pending.is_empty() {
        return;
    }
    let size = pending.len();
    match store.save_recaps(std::mem::take(pending)) {
        Ok(saved) => report.saved += saved,
        Err(e) => {
            error!("{}: recap batch of {} rows failed: {}", report.file, size, e);
            report.failed += size;
        }
    }
}

pub fn process_recap_grid<S: Store + ?Sized>(
    store: &S,
    rows: &Grid,
    file_name: &str,
    req: &ImportRequest,
) -> Result<RecapReport> {
    let date = resolve_file_date(file_name, req.target_day, req.today)?;
    let anchor = locate_recap(rows)?;
    let base = anchor.base_column;
    debug!(
        "{}: recap header at row {}, year planted in column {}",
        file_name, anchor.header_row, base
    );

    let mut report = RecapReport {
        file: file_name.to_string(),
        date: Some(date),
        ..RecapReport::default()
    };
    let mut section = RecapSection::default();
    let mut pending = Vec::with_capacity(RECAP_BATCH_SIZE);

    for (idx, row) in rows.iter().enumerate().skip(anchor.data_start()) {
        report.total_rows += 1;
        if is_blank_row(row) {
            report.skipped_blank += 1;
            continue;
        }
        if let Some(next) = section_banner(row, base) {
            flush(store, &mut pending, &mut report);
            debug!("{} row {}: section {}", file_name, idx + 1, next);
            section = next;
            report.sections += 1;
            continue;
        }
        if is_recap_summary_row(row, base) {
            report.skipped_summary += 1;
            continue;
        }
        if !is_valid_data_row(row, base) {
            debug!("{} row {}: no year planted or ID", file_name, idx + 1);
            report.skipped_invalid += 1;
            continue;
        }
        if !has_workdays(row, base) {
            report.skipped_idle += 1;
            continue;
        }

        let ctx = RecapContext {
            base_column: base,
            date,
            section,
            region: &req.region,
            batch_ref: &req.batch_ref,
        };
        pending.push(extract_recap(row, &ctx));
        if pending.len() >= RECAP_BATCH_SIZE {
            flush(store, &mut pending, &mut report);
        }
    }
    flush(store, &mut pending, &mut report);

    info!(
        "{}: {} recap lines saved, {} failed over {} sections [{}]",
        file_name,
        format_int(report.saved),
        format_int(report.failed),
        report.sections,
        date
    );
    Ok(report)
}

pub fn process_recap_file<S: Store + ?Sized>(
    store: &S,
    path: &Path,
    req: &ImportRequest,
) -> Result<RecapReport> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let rows = read_grid(path)?;
    process_recap_grid(store, &rows, &file_name, req)
}

fn find_recap_file(dir: &Path) -> Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .is_some_and(|n| is_recap_file(&n.to_string_lossy()));
        if matches && path.is_file() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Import the recap sheet in `dir` for the request's target day.
pub fn import_recap<S: Store + ?Sized>(
    store: &S,
    dir: &Path,
    req: &ImportRequest,
) -> Result<RecapReport> {
    if !(1..=31).contains(&req.target_day) {
        return Err(SadapError::InvalidTargetDay(req.target_day));
    }
    let path = find_recap_file(dir)?.ok_or_else(|| {
        SadapError::RecapNotFound(dir.join(RECAP_FILE_NAME).display().to_string())
    })?;
    process_recap_file(store, &path, req)
}
