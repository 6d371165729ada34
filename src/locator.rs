//! Finds where the data actually lives inside a hand-made daily sheet.
//!
//! Each step keeps an ordered list of strategies; the first one that finds
//! something wins. The lists are public so each strategy can be exercised on
//! its own.
use crate::error::{Result, SadapError};
use crate::util::{clean_cell, is_bare_day_number, leading_number};
use log::debug;

/// Rows scanned when looking for the date header.
pub const DATE_SCAN_ROWS: usize = 15;
/// Rows below the date-number row searched for the "basah latek" label.
pub const SUB_HEADER_SCAN_ROWS: usize = 6;
/// Yield columns per day: wet latex, sheet, wet lump, br-cr.
pub const YIELD_COLUMNS: usize = 4;

pub type Grid = [Vec<String>];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRows {
    pub label_row: Option<usize>,
    pub number_row: usize,
}

/// Indices of the identity columns in the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub year_planted: Option<usize>,
    pub national_id: Option<usize>,
    pub supervisor: Option<usize>,
    pub tapper_name: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub date_rows: DateRows,
    pub available_days: Vec<u32>,
    pub first_day_column: usize,
    pub header_row: usize,
    pub columns: ColumnMap,
    pub data_start: usize,
}

pub type DateRowFn = fn(&Grid) -> Option<DateRows>;
pub type DaySetFn = fn(&[String]) -> Option<Vec<u32>>;
pub type DayColumnFn = fn(&[String], u32) -> Option<usize>;
pub type HeaderRowFn = fn(&Grid) -> Option<usize>;

pub const DATE_ROW_STRATEGIES: &[(&str, DateRowFn)] = &[
    ("tanggal label", date_rows_by_label as DateRowFn),
    ("bare day numbers", date_rows_by_day_numbers as DateRowFn),
];

pub const DAY_SET_STRATEGIES: &[(&str, DaySetFn)] = &[
    ("leading digits", days_by_leading_digits as DaySetFn),
    ("whole-cell integer", days_by_whole_cell as DaySetFn),
];

pub const DAY_COLUMN_STRATEGIES: &[(&str, DayColumnFn)] = &[
    ("leading digits", day_column_by_prefix as DayColumnFn),
    ("substring", day_column_by_substring as DayColumnFn),
];

pub const HEADER_ROW_STRATEGIES: &[(&str, HeaderRowFn)] = &[
    ("tahun tanam", header_by_year_planted as HeaderRowFn),
    ("nik with mandor/nama", header_by_id_and_name as HeaderRowFn),
    ("tahun + tanam tokens", header_by_split_tokens as HeaderRowFn),
];

pub(crate) fn first_hit<S: Copy, T>(
    step: &str,
    strategies: &[(&'static str, S)],
    mut run: impl FnMut(S) -> Option<T>,
) -> Option<T> {
    for (idx, (name, strategy)) in strategies.iter().enumerate() {
        if let Some(found) = run(*strategy) {
            if idx > 0 {
                debug!("{}: fell back to '{}' strategy", step, name);
            }
            return Some(found);
        }
    }
    None
}

/// Locate the date row, the target day's columns, the identity header and the
/// first data row.
pub fn locate(rows: &Grid, target_day: u32) -> Result<TableLayout> {
    if !(1..=31).contains(&target_day) {
        return Err(SadapError::InvalidTargetDay(target_day));
    }

    let date_rows = first_hit("date row", DATE_ROW_STRATEGIES, |s| s(rows))
        .ok_or(SadapError::DateRowNotFound(DATE_SCAN_ROWS))?;
    let number_row = rows
        .get(date_rows.number_row)
        .ok_or(SadapError::DateNumberRowMissing)?;

    let available_days = first_hit("available days", DAY_SET_STRATEGIES, |s| s(number_row))
        .ok_or(SadapError::NoAvailableDates)?;
    if !available_days.contains(&target_day) {
        return Err(SadapError::DayNotAvailable {
            day: target_day,
            available: available_days,
        });
    }

    let first_day_column = first_hit("day column", DAY_COLUMN_STRATEGIES, |s| {
        s(number_row, target_day)
    })
    .ok_or(SadapError::DayColumnNotFound(target_day))?;

    let header_row = first_hit("identity header", HEADER_ROW_STRATEGIES, |s| s(rows))
        .ok_or(SadapError::IdentityHeaderNotFound)?;
    let columns = column_map(&rows[header_row]);

    let scan_end = (date_rows.number_row + SUB_HEADER_SCAN_ROWS).min(rows.len());
    let sub_header = find_row_containing(
        &rows[date_rows.number_row..scan_end],
        "basah latek",
        SUB_HEADER_SCAN_ROWS,
    )
    .map(|rel| date_rows.number_row + rel);
    let data_start = match sub_header {
        Some(row) if row > header_row => row + 1,
        _ => header_row + 1,
    };

    debug!(
        "layout: number row {}, day {} at column {}, header row {}, data from row {}",
        date_rows.number_row, target_day, first_day_column, header_row, data_start
    );

    Ok(TableLayout {
        date_rows,
        available_days,
        first_day_column,
        header_row,
        columns,
        data_start,
    })
}

/// First row among the first `max_scan` with a cell containing `keyword`
/// (case-insensitive).
pub fn find_row_containing(rows: &Grid, keyword: &str, max_scan: usize) -> Option<usize> {
    let kw = keyword.trim().to_lowercase();
    rows.iter()
        .take(max_scan)
        .position(|row| row.iter().any(|cell| cell.trim().to_lowercase().contains(&kw)))
}

pub fn date_rows_by_label(rows: &Grid) -> Option<DateRows> {
    find_row_containing(rows, "tanggal", DATE_SCAN_ROWS).map(|label| DateRows {
        label_row: Some(label),
        number_row: label + 1,
    })
}

pub fn date_rows_by_day_numbers(rows: &Grid) -> Option<DateRows> {
    rows.iter()
        .take(DATE_SCAN_ROWS)
        .position(|row| row.iter().filter(|c| is_bare_day_number(c)).count() >= 3)
        .map(|number_row| DateRows {
            label_row: number_row.checked_sub(1),
            number_row,
        })
}

fn sorted_days(days: impl Iterator<Item = u32>) -> Option<Vec<u32>> {
    let mut days: Vec<u32> = days.filter(|d| (1..=31).contains(d)).collect();
    days.sort_unstable();
    days.dedup();
    if days.is_empty() {
        None
    } else {
        Some(days)
    }
}

pub fn days_by_leading_digits(row: &[String]) -> Option<Vec<u32>> {
    sorted_days(row.iter().filter_map(|c| leading_number(c)))
}

pub fn days_by_whole_cell(row: &[String]) -> Option<Vec<u32>> {
    sorted_days(
        row.iter()
            .filter_map(|c| c.trim().trim_start_matches('0').parse::<u32>().ok()),
    )
}

pub fn day_column_by_prefix(row: &[String], day: u32) -> Option<usize> {
    row.iter().position(|c| leading_number(c) == Some(day))
}

/// Headers like `"Tgl 01/09"`: the day appears somewhere in the cell.
pub fn day_column_by_substring(row: &[String], day: u32) -> Option<usize> {
    let needle = day.to_string();
    row.iter().position(|c| {
        let squashed: String = c.chars().filter(|ch| !ch.is_whitespace()).collect();
        squashed.contains(&needle)
    })
}

pub fn header_by_year_planted(rows: &Grid) -> Option<usize> {
    find_row_containing(rows, "tahun tanam", rows.len())
}

pub fn header_by_id_and_name(rows: &Grid) -> Option<usize> {
    rows.iter().position(|row| {
        let joined = row.join(" ").to_lowercase();
        joined.contains("nik") && (joined.contains("mandor") || joined.contains("nama"))
    })
}

pub fn header_by_split_tokens(rows: &Grid) -> Option<usize> {
    rows.iter().position(|row| {
        let joined = row.join(" ").to_lowercase();
        joined.contains("tahun") && joined.contains("tanam")
    })
}

/// Map identity columns from the header row; leftmost match wins.
pub fn column_map(header: &[String]) -> ColumnMap {
    let mut map = ColumnMap::default();
    for (idx, cell) in header.iter().enumerate() {
        let lower = clean_cell(cell).to_lowercase();
        if lower.is_empty() {
            continue;
        }
        let is_year =
            lower.contains("tahun tanam") || lower == "tahun" || lower.contains("thn tanam");
        let slot = if is_year {
            &mut map.year_planted
        } else if lower == "nik" || lower.contains("no nik") {
            &mut map.national_id
        } else if lower.contains("mandor") {
            &mut map.supervisor
        } else if lower.contains("nama") || lower.contains("penyadap") {
            &mut map.tapper_name
        } else {
            continue;
        };
        slot.get_or_insert(idx);
    }

    if map.year_planted.is_none() && !header.is_empty() {
        map.year_planted = Some(if header.len() > 1 { 1 } else { 0 });
    }
    if map.national_id.is_none() {
        map.national_id = header
            .iter()
            .position(|c| c.to_lowercase().contains("nik"));
    }
    map
}

/// Guess the ID column of a row from a 9–20 digit cell.
pub fn guess_id_column(row: &[String]) -> Option<usize> {
    row.iter().position(|c| {
        let v = clean_cell(c);
        (9..=20).contains(&v.len()) && v.chars().all(|ch| ch.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sample() -> Vec<Vec<String>> {
        grid(&[
            &["PANTAUAN PRODUKSI AFD SETRO", "", "", "", "", "", "", "", "", "", "", "", ""],
            &["", "", "", "", "", "Tanggal", "", "", "", "", "", "", ""],
            &["", "", "", "", "", "26", "", "", "", "27", "", "", ""],
            &[
                "No", "Tahun Tanam", "Mandor", "NIK", "Nama Penyadap", "", "", "", "", "", "", "",
                "",
            ],
            &[
                "", "", "", "", "", "Basah Latek", "Sheet", "Basah Lump", "Br.Cr", "Basah Latek",
                "Sheet", "Basah Lump", "Br.Cr",
            ],
            &[
                "1", "2009", "SUTRISNO", "3509010101800001", "AHMAD", "10", "20", "15", "5", "11",
                "21", "16", "6",
            ],
        ])
    }

    #[test]
    fn locates_labelled_layout() {
        let rows = sample();
        let layout = locate(&rows, 27).unwrap();
        assert_eq!(layout.date_rows, DateRows { label_row: Some(1), number_row: 2 });
        assert_eq!(layout.available_days, vec![26, 27]);
        assert_eq!(layout.first_day_column, 9);
        assert_eq!(layout.header_row, 3);
        assert_eq!(layout.data_start, 5);
        assert_eq!(
            layout.columns,
            ColumnMap {
                year_planted: Some(1),
                national_id: Some(3),
                supervisor: Some(2),
                tapper_name: Some(4),
            }
        );
    }

    #[test]
    fn first_column_starts_a_run_of_yield_columns() {
        let rows = sample();
        for day in [26, 27] {
            let layout = locate(&rows, day).unwrap();
            let first = layout.first_day_column;
            let labels: Vec<&str> = rows[4][first..first + YIELD_COLUMNS]
                .iter()
                .map(|s| s.as_str())
                .collect();
            assert_eq!(labels, ["Basah Latek", "Sheet", "Basah Lump", "Br.Cr"]);
        }
    }

    #[test]
    fn missing_day_lists_available_days() {
        let err = locate(&sample(), 3).unwrap_err();
        match err {
            SadapError::DayNotAvailable { day, available } => {
                assert_eq!(day, 3);
                assert_eq!(available, vec![26, 27]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_day() {
        assert!(matches!(locate(&sample(), 0), Err(SadapError::InvalidTargetDay(0))));
        assert!(matches!(locate(&sample(), 32), Err(SadapError::InvalidTargetDay(32))));
    }

    #[test]
    fn bare_number_row_fallback_uses_row_above_as_label() {
        let rows = grid(&[
            &["REKAP HARIAN"],
            &["", "", "1", "", "2", "", "3"],
            &["Thn Tanam", "NIK", "Nama", "", "", "", ""],
        ]);
        assert_eq!(date_rows_by_label(&rows), None);
        assert_eq!(
            date_rows_by_day_numbers(&rows),
            Some(DateRows { label_row: Some(0), number_row: 1 })
        );
        let layout = locate(&rows, 2).unwrap();
        assert_eq!(layout.first_day_column, 4);
        assert_eq!(layout.header_row, 2);
        assert_eq!(layout.columns.year_planted, Some(0));
        assert_eq!(layout.columns.national_id, Some(1));
        assert_eq!(layout.columns.tapper_name, Some(2));
    }

    #[test]
    fn no_date_row_is_structural_error() {
        let rows = grid(&[&["foo", "bar"], &["baz", "qux"]]);
        assert!(matches!(locate(&rows, 1), Err(SadapError::DateRowNotFound(_))));
    }

    #[test]
    fn label_on_last_row_has_no_number_row() {
        let rows = grid(&[&["x"], &["Tanggal"]]);
        assert!(matches!(locate(&rows, 1), Err(SadapError::DateNumberRowMissing)));
    }

    #[test]
    fn header_missing_is_structural_error() {
        let rows = grid(&[&["Tanggal", ""], &["1", "2"], &["a", "b"]]);
        assert!(matches!(locate(&rows, 1), Err(SadapError::IdentityHeaderNotFound)));
    }

    #[test]
    fn day_set_strategies() {
        let row: Vec<String> = ["Tgl", "01/09", "2", "02", "2025", "x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(days_by_leading_digits(&row), Some(vec![1, 2]));
        let loose: Vec<String> = ["007"].iter().map(|s| s.to_string()).collect();
        assert_eq!(days_by_whole_cell(&loose), Some(vec![7]));
        let none: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(days_by_leading_digits(&none), None);
    }

    #[test]
    fn day_column_prefers_leftmost_exact_prefix() {
        let row: Vec<String> = ["", "Tgl 1", "10", "1", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(day_column_by_prefix(&row, 1), Some(3));
        assert_eq!(day_column_by_substring(&row, 1), Some(1));
    }

    #[test]
    fn header_strategies_in_order() {
        let rows = grid(&[
            &["Tahun", "xx", "Tanam"],
            &["NIK", "Nama Mandor"],
            &["No", "Tahun Tanam"],
        ]);
        assert_eq!(header_by_year_planted(&rows), Some(2));
        assert_eq!(header_by_id_and_name(&rows), Some(1));
        assert_eq!(header_by_split_tokens(&rows), Some(0));
    }

    #[test]
    fn column_map_positional_fallbacks() {
        let header: Vec<String> = ["No", "Kebun", "Nama Mandor", "Penyadap"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let map = column_map(&header);
        assert_eq!(map.year_planted, Some(1));
        assert_eq!(map.national_id, None);
        assert_eq!(map.supervisor, Some(2));
        assert_eq!(map.tapper_name, Some(3));
    }

    #[test]
    fn sub_header_after_identity_header_moves_data_start() {
        let rows = grid(&[
            &["Tahun Tanam", "Mandor", "NIK", "Nama", "Tanggal"],
            &["", "", "", "", "5"],
            &["", "", "", "", "Basah Latek"],
            &["2010", "BUDI", "123456789", "SITI", "4"],
        ]);
        let layout = locate(&rows, 5).unwrap();
        assert_eq!(layout.header_row, 0);
        assert_eq!(layout.data_start, 3);
    }

    #[test]
    fn guesses_id_column_from_long_digit_cell() {
        let row: Vec<String> = ["1", "2009", "BUDI", "3509010101800001"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(guess_id_column(&row), Some(3));
    }
}
