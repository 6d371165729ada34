// Utility helpers for parsing sheet cells and formatting numbers.
//
// This module centralizes all the "dirty" cell/number/date handling so the
// rest of the code can assume clean, typed values.
use crate::error::{Result, SadapError};
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};

/// Parse one numeric token written by a human in either Indonesian
/// (`1.234,56`) or plain (`1234.56`) notation.
///
/// - Strips quotes and non-breaking spaces.
/// - `(123,45)` means a negative value.
/// - Em/en dashes count as a minus sign.
/// - Trailing noise such as `%` or a unit is dropped.
/// - With both `.` and `,` present, `.` groups thousands and `,` is the
///   decimal point. A lone `,` is always read as the decimal point.
///
/// Empty or non-numeric input is an error, never zero. Blank/dash cells are
/// the caller's business (see [`parse_yield_cell`]).
pub fn parse_number(s: &str) -> Result<f64> {
    let orig = s.trim();
    if orig.is_empty() {
        return Err(SadapError::Unparseable(s.to_string()));
    }

    let mut text: String = orig.chars().filter(|c| *c != '"' && *c != '\u{00A0}').collect();
    text = text.trim().to_string();

    let mut negative = false;
    if text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }

    text = text.replace(['\u{2014}', '\u{2013}'], "-");

    let keep = |c: char| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+');
    text = text.trim_end_matches(|c: char| !keep(c)).to_string();

    if text.contains('.') && text.contains(',') {
        text = text.replace('.', "").replace(',', ".");
    } else if text.contains(',') {
        // Ambiguous: "1,234" could be US thousands. Sheets are Indonesian, so
        // a lone comma is taken as the decimal point.
        text = text.replace(',', ".");
    }

    text.retain(|c| !c.is_whitespace());

    let value: f64 = text
        .parse()
        .map_err(|_| SadapError::Unparseable(s.to_string()))?;
    if !value.is_finite() {
        return Err(SadapError::Unparseable(s.to_string()));
    }
    Ok(if negative { -value } else { value })
}

/// Yield cell rule: blank and dash placeholders are zero, and so is anything
/// the number parser rejects.
pub fn parse_yield_cell(cell: &str) -> f64 {
    let v = clean_cell(cell);
    if v.is_empty() || v == "-" || v == "\u{2014}" || v == "\u{2013}" {
        return 0.0;
    }
    parse_number(&v).unwrap_or(0.0)
}

/// Trim whitespace and drop stray quotes from a cell.
pub fn clean_cell(cell: &str) -> String {
    cell.replace('"', "").trim().to_string()
}

/// Leading run of ASCII digits of a trimmed cell, e.g. `"01/09"` -> 1.
pub fn leading_number(cell: &str) -> Option<u32> {
    let digits: String = cell.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// A cell holding nothing but a 1–2 digit number.
pub fn is_bare_day_number(cell: &str) -> bool {
    let t = cell.trim();
    !t.is_empty() && t.len() <= 2 && t.chars().all(|c| c.is_ascii_digit())
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

pub fn parse_u64_safe(s: Option<&str>) -> Option<u64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<u64>().ok()
}

pub fn parse_u32_safe(s: Option<&str>) -> Option<u32> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<u32>().ok()
}

pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    // Journals use `YYYY-MM-DD`; hand-typed files sometimes use `DD-MM-YYYY`.
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d-%m-%Y"))
        .ok()
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimals plus thousands separators (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    } else if decimals > 0 {
        res.push('.');
        res.push_str(&"0".repeat(decimals));
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages (e.g., `9,855 rows saved`).
    n.to_formatted_string(&Locale::en)
}
