use chrono::NaiveDate;
use thiserror::Error;

use crate::types::AggregateKey;

#[derive(Error, Debug)]
pub enum SadapError {
    #[error("unparseable number: {0:?}")]
    Unparseable(String),

    #[error("target day {0} is outside 1..=31")]
    InvalidTargetDay(u32),

    #[error("file is empty: {0}")]
    EmptyFile(String),

    #[error("no 'Tanggal' row found in the first {0} rows")]
    DateRowNotFound(usize),

    #[error("no date-number row below the 'Tanggal' row")]
    DateNumberRowMissing,

    #[error("no valid day numbers in the date-number row")]
    NoAvailableDates,

    #[error("day {day} not found (available: {available:?})")]
    DayNotAvailable { day: u32, available: Vec<u32> },

    #[error("no column found for day {0}")]
    DayColumnNotFound(u32),

    #[error("no 'Tahun Tanam' identity header found")]
    IdentityHeaderNotFound,

    #[error("no 'Tahun Tanam' or 'NIK' header in the first {0} rows of the recap sheet")]
    RecapHeaderNotFound(usize),

    #[error("recap sheet not found: {0}")]
    RecapNotFound(String),

    #[error("invalid calendar date in file name {0}")]
    InvalidFileDate(String),

    #[error("no rows were processed in {dir} ({} file errors)", errors.len())]
    NothingProcessed { dir: String, errors: Vec<String> },

    #[error("supervisor {0} not found")]
    SupervisorNotFound(u64),

    #[error("aggregate {key} changed concurrently (expected version {expected}, found {found})")]
    StaleAggregate {
        key: AggregateKey,
        expected: u64,
        found: u64,
    },

    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid journal row {line}: {details}")]
    InvalidJournalRow { line: usize, details: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SadapError>;
