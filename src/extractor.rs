use crate::locator::ColumnMap;
use crate::types::{ProductionRecord, ProductionType, Yields};
use crate::util::{clean_cell, parse_yield_cell};
use chrono::NaiveDate;

/// Everything a row needs besides its own cells.
#[derive(Debug, Clone)]
pub struct RowContext<'a> {
    pub columns: &'a ColumnMap,
    pub first_day_column: usize,
    pub date: NaiveDate,
    pub production_type: ProductionType,
    pub region: &'a str,
    pub batch_ref: &'a str,
}

fn cell_at(row: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| row.get(i))
        .map(|c| clean_cell(c))
        .unwrap_or_default()
}

/// Build one record from a data row. Bad numeric cells become zero; the
/// caller decides whether the result is worth keeping.
pub fn extract_record(row: &[String], ctx: &RowContext<'_>) -> ProductionRecord {
    let col = ctx.first_day_column;
    let yield_at = |offset: usize| {
        row.get(col + offset)
            .map(|c| parse_yield_cell(c))
            .unwrap_or(0.0)
    };
    let yields = Yields::new(yield_at(0), yield_at(1), yield_at(2), yield_at(3));

    ProductionRecord {
        date: ctx.date,
        production_type: ctx.production_type,
        supervisor: cell_at(row, ctx.columns.supervisor),
        national_id: cell_at(row, ctx.columns.national_id),
        tapper_name: cell_at(row, ctx.columns.tapper_name),
        year_planted: cell_at(row, ctx.columns.year_planted),
        total_production: yields.total_production(),
        yields,
        region: ctx.region.to_string(),
        batch_ref: ctx.batch_ref.to_string(),
        created_at: None,
        updated_at: None,
    }
}
