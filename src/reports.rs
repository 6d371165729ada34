use crate::types::{
    percent_of, DailyLedgerRow, LedgerAggregate, ProductionRecord, ProductionType, RecapRecord,
    RecapRow, RollupRow, SummaryStats, SupervisorSummaryRow, Yields,
};
use crate::util::format_number;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// One row per aggregate, ordered by date, supervisor and type.
pub fn daily_ledger_report(aggregates: &[LedgerAggregate]) -> Vec<DailyLedgerRow> {
    let mut sorted: Vec<&LedgerAggregate> = aggregates.iter().collect();
    sorted.sort_by(|a, b| {
        a.key
            .date
            .cmp(&b.key.date)
            .then_with(|| a.supervisor.cmp(&b.supervisor))
            .then_with(|| a.key.production_type.cmp(&b.key.production_type))
    });
    sorted
        .into_iter()
        .map(|a| DailyLedgerRow {
            date: a.key.date.to_string(),
            supervisor: a.supervisor.clone(),
            production_type: a.key.production_type.label(),
            factory_latex: format_number(a.factory_latex, 2),
            garden_latex: format_number(a.garden_latex, 2),
            latex_discrepancy: format_number(a.latex_discrepancy, 2),
            latex_discrepancy_pct: format_number(a.latex_discrepancy_pct, 2),
            sheet_total: format_number(a.sheet_total, 2),
            k3_sheet: format_number(a.k3_sheet, 2),
            factory_lump: format_number(a.factory_lump, 2),
            garden_lump: format_number(a.garden_lump, 2),
            lump_discrepancy: format_number(a.lump_discrepancy, 2),
            lump_discrepancy_pct: format_number(a.lump_discrepancy_pct, 2),
            br_cr_total: format_number(a.br_cr_total, 2),
            k3_br_cr: format_number(a.k3_br_cr, 2),
            dry_total: format_number(a.dry_total(), 2),
        })
        .collect()
}

/// Month-to-date view: totals summed per (supervisor, year planted, type),
/// percentages recomputed from the sums rather than added up.
pub fn month_to_date_rollup(aggregates: &[LedgerAggregate]) -> Vec<RollupRow> {
    #[derive(Default)]
    struct Acc {
        dates: BTreeSet<NaiveDate>,
        factory_latex: f64,
        garden_latex: f64,
        sheet: f64,
        factory_lump: f64,
        garden_lump: f64,
        br_cr: f64,
    }

    let mut map: HashMap<(String, u32, ProductionType), Acc> = HashMap::new();
    for a in aggregates {
        let e = map
            .entry((a.supervisor.clone(), a.year_planted, a.key.production_type))
            .or_default();
        e.dates.insert(a.key.date);
        e.factory_latex += a.factory_latex;
        e.garden_latex += a.garden_latex;
        e.sheet += a.sheet_total;
        e.factory_lump += a.factory_lump;
        e.garden_lump += a.garden_lump;
        e.br_cr += a.br_cr_total;
    }

    let mut keyed: Vec<_> = map.into_iter().collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed
        .into_iter()
        .map(|((supervisor, year_planted, production_type), acc)| RollupRow {
            supervisor,
            year_planted,
            production_type: production_type.label(),
            days: acc.dates.len(),
            factory_latex: format_number(acc.factory_latex, 2),
            garden_latex: format_number(acc.garden_latex, 2),
            latex_discrepancy_pct: format_number(
                percent_of(acc.factory_latex - acc.garden_latex, acc.garden_latex),
                2,
            ),
            factory_lump: format_number(acc.factory_lump, 2),
            garden_lump: format_number(acc.garden_lump, 2),
            lump_discrepancy_pct: format_number(
                percent_of(acc.factory_lump - acc.garden_lump, acc.garden_lump),
                2,
            ),
            k3_sheet: format_number(percent_of(acc.sheet, acc.factory_latex), 2),
            k3_br_cr: format_number(percent_of(acc.br_cr, acc.factory_lump), 2),
        })
        .collect()
}

/// Ingested sheet records summed per (supervisor, type), largest producer
/// first.
pub fn supervisor_summary(records: &[ProductionRecord]) -> Vec<SupervisorSummaryRow> {
    #[derive(Default)]
    struct Acc {
        tappers: HashSet<String>,
        yields: Yields,
    }

    let mut map: HashMap<(String, ProductionType), Acc> = HashMap::new();
    for r in records {
        let e = map
            .entry((r.supervisor.clone(), r.production_type))
            .or_default();
        e.tappers.insert(r.national_id.clone());
        e.yields = e.yields + r.yields;
    }

    let mut rows: Vec<(f64, SupervisorSummaryRow)> = map
        .into_iter()
        .map(|((supervisor, production_type), acc)| {
            let total = acc.yields.total_production();
            (
                total,
                SupervisorSummaryRow {
                    supervisor,
                    production_type: production_type.label(),
                    tappers: acc.tappers.len(),
                    latex: format_number(acc.yields.latex, 2),
                    sheet: format_number(acc.yields.sheet, 2),
                    lump: format_number(acc.yields.lump, 2),
                    br_cr: format_number(acc.yields.br_cr, 2),
                    total_production: format_number(total, 2),
                },
            )
        })
        .collect();
    rows.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.supervisor.cmp(&b.1.supervisor))
            .then_with(|| a.1.production_type.cmp(&b.1.production_type))
    });
    rows.into_iter().map(|(_, row)| row).collect()
}

/// Recap lines in sheet order: sections as they appear, then supervisor.
pub fn recap_report(recaps: &[RecapRecord]) -> Vec<RecapRow> {
    let mut sorted: Vec<&RecapRecord> = recaps.iter().collect();
    sorted.sort_by(|a, b| {
        a.section
            .cmp(&b.section)
            .then_with(|| a.supervisor.cmp(&b.supervisor))
            .then_with(|| a.year_planted.cmp(&b.year_planted))
    });
    sorted
        .into_iter()
        .map(|r| RecapRow {
            section: r.section.to_string(),
            supervisor: r.supervisor.clone(),
            year_planted: r.year_planted.clone(),
            workdays_today: r.workdays_today,
            garden_latex: format_number(r.today.garden_latex, 2),
            factory_latex: format_number(r.today.factory_latex, 2),
            latex_pct: format_number(r.today.latex_pct, 2),
            factory_lump: format_number(r.today.factory_lump, 2),
            dry_total: format_number(r.today.dry_total, 2),
            dry_total_to_date: format_number(r.to_date.dry_total, 2),
            total_production: format_number(r.total_production, 2),
        })
        .collect()
}

pub fn generate_summary(
    date: NaiveDate,
    records: &[ProductionRecord],
    aggregates: &[LedgerAggregate],
) -> SummaryStats {
    let supervisors: HashSet<&str> = records.iter().map(|r| r.supervisor.as_str()).collect();
    let tappers: HashSet<&str> = records.iter().map(|r| r.national_id.as_str()).collect();
    let totals: Yields = records.iter().map(|r| r.yields).sum();
    SummaryStats {
        date,
        total_records: records.len(),
        total_supervisors: supervisors.len(),
        total_tappers: tappers.len(),
        total_latex: totals.latex,
        total_sheet: totals.sheet,
        total_lump: totals.lump,
        total_br_cr: totals.br_cr,
        total_aggregates: aggregates.len(),
        total_latex_discrepancy: aggregates.iter().map(|a| a.latex_discrepancy).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregateKey, RecapFigures, RecapSection, Supervisor};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn aggregate(d: u32, name: &str, factory: f64, garden: f64, sheet: f64) -> LedgerAggregate {
        let supervisor = Supervisor {
            id: 1,
            name: name.to_string(),
            national_id: String::new(),
            region: "Setro".to_string(),
            year_planted: 2009,
            production_type: ProductionType::Baku,
        };
        let key = AggregateKey {
            date: day(d),
            supervisor_id: 1,
            production_type: ProductionType::Baku,
        };
        let mut agg = LedgerAggregate::empty(key, &supervisor);
        agg.apply_delta(Yields::new(factory, sheet, 10.0, 2.0));
        agg.garden_latex = garden;
        agg.garden_lump = 10.0;
        agg.recompute_derived();
        agg
    }

    fn record(supervisor: &str, nik: &str, latex: f64) -> ProductionRecord {
        let yields = Yields::new(latex, 2.0, 3.0, 1.0);
        ProductionRecord {
            date: day(27),
            production_type: ProductionType::Baku,
            supervisor: supervisor.to_string(),
            national_id: nik.to_string(),
            tapper_name: String::new(),
            year_planted: "2009".to_string(),
            total_production: yields.total_production(),
            yields,
            region: "Setro".to_string(),
            batch_ref: "b1".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn daily_rows_sorted_and_formatted() {
        let rows = daily_ledger_report(&[
            aggregate(27, "WAHYU", 1000.0, 900.0, 300.0),
            aggregate(27, "ANTON", 110.0, 100.0, 33.0),
        ]);
        assert_eq!(rows[0].supervisor, "ANTON");
        assert_eq!(rows[0].latex_discrepancy_pct, "10.00");
        assert_eq!(rows[0].k3_sheet, "30.00");
        assert_eq!(rows[1].factory_latex, "1,000.00");
        assert_eq!(rows[1].dry_total, "302.00");
        assert_eq!(rows[1].production_type, "PRODUKSI BAKU");
    }

    #[test]
    fn rollup_recomputes_percentages_from_sums() {
        let rows = month_to_date_rollup(&[
            aggregate(1, "ANTON", 110.0, 100.0, 11.0),
            aggregate(2, "ANTON", 300.0, 300.0, 30.0),
        ]);
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.days, 2);
        assert_eq!(r.factory_latex, "410.00");
        // (410 - 400) / 400, not 10% + 0%.
        assert_eq!(r.latex_discrepancy_pct, "2.50");
        assert_eq!(r.k3_sheet, "10.00");
    }

    #[test]
    fn supervisor_summary_counts_distinct_tappers() {
        let rows = supervisor_summary(&[
            record("ANTON", "1", 5.0),
            record("ANTON", "2", 5.0),
            record("WAHYU", "3", 50.0),
        ]);
        // Ordered by sheet + lump, not latex.
        assert_eq!(rows[0].supervisor, "ANTON");
        assert_eq!(rows[0].tappers, 2);
        assert_eq!(rows[0].latex, "10.00");
        assert_eq!(rows[0].total_production, "10.00");
        assert_eq!(rows[1].supervisor, "WAHYU");
        assert_eq!(rows[1].tappers, 1);
    }

    #[test]
    fn summary_totals() {
        let records = [record("ANTON", "1", 5.0), record("ANTON", "2", 7.5)];
        let aggs = [aggregate(27, "ANTON", 110.0, 100.0, 33.0)];
        let s = generate_summary(day(27), &records, &aggs);
        assert_eq!(s.total_records, 2);
        assert_eq!(s.total_supervisors, 1);
        assert_eq!(s.total_tappers, 2);
        assert_eq!(s.total_latex, 12.5);
        assert_eq!(s.total_aggregates, 1);
        assert_eq!(s.total_latex_discrepancy, 10.0);
    }

    fn recap(section: RecapSection, supervisor: &str, dry_total: f64) -> RecapRecord {
        let today = RecapFigures {
            factory_latex: 1200.0,
            dry_total,
            ..RecapFigures::default()
        };
        RecapRecord {
            date: day(27),
            section,
            year_planted: "2009".to_string(),
            national_id: "3509010100001".to_string(),
            supervisor: supervisor.to_string(),
            workdays_today: 12,
            workdays_to_date: 250,
            today,
            to_date: RecapFigures::default(),
            per_tapper_today: 0.0,
            per_tapper_to_date: 0.0,
            total_production: dry_total,
            region: "Setro".to_string(),
            batch_ref: "r1".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn recap_rows_follow_section_order() {
        let rows = recap_report(&[
            recap(RecapSection::Overall, "ANTON", 9.0),
            recap(RecapSection::Production(ProductionType::TetesLanjut), "WAHYU", 3.0),
            recap(RecapSection::Production(ProductionType::Baku), "WAHYU", 5.0),
            recap(RecapSection::Production(ProductionType::Baku), "ANTON", 4.0),
        ]);
        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.section.as_str(), r.supervisor.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("PRODUKSI BAKU", "ANTON"),
                ("PRODUKSI BAKU", "WAHYU"),
                ("PRODUKSI TETES LANJUT", "WAHYU"),
                ("REKAPITULASI", "ANTON"),
            ]
        );
        assert_eq!(rows[0].factory_latex, "1,200.00");
        assert_eq!(rows[0].dry_total, "4.00");
    }
}
