use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use tabled::Tabled;

/// Collection scheme a sheet (and every row in it) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductionType {
    #[default]
    Baku,
    BakuBorong,
    BorongMinggu,
    BorongInternal,
    BorongEksternal,
    TetesLanjut,
}

impl ProductionType {
    pub const ALL: [ProductionType; 6] = [
        ProductionType::Baku,
        ProductionType::BakuBorong,
        ProductionType::BorongMinggu,
        ProductionType::BorongInternal,
        ProductionType::BorongEksternal,
        ProductionType::TetesLanjut,
    ];

    pub fn code(self) -> &'static str {
        match self {
            ProductionType::Baku => "BAKU",
            ProductionType::BakuBorong => "BAKU_BORONG",
            ProductionType::BorongMinggu => "BORONG_MINGGU",
            ProductionType::BorongInternal => "BORONG_INTERNAL",
            ProductionType::BorongEksternal => "BORONG_EKSTERNAL",
            ProductionType::TetesLanjut => "TETES_LANJUT",
        }
    }

    /// Label as printed on the sheets, e.g. `PRODUKSI BAKU BORONG`.
    pub fn label(self) -> String {
        format!("PRODUKSI {}", self.code().replace('_', " "))
    }
}

impl fmt::Display for ProductionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ProductionType {
    type Err = String;

    /// Accepts the code (`BAKU_BORONG`), the spaced form (`baku borong`) or
    /// the sheet label (`PRODUKSI BAKU BORONG`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_uppercase().replace([' ', '-'], "_");
        let norm = norm.strip_prefix("PRODUKSI_").unwrap_or(&norm);
        ProductionType::ALL
            .into_iter()
            .find(|t| t.code() == norm)
            .ok_or_else(|| format!("unknown production type {:?}", s))
    }
}

/// The four quantities recorded per tapper per day.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Yields {
    pub latex: f64,
    pub sheet: f64,
    pub lump: f64,
    pub br_cr: f64,
}

impl Yields {
    pub fn new(latex: f64, sheet: f64, lump: f64, br_cr: f64) -> Self {
        Self { latex, sheet, lump, br_cr }
    }

    pub fn is_zero(&self) -> bool {
        self.latex == 0.0 && self.sheet == 0.0 && self.lump == 0.0 && self.br_cr == 0.0
    }

    pub fn total_production(&self) -> f64 {
        self.sheet + self.lump
    }

    pub fn dry_total(&self) -> f64 {
        self.sheet + self.br_cr
    }
}

impl Add for Yields {
    type Output = Yields;

    fn add(self, rhs: Yields) -> Yields {
        Yields {
            latex: self.latex + rhs.latex,
            sheet: self.sheet + rhs.sheet,
            lump: self.lump + rhs.lump,
            br_cr: self.br_cr + rhs.br_cr,
        }
    }
}

impl Sub for Yields {
    type Output = Yields;

    fn sub(self, rhs: Yields) -> Yields {
        Yields {
            latex: self.latex - rhs.latex,
            sheet: self.sheet - rhs.sheet,
            lump: self.lump - rhs.lump,
            br_cr: self.br_cr - rhs.br_cr,
        }
    }
}

impl std::iter::Sum for Yields {
    fn sum<I: Iterator<Item = Yields>>(iter: I) -> Yields {
        iter.fold(Yields::default(), |acc, y| acc + y)
    }
}

/// Natural dedup key of an ingested record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub date: NaiveDate,
    pub production_type: ProductionType,
    pub national_id: String,
    pub supervisor: String,
    pub year_planted: String,
}

/// One tapper's output on one day for one production type, as read from a sheet.
/// Sheet readings are reported as they are and never posted to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub date: NaiveDate,
    pub production_type: ProductionType,
    pub supervisor: String,
    pub national_id: String,
    pub tapper_name: String,
    pub year_planted: String,
    pub yields: Yields,
    pub total_production: f64,
    pub region: String,
    pub batch_ref: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl ProductionRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            date: self.date,
            production_type: self.production_type,
            national_id: self.national_id.clone(),
            supervisor: self.supervisor.clone(),
            year_planted: self.year_planted.clone(),
        }
    }

    pub fn has_identity(&self) -> bool {
        !self.year_planted.is_empty() && !self.national_id.is_empty()
    }
}

/// Block of the recap sheet a row belongs to. Rows under the closing
/// `REKAPITULASI` banner are the estate-wide totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecapSection {
    Production(ProductionType),
    Overall,
}

impl Default for RecapSection {
    fn default() -> Self {
        RecapSection::Production(ProductionType::Baku)
    }
}

impl fmt::Display for RecapSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecapSection::Production(t) => f.write_str(&t.label()),
            RecapSection::Overall => f.write_str("REKAPITULASI"),
        }
    }
}

/// One period's block of recap columns (today, or month to date).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RecapFigures {
    pub garden_latex: f64,
    pub factory_latex: f64,
    pub latex_pct: f64,
    pub garden_lump: f64,
    pub factory_lump: f64,
    pub lump_pct: f64,
    pub k3_sheet: f64,
    pub dry_sheet: f64,
    pub dry_br_cr: f64,
    pub dry_total: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecapKey {
    pub date: NaiveDate,
    pub section: RecapSection,
    pub national_id: String,
    pub supervisor: String,
    pub year_planted: String,
}

/// One supervisor's line on the daily recap sheet, figures copied as printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecapRecord {
    pub date: NaiveDate,
    pub section: RecapSection,
    pub year_planted: String,
    pub national_id: String,
    pub supervisor: String,
    pub workdays_today: u32,
    pub workdays_to_date: u32,
    pub today: RecapFigures,
    pub to_date: RecapFigures,
    pub per_tapper_today: f64,
    pub per_tapper_to_date: f64,
    /// Today's dry sheet plus today's factory lump.
    pub total_production: f64,
    pub region: String,
    pub batch_ref: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl RecapRecord {
    pub fn key(&self) -> RecapKey {
        RecapKey {
            date: self.date,
            section: self.section,
            national_id: self.national_id.clone(),
            supervisor: self.supervisor.clone(),
            year_planted: self.year_planted.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supervisor {
    pub id: u64,
    pub name: String,
    pub national_id: String,
    pub region: String,
    pub year_planted: u32,
    pub production_type: ProductionType,
}

/// A manually entered tapper yield, owned by the CRUD collaborator. The
/// ledger's factory totals move only on events over these entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapperEntry {
    pub id: u64,
    pub supervisor_id: u64,
    pub tapper_id: u64,
    pub date: NaiveDate,
    pub production_type: ProductionType,
    pub year_planted: u32,
    pub yields: Yields,
}

impl TapperEntry {
    pub fn aggregate_key(&self) -> AggregateKey {
        AggregateKey {
            date: self.date,
            supervisor_id: self.supervisor_id,
            production_type: self.production_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub date: NaiveDate,
    pub supervisor_id: u64,
    pub production_type: ProductionType,
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.date, self.supervisor_id, self.production_type)
    }
}

/// Daily detail row for one (date, supervisor, production type).
///
/// Factory totals move with record events; garden totals are only written by
/// recalculation. Everything below the totals is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAggregate {
    pub key: AggregateKey,
    pub supervisor: String,
    pub region: String,
    pub year_planted: u32,

    pub factory_latex: f64,
    pub garden_latex: f64,
    pub latex_discrepancy: f64,
    pub latex_discrepancy_pct: f64,

    pub sheet_total: f64,
    pub k3_sheet: f64,

    pub factory_lump: f64,
    pub garden_lump: f64,
    pub lump_discrepancy: f64,
    pub lump_discrepancy_pct: f64,

    pub br_cr_total: f64,
    pub k3_br_cr: f64,

    pub version: u64,
}

impl LedgerAggregate {
    pub fn empty(key: AggregateKey, supervisor: &Supervisor) -> Self {
        Self {
            key,
            supervisor: supervisor.name.clone(),
            region: supervisor.region.clone(),
            year_planted: supervisor.year_planted,
            factory_latex: 0.0,
            garden_latex: 0.0,
            latex_discrepancy: 0.0,
            latex_discrepancy_pct: 0.0,
            sheet_total: 0.0,
            k3_sheet: 0.0,
            factory_lump: 0.0,
            garden_lump: 0.0,
            lump_discrepancy: 0.0,
            lump_discrepancy_pct: 0.0,
            br_cr_total: 0.0,
            k3_br_cr: 0.0,
            version: 0,
        }
    }

    /// Running totals as a `Yields` value (latex and lump are the factory side).
    pub fn factory_yields(&self) -> Yields {
        Yields::new(self.factory_latex, self.sheet_total, self.factory_lump, self.br_cr_total)
    }

    /// Add a signed delta to the running totals, clamping each at zero.
    pub fn apply_delta(&mut self, delta: Yields) {
        self.factory_latex = (self.factory_latex + delta.latex).max(0.0);
        self.sheet_total = (self.sheet_total + delta.sheet).max(0.0);
        self.factory_lump = (self.factory_lump + delta.lump).max(0.0);
        self.br_cr_total = (self.br_cr_total + delta.br_cr).max(0.0);
    }

    pub fn recompute_derived(&mut self) {
        self.latex_discrepancy = self.factory_latex - self.garden_latex;
        self.latex_discrepancy_pct = percent_of(self.latex_discrepancy, self.garden_latex);
        self.lump_discrepancy = self.factory_lump - self.garden_lump;
        self.lump_discrepancy_pct = percent_of(self.lump_discrepancy, self.garden_lump);
        self.k3_sheet = percent_of(self.sheet_total, self.factory_latex);
        self.k3_br_cr = percent_of(self.br_cr_total, self.factory_lump);
    }

    pub fn dry_total(&self) -> f64 {
        self.sheet_total + self.br_cr_total
    }
}

/// `part / whole * 100`, or 0 when `whole` is not positive.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Deserialize)]
pub struct SupervisorRow {
    #[serde(rename = "id")]
    pub id: Option<String>,
    #[serde(rename = "name")]
    pub name: Option<String>,
    #[serde(rename = "national_id")]
    pub national_id: Option<String>,
    #[serde(rename = "region")]
    pub region: Option<String>,
    #[serde(rename = "year_planted")]
    pub year_planted: Option<String>,
    #[serde(rename = "production_type")]
    pub production_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EntryRow {
    #[serde(rename = "event")]
    pub event: Option<String>,
    #[serde(rename = "id")]
    pub id: Option<String>,
    #[serde(rename = "supervisor_id")]
    pub supervisor_id: Option<String>,
    #[serde(rename = "tapper_id")]
    pub tapper_id: Option<String>,
    #[serde(rename = "date")]
    pub date: Option<String>,
    #[serde(rename = "production_type")]
    pub production_type: Option<String>,
    #[serde(rename = "year_planted")]
    pub year_planted: Option<String>,
    #[serde(rename = "latex")]
    pub latex: Option<String>,
    #[serde(rename = "sheet")]
    pub sheet: Option<String>,
    #[serde(rename = "lump")]
    pub lump: Option<String>,
    #[serde(rename = "br_cr")]
    pub br_cr: Option<String>,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct DailyLedgerRow {
    #[serde(rename = "Date")]
    #[tabled(rename = "Date")]
    pub date: String,
    #[serde(rename = "Supervisor")]
    #[tabled(rename = "Supervisor")]
    pub supervisor: String,
    #[serde(rename = "Type")]
    #[tabled(rename = "Type")]
    pub production_type: String,
    #[serde(rename = "FactoryLatex")]
    #[tabled(rename = "FactoryLatex")]
    pub factory_latex: String,
    #[serde(rename = "GardenLatex")]
    #[tabled(rename = "GardenLatex")]
    pub garden_latex: String,
    #[serde(rename = "LatexDiff")]
    #[tabled(rename = "LatexDiff")]
    pub latex_discrepancy: String,
    #[serde(rename = "LatexDiffPct")]
    #[tabled(rename = "LatexDiffPct")]
    pub latex_discrepancy_pct: String,
    #[serde(rename = "Sheet")]
    #[tabled(rename = "Sheet")]
    pub sheet_total: String,
    #[serde(rename = "K3Sheet")]
    #[tabled(rename = "K3Sheet")]
    pub k3_sheet: String,
    #[serde(rename = "FactoryLump")]
    #[tabled(rename = "FactoryLump")]
    pub factory_lump: String,
    #[serde(rename = "GardenLump")]
    #[tabled(rename = "GardenLump")]
    pub garden_lump: String,
    #[serde(rename = "LumpDiff")]
    #[tabled(rename = "LumpDiff")]
    pub lump_discrepancy: String,
    #[serde(rename = "LumpDiffPct")]
    #[tabled(rename = "LumpDiffPct")]
    pub lump_discrepancy_pct: String,
    #[serde(rename = "BrCr")]
    #[tabled(rename = "BrCr")]
    pub br_cr_total: String,
    #[serde(rename = "K3BrCr")]
    #[tabled(rename = "K3BrCr")]
    pub k3_br_cr: String,
    #[serde(rename = "DryTotal")]
    #[tabled(rename = "DryTotal")]
    pub dry_total: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RollupRow {
    #[serde(rename = "Supervisor")]
    #[tabled(rename = "Supervisor")]
    pub supervisor: String,
    #[serde(rename = "YearPlanted")]
    #[tabled(rename = "YearPlanted")]
    pub year_planted: u32,
    #[serde(rename = "Type")]
    #[tabled(rename = "Type")]
    pub production_type: String,
    #[serde(rename = "Days")]
    #[tabled(rename = "Days")]
    pub days: usize,
    #[serde(rename = "FactoryLatex")]
    #[tabled(rename = "FactoryLatex")]
    pub factory_latex: String,
    #[serde(rename = "GardenLatex")]
    #[tabled(rename = "GardenLatex")]
    pub garden_latex: String,
    #[serde(rename = "LatexDiffPct")]
    #[tabled(rename = "LatexDiffPct")]
    pub latex_discrepancy_pct: String,
    #[serde(rename = "FactoryLump")]
    #[tabled(rename = "FactoryLump")]
    pub factory_lump: String,
    #[serde(rename = "GardenLump")]
    #[tabled(rename = "GardenLump")]
    pub garden_lump: String,
    #[serde(rename = "LumpDiffPct")]
    #[tabled(rename = "LumpDiffPct")]
    pub lump_discrepancy_pct: String,
    #[serde(rename = "K3Sheet")]
    #[tabled(rename = "K3Sheet")]
    pub k3_sheet: String,
    #[serde(rename = "K3BrCr")]
    #[tabled(rename = "K3BrCr")]
    pub k3_br_cr: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct SupervisorSummaryRow {
    #[serde(rename = "Supervisor")]
    #[tabled(rename = "Supervisor")]
    pub supervisor: String,
    #[serde(rename = "Type")]
    #[tabled(rename = "Type")]
    pub production_type: String,
    #[serde(rename = "Tappers")]
    #[tabled(rename = "Tappers")]
    pub tappers: usize,
    #[serde(rename = "Latex")]
    #[tabled(rename = "Latex")]
    pub latex: String,
    #[serde(rename = "Sheet")]
    #[tabled(rename = "Sheet")]
    pub sheet: String,
    #[serde(rename = "Lump")]
    #[tabled(rename = "Lump")]
    pub lump: String,
    #[serde(rename = "BrCr")]
    #[tabled(rename = "BrCr")]
    pub br_cr: String,
    #[serde(rename = "TotalProduction")]
    #[tabled(rename = "TotalProduction")]
    pub total_production: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct RecapRow {
    #[serde(rename = "Section")]
    #[tabled(rename = "Section")]
    pub section: String,
    #[serde(rename = "Supervisor")]
    #[tabled(rename = "Supervisor")]
    pub supervisor: String,
    #[serde(rename = "YearPlanted")]
    #[tabled(rename = "YearPlanted")]
    pub year_planted: String,
    #[serde(rename = "Workdays")]
    #[tabled(rename = "Workdays")]
    pub workdays_today: u32,
    #[serde(rename = "GardenLatex")]
    #[tabled(rename = "GardenLatex")]
    pub garden_latex: String,
    #[serde(rename = "FactoryLatex")]
    #[tabled(rename = "FactoryLatex")]
    pub factory_latex: String,
    #[serde(rename = "LatexPct")]
    #[tabled(rename = "LatexPct")]
    pub latex_pct: String,
    #[serde(rename = "FactoryLump")]
    #[tabled(rename = "FactoryLump")]
    pub factory_lump: String,
    #[serde(rename = "DryTotal")]
    #[tabled(rename = "DryTotal")]
    pub dry_total: String,
    #[serde(rename = "DryTotalToDate")]
    #[tabled(rename = "DryTotalToDate")]
    pub dry_total_to_date: String,
    #[serde(rename = "TotalProduction")]
    #[tabled(rename = "TotalProduction")]
    pub total_production: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub date: NaiveDate,
    pub total_records: usize,
    pub total_supervisors: usize,
    pub total_tappers: usize,
    pub total_latex: f64,
    pub total_sheet: f64,
    pub total_lump: f64,
    pub total_br_cr: f64,
    pub total_aggregates: usize,
    pub total_latex_discrepancy: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AggregateKey {
        AggregateKey {
            date: NaiveDate::from_ymd_opt(2025, 10, 27).unwrap(),
            supervisor_id: 7,
            production_type: ProductionType::Baku,
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor {
            id: 7,
            name: "SUTRISNO".to_string(),
            national_id: "3509010101800001".to_string(),
            region: "Setro".to_string(),
            year_planted: 2009,
            production_type: ProductionType::Baku,
        }
    }

    #[test]
    fn production_type_parses_codes_and_labels() {
        assert_eq!("BAKU_BORONG".parse::<ProductionType>(), Ok(ProductionType::BakuBorong));
        assert_eq!(
            "produksi borong minggu".parse::<ProductionType>(),
            Ok(ProductionType::BorongMinggu)
        );
        assert_eq!("Tetes Lanjut".parse::<ProductionType>(), Ok(ProductionType::TetesLanjut));
        assert!("karet".parse::<ProductionType>().is_err());
        assert_eq!(ProductionType::BakuBorong.label(), "PRODUKSI BAKU BORONG");
    }

    #[test]
    fn delta_clamps_each_total_at_zero() {
        let mut agg = LedgerAggregate::empty(key(), &supervisor());
        agg.apply_delta(Yields::new(5.0, 3.0, 2.0, 1.0));
        agg.apply_delta(Yields::new(-8.0, -1.0, -2.0, -4.0));
        assert_eq!(agg.factory_yields(), Yields::new(0.0, 2.0, 0.0, 0.0));
    }

    #[test]
    fn derived_fields_follow_totals() {
        let mut agg = LedgerAggregate::empty(key(), &supervisor());
        agg.apply_delta(Yields::new(110.0, 33.0, 40.0, 4.0));
        agg.garden_latex = 100.0;
        agg.recompute_derived();
        assert!((agg.latex_discrepancy - 10.0).abs() < 1e-9);
        assert!((agg.latex_discrepancy_pct - 10.0).abs() < 1e-9);
        assert_eq!(agg.lump_discrepancy, 40.0);
        assert_eq!(agg.lump_discrepancy_pct, 0.0);
        assert!((agg.k3_sheet - 30.0).abs() < 1e-9);
        assert!((agg.k3_br_cr - 10.0).abs() < 1e-9);
    }
}
