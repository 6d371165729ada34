// Entry point and interactive CLI flow.
//
// - Option [1] imports every daily sheet in the CSV directory for one day.
// - Option [2] loads supervisors, replays the tapper entry journal through the
//   ledger and recalculates the garden-side totals of every touched day.
// - Option [3] writes the ledger reports and a JSON summary, then offers to
//   go back to the menu or exit.
// - Option [4] imports the recap sheet (REKAP.csv) for one day.
use chrono::{Datelike, Local, NaiveDate};
use log::error;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sadap_ledger::config::Settings;
use sadap_ledger::journal;
use sadap_ledger::loader::{import_batch, ImportRequest};
use sadap_ledger::recap::import_recap;
use sadap_ledger::util::{format_int, format_number, parse_date_safe, parse_u32_safe};
use sadap_ledger::{
    output, reports, KeyLocks, LedgerReconciler, MemoryStore, RecalculationService, Store,
};
use std::io::{self, Write};
use std::sync::Arc;

// One store for the whole session so imports, journal replays and reports
// all see the same data.
static APP_STATE: Lazy<Mutex<AppState>> = Lazy::new(|| {
    Mutex::new(AppState {
        settings: Settings::from_env(),
        store: Arc::new(MemoryStore::new()),
        locks: Arc::new(KeyLocks::new()),
        report_date: None,
    })
});

struct AppState {
    settings: Settings,
    store: Arc<MemoryStore>,
    locks: Arc<KeyLocks>,
    /// Most recent day touched by an import or replay.
    report_date: Option<NaiveDate>,
}

fn prompt(label: &str) -> String {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

fn read_choice() -> String {
    prompt("Enter choice: ")
}

/// Returns `true` if the user chose `Y`, `false` if they chose `N`.
fn prompt_back_to_menu() -> bool {
    loop {
        match prompt("Back to Main Menu (Y/N): ").to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Ask for the target day and region of an import run.
fn read_import_request(settings: &Settings, prefix: &str) -> Option<ImportRequest> {
    let Some(day) = parse_u32_safe(Some(prompt("Target day (1-31): ").as_str())) else {
        println!("Invalid day.\n");
        return None;
    };
    let region = match prompt(&format!("Region [{}]: ", settings.region)) {
        r if r.is_empty() => settings.region.clone(),
        r => r,
    };
    let batch_ref = format!("{}-{}", prefix, Local::now().format("%Y%m%d%H%M%S"));
    Some(ImportRequest::new(day, region, batch_ref))
}

fn handle_import() {
    let (settings, store) = {
        let state = APP_STATE.lock();
        (state.settings.clone(), Arc::clone(&state.store))
    };
    let Some(req) = read_import_request(&settings, "import") else {
        return;
    };

    println!("Importing sheets from {} ...", settings.csv_dir.display());
    match import_batch(store.as_ref(), &settings.csv_dir, &req) {
        Ok(batch) => {
            println!(
                "{} rows saved, {} rows failed across {} files.",
                format_int(batch.saved),
                format_int(batch.failed),
                format_int(batch.files.len())
            );
            for e in &batch.errors {
                println!("  skipped {}", e);
            }
            println!();
            if let Some(date) = batch.files.iter().filter_map(|f| f.date).max() {
                APP_STATE.lock().report_date = Some(date);
            }
        }
        Err(e) => {
            eprintln!("Import failed: {}\n", e);
        }
    }
}

fn handle_import_recap() {
    let (settings, store) = {
        let state = APP_STATE.lock();
        (state.settings.clone(), Arc::clone(&state.store))
    };
    let Some(req) = read_import_request(&settings, "recap") else {
        return;
    };

    match import_recap(store.as_ref(), &settings.csv_dir, &req) {
        Ok(report) => {
            println!(
                "{} recap lines saved, {} failed ({} summary, {} invalid, {} idle skipped).\n",
                format_int(report.saved),
                format_int(report.failed),
                format_int(report.skipped_summary),
                format_int(report.skipped_invalid),
                format_int(report.skipped_idle)
            );
            if let Some(date) = report.date {
                APP_STATE.lock().report_date = Some(date);
            }
        }
        Err(e) => {
            eprintln!("Recap import failed: {}\n", e);
        }
    }
}

fn handle_replay() {
    let (settings, store, locks) = {
        let state = APP_STATE.lock();
        (state.settings.clone(), Arc::clone(&state.store), Arc::clone(&state.locks))
    };

    match journal::load_supervisors(&settings.supervisors_file, store.as_ref()) {
        Ok(report) => println!(
            "Supervisors: {} loaded, {} rejected.",
            format_int(report.loaded),
            format_int(report.rejected.len())
        ),
        Err(e) => {
            eprintln!("Failed to load {}: {}\n", settings.supervisors_file.display(), e);
            return;
        }
    }

    let ledger = LedgerReconciler::with_locks(Arc::clone(&store), Arc::clone(&locks));
    let report = match journal::replay_entries(&settings.journal_file, store.as_ref(), &ledger) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to replay {}: {}\n", settings.journal_file.display(), e);
            return;
        }
    };
    println!(
        "Entries: {} events applied, {} failed.",
        format_int(report.applied),
        format_int(report.failed.len())
    );
    for f in &report.failed {
        println!("  {}", f);
    }

    let recalc = RecalculationService::with_locks(store, locks);
    let mut keys = 0usize;
    for date in &report.touched_dates {
        match recalc.recalculate_all(*date) {
            Ok(aggs) => keys += aggs.len(),
            Err(e) => error!("recalculation for {} failed: {}", date, e),
        }
    }
    println!(
        "Recalculated {} ledger rows over {} days.\n",
        format_int(keys),
        format_int(report.touched_dates.len())
    );

    if let Some(date) = report.touched_dates.iter().max() {
        let mut state = APP_STATE.lock();
        state.report_date = state.report_date.max(Some(*date));
    }
}

fn handle_generate_reports() {
    let (settings, store, default_date) = {
        let state = APP_STATE.lock();
        (
            state.settings.clone(),
            Arc::clone(&state.store),
            state.report_date.unwrap_or_else(|| Local::now().date_naive()),
        )
    };

    let answer = prompt(&format!("Report date (YYYY-MM-DD) [{}]: ", default_date));
    let date = if answer.is_empty() {
        default_date
    } else {
        match parse_date_safe(Some(answer.as_str())) {
            Some(d) => d,
            None => {
                println!("Invalid date.\n");
                return;
            }
        }
    };
    let month_start = date.with_day(1).unwrap_or(date);

    let records = store.records_on(date);
    let aggregates = store.aggregates_on(date);
    let month = match store.aggregates_between(month_start, date) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}\n", e);
            return;
        }
    };

    println!("Generating reports for {}...", date);
    println!("Outputs saved to {}\n", settings.output_dir.display());
    let rows = settings.preview_rows;

    let r1 = reports::daily_ledger_report(&aggregates);
    let file1 = settings.output_path("report1_daily_ledger.csv");
    if let Err(e) = output::write_csv(&file1, &r1) {
        eprintln!("Write error: {}", e);
    }
    output::preview_table(
        "Report 1: Daily Ledger Detail",
        Some("factory vs garden, per supervisor and type"),
        &r1,
        rows,
    );
    println!("(Full table exported to {})\n", file1.display());

    let r2 = reports::month_to_date_rollup(&month);
    let file2 = settings.output_path("report2_month_to_date.csv");
    if let Err(e) = output::write_csv(&file2, &r2) {
        eprintln!("Write error: {}", e);
    }
    let range = format!("{} to {}", month_start, date);
    output::preview_table("Report 2: Month-to-Date Rollup", Some(range.as_str()), &r2, rows);
    println!("(Full table exported to {})\n", file2.display());

    let r3 = reports::supervisor_summary(&records);
    let file3 = settings.output_path("report3_supervisor_production.csv");
    if let Err(e) = output::write_csv(&file3, &r3) {
        eprintln!("Write error: {}", e);
    }
    output::preview_table("Report 3: Supervisor Production from Sheets", None, &r3, rows);
    println!("(Full table exported to {})\n", file3.display());

    let r4 = reports::recap_report(&store.recaps_on(date));
    let file4 = settings.output_path("report4_recap.csv");
    if let Err(e) = output::write_csv(&file4, &r4) {
        eprintln!("Write error: {}", e);
    }
    output::preview_table("Report 4: Daily Recap Sheet", None, &r4, rows);
    println!("(Full table exported to {})\n", file4.display());

    let summary = reports::generate_summary(date, &records, &aggregates);
    if let Err(e) = output::write_json(&settings.output_path("summary.json"), &summary) {
        eprintln!("Write error: {}", e);
    }
    println!("Summary Stats (summary.json):");
    println!(
        "{{\"total_records\": {}, \"total_latex\": {}, \"total_latex_discrepancy\": {}}}\n",
        format_int(summary.total_records),
        format_number(summary.total_latex, 2),
        format_number(summary.total_latex_discrepancy, 2)
    );
}

fn main() {
    env_logger::init();
    loop {
        println!("Rubber Tapping Production Ledger");
        println!("[1] Import production sheets");
        println!("[2] Replay tapper entry journal");
        println!("[3] Generate reports");
        println!("[4] Import recap sheet (REKAP.csv)\n");
        match read_choice().as_str() {
            "1" => handle_import(),
            "2" => handle_replay(),
            "4" => handle_import_recap(),
            "3" => {
                println!();
                handle_generate_reports();
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    break;
                }
            }
            _ => {
                println!("Invalid choice. Please enter 1, 2, 3 or 4.\n");
            }
        }
    }
}
