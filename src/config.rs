use std::env;
use std::path::PathBuf;

/// Runtime settings for the CLI. Every field has a default so a bare
/// checkout runs without a `.env` file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub csv_dir: PathBuf,
    pub output_dir: PathBuf,
    pub supervisors_file: PathBuf,
    pub journal_file: PathBuf,
    pub region: String,
    pub preview_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("csv"),
            output_dir: PathBuf::from("."),
            supervisors_file: PathBuf::from("supervisors.csv"),
            journal_file: PathBuf::from("entries.csv"),
            region: "Unknown".to_string(),
            preview_rows: 5,
        }
    }
}

impl Settings {
    /// Load from the process environment (after `.env`, if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SADAP_CSV_DIR") {
            cfg.csv_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SADAP_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SADAP_SUPERVISORS_FILE") {
            cfg.supervisors_file = PathBuf::from(v);
        }
        if let Some(v) = get("SADAP_JOURNAL_FILE") {
            cfg.journal_file = PathBuf::from(v);
        }
        if let Some(v) = get("SADAP_REGION") {
            cfg.region = v;
        }
        if let Some(v) = get("SADAP_PREVIEW_ROWS") {
            cfg.preview_rows = v.parse().unwrap_or(cfg.preview_rows);
        }
        cfg
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}
