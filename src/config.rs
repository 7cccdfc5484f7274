use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_JOURNAL: &str = "ledger.wal";
const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
const DEFAULT_COMPACT_INTERVAL_SECS: u64 = 60;

/// Process settings, read once at startup from `RESERVA_*` variables.
/// Unset or unparsable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub journal: String,
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("RESERVA_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into());
        let journal = lookup("RESERVA_JOURNAL")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_JOURNAL.into());
        let metrics_port = lookup("RESERVA_METRICS_PORT").and_then(|s| s.parse().ok());
        let compact_threshold = lookup("RESERVA_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COMPACT_THRESHOLD);
        let compact_interval_secs = lookup("RESERVA_COMPACT_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_COMPACT_INTERVAL_SECS);

        Self {
            data_dir: PathBuf::from(data_dir),
            journal,
            metrics_port,
            compact_threshold,
            compact_interval: Duration::from_secs(compact_interval_secs),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal)
    }
}
