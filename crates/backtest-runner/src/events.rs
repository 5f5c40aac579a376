use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use backtest_core::{BacktestError, TradeSide};

/// Exact header of the shared run index.
const INDEX_HEADER: &str =
    "run_id,strategy_name,start_time,end_time,total_trades,win_rate,total_pnl,sharpe_ratio,events_file";

/// Serializes appends to the shared `index.csv` across concurrent runs in
/// this process (single-writer discipline).
static INDEX_LOCK: Mutex<()> = Mutex::new(());

/// One observability event on the run's NDJSON stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    BacktestStart {
        strategy_name: String,
        starting_balance: Decimal,
        asset: String,
        timeframe: String,
        tier: String,
    },
    Trade {
        timestamp: i64,
        action: TradeSide,
        price: Decimal,
        size: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        pnl: Option<Decimal>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        bar_timestamp: Option<i64>,
    },
    BacktestEnd {
        total_trades: i32,
        win_rate: f64,
        total_pnl: Decimal,
        sharpe_ratio: f64,
        max_drawdown: f64,
    },
}

#[derive(Serialize)]
struct EventLine<'a> {
    ts: i64,
    #[serde(rename = "runId")]
    run_id: &'a str,
    #[serde(flatten)]
    event: &'a RunEvent,
}

/// Row appended to `backtests/index.csv` when a run completes.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub run_id: String,
    pub strategy_name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub total_trades: i32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub sharpe_ratio: f64,
    pub events_file: PathBuf,
}

/// Append-only NDJSON event stream for one run, plus the shared CSV
/// index. Event writes are best-effort: the first failure is logged and
/// the stream disabled, the run itself continues.
pub struct EventLogger {
    run_id: String,
    base_dir: PathBuf,
    events_path: PathBuf,
    file: Option<File>,
}

impl EventLogger {
    /// `<app-data>/coinlab/backtests`.
    pub fn default_base_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coinlab")
            .join("backtests")
    }

    /// Create `base_dir/<run_id>/events.ndjson` for append-only writes.
    pub fn create(base_dir: &Path, run_id: &str) -> Result<Self, BacktestError> {
        let run_dir = base_dir.join(run_id);
        fs::create_dir_all(&run_dir).map_err(|e| BacktestError::Io(e.to_string()))?;
        // The index wants absolute event-file paths.
        let run_dir = fs::canonicalize(&run_dir).map_err(|e| BacktestError::Io(e.to_string()))?;
        let base_dir = run_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| run_dir.clone());
        let events_path = run_dir.join("events.ndjson");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .map_err(|e| BacktestError::Io(e.to_string()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            base_dir,
            events_path,
            file: Some(file),
        })
    }

    /// A logger that drops every event. Used when the run directory
    /// cannot be created; observability is best-effort.
    pub fn disabled(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            base_dir: PathBuf::new(),
            events_path: PathBuf::new(),
            file: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Write one event as a single JSON line. Never fails the run.
    pub fn emit(&mut self, event: &RunEvent) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let line = EventLine {
            ts: Utc::now().timestamp_millis(),
            run_id: &self.run_id,
            event,
        };
        let write = serde_json::to_string(&line)
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|json| writeln!(file, "{json}").and_then(|_| file.flush()));
        if let Err(err) = write {
            tracing::warn!(run_id = %self.run_id, error = %err, "event log write failed; disabling stream");
            self.file = None;
        }
    }

    /// Append one row to the shared `index.csv`, writing the header on
    /// first use. Serialized across runs in this process.
    pub fn append_index(&self, entry: &IndexEntry) -> Result<(), BacktestError> {
        if self.file.is_none() && self.base_dir.as_os_str().is_empty() {
            return Ok(());
        }
        let path = self.base_dir.join("index.csv");
        let _guard = INDEX_LOCK.lock().map_err(|_| {
            BacktestError::Io("index.csv lock poisoned".to_string())
        })?;

        let needs_header = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BacktestError::Io(e.to_string()))?;
        if needs_header {
            writeln!(file, "{INDEX_HEADER}").map_err(|e| BacktestError::Io(e.to_string()))?;
        }
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{}",
            csv_escape(&entry.run_id),
            csv_escape(&entry.strategy_name),
            entry.start_time,
            entry.end_time,
            entry.total_trades,
            entry.win_rate,
            entry.total_pnl,
            entry.sharpe_ratio,
            csv_escape(&entry.events_file.display().to_string()),
        )
        .map_err(|e| BacktestError::Io(e.to_string()))?;
        file.flush().map_err(|e| BacktestError::Io(e.to_string()))?;
        Ok(())
    }
}

/// RFC 4180: quote fields containing commas, quotes or line breaks,
/// doubling embedded quotes.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
