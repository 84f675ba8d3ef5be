//! Month-partitioned Parquet cache.
//!
//! Layout under the cache root:
//! - `funding_rates/{year}_{month:02}.parquet`
//! - `borrow_rates/{year}_{month:02}.parquet`
//! - `prices/{kind}_{interval}_{year}_{month:02}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Saving merges with already-stored rows, newest observation wins
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per dataset (hash, time range, row count)

mod frame;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use self::frame::IdentityColumns;
use crate::calendar::{month_span, months_between};
use crate::domain::{InstrumentKind, Interval, WideTable, PRICE_FIELDS, RATE_FIELDS};

/// Errors from the partition cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("no rows to save")]
    EmptyInput,

    #[error("cache io: {0}")]
    Io(String),

    #[error("parquet: {0}")]
    Parquet(String),

    #[error("invalid cache file: {0}")]
    Validation(String),

    #[error("metadata: {0}")]
    Meta(String),
}

/// Metadata sidecar for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub dataset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub row_count: usize,
    pub data_hash: String,
    pub cached_at: DateTime<Utc>,
}

/// Cache state of one dataset, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub dataset: String,
    pub cached: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub row_count: Option<usize>,
}

/// What one dataset looks like on disk.
struct DatasetSpec {
    /// Directory under the cache root.
    dir: &'static str,
    /// File stem prefix before `{year}_{month}`, e.g. `spot_1h_`.
    prefix: String,
    /// Meta sidecar file name inside `dir`.
    meta_file: String,
    /// Dataset label for metadata and status lines.
    label: String,
    fields: &'static [&'static str],
    scheme: IdentityColumns,
}

impl DatasetSpec {
    fn funding() -> Self {
        Self {
            dir: "funding_rates",
            prefix: String::new(),
            meta_file: "meta.json".into(),
            label: "funding_rates".into(),
            fields: &RATE_FIELDS,
            scheme: IdentityColumns::Pair,
        }
    }

    fn borrow() -> Self {
        Self {
            dir: "borrow_rates",
            prefix: String::new(),
            meta_file: "meta.json".into(),
            label: "borrow_rates".into(),
            fields: &RATE_FIELDS,
            scheme: IdentityColumns::Asset,
        }
    }

    fn prices(kind: InstrumentKind, interval: &Interval) -> Self {
        Self {
            dir: "prices",
            prefix: format!("{kind}_{interval}_"),
            meta_file: format!("{kind}_{interval}_meta.json"),
            label: format!("prices/{kind}_{interval}"),
            fields: &PRICE_FIELDS,
            scheme: IdentityColumns::Pair,
        }
    }
}

/// The month-partitioned Parquet cache.
pub struct PartitionCache {
    root: PathBuf,
    /// One lock per partition file so concurrent saves to the same month
    /// serialize their read-merge-write cycle.
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PartitionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Public save/load surface ────────────────────────────────────

    /// Save funding rates, partitioned by calendar month.
    pub fn save_funding_rates(&self, table: &WideTable) -> Result<(), CacheError> {
        self.save_dataset(&DatasetSpec::funding(), table)
    }

    /// Load funding rates covering `[start, end]` months. Missing
    /// partitions are skipped; a fully-missing range loads as an empty
    /// table. `instruments` filters by base symbol, empty keeps all.
    pub fn load_funding_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        instruments: &[String],
    ) -> Result<WideTable, CacheError> {
        self.load_dataset(&DatasetSpec::funding(), start, end, instruments)
    }

    /// Save spot borrow rates, partitioned by calendar month.
    pub fn save_borrow_rates(&self, table: &WideTable) -> Result<(), CacheError> {
        self.save_dataset(&DatasetSpec::borrow(), table)
    }

    /// Load spot borrow rates covering `[start, end]` months.
    pub fn load_borrow_rates(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        instruments: &[String],
    ) -> Result<WideTable, CacheError> {
        self.load_dataset(&DatasetSpec::borrow(), start, end, instruments)
    }

    /// Save OHLC prices for one instrument kind and interval.
    pub fn save_prices(
        &self,
        table: &WideTable,
        kind: InstrumentKind,
        interval: &Interval,
    ) -> Result<(), CacheError> {
        self.save_dataset(&DatasetSpec::prices(kind, interval), table)
    }

    /// Load OHLC prices for one instrument kind and interval.
    pub fn load_prices(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: InstrumentKind,
        interval: &Interval,
        instruments: &[String],
    ) -> Result<WideTable, CacheError> {
        self.load_dataset(&DatasetSpec::prices(kind, interval), start, end, instruments)
    }

    /// Status of every dataset the cache knows about. Funding and borrow
    /// rates are always listed; price datasets are discovered from their
    /// sidecars.
    pub fn status(&self) -> Vec<CacheStatus> {
        let mut out = vec![
            self.dataset_status(&DatasetSpec::funding()),
            self.dataset_status(&DatasetSpec::borrow()),
        ];
        for meta in self.price_metas() {
            out.push(CacheStatus {
                dataset: meta.dataset.clone(),
                cached: true,
                start: Some(meta.start),
                end: Some(meta.end),
                row_count: Some(meta.row_count),
            });
        }
        out
    }

    // ── Save internals ──────────────────────────────────────────────

    fn save_dataset(&self, ds: &DatasetSpec, table: &WideTable) -> Result<(), CacheError> {
        if table.is_empty() {
            return Err(CacheError::EmptyInput);
        }
        let (start, end) = table.time_bounds().expect("non-empty table has bounds");
        let months = months_between(start, end)?;

        let dir = self.root.join(ds.dir);
        fs::create_dir_all(&dir).map_err(|e| CacheError::Io(format!("create dir: {e}")))?;

        // Attempt every month even when one fails; report the first
        // failure after the rest have been tried.
        let mut first_err = None;
        for month in months {
            let (month_start, month_end) = month_span(month);
            let slice = table.slice(month_start, month_end);
            if slice.is_empty() {
                continue;
            }
            if let Err(e) = self.save_month(ds, month, &slice) {
                warn!(dataset = %ds.label, month = %month, error = %e, "partition save failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        self.write_meta(ds, table, start, end)
    }

    /// Write one month's partition: merge the new slice over whatever is
    /// already stored, then replace the file atomically.
    fn save_month(
        &self,
        ds: &DatasetSpec,
        month: NaiveDate,
        slice: &WideTable,
    ) -> Result<(), CacheError> {
        let path = self.partition_path(ds, month);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap();

        let mut merged = match self.read_partition(ds, &path) {
            Some(existing) => existing,
            None => WideTable::new(ds.fields, Vec::new()),
        };
        merged.merge(slice);

        let df = frame::table_to_dataframe(&merged, ds.scheme)?;
        let tmp = path.with_extension("parquet.tmp");
        frame::write_parquet(&df, &tmp)?;
        fs::rename(&tmp, &path).map_err(|e| {
            // Clean up temp file on rename failure
            let _ = fs::remove_file(&tmp);
            CacheError::Io(format!("atomic rename failed: {e}"))
        })?;
        Ok(())
    }

    fn write_meta(
        &self,
        ds: &DatasetSpec,
        table: &WideTable,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        // Widen the stored range instead of replacing it, so saving one
        // month does not hide older partitions from status.
        let (start, end) = match self.read_meta(ds) {
            Some(old) => (start.min(old.start), end.max(old.end)),
            None => (start, end),
        };
        let meta = CacheMeta {
            dataset: ds.label.clone(),
            start,
            end,
            row_count: table.len(),
            data_hash: table_hash(table)?,
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| CacheError::Meta(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(ds), meta_json)
            .map_err(|e| CacheError::Meta(format!("meta write: {e}")))?;
        Ok(())
    }

    // ── Load internals ──────────────────────────────────────────────

    fn load_dataset(
        &self,
        ds: &DatasetSpec,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        instruments: &[String],
    ) -> Result<WideTable, CacheError> {
        let months = months_between(start, end)?;
        let mut out = WideTable::new(ds.fields, Vec::new());
        for month in months {
            let path = self.partition_path(ds, month);
            if let Some(partition) = self.read_partition(ds, &path) {
                out.merge(&partition);
            }
        }
        out.retain_instruments(instruments);
        Ok(out)
    }

    /// Read a partition if present. A corrupt file is quarantined and
    /// reads as absent, so one bad month never sinks a whole load.
    fn read_partition(&self, ds: &DatasetSpec, path: &Path) -> Option<WideTable> {
        if !path.exists() {
            return None;
        }
        match frame::load_parquet(path, ds.fields, ds.scheme) {
            Ok(table) => Some(table),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    file = %path.display(),
                    error = %e,
                    "quarantining corrupt cache file"
                );
                let _ = fs::rename(path, &quarantine);
                None
            }
        }
    }

    fn read_meta(&self, ds: &DatasetSpec) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(ds)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn dataset_status(&self, ds: &DatasetSpec) -> CacheStatus {
        let meta = self.read_meta(ds);
        CacheStatus {
            dataset: ds.label.clone(),
            cached: meta.is_some(),
            start: meta.as_ref().map(|m| m.start),
            end: meta.as_ref().map(|m| m.end),
            row_count: meta.as_ref().map(|m| m.row_count),
        }
    }

    /// Metadata for every price dataset found on disk.
    fn price_metas(&self) -> Vec<CacheMeta> {
        let mut metas = Vec::new();
        let Ok(entries) = fs::read_dir(self.root.join("prices")) else {
            return metas;
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with("_meta.json"))
            })
            .collect();
        paths.sort();
        for path in paths {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(meta) = serde_json::from_str::<CacheMeta>(&content) {
                metas.push(meta);
            }
        }
        metas
    }

    // ── Paths and locks ─────────────────────────────────────────────

    /// `{root}/{dir}/{prefix}{year}_{month:02}.parquet`
    fn partition_path(&self, ds: &DatasetSpec, month: NaiveDate) -> PathBuf {
        self.root.join(ds.dir).join(format!(
            "{}{}_{:02}.parquet",
            ds.prefix,
            month.year(),
            month.month()
        ))
    }

    fn meta_path(&self, ds: &DatasetSpec) -> PathBuf {
        self.root.join(ds.dir).join(&ds.meta_file)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap();
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

/// Content hash of a table, over its rows in key order.
fn table_hash(table: &WideTable) -> Result<String, CacheError> {
    let rows: Vec<(i64, String, Vec<Option<f64>>)> = table
        .rows()
        .map(|((ts, identity), cells)| {
            (ts.timestamp_millis(), identity.to_string(), cells.to_vec())
        })
        .collect();
    let bytes = serde_json::to_vec(&rows)
        .map_err(|e| CacheError::Meta(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
