//! WideTable to DataFrame conversion for partition files.
//!
//! On disk a partition is one Parquet file: a `timestamp` column
//! (Datetime, ms), the identity columns, then one `{field}_{source}`
//! column per value cell. Empty cells persist as nulls.

use chrono::DateTime;
use polars::prelude::*;
use std::fs;
use std::path::Path;

use super::CacheError;
use crate::domain::{Asset, Identity, Pair, SourceId, WideTable};

/// Which identity columns a dataset carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityColumns {
    /// `base` and `quote` string columns.
    Pair,
    /// A single `asset` string column.
    Asset,
}

impl IdentityColumns {
    fn names(self) -> &'static [&'static str] {
        match self {
            IdentityColumns::Pair => &["base", "quote"],
            IdentityColumns::Asset => &["asset"],
        }
    }
}

/// Convert a wide table to a DataFrame, rows in key order.
pub fn table_to_dataframe(
    table: &WideTable,
    scheme: IdentityColumns,
) -> Result<DataFrame, CacheError> {
    let n = table.len();
    let mut timestamps: Vec<i64> = Vec::with_capacity(n);
    let mut bases: Vec<String> = Vec::new();
    let mut quotes: Vec<String> = Vec::new();
    let mut assets: Vec<String> = Vec::new();
    let mut cells: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(n); table.width()];

    for ((ts, identity), row) in table.rows() {
        timestamps.push(ts.timestamp_millis());
        match (scheme, identity) {
            (IdentityColumns::Pair, Identity::Pair(pair)) => {
                bases.push(pair.base.clone());
                quotes.push(pair.quote.clone());
            }
            (IdentityColumns::Asset, Identity::Asset(asset)) => {
                assets.push(asset.as_str().to_string());
            }
            _ => {
                return Err(CacheError::Validation(format!(
                    "identity {identity} does not fit the {scheme:?} column scheme"
                )))
            }
        }
        for (idx, value) in row.iter().enumerate() {
            cells[idx].push(*value);
        }
    }

    let mut columns = vec![Column::new("timestamp".into(), timestamps)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .map_err(|e| CacheError::Parquet(format!("timestamp cast: {e}")))?];
    match scheme {
        IdentityColumns::Pair => {
            columns.push(Column::new("base".into(), bases));
            columns.push(Column::new("quote".into(), quotes));
        }
        IdentityColumns::Asset => {
            columns.push(Column::new("asset".into(), assets));
        }
    }
    for (name, values) in table.column_names().iter().zip(cells) {
        columns.push(Column::new(name.as_str().into(), values));
    }

    DataFrame::new(columns).map_err(|e| CacheError::Parquet(format!("dataframe creation: {e}")))
}

/// Convert a partition DataFrame back to a wide table.
///
/// Sources are discovered from the `{field}_{source}` column names, in
/// file order. Fails on missing key columns or columns that match no
/// known field.
pub fn dataframe_to_table(
    df: &DataFrame,
    fields: &[&str],
    scheme: IdentityColumns,
) -> Result<WideTable, CacheError> {
    if df.height() == 0 {
        return Err(CacheError::Validation("empty parquet file".into()));
    }
    for col_name in std::iter::once(&"timestamp").chain(scheme.names()) {
        if df.column(col_name).is_err() {
            return Err(CacheError::Validation(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    // Discover (source, field) value columns from their names.
    let mut sources: Vec<SourceId> = Vec::new();
    let mut value_cols: Vec<(SourceId, &str, &ChunkedArray<Float64Type>)> = Vec::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == "timestamp" || scheme.names().contains(&name) {
            continue;
        }
        let Some((field, source)) = split_value_column(name, fields) else {
            return Err(CacheError::Validation(format!(
                "unrecognized column '{name}'"
            )));
        };
        let ca = column
            .f64()
            .map_err(|e| CacheError::Parquet(format!("column '{name}' type: {e}")))?;
        if !sources.contains(&source) {
            sources.push(source.clone());
        }
        value_cols.push((source, field, ca));
    }

    let timestamps = df
        .column("timestamp")
        .expect("checked above")
        .datetime()
        .map_err(|e| CacheError::Parquet(format!("timestamp column type: {e}")))?;

    let mut table = WideTable::new(fields, sources);
    for i in 0..df.height() {
        let millis = timestamps
            .get(i)
            .ok_or_else(|| CacheError::Validation(format!("null timestamp at row {i}")))?;
        let ts = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| CacheError::Validation(format!("timestamp out of range at row {i}")))?;
        let identity = read_identity(df, scheme, i)?;
        for (source, field, ca) in &value_cols {
            if let Some(value) = ca.get(i) {
                table.set_cell(ts, identity.clone(), source, field, value);
            }
        }
    }
    Ok(table)
}

/// Split `rate_binance` into `("rate", binance)` against the known field
/// list. Returns `None` when no field prefix matches.
fn split_value_column<'f>(name: &str, fields: &'f [&'f str]) -> Option<(&'f str, SourceId)> {
    for field in fields {
        if let Some(source) = name.strip_prefix(&format!("{field}_")) {
            if !source.is_empty() {
                return Some((*field, SourceId::new(source)));
            }
        }
    }
    None
}

fn read_identity(df: &DataFrame, scheme: IdentityColumns, row: usize) -> Result<Identity, CacheError> {
    let read_str = |col: &str| -> Result<String, CacheError> {
        df.column(col)
            .map_err(|e| CacheError::Parquet(format!("column '{col}': {e}")))?
            .str()
            .map_err(|e| CacheError::Parquet(format!("column '{col}' type: {e}")))?
            .get(row)
            .map(|s| s.to_string())
            .ok_or_else(|| CacheError::Validation(format!("null {col} at row {row}")))
    };
    match scheme {
        IdentityColumns::Pair => {
            let base = read_str("base")?;
            let quote = read_str("quote")?;
            Ok(Identity::Pair(Pair::new(&base, &quote)))
        }
        IdentityColumns::Asset => Ok(Identity::Asset(Asset::new(&read_str("asset")?))),
    }
}

/// Write a DataFrame to a Parquet file.
pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), CacheError> {
    let file =
        fs::File::create(path).map_err(|e| CacheError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| CacheError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a partition file and validate its schema.
pub fn load_parquet(
    path: &Path,
    fields: &[&str],
    scheme: IdentityColumns,
) -> Result<WideTable, CacheError> {
    let file = fs::File::open(path).map_err(|e| CacheError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| CacheError::Parquet(format!("read: {e}")))?;
    dataframe_to_table(&df, fields, scheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PRICE_FIELDS, RATE_FIELDS};
    use chrono::{TimeZone, Utc};

    fn sample_rates() -> WideTable {
        let binance: SourceId = "binance".into();
        let okx: SourceId = "okx".into();
        let mut table = WideTable::for_rates(vec![binance.clone(), okx.clone()]);
        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2022, 1, 1, 8, 0, 0).unwrap();
        table.insert(t0, Pair::new("BTC", "USDT").into(), &binance, &[0.0001]);
        table.insert(t0, Pair::new("BTC", "USDT").into(), &okx, &[0.0002]);
        // okx has no row at t1: the cell stays null on disk.
        table.insert(t1, Pair::new("ETH", "USDT").into(), &binance, &[-0.0003]);
        table
    }

    #[test]
    fn dataframe_roundtrip_preserves_rows_and_nulls() {
        let table = sample_rates();
        let df = table_to_dataframe(&table, IdentityColumns::Pair).unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(
            df.get_column_names(),
            vec!["timestamp", "base", "quote", "rate_binance", "rate_okx"]
        );

        let back = dataframe_to_table(&df, &RATE_FIELDS, IdentityColumns::Pair).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn price_roundtrip() {
        let src: SourceId = "bybit".into();
        let mut table = WideTable::for_prices(vec![src.clone()]);
        let t0 = Utc.with_ymd_and_hms(2022, 3, 4, 12, 0, 0).unwrap();
        table.insert(
            t0,
            Pair::new("BTC", "USDT").into(),
            &src,
            &[100.0, 110.0, 95.0, 105.0],
        );

        let df = table_to_dataframe(&table, IdentityColumns::Pair).unwrap();
        let back = dataframe_to_table(&df, &PRICE_FIELDS, IdentityColumns::Pair).unwrap();
        assert_eq!(back, table);
        assert_eq!(
            back.get(t0, &Pair::new("BTC", "USDT").into(), &src, "close"),
            Some(105.0)
        );
    }

    #[test]
    fn asset_scheme_roundtrip() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        table.insert(t0, Asset::new("BTC").into(), &src, &[0.05]);

        let df = table_to_dataframe(&table, IdentityColumns::Asset).unwrap();
        assert_eq!(
            df.get_column_names(),
            vec!["timestamp", "asset", "rate_binance"]
        );
        let back = dataframe_to_table(&df, &RATE_FIELDS, IdentityColumns::Asset).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn mismatched_identity_is_an_error() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        table.insert(t0, Asset::new("BTC").into(), &src, &[0.05]);

        let err = table_to_dataframe(&table, IdentityColumns::Pair).unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }

    #[test]
    fn unrecognized_column_is_an_error() {
        let df = DataFrame::new(vec![
            Column::new("timestamp".into(), vec![0i64])
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
                .unwrap(),
            Column::new("base".into(), vec!["BTC"]),
            Column::new("quote".into(), vec!["USDT"]),
            Column::new("bogus".into(), vec![1.0f64]),
        ])
        .unwrap();

        let err = dataframe_to_table(&df, &RATE_FIELDS, IdentityColumns::Pair).unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }

    #[test]
    fn empty_frame_is_an_error() {
        let table = WideTable::for_rates(vec!["binance".into()]);
        let df = table_to_dataframe(&table, IdentityColumns::Pair).unwrap();
        let err = dataframe_to_table(&df, &RATE_FIELDS, IdentityColumns::Pair).unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }
}
