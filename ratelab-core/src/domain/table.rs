//! Wide tables keyed on (timestamp, identity).
//!
//! A [`WideTable`] holds one value column per (field, source) pair, so
//! rows from several venues line up on a shared axis. Missing cells stay
//! `None`; a venue that never reported an instrument is distinguishable
//! from one that reported zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::ids::SourceId;
use super::instrument::Identity;
use super::point::{BorrowPoint, PricePoint, RatePoint, PRICE_FIELDS, RATE_FIELDS};

/// Row key: observation timestamp plus the instrument it describes.
pub type RowKey = (DateTime<Utc>, Identity);

/// A sparse wide table: rows keyed on (timestamp, identity), one cell per
/// (source, field) pair.
///
/// The column set is fixed by the `sources` and `fields` lists, not by
/// which rows happen to be present, so a query returns the same schema
/// whether a venue answered or not.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    /// Value field names, e.g. `["rate"]` or `["open", "high", "low", "close"]`.
    fields: Vec<String>,
    /// Sources contributing columns, in display order.
    sources: Vec<SourceId>,
    /// Cells per row, laid out source-major: `source_idx * fields.len() + field_idx`.
    rows: BTreeMap<RowKey, Vec<Option<f64>>>,
}

impl WideTable {
    /// Create an empty table with a fixed column layout.
    pub fn new(fields: &[&str], sources: Vec<SourceId>) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            sources,
            rows: BTreeMap::new(),
        }
    }

    /// Table holding funding or borrow rates (single `rate` field).
    pub fn for_rates(sources: Vec<SourceId>) -> Self {
        Self::new(&RATE_FIELDS, sources)
    }

    /// Table holding OHLC prices.
    pub fn for_prices(sources: Vec<SourceId>) -> Self {
        Self::new(&PRICE_FIELDS, sources)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    /// Number of value cells per row.
    pub fn width(&self) -> usize {
        self.sources.len() * self.fields.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Qualified value column names, source-major: `{field}_{source}`.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        for source in &self.sources {
            for field in &self.fields {
                names.push(format!("{field}_{source}"));
            }
        }
        names
    }

    /// Index of a source's column block, adding the source if unseen.
    fn ensure_source(&mut self, source: &SourceId) -> usize {
        if let Some(idx) = self.sources.iter().position(|s| s == source) {
            return idx;
        }
        self.sources.push(source.clone());
        let width = self.width();
        for cells in self.rows.values_mut() {
            cells.resize(width, None);
        }
        self.sources.len() - 1
    }

    fn row_mut(&mut self, key: RowKey) -> &mut Vec<Option<f64>> {
        let width = self.width();
        self.rows.entry(key).or_insert_with(|| vec![None; width])
    }

    /// Set every field of one source for a row. `values` must line up with
    /// the table's field list.
    pub fn insert(
        &mut self,
        timestamp: DateTime<Utc>,
        identity: Identity,
        source: &SourceId,
        values: &[f64],
    ) {
        debug_assert_eq!(values.len(), self.fields.len());
        let src_idx = self.ensure_source(source);
        let n_fields = self.fields.len();
        let cells = self.row_mut((timestamp, identity));
        for (field_idx, value) in values.iter().enumerate().take(n_fields) {
            cells[src_idx * n_fields + field_idx] = Some(*value);
        }
    }

    /// Set a single cell. Unknown fields are ignored.
    pub fn set_cell(
        &mut self,
        timestamp: DateTime<Utc>,
        identity: Identity,
        source: &SourceId,
        field: &str,
        value: f64,
    ) {
        let Some(field_idx) = self.fields.iter().position(|f| f == field) else {
            return;
        };
        let src_idx = self.ensure_source(source);
        let n_fields = self.fields.len();
        let cells = self.row_mut((timestamp, identity));
        cells[src_idx * n_fields + field_idx] = Some(value);
    }

    /// Read one cell. `None` when the row is absent, the source is not a
    /// column, or the cell was never filled.
    pub fn get(
        &self,
        timestamp: DateTime<Utc>,
        identity: &Identity,
        source: &SourceId,
        field: &str,
    ) -> Option<f64> {
        let src_idx = self.sources.iter().position(|s| s == source)?;
        let field_idx = self.fields.iter().position(|f| f == field)?;
        let cells = self.rows.get(&(timestamp, identity.clone()))?;
        cells[src_idx * self.fields.len() + field_idx]
    }

    /// Outer-merge another table into this one.
    ///
    /// Rows join on (timestamp, identity); sources from `other` that this
    /// table lacks become new column blocks. Filled cells from `other`
    /// overwrite, empty cells leave existing values alone, so merging a
    /// fresh batch over stored data keeps the newest observation.
    pub fn merge(&mut self, other: &WideTable) {
        debug_assert_eq!(self.fields, other.fields);
        let n_fields = self.fields.len();
        let src_map: Vec<usize> = other
            .sources
            .iter()
            .map(|s| self.ensure_source(s))
            .collect();
        for (key, cells) in &other.rows {
            let row = self.row_mut(key.clone());
            for (other_src, self_src) in src_map.iter().enumerate() {
                for field_idx in 0..n_fields {
                    if let Some(v) = cells[other_src * n_fields + field_idx] {
                        row[self_src * n_fields + field_idx] = Some(v);
                    }
                }
            }
        }
    }

    /// Earliest and latest row timestamps, or `None` when empty.
    pub fn time_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.rows.first_key_value()?.0 .0;
        let last = self.rows.last_key_value()?.0 .0;
        Some((first, last))
    }

    /// Copy of the rows with timestamps in `[start, end)`.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> WideTable {
        let rows = self
            .rows
            .iter()
            .filter(|((ts, _), _)| *ts >= start && *ts < end)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        WideTable {
            fields: self.fields.clone(),
            sources: self.sources.clone(),
            rows,
        }
    }

    /// Drop rows whose identity does not match any of the given base
    /// symbols. An empty filter keeps everything.
    pub fn retain_instruments(&mut self, bases: &[String]) {
        if bases.is_empty() {
            return;
        }
        let wanted: Vec<String> = bases.iter().map(|b| b.to_uppercase()).collect();
        self.rows
            .retain(|(_, identity), _| wanted.iter().any(|b| identity.base_symbol() == *b));
    }

    /// Iterate rows in key order.
    pub fn rows(&self) -> impl Iterator<Item = (&RowKey, &[Option<f64>])> {
        self.rows.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Build a single-source table from funding or borrow rate points.
    /// Later duplicates of a (timestamp, identity) key overwrite earlier ones.
    pub fn from_rate_points(source: &SourceId, points: &[RatePoint]) -> WideTable {
        let mut table = Self::for_rates(vec![source.clone()]);
        for p in points {
            table.insert(p.timestamp, p.identity(), source, &[p.rate]);
        }
        table
    }

    /// Build a single-source table from borrow rate points.
    pub fn from_borrow_points(source: &SourceId, points: &[BorrowPoint]) -> WideTable {
        let mut table = Self::for_rates(vec![source.clone()]);
        for p in points {
            table.insert(p.timestamp, p.identity(), source, &[p.rate]);
        }
        table
    }

    /// Build a single-source OHLC table from price points. The open time
    /// is the row timestamp.
    pub fn from_price_points(source: &SourceId, points: &[PricePoint]) -> WideTable {
        let mut table = Self::for_prices(vec![source.clone()]);
        for p in points {
            table.insert(p.timestamp(), p.identity(), source, &p.values());
        }
        table
    }
}

/// Which instruments each source serves.
///
/// Rows are the union of every source's instrument list; a cell is `false`
/// both for "venue does not list it" and "venue could not be reached".
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityMatrix {
    sources: Vec<SourceId>,
    rows: BTreeMap<Identity, Vec<bool>>,
}

impl AvailabilityMatrix {
    pub fn new(sources: Vec<SourceId>) -> Self {
        Self {
            sources,
            rows: BTreeMap::new(),
        }
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Record that `source` lists `identity`.
    pub fn mark(&mut self, identity: Identity, source: &SourceId) {
        let Some(src_idx) = self.sources.iter().position(|s| s == source) else {
            return;
        };
        let n = self.sources.len();
        let row = self.rows.entry(identity).or_insert_with(|| vec![false; n]);
        row[src_idx] = true;
    }

    /// Record a whole instrument list for one source.
    pub fn mark_all(&mut self, source: &SourceId, identities: impl IntoIterator<Item = Identity>) {
        for identity in identities {
            self.mark(identity, source);
        }
    }

    /// Whether `source` lists `identity`. Unknown rows and sources read as
    /// unavailable.
    pub fn is_available(&self, identity: &Identity, source: &SourceId) -> bool {
        let Some(src_idx) = self.sources.iter().position(|s| s == source) else {
            return false;
        };
        self.rows.get(identity).map_or(false, |row| row[src_idx])
    }

    /// Instruments a single source lists, in row order.
    pub fn instruments_for(&self, source: &SourceId) -> Vec<Identity> {
        let Some(src_idx) = self.sources.iter().position(|s| s == source) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|(_, row)| row[src_idx])
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Instruments listed by at least one source.
    pub fn instruments(&self) -> impl Iterator<Item = &Identity> {
        self.rows.keys()
    }

    /// Iterate rows in identity order.
    pub fn rows(&self) -> impl Iterator<Item = (&Identity, &[bool])> {
        self.rows.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::Pair;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn btc() -> Identity {
        Pair::new("BTC", "USDT").into()
    }

    fn eth() -> Identity {
        Pair::new("ETH", "USDT").into()
    }

    #[test]
    fn column_names_are_source_major() {
        let table = WideTable::for_prices(vec!["binance".into(), "okx".into()]);
        assert_eq!(
            table.column_names(),
            vec![
                "open_binance",
                "high_binance",
                "low_binance",
                "close_binance",
                "open_okx",
                "high_okx",
                "low_okx",
                "close_okx",
            ]
        );
    }

    #[test]
    fn insert_then_get_roundtrip() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        table.insert(ts("2022-01-01 08:00:00"), btc(), &src, &[0.0001]);

        assert_eq!(
            table.get(ts("2022-01-01 08:00:00"), &btc(), &src, "rate"),
            Some(0.0001)
        );
        assert_eq!(table.get(ts("2022-01-01 08:00:00"), &eth(), &src, "rate"), None);
    }

    #[test]
    fn merge_outer_joins_rows_and_sources() {
        let binance: SourceId = "binance".into();
        let okx: SourceId = "okx".into();

        let mut left = WideTable::for_rates(vec![binance.clone()]);
        left.insert(ts("2022-01-01 00:00:00"), btc(), &binance, &[0.1]);

        let mut right = WideTable::for_rates(vec![okx.clone()]);
        right.insert(ts("2022-01-01 00:00:00"), btc(), &okx, &[0.2]);
        right.insert(ts("2022-01-01 08:00:00"), eth(), &okx, &[0.3]);

        left.merge(&right);

        // Two rows: one joined, one only known to okx.
        assert_eq!(left.len(), 2);
        assert_eq!(
            left.get(ts("2022-01-01 00:00:00"), &btc(), &binance, "rate"),
            Some(0.1)
        );
        assert_eq!(
            left.get(ts("2022-01-01 00:00:00"), &btc(), &okx, "rate"),
            Some(0.2)
        );
        // The okx-only row has no binance cell.
        assert_eq!(
            left.get(ts("2022-01-01 08:00:00"), &eth(), &binance, "rate"),
            None
        );
    }

    #[test]
    fn merge_overwrites_filled_cells_and_keeps_unfilled() {
        let src: SourceId = "binance".into();
        let when = ts("2022-01-01 00:00:00");

        let mut stored = WideTable::for_rates(vec![src.clone()]);
        stored.insert(when, btc(), &src, &[0.1]);
        stored.insert(when, eth(), &src, &[0.5]);

        // Fresh batch re-reports BTC with a corrected value, says nothing
        // about ETH.
        let mut fresh = WideTable::for_rates(vec![src.clone()]);
        fresh.insert(when, btc(), &src, &[0.2]);

        stored.merge(&fresh);
        assert_eq!(stored.get(when, &btc(), &src, "rate"), Some(0.2));
        assert_eq!(stored.get(when, &eth(), &src, "rate"), Some(0.5));
    }

    #[test]
    fn merge_keeps_column_layout_of_receiver() {
        let binance: SourceId = "binance".into();
        let okx: SourceId = "okx".into();

        // Accumulator declares both sources up front.
        let mut all = WideTable::for_rates(vec![binance.clone(), okx.clone()]);
        let only_okx = WideTable::from_rate_points(
            &okx,
            &[RatePoint {
                timestamp: ts("2022-01-01 00:00:00"),
                pair: Pair::new("BTC", "USDT"),
                rate: 0.2,
            }],
        );

        all.merge(&only_okx);
        assert_eq!(all.column_names(), vec!["rate_binance", "rate_okx"]);
    }

    #[test]
    fn slice_is_half_open() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        table.insert(ts("2022-01-31 23:59:59"), btc(), &src, &[0.1]);
        table.insert(ts("2022-02-01 00:00:00"), btc(), &src, &[0.2]);
        table.insert(ts("2022-02-28 12:00:00"), btc(), &src, &[0.3]);
        table.insert(ts("2022-03-01 00:00:00"), btc(), &src, &[0.4]);

        let feb = table.slice(ts("2022-02-01 00:00:00"), ts("2022-03-01 00:00:00"));
        assert_eq!(feb.len(), 2);
        assert_eq!(feb.time_bounds().unwrap().0, ts("2022-02-01 00:00:00"));
        assert_eq!(feb.time_bounds().unwrap().1, ts("2022-02-28 12:00:00"));
    }

    #[test]
    fn retain_instruments_filters_on_base_symbol() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        table.insert(ts("2022-01-01 00:00:00"), btc(), &src, &[0.1]);
        table.insert(ts("2022-01-01 00:00:00"), eth(), &src, &[0.2]);

        table.retain_instruments(&["btc".to_string()]);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(ts("2022-01-01 00:00:00"), &btc(), &src, "rate"),
            Some(0.1)
        );
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let src: SourceId = "binance".into();
        let mut table = WideTable::for_rates(vec![src.clone()]);
        table.insert(ts("2022-01-01 00:00:00"), btc(), &src, &[0.1]);
        table.retain_instruments(&[]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn availability_unknown_reads_false() {
        let binance: SourceId = "binance".into();
        let okx: SourceId = "okx".into();
        let mut matrix = AvailabilityMatrix::new(vec![binance.clone(), okx.clone()]);
        matrix.mark(btc(), &binance);

        assert!(matrix.is_available(&btc(), &binance));
        assert!(!matrix.is_available(&btc(), &okx));
        assert!(!matrix.is_available(&eth(), &binance));
    }

    #[test]
    fn availability_union_of_sources() {
        let binance: SourceId = "binance".into();
        let okx: SourceId = "okx".into();
        let mut matrix = AvailabilityMatrix::new(vec![binance.clone(), okx.clone()]);
        matrix.mark_all(&binance, [btc()]);
        matrix.mark_all(&okx, [btc(), eth()]);

        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.instruments_for(&binance), vec![btc()]);
        assert_eq!(matrix.instruments_for(&okx), vec![btc(), eth()]);
    }
}
