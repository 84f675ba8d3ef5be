use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a configured data source (exchange), e.g. "binance".
///
/// Lowercase by convention; used as the per-source suffix of value columns
/// in merged tables (`rate_binance`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Candle granularity label as requested by the caller, e.g. "1h" or "1d".
///
/// Adapters snap this to the nearest interval the venue accepts; the cache
/// keys price partitions by the label as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval(pub String);

impl Interval {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interval length in seconds. Accepts a plain second count or a
    /// count with one of the suffixes s, m, h, d, w, M (calendar month).
    pub fn seconds(&self) -> Option<u64> {
        let label = self.0.trim();
        let split = label
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(label.len());
        let (digits, unit) = label.split_at(split);
        let count: u64 = digits.parse().ok()?;
        let unit_secs = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            "M" => 2_628_000,
            _ => return None,
        };
        Some(count * unit_secs)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Interval {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_id_lowercases() {
        assert_eq!(SourceId::new("Binance").as_str(), "binance");
        assert_eq!(SourceId::from("OKX").to_string(), "okx");
    }

    #[test]
    fn interval_keeps_label() {
        assert_eq!(Interval::new("1h").as_str(), "1h");
    }

    #[test]
    fn interval_seconds() {
        assert_eq!(Interval::new("1h").seconds(), Some(3_600));
        assert_eq!(Interval::new("90m").seconds(), Some(5_400));
        assert_eq!(Interval::new("3600").seconds(), Some(3_600));
        assert_eq!(Interval::new("1M").seconds(), Some(2_628_000));
        assert_eq!(Interval::new("fast").seconds(), None);
        assert_eq!(Interval::new("h").seconds(), None);
    }
}
