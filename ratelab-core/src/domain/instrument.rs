use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An underlying/quote symbol pair, e.g. BTC/USDT.
///
/// Symbols are stored uppercase; two pairs are the same instrument identity
/// exactly when both components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Venue-agnostic concatenated symbol, e.g. "BTCUSDT".
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A single borrowable asset symbol, e.g. BTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset(pub String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Price instrument type. Spot and perpetual-future volumes differ enough
/// that the cache keeps them in separate partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Spot,
    Perp,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Spot => "spot",
            InstrumentKind::Perp => "perp",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(InstrumentKind::Spot),
            "perp" => Ok(InstrumentKind::Perp),
            other => Err(format!("unknown instrument kind '{other}' (expected spot or perp)")),
        }
    }
}

/// The identity a time-series row is scoped to: a tradable pair for funding
/// rates and prices, a single asset for borrow rates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identity {
    Pair(Pair),
    Asset(Asset),
}

impl Identity {
    /// The underlying/base component, used for instrument filters:
    /// a filter naming "BTC" matches BTC/USDT and BTC/USD alike.
    pub fn base_symbol(&self) -> &str {
        match self {
            Identity::Pair(p) => &p.base,
            Identity::Asset(a) => a.as_str(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Pair(p) => write!(f, "{p}"),
            Identity::Asset(a) => write!(f, "{a}"),
        }
    }
}

impl From<Pair> for Identity {
    fn from(p: Pair) -> Self {
        Identity::Pair(p)
    }
}

impl From<Asset> for Identity {
    fn from(a: Asset) -> Self {
        Identity::Asset(a)
    }
}
