//! Domain types for ratelab

pub mod ids;
pub mod instrument;
pub mod point;
pub mod table;

pub use ids::{Interval, SourceId};
pub use instrument::{Asset, Identity, InstrumentKind, Pair};
pub use point::{BorrowPoint, PricePoint, RatePoint, PRICE_FIELDS, RATE_FIELDS};
pub use table::{AvailabilityMatrix, RowKey, WideTable};
