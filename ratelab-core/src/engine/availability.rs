//! Instrument availability across sources.
//!
//! Every venue lists its own set of tradable instruments. The resolver
//! unions the listings into an [`AvailabilityMatrix`]: one row per
//! instrument, one column per configured source, true where the venue
//! lists it. A source whose listing fails keeps an all-false column and
//! never aborts resolution.

use tracing::{debug, warn};

use crate::domain::{Asset, AvailabilityMatrix, Identity, Pair, SourceId};
use crate::source::SourceError;

/// Fold per-source listing results into one matrix. `configured` fixes
/// the column set regardless of which sources answered.
pub(crate) fn fold_listings<T: Into<Identity>>(
    configured: Vec<SourceId>,
    results: Vec<(SourceId, Result<Vec<T>, SourceError>)>,
) -> AvailabilityMatrix {
    let mut matrix = AvailabilityMatrix::new(configured);
    for (id, result) in results {
        match result {
            Ok(listed) => matrix.mark_all(&id, listed.into_iter().map(Into::into)),
            Err(SourceError::Unsupported { capability, .. }) => {
                debug!(source = %id, capability, "source does not list this instrument kind");
            }
            Err(e) => {
                warn!(source = %id, error = %e, "instrument listing failed, column stays empty");
            }
        }
    }
    matrix
}

/// Pairs the matrix marks available at `source`, narrowed by base and
/// quote symbol filters. An empty filter keeps everything.
pub(crate) fn pairs_for(
    matrix: &AvailabilityMatrix,
    source: &SourceId,
    bases: &[String],
    quotes: &[String],
) -> Vec<Pair> {
    let bases = uppercased(bases);
    let quotes = uppercased(quotes);
    matrix
        .instruments_for(source)
        .into_iter()
        .filter_map(|identity| match identity {
            Identity::Pair(pair) => Some(pair),
            Identity::Asset(_) => None,
        })
        .filter(|pair| {
            (bases.is_empty() || bases.contains(&pair.base))
                && (quotes.is_empty() || quotes.contains(&pair.quote))
        })
        .collect()
}

/// Assets the matrix marks available at `source`, narrowed by exact
/// symbol. An empty filter keeps everything.
pub(crate) fn assets_for(
    matrix: &AvailabilityMatrix,
    source: &SourceId,
    symbols: &[String],
) -> Vec<Asset> {
    let symbols = uppercased(symbols);
    matrix
        .instruments_for(source)
        .into_iter()
        .filter_map(|identity| match identity {
            Identity::Asset(asset) => Some(asset),
            Identity::Pair(_) => None,
        })
        .filter(|asset| symbols.is_empty() || symbols.contains(&asset.0))
        .collect()
}

fn uppercased(symbols: &[String]) -> Vec<String> {
    symbols.iter().map(|s| s.to_uppercase()).collect()
}
