//! OKX venue adapter.
//!
//! Everything rides one public v5 API with `{code, msg, data}` response
//! envelopes. Perpetual swaps are instruments of type SWAP with ids like
//! `BTC-USDT-SWAP`; linear contracts settle in the quote currency,
//! inverse contracts in the base.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::http::RestClient;
use super::{parse_decimal, parse_millis, ExchangeSource, SourceError};
use crate::domain::{Pair, RatePoint, SourceId};

const API: &str = "https://www.okx.com";

/// Venue code for "no such instrument" on the history endpoint.
const CODE_NO_INSTRUMENT: &str = "51000";

/// Rows per funding-rate-history request (venue maximum).
const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    ct_type: String,
    ct_val_ccy: String,
    settle_ccy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRate {
    funding_rate: String,
    /// Epoch milliseconds as a string.
    funding_time: String,
}

/// OKX data source.
pub struct OkxSource {
    id: SourceId,
    http: RestClient,
}

impl OkxSource {
    pub fn new(http: RestClient) -> Self {
        Self {
            id: SourceId::new("okx"),
            http,
        }
    }

    /// `BTC-USDT-SWAP` style instrument id for a pair.
    fn instrument_id(pair: &Pair) -> String {
        format!("{}-{}-SWAP", pair.base, pair.quote)
    }
}

impl ExchangeSource for OkxSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn perp_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        let params = [("instType", "SWAP".to_string())];
        let resp: Envelope<InstrumentInfo> =
            self.http
                .get_json(&format!("{API}/api/v5/public/instruments"), &params, &[])?;
        check_code(&resp)?;

        let mut pairs = Vec::new();
        for info in resp.data {
            // Linear contracts: value currency is the underlying.
            // Inverse contracts: the two are swapped.
            let pair = match info.ct_type.as_str() {
                "linear" => Pair::new(&info.ct_val_ccy, &info.settle_ccy),
                "inverse" => Pair::new(&info.settle_ccy, &info.ct_val_ccy),
                other => {
                    debug!(ct_type = other, "skipping instrument of unknown contract type");
                    continue;
                }
            };
            pairs.push(pair);
        }
        Ok(pairs)
    }

    fn predicted_funding_rates(&self, pairs: &[Pair]) -> Result<Vec<RatePoint>, SourceError> {
        let mut points = Vec::new();
        for pair in pairs {
            let params = [("instId", Self::instrument_id(pair))];
            let resp: Envelope<FundingRate> =
                self.http
                    .get_json(&format!("{API}/api/v5/public/funding-rate"), &params, &[])?;

            // Pairs the venue does not list come back as an error code
            // with no data rows.
            let Some(row) = resp.data.first() else {
                if resp.code != "0" {
                    debug!(%pair, code = %resp.code, message = %resp.msg, "no funding rate");
                }
                continue;
            };
            points.push(RatePoint {
                timestamp: parse_funding_time(&row.funding_time)?,
                pair: pair.clone(),
                rate: parse_decimal(&row.funding_rate, "funding rate")?,
            });
        }
        Ok(points)
    }

    fn historical_funding_rates(
        &self,
        pairs: &[Pair],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>, SourceError> {
        // Funding settles every eight hours, so one page covers
        // PAGE_LIMIT settlements.
        let window = Duration::hours(8 * PAGE_LIMIT as i64);
        let mut points = Vec::new();

        for pair in pairs {
            let inst_id = Self::instrument_id(pair);
            let mut cursor = start;
            while cursor < end {
                let window_end = (cursor + window).min(end);
                let params = [
                    ("instId", inst_id.clone()),
                    ("before", cursor.timestamp_millis().to_string()),
                    ("after", window_end.timestamp_millis().to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ];
                let resp: Envelope<FundingRate> = self.http.get_json(
                    &format!("{API}/api/v5/public/funding-rate-history"),
                    &params,
                    &[],
                )?;

                if resp.code == CODE_NO_INSTRUMENT {
                    debug!(%pair, "venue lists no funding history for pair");
                    break;
                }
                check_code(&resp)?;

                for row in &resp.data {
                    points.push(RatePoint {
                        timestamp: parse_funding_time(&row.funding_time)?,
                        pair: pair.clone(),
                        rate: parse_decimal(&row.funding_rate, "funding rate")?,
                    });
                }
                cursor = window_end;
            }
        }
        Ok(points)
    }
}

fn check_code<T>(resp: &Envelope<T>) -> Result<(), SourceError> {
    if resp.code != "0" {
        warn!(code = %resp.code, message = %resp.msg, "venue returned an error");
        return Err(SourceError::Venue {
            code: resp.code.clone(),
            message: resp.msg.clone(),
        });
    }
    Ok(())
}

/// Funding times arrive as millisecond strings, e.g. `"1620691200000"`.
fn parse_funding_time(s: &str) -> Result<DateTime<Utc>, SourceError> {
    let ms: i64 = s
        .parse()
        .map_err(|_| SourceError::Decode(format!("bad funding time: '{s}'")))?;
    parse_millis(ms)
}
