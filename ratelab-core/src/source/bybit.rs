//! Bybit venue adapter.
//!
//! One host serves both the USDT-margined (linear) and USD-margined
//! (inverse) contracts, on different endpoint paths. Predicted funding
//! is a private endpoint signed over the sorted query string; the venue
//! only ever serves the latest settled funding rate, so historical
//! queries return at most one point per pair.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::http::{self, RestClient};
use super::{ApiCredentials, ExchangeSource, SourceError};
use crate::domain::{Pair, RatePoint, SourceId};

const API: &str = "https://api.bybit.com";

/// Venue code for "no such contract".
const CODE_BAD_SYMBOL: i64 = 10001;
/// Venue codes for signing and key problems.
const CODE_BAD_SIGN: i64 = 10004;
const CODE_KEY_EXPIRED: i64 = 33004;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
    #[serde(default)]
    time_now: String,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    name: String,
    base_currency: String,
    quote_currency: String,
}

#[derive(Debug, Deserialize)]
struct PredictedFunding {
    /// A number on the linear endpoint, sometimes a string on the
    /// inverse one.
    predicted_funding_rate: Value,
}

#[derive(Debug, Deserialize)]
struct PrevFunding {
    /// String on the inverse endpoint, number on the linear one.
    funding_rate: Value,
    /// ISO string on the linear endpoint, epoch seconds on the inverse.
    funding_rate_timestamp: Value,
}

/// Bybit data source.
pub struct BybitSource {
    id: SourceId,
    http: RestClient,
    credentials: Option<ApiCredentials>,
}

impl BybitSource {
    pub fn new(http: RestClient, credentials: Option<ApiCredentials>) -> Self {
        Self {
            id: SourceId::new("bybit"),
            http,
            credentials,
        }
    }

    /// Current server time in epoch milliseconds. The venue reports it
    /// as a fractional-second string.
    fn server_time_ms(&self) -> Result<i64, SourceError> {
        let resp: Envelope<Value> = self
            .http
            .get_json(&format!("{API}/v2/public/time"), &[], &[])?;
        let secs: f64 = resp
            .time_now
            .parse()
            .map_err(|_| SourceError::Decode(format!("bad time_now: '{}'", resp.time_now)))?;
        Ok((secs * 1000.0).round() as i64)
    }

    fn credentials(&self) -> Result<&ApiCredentials, SourceError> {
        self.credentials
            .as_ref()
            .ok_or_else(|| SourceError::Auth("bybit api credentials not configured".into()))
    }

    /// Signed GET. The signature is HMAC-SHA256 over the query string
    /// with keys in sorted order, appended as `sign`.
    fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<T, SourceError> {
        let secret = self.credentials()?.secret.clone();
        params.sort_by_key(|(k, _)| *k);
        let signature = http::sign(&secret, &http::query_string(&params));
        params.push(("sign", signature));
        self.http.get_json(url, &params, &[])
    }
}

impl ExchangeSource for BybitSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.server_time_ms().is_ok()
    }

    fn perp_pairs(&self) -> Result<Vec<Pair>, SourceError> {
        let resp: Envelope<Vec<SymbolInfo>> = self
            .http
            .get_json(&format!("{API}/v2/public/symbols"), &[], &[])?;
        let symbols = check_envelope(resp, "symbols")?;
        Ok(symbols
            .into_iter()
            // Expiring futures carry a date in the name, e.g. BTCUSDM21.
            .filter(|s| !s.name.chars().any(|c| c.is_ascii_digit()))
            .map(|s| Pair::new(&s.base_currency, &s.quote_currency))
            .collect())
    }

    fn predicted_funding_rates(&self, pairs: &[Pair]) -> Result<Vec<RatePoint>, SourceError> {
        let key = self.credentials()?.key.clone();
        let mut points = Vec::new();

        for pair in pairs {
            let url = match pair.quote.as_str() {
                "USDT" => format!("{API}/private/linear/funding/predicted-funding"),
                "USD" => format!("{API}/v2/private/funding/predicted-funding"),
                _ => {
                    warn!(%pair, "unrecognised quote currency for predicted funding");
                    continue;
                }
            };
            let params = vec![
                ("api_key", key.clone()),
                ("symbol", pair.symbol()),
                ("timestamp", self.server_time_ms()?.to_string()),
            ];
            let resp: Envelope<PredictedFunding> = self.get_signed(&url, params)?;

            match resp.ret_code {
                0 => {}
                CODE_BAD_SYMBOL => {
                    debug!(%pair, "venue lists no funding for pair");
                    continue;
                }
                CODE_BAD_SIGN | CODE_KEY_EXPIRED => {
                    return Err(SourceError::Auth(resp.ret_msg));
                }
                code => {
                    warn!(%pair, code, message = %resp.ret_msg, "predicted funding failed");
                    continue;
                }
            }

            let Some(result) = resp.result else {
                continue;
            };
            let Some(rate) = value_to_f64(&result.predicted_funding_rate) else {
                continue;
            };
            // The venue reports no settlement time here; stamp the rate
            // with the server time of the response.
            let secs: f64 = resp
                .time_now
                .parse()
                .map_err(|_| SourceError::Decode(format!("bad time_now: '{}'", resp.time_now)))?;
            let timestamp = super::parse_millis((secs * 1000.0).round() as i64)?;
            points.push(RatePoint {
                timestamp,
                pair: pair.clone(),
                rate,
            });
        }
        Ok(points)
    }

    /// The venue only serves the most recent settled rate, so this
    /// returns at most one point per pair, and only when that settlement
    /// falls inside `[start, end)`.
    fn historical_funding_rates(
        &self,
        pairs: &[Pair],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>, SourceError> {
        let mut points = Vec::new();
        for pair in pairs {
            let url = match pair.quote.as_str() {
                "USDT" => format!("{API}/public/linear/funding/prev-funding-rate"),
                "USD" => format!("{API}/v2/public/funding/prev-funding-rate"),
                _ => {
                    warn!(%pair, "unrecognised quote currency for funding rates");
                    continue;
                }
            };
            let params = [("symbol", pair.symbol())];
            let resp: Envelope<PrevFunding> = self.http.get_json(&url, &params, &[])?;

            if resp.ret_code == CODE_BAD_SYMBOL {
                continue;
            }
            let Some(result) = resp.result else {
                continue;
            };
            let (Some(rate), Some(timestamp)) = (
                value_to_f64(&result.funding_rate),
                value_to_datetime(&result.funding_rate_timestamp),
            ) else {
                continue;
            };
            if timestamp >= start && timestamp < end {
                points.push(RatePoint {
                    timestamp,
                    pair: pair.clone(),
                    rate,
                });
            }
        }
        Ok(points)
    }
}

fn check_envelope<T>(resp: Envelope<T>, what: &str) -> Result<T, SourceError> {
    if resp.ret_code != 0 {
        return Err(SourceError::Venue {
            code: resp.ret_code.to_string(),
            message: resp.ret_msg,
        });
    }
    resp.result
        .ok_or_else(|| SourceError::Decode(format!("missing result for {what}")))
}

/// Rates arrive as JSON numbers or decimal strings depending on the
/// endpoint.
fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Timestamps arrive as epoch seconds, fractional-second strings, or
/// ISO strings like `2021-05-07T16:00:00.000Z`.
fn value_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => DateTime::from_timestamp(n.as_i64()?, 0),
        Value::String(s) => {
            if let Ok(secs) = s.parse::<f64>() {
                DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
            } else {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.3fZ")
                    .ok()
                    .map(|dt| dt.and_utc())
            }
        }
        _ => None,
    }
}
