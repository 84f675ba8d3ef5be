//! Shared blocking REST client for venue APIs.
//!
//! Handles retries with exponential backoff, venue rate limiting
//! (429/418 with Retry-After) and HMAC-SHA256 request signing for the
//! private endpoints.

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

use super::SourceError;

type HmacSha256 = Hmac<Sha256>;

/// Longest we are willing to honor a venue's Retry-After for.
const MAX_BACKOFF_SECS: u64 = 60;

/// Blocking HTTP client shared by the venue adapters.
pub struct RestClient {
    client: reqwest::blocking::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl RestClient {
    pub fn new(timeout_secs: u64, max_retries: u32) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            max_retries,
            base_delay: Duration::from_millis(500),
        }
    }

    /// GET a JSON endpoint with retry logic.
    ///
    /// Retries transport failures and rate limits with exponential
    /// backoff; a 429 or 418 additionally sleeps out the venue's
    /// Retry-After before the next attempt. 401/403 fail immediately.
    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            let mut request = self.client.get(url);
            if !params.is_empty() {
                request = request.query(params);
            }
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(MAX_BACKOFF_SECS);
                        warn!(url, retry_after, "venue rate limit, backing off");
                        std::thread::sleep(Duration::from_secs(retry_after.min(MAX_BACKOFF_SECS)));
                        last_error = Some(SourceError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(SourceError::Auth(format!("HTTP {status} from {url}")));
                    }

                    if !status.is_success() {
                        last_error = Some(SourceError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                        continue;
                    }

                    return resp
                        .json::<T>()
                        .map_err(|e| SourceError::Decode(format!("{url}: {e}")));
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(SourceError::Transport(e.to_string()));
                        continue;
                    }
                    return Err(SourceError::Transport(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Transport("max retries exceeded".into())))
    }
}

/// Join params into the canonical `k=v&k=v` form used for signing.
/// Values must already be URL-safe (symbols, integers).
pub fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
