//! HTTP retry helper for transient feed errors.
//!
//! Feed requests go through [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so every request gets a
//! short exponential backoff on connection failures, timeouts, HTTP 429,
//! and HTTP 5xx. The caller still bounds the whole fetch with its own
//! timeout; retries only smooth over blips.

use std::time::Duration;

use crate::FetchError;

/// Maximum retry attempts after the first request.
///
/// Backoff is 1s, 2s, 4s, so a request that keeps failing gives up after
/// roughly 7 seconds of waiting plus the request time itself.
const MAX_RETRIES: u32 = 3;

/// Maximum full re-fetches when the body arrives but cannot be decoded.
const MAX_BODY_RETRIES: u32 = 1;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends an HTTP request and parses the response body as JSON.
///
/// `build_request` is called once per attempt since builders are consumed
/// by `.send()`.
///
/// # Errors
///
/// Returns [`FetchError`] if the request fails after all retries, the
/// server answers with a non-retryable status, or the body cannot be
/// parsed as JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;
    loop {
        let response = send_inner(&build_request).await?;
        let url = response.url().to_string();
        let status = response.status();

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if body_attempt < MAX_BODY_RETRIES && is_transient(&e) => {
                body_attempt += 1;
                log::warn!("Body read from {url} failed ({e}), re-fetching");
                continue;
            }
            Err(e) => return Err(FetchError::Http(e)),
        };

        match serde_json::from_str(&text) {
            Ok(value) => return Ok(value),
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                log::warn!(
                    "JSON parse failed for {url} (status {status}, {} bytes): {e}; re-fetching",
                    text.len()
                );
            }
            Err(e) => {
                log::error!(
                    "JSON parse failed for {url} (status {status}, {} bytes): {e}\n  body preview: {}",
                    text.len(),
                    preview(&text)
                );
                return Err(FetchError::Json(e));
            }
        }
    }
}

/// Sends the request, retrying transient failures with exponential
/// backoff. Returns the first non-error response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(build_request: &F) -> Result<reqwest::Response, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = backoff(attempt);
            log::warn!("  retry {attempt}/{MAX_RETRIES} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) if is_transient(&e) && attempt < MAX_RETRIES => {
                log::warn!("  transient error: {e}");
            }
            Err(e) => return Err(FetchError::Http(e)),
            Ok(response) => {
                let status = response.status();
                let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error();

                if retryable && attempt < MAX_RETRIES {
                    log::warn!("  HTTP {status} from {}", response.url());
                } else if retryable || status.is_client_error() {
                    return Err(FetchError::Status { status });
                } else {
                    return Ok(response);
                }
            }
        }

        attempt += 1;
    }
}

/// Delay before retry number `attempt` (1-based).
const fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LEN {
        return text;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "é".repeat(BODY_PREVIEW_LEN);
        let cut = preview(&text);
        assert!(cut.len() <= BODY_PREVIEW_LEN);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn short_preview_is_untouched() {
        assert_eq!(preview("[]"), "[]");
    }
}
