//! Shared HTTP client used by every provider adapter.
//!
//! One `reqwest::Client` is built at router construction time and cloned into each adapter;
//! `reqwest::Client` is internally reference-counted, so cloning is cheap and all adapters share
//! the same connection pool.

use std::time::Duration;

/// Requests routinely run for minutes while a model streams; this timeout bounds the whole
/// request rather than being tuned for a typical short-lived API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Builds the shared client used for all upstream provider calls.
pub fn build() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()
}
