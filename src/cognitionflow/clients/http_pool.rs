//! HTTP client pool for maintaining persistent connections per base URL.
//!
//! One `reqwest::Client` is kept per `(base URL, timeout)` pair so that every run talking
//! to the same provider reuses its connection pool, DNS lookups and TLS sessions.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<(String, u64), reqwest::Client>> =
        Mutex::new(HashMap::new());
}

/// Get or create a shared HTTP client for `base_url` with the given request timeout.
///
/// Building the client can fail (for instance when no TLS backend initializes); the error is
/// returned instead of panicking and nothing is cached in that case.
pub fn get_http_client(base_url: &str, timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    let key = (base_url.to_string(), timeout_secs);

    if let Ok(pool) = HTTP_CLIENT_POOL.lock() {
        if let Some(client) = pool.get(&key) {
            return Ok(client.clone());
        }
    }

    let client = reqwest::ClientBuilder::new()
        // Keep idle connections alive for 90 seconds
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    if let Ok(mut pool) = HTTP_CLIENT_POOL.lock() {
        pool.entry(key).or_insert_with(|| client.clone());
    }
    Ok(client)
}
