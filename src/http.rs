use reqwest::Client;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Shared client with bounded request and connect timeouts.
pub fn build_client() -> Client {
    let timeout = secs_or(std::env::var("HTTP_TIMEOUT_SECS").ok(), DEFAULT_TIMEOUT_SECS);
    let connect = secs_or(
        std::env::var("HTTP_CONNECT_TIMEOUT_SECS").ok(),
        DEFAULT_CONNECT_TIMEOUT_SECS,
    );
    Client::builder()
        .timeout(timeout)
        .connect_timeout(connect)
        .user_agent(concat!("market-audit-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            warn!(
                target: "audit.lookup",
                error = %err,
                "http client build failed; falling back to a client without timeouts"
            );
            Client::new()
        })
}

fn secs_or(raw: Option<String>, default: u64) -> Duration {
    let secs = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
