use crate::audit::ItemId;
use crate::http::build_client;
use crate::market::config::{API_URL, ITEM_ID_FIELD, MARKET_TOKEN};
use reqwest::{Client, StatusCode, header::ACCEPT};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl LookupError {
    fn status(&self) -> Option<u16> {
        match self {
            LookupError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// A chunk whose lookup did not produce a payload. Its ids are absent from
/// every classification bucket.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub ids: Vec<ItemId>,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub payloads: Vec<Value>,
    pub failures: Vec<ChunkFailure>,
}

impl FetchOutcome {
    pub fn requested(&self) -> usize {
        self.payloads.len() + self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct LookupClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl LookupClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: build_client(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    pub fn from_env() -> Self {
        if MARKET_TOKEN.is_empty() {
            warn!(
                target: "audit.lookup",
                "MARKET_TOKEN is not set; bulk lookups will be unauthenticated"
            );
        }
        Self::new(API_URL.as_str(), MARKET_TOKEN.as_str())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issues one bulk-lookup call. Only `200 OK` counts as success.
    pub async fn lookup_chunk(&self, ids: &[ItemId]) -> Result<Value, LookupError> {
        let form: Vec<(&str, String)> = ids
            .iter()
            .map(|id| (ITEM_ID_FIELD, id.to_string()))
            .collect();
        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .bearer_auth(&self.token)
            .form(&form)
            .send()
            .await
            .map_err(|err| LookupError::Transport(err.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(LookupError::Status(response.status().as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| LookupError::Decode(err.to_string()))
    }

    /// Looks up every chunk in order, one request at a time, pausing `delay`
    /// between consecutive requests. Failed chunks are logged and skipped.
    pub async fn fetch_all(&self, chunks: &[Vec<ItemId>], delay: Duration) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            let started = Instant::now();
            match self.lookup_chunk(chunk).await {
                Ok(payload) => {
                    debug!(
                        target: "audit.lookup",
                        chunk = index,
                        size = chunk.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "chunk_lookup_ok"
                    );
                    outcome.payloads.push(payload);
                }
                Err(err) => {
                    warn!(
                        target: "audit.lookup",
                        chunk = index,
                        size = chunk.len(),
                        error = %err,
                        "chunk_lookup_failed"
                    );
                    outcome.failures.push(ChunkFailure {
                        index,
                        ids: chunk.clone(),
                        status: err.status(),
                        reason: err.to_string(),
                    });
                }
            }
            crate::metrics::chunk_fetched(index, started.elapsed().as_millis());
        }
        outcome
    }
}
