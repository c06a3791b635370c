//! In-process stand-in for the bulk-lookup endpoint.

use crate::market::config::ITEM_ID_FIELD;
use axum::{Json, Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

type Responder = dyn Fn(usize, &[String]) -> (u16, Value) + Send + Sync;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub item_ids: Vec<String>,
}

#[derive(Clone)]
struct MockState {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<CapturedRequest>>>,
}

pub struct MockMarket {
    url: String,
    calls: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockMarket {
    /// `responder` receives the zero-based call number and the submitted ids.
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(usize, &[String]) -> (u16, Value) + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            responder: Arc::new(responder),
            calls: calls.clone(),
        };
        let app = Router::new()
            .route("/bulk-items", post(bulk_items))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock market");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            url: format!("http://{addr}/bulk-items"),
            calls,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn calls(&self) -> Vec<CapturedRequest> {
        self.calls.lock().await.clone()
    }
}

async fn bulk_items(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let item_ids = parse_item_ids(&body);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let call = {
        let mut guard = state.calls.lock().await;
        guard.push(CapturedRequest {
            authorization: header("authorization"),
            accept: header("accept"),
            item_ids: item_ids.clone(),
        });
        guard.len() - 1
    };
    let (status, payload) = (state.responder)(call, &item_ids);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(payload))
}

fn parse_item_ids(body: &str) -> Vec<String> {
    body.split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| {
            urlencoding::decode(key)
                .map(|key| key == ITEM_ID_FIELD)
                .unwrap_or(false)
        })
        .filter_map(|(_, value)| urlencoding::decode(value).ok().map(|v| v.into_owned()))
        .collect()
}
