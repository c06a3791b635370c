use once_cell::sync::Lazy;
use std::env;

pub const DEFAULT_API_URL: &str = "https://api.lzt.market/bulk-items";
pub const DEFAULT_LINK_BASE: &str = "https://lzt.market";

pub static API_URL: Lazy<String> =
    Lazy::new(|| env::var("MARKET_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()));

pub static MARKET_TOKEN: Lazy<String> =
    Lazy::new(|| env::var("MARKET_TOKEN").unwrap_or_default());

pub static LINK_BASE: Lazy<String> = Lazy::new(|| {
    env::var("MARKET_LINK_BASE")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_LINK_BASE.to_string())
});

/// Form field that carries one item id per occurrence.
pub const ITEM_ID_FIELD: &str = "item_id[]";
