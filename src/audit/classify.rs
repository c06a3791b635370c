use crate::audit::models::{ItemRecord, ItemState, Price};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTemplate {
    base: String,
}

impl LinkTemplate {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/{id}/`
    pub fn item(&self, id: impl std::fmt::Display) -> String {
        format!("{}/{}/", self.base, id)
    }

    /// `{base}/{id}`, the form used for duplicate listings.
    pub fn bare(&self, id: impl std::fmt::Display) -> String {
        format!("{}/{}", self.base, id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountEntry {
    pub item_id: String,
    pub link: String,
    pub price: Price,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub sold: Vec<AccountEntry>,
    pub unsold: Vec<AccountEntry>,
    /// Links of items the market reports as deleted.
    pub deleted: Vec<String>,
    /// Raw keys whose entry was not a record object.
    pub malformed: Vec<String>,
    /// Sold or unsold ids whose price was unknown and counted as zero.
    pub unpriced: Vec<String>,
    pub total_sold: f64,
    pub total_unsold: f64,
}

impl Classification {
    pub fn item_count(&self) -> usize {
        self.sold.len() + self.unsold.len() + self.deleted.len() + self.malformed.len()
    }

    fn push_priced(&mut self, sold: bool, item_id: String, link: String, price: Price) {
        if !price.is_known() {
            self.unpriced.push(item_id.clone());
        }
        let entry = AccountEntry {
            item_id,
            link,
            price,
        };
        if sold {
            self.total_sold += price.amount();
            self.sold.push(entry);
        } else {
            self.total_unsold += price.amount();
            self.unsold.push(entry);
        }
    }
}

/// Buckets every entry of every payload's `items` map. Each key lands in
/// exactly one of sold, unsold, deleted or malformed.
pub fn classify(payloads: &[Value], links: &LinkTemplate) -> Classification {
    let mut out = Classification::default();
    for payload in payloads {
        let Some(items) = payload.get("items") else {
            continue;
        };
        let Some(items) = items.as_object() else {
            warn!(target: "audit.pipeline", "lookup payload `items` is not an object");
            continue;
        };
        for (item_id, details) in items {
            let Some(record) = ItemRecord::from_details(details) else {
                out.malformed.push(item_id.clone());
                continue;
            };
            let link = links.item(item_id);
            match record.state {
                ItemState::Paid => out.push_priced(true, item_id.clone(), link, record.price),
                ItemState::Deleted => out.deleted.push(link),
                ItemState::Other(_) => out.push_priced(false, item_id.clone(), link, record.price),
            }
        }
    }
    out
}
