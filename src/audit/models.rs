use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_RETAINED_PERCENT: u32 = 70;
const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Price {
    Amount(f64),
    Unknown,
}

impl Price {
    /// Numbers and numeric strings are amounts; anything else is unknown.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n.as_f64().map(Price::Amount).unwrap_or(Price::Unknown),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Price::Amount)
                .unwrap_or(Price::Unknown),
            _ => Price::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Price::Amount(_))
    }

    /// Contribution to a total; unknown prices count as zero.
    pub fn amount(&self) -> f64 {
        match self {
            Price::Amount(v) => *v,
            Price::Unknown => 0.0,
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Amount(v) => f.write_str(&format_amount(*v)),
            Price::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Price::Amount(v) => serializer.serialize_f64(*v),
            Price::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

/// Whole amounts print without a fractional part.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemState {
    Paid,
    Deleted,
    Other(String),
}

impl ItemState {
    pub fn from_raw(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("paid") => ItemState::Paid,
            Some("deleted") => ItemState::Deleted,
            Some(other) => ItemState::Other(other.to_string()),
            None => ItemState::Other(UNKNOWN.to_string()),
        }
    }
}

/// The parts of one `items` entry that drive classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub state: ItemState,
    pub price: Price,
}

impl ItemRecord {
    /// `None` when the entry is not an object. A missing or non-object
    /// `item` field reads as unknown state and price.
    pub fn from_details(details: &Value) -> Option<Self> {
        let entry = details.as_object()?;
        let item = entry.get("item").and_then(Value::as_object);
        Some(Self {
            state: ItemState::from_raw(item.and_then(|i| i.get("item_state"))),
            price: Price::from_value(item.and_then(|i| i.get("priceWithSellerFee"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeePolicy {
    pub retained_percent: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            retained_percent: DEFAULT_RETAINED_PERCENT,
        }
    }
}

impl FeePolicy {
    pub fn new(retained_percent: u32) -> Self {
        Self {
            retained_percent: retained_percent.min(100),
        }
    }

    /// floor(total * retained / 100), multiplied before dividing so whole
    /// totals stay exact.
    pub fn apply(&self, total: f64) -> i64 {
        (total * f64::from(self.retained_percent) / 100.0).floor() as i64
    }

    pub fn deducted_percent(&self) -> u32 {
        100 - self.retained_percent
    }
}
