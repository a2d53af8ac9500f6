//! Market data snapshot types.
//!
//! The snapshot endpoint returns an array of flat objects keyed by numeric
//! field id strings (`"31"` last, `"84"` bid, `"86"` ask). Values arrive as
//! numbers or as strings that may carry a one-letter marker prefix (`C` for
//! a close price, `H` for halted), so parsing is deliberately lenient.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::constants::fields;

/// Raw snapshot row as returned by the wire.
pub type SnapshotRow = HashMap<String, Value>;

/// Last/bid/ask extracted from one snapshot row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct MarketSnapshot {
    /// Last traded price (field 31).
    pub last: Option<f64>,
    /// Best bid (field 84).
    pub bid: Option<f64>,
    /// Best ask (field 86).
    pub ask: Option<f64>,
}

impl MarketSnapshot {
    /// Extract the priced fields from a raw snapshot row.
    pub fn from_row(row: &SnapshotRow) -> Self {
        let field = |id: u32| row.get(&id.to_string()).and_then(parse_price);
        Self {
            last: field(fields::LAST_PRICE),
            bid: field(fields::BID_PRICE),
            ask: field(fields::ASK_PRICE),
        }
    }

    /// Price used for quantity selection and notional reporting: the last
    /// trade when present, otherwise the bid/ask midpoint.
    pub fn best_price(&self) -> Option<f64> {
        if self.last.is_some() {
            return self.last;
        }
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// Parse a snapshot value, tolerating marker prefixes on string payloads.
fn parse_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            let parsed: f64 = trimmed.parse().ok()?;
            Some(parsed)
        }
        _ => None,
    }
}
