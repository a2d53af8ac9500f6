//! Recurring-order worksheet adapter.
//!
//! The worksheet is the system of record: row 1 is the header, data starts
//! at row 2, and columns are discovered by header name (case-insensitive,
//! whitespace-trimmed). Unknown columns are ignored; missing required
//! columns fail with a schema error naming them.
//!
//! [`OrderSheet`] is the seam the engine consumes; [`google::GoogleSheet`]
//! is the production implementation.

pub mod google;

pub use google::GoogleSheet;

use crate::constants::sheet::LOG_COLUMNS;
use crate::error::{Error, Result};
use crate::model::RecurringOrder;

/// Read/write access to the recurring-order worksheet.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait OrderSheet: Send + Sync {
    /// All data rows in worksheet order, with their 1-based row index.
    async fn list_orders(&self) -> Result<Vec<RecurringOrder>>;

    /// Append `message` to the row's first empty log cell.
    ///
    /// At-least-once: callers embed a timestamp so duplicates are
    /// distinguishable.
    async fn append_log(&self, row_index: u32, message: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Column discovery and row parsing
// ---------------------------------------------------------------------------

/// Resolved 0-based column positions for the known headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Columns {
    pub status: usize,
    pub symbol: usize,
    pub price_hint: Option<usize>,
    pub amount_usd: Option<usize>,
    pub qty_to_buy: Option<usize>,
    pub frequency: usize,
    pub log: usize,
}

fn normalize(header: &str) -> String {
    header.trim().to_ascii_lowercase()
}

/// Map header names to column positions.
///
/// `status`, `symbol`, `frequency`, and `log` are required; the price,
/// amount, and quantity columns are optional (their absence simply leaves
/// every row without that field).
pub(crate) fn map_columns(headers: &[String]) -> Result<Columns> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&normalize(h).as_str()))
    };

    let status = find(&["status"]);
    let symbol = find(&["symbol", "ticker"]);
    let frequency = find(&["frequency", "freq"]);
    let log = find(&["log"]);

    let mut missing = Vec::new();
    for (name, found) in [
        ("status", status),
        ("symbol", symbol),
        ("frequency", frequency),
        ("log", log),
    ] {
        if found.is_none() {
            missing.push(name);
        }
    }
    if !missing.is_empty() {
        return Err(Error::SheetSchema(missing.join(", ")));
    }

    Ok(Columns {
        status: status.expect("checked above"),
        symbol: symbol.expect("checked above"),
        price_hint: find(&["price", "price_hint"]),
        amount_usd: find(&["amount_usd", "amount", "usd"]),
        qty_to_buy: find(&["qty_to_buy", "qty", "quantity"]),
        frequency: frequency.expect("checked above"),
        log: log.expect("checked above"),
    })
}

/// Parse the raw worksheet grid into recurring orders.
///
/// Fully empty rows are skipped but still consume their row index, so
/// writes keep addressing the physical sheet.
pub(crate) fn parse_rows(grid: &[Vec<String>]) -> Result<Vec<RecurringOrder>> {
    let headers = grid
        .first()
        .ok_or_else(|| Error::SheetSchema("header row".into()))?;
    let columns = map_columns(headers)?;

    let cell = |row: &Vec<String>, index: usize| -> String {
        row.get(index).map(|v| v.trim().to_owned()).unwrap_or_default()
    };

    let mut orders = Vec::new();
    for (offset, row) in grid.iter().enumerate().skip(1) {
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        orders.push(RecurringOrder {
            row_index: (offset + 1) as u32,
            status: cell(row, columns.status),
            symbol: cell(row, columns.symbol),
            price_hint: columns.price_hint.and_then(|i| parse_decimal(&cell(row, i))),
            amount_usd: columns.amount_usd.and_then(|i| parse_decimal(&cell(row, i))),
            qty_to_buy: columns.qty_to_buy.and_then(|i| parse_quantity(&cell(row, i))),
            frequency: cell(row, columns.frequency),
            log: cell(row, columns.log),
        });
    }
    Ok(orders)
}

/// Parse a currency-ish cell, tolerating `$` and thousands separators.
fn parse_decimal(value: &str) -> Option<f64> {
    let cleaned = value.replace(['$', ','], "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Parse a whole-share quantity cell.
fn parse_quantity(value: &str) -> Option<i64> {
    let cleaned = value.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(quantity) = cleaned.parse::<i64>() {
        return Some(quantity);
    }
    // Sheets often renders integers as "3.0".
    let as_float: f64 = cleaned.parse().ok()?;
    (as_float.fract() == 0.0).then_some(as_float as i64)
}

/// Index of the first empty log slot, if any, among the bounded log cells.
pub(crate) fn first_empty_log_slot(log_cells: &[String]) -> Option<usize> {
    (0..LOG_COLUMNS).find(|&slot| {
        log_cells
            .get(slot)
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    })
}
