//! Domain types for the recurring-order engine.
//!
//! [`RecurringOrder`] mirrors one row of the external worksheet and is never
//! cached across runs. [`ExecutionResult`] captures one placement attempt;
//! [`AggregateResult`] is the per-run rollup handed to the notifier, the
//! status surfaces, and the HTTP API.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

/// How often a recurring order is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Frequency {
    /// Due every run.
    Daily,
    /// Due on Mondays.
    Weekly,
    /// Due on the first calendar day of the month.
    Monthly,
}

impl Frequency {
    /// Parse a worksheet cell value, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            "monthly" => Some(Frequency::Monthly),
            _ => None,
        }
    }

    /// Whether an order of this frequency is due on `date`.
    pub fn is_due(self, date: NaiveDate) -> bool {
        match self {
            Frequency::Daily => true,
            Frequency::Weekly => date.weekday() == Weekday::Mon,
            Frequency::Monthly => date.day() == 1,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "Daily"),
            Frequency::Weekly => write!(f, "Weekly"),
            Frequency::Monthly => write!(f, "Monthly"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recurring order rows
// ---------------------------------------------------------------------------

/// One row of the recurring-order worksheet, as read.
///
/// Field values are kept close to the sheet's representation; validation
/// happens per row inside the engine so a malformed row rejects itself
/// without aborting the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringOrder {
    /// 1-based worksheet row position, used solely to address writes.
    pub row_index: u32,
    /// Row status; only `Active` (case-insensitive) rows are executed.
    pub status: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Informational price hint; never authoritative.
    pub price_hint: Option<f64>,
    /// Notional amount to invest, in USD.
    pub amount_usd: Option<f64>,
    /// Fixed share quantity; overrides `amount_usd` when present.
    pub qty_to_buy: Option<i64>,
    /// Raw frequency cell value.
    pub frequency: String,
    /// Current content of the first log cell; opaque, owned by the engine.
    pub log: String,
}

impl RecurringOrder {
    /// Whether the row is marked active.
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("active")
    }
}

// ---------------------------------------------------------------------------
// Execution results
// ---------------------------------------------------------------------------

/// Outcome of one placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Order accepted by the broker.
    Placed,
    /// Order not sent: the row failed a pipeline precondition.
    Rejected,
    /// Order not executed this run (shutdown or filtered late).
    Skipped,
    /// Broker or protocol failure during submission.
    Error,
}

impl Outcome {
    /// Icon used in sheet log lines and notifications.
    pub fn icon(self) -> &'static str {
        match self {
            Outcome::Placed => "✅",
            Outcome::Rejected => "⚠️",
            Outcome::Skipped => "⏭️",
            Outcome::Error => "❌",
        }
    }
}

/// Result of one order attempt within a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Worksheet row the attempt belongs to.
    pub row_index: u32,
    /// Ticker symbol.
    pub symbol: String,
    /// Shares requested (0 when rejected before quantity selection).
    pub requested_qty: i64,
    /// Price used for notional reporting at submission time.
    pub fill_price: f64,
    /// Broker-issued order id, when one was obtained.
    pub order_id: Option<String>,
    /// Attempt outcome.
    pub outcome: Outcome,
    /// Human-readable detail, appended to the row's log cell.
    pub message: String,
    /// Frequency cell of the originating row, as written in the sheet.
    pub frequency: String,
    /// Instant the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Notional value of the attempt (`fill_price × requested_qty`).
    pub fn notional(&self) -> f64 {
        self.fill_price * self.requested_qty as f64
    }

    /// The line appended to the row's log cell.
    ///
    /// `timestamp_local` is the run timestamp rendered in the business
    /// timezone by the caller.
    pub fn log_line(&self, timestamp_local: &str) -> String {
        format!(
            "{} {}: {} {} @ ${:.2} | id={} | {}",
            self.outcome.icon(),
            timestamp_local,
            self.symbol,
            self.requested_qty,
            self.fill_price,
            self.order_id.as_deref().unwrap_or("-"),
            self.frequency,
        )
    }
}

// ---------------------------------------------------------------------------
// Run aggregates
// ---------------------------------------------------------------------------

/// Rollup of one `execute_due` run.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    /// Instant the run started.
    pub started_at: DateTime<Utc>,
    /// Instant the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-order results, ascending row order.
    pub results: Vec<ExecutionResult>,
    /// Batch-level failure that aborted the run, when one occurred.
    pub aborted: Option<String>,
}

impl AggregateResult {
    /// Number of orders attempted.
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Number of successfully placed orders.
    pub fn success_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Placed)
            .count()
    }

    /// Number of rejected, errored, or skipped orders.
    pub fn failure_count(&self) -> usize {
        self.total() - self.success_count()
    }

    /// Sum of `fill_price × qty` over successfully placed orders.
    pub fn total_notional(&self) -> f64 {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Placed)
            .map(ExecutionResult::notional)
            .sum()
    }
}

/// Point-in-time engine status for operator surfaces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    /// Instant of the most recent run, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Aggregate of the most recent run, if any.
    pub last_result: Option<AggregateResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_case_insensitively() {
        assert_eq!(Frequency::parse("Daily"), Some(Frequency::Daily));
        assert_eq!(Frequency::parse(" WEEKLY "), Some(Frequency::Weekly));
        assert_eq!(Frequency::parse("monthly"), Some(Frequency::Monthly));
        assert_eq!(Frequency::parse("fortnightly"), None);
        assert_eq!(Frequency::parse(""), None);
    }

    #[test]
    fn due_set_calendar_rules() {
        // 2024-01-01 was a Monday and the first of the month.
        let monday_first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(Frequency::Daily.is_due(monday_first));
        assert!(Frequency::Weekly.is_due(monday_first));
        assert!(Frequency::Monthly.is_due(monday_first));

        // 2024-01-03 was a Wednesday.
        let wednesday = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert!(Frequency::Daily.is_due(wednesday));
        assert!(!Frequency::Weekly.is_due(wednesday));
        assert!(!Frequency::Monthly.is_due(wednesday));

        // 2024-01-08 was a Monday but not the first.
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert!(Frequency::Weekly.is_due(monday));
        assert!(!Frequency::Monthly.is_due(monday));
    }

    #[test]
    fn active_flag_is_case_insensitive() {
        let mut order = RecurringOrder {
            row_index: 2,
            status: "ACTIVE".into(),
            symbol: "AAPL".into(),
            price_hint: None,
            amount_usd: Some(100.0),
            qty_to_buy: None,
            frequency: "Daily".into(),
            log: String::new(),
        };
        assert!(order.is_active());
        order.status = " inactive ".into();
        assert!(!order.is_active());
    }

    #[test]
    fn log_line_format() {
        let result = ExecutionResult {
            row_index: 2,
            symbol: "AAPL".into(),
            requested_qty: 2,
            fill_price: 200.0,
            order_id: Some("X1".into()),
            outcome: Outcome::Placed,
            message: "placed".into(),
            frequency: "Daily".into(),
            timestamp: Utc::now(),
        };
        let line = result.log_line("2024-01-01 09:00:00 EST");
        assert_eq!(
            line,
            "✅ 2024-01-01 09:00:00 EST: AAPL 2 @ $200.00 | id=X1 | Daily"
        );
    }

    #[test]
    fn log_line_without_order_id_uses_dash() {
        let result = ExecutionResult {
            row_index: 3,
            symbol: "ZZZZZZ".into(),
            requested_qty: 0,
            fill_price: 0.0,
            order_id: None,
            outcome: Outcome::Rejected,
            message: "unresolved symbol".into(),
            frequency: "Weekly".into(),
            timestamp: Utc::now(),
        };
        let line = result.log_line("2024-01-01 09:00:00 EST");
        assert!(line.contains("id=-"));
        assert!(line.starts_with("⚠️"));
        assert!(line.ends_with("Weekly"));
    }

    #[test]
    fn aggregate_totals() {
        let placed = ExecutionResult {
            row_index: 2,
            symbol: "AAPL".into(),
            requested_qty: 2,
            fill_price: 200.0,
            order_id: Some("X1".into()),
            outcome: Outcome::Placed,
            message: "placed".into(),
            frequency: "Daily".into(),
            timestamp: Utc::now(),
        };
        let rejected = ExecutionResult {
            outcome: Outcome::Rejected,
            order_id: None,
            requested_qty: 0,
            fill_price: 0.0,
            ..placed.clone()
        };
        let run = AggregateResult {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results: vec![placed, rejected],
            aborted: None,
        };
        assert_eq!(run.total(), 2);
        assert_eq!(run.success_count(), 1);
        assert_eq!(run.failure_count(), 1);
        assert!((run.total_notional() - 400.0).abs() < f64::EPSILON);
    }
}
