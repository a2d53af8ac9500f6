//! Recurring-order engine.
//!
//! [`OrderEngine::execute_due`] is the one entry point: it reads the active
//! rows, filters them to the due set for the current calendar day, and runs
//! each due row through the resolve → price → quantity → place → log
//! pipeline, strictly in ascending row order. Per-order failures become
//! [`Outcome::Rejected`] or [`Outcome::Error`] results and never interrupt
//! the batch; batch-level failures abort the run and still produce a
//! terminal notification.
//!
//! Invocation is exclusive: a second caller while a run is in flight gets
//! [`Error::Busy`] back without side effects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::model::{
    AggregateResult, EngineStatus, ExecutionResult, Frequency, Outcome, RecurringOrder,
};
use crate::notify::Notify;
use crate::sheet::OrderSheet;

/// Format for timestamps embedded in sheet log lines.
const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// The recurring-order execution engine.
pub struct OrderEngine {
    broker: Arc<dyn Broker>,
    sheet: Arc<dyn OrderSheet>,
    notifier: Arc<dyn Notify>,
    tz: Tz,
    /// Configured account override; discovered via the broker when absent.
    account_id: Option<String>,
    /// Exclusive run guard; try-lock semantics yield `Busy`.
    in_flight: tokio::sync::Mutex<()>,
    status: Mutex<EngineStatus>,
    shutdown: watch::Receiver<bool>,
}

impl OrderEngine {
    /// Wire up an engine over its collaborators.
    pub fn new(
        broker: Arc<dyn Broker>,
        sheet: Arc<dyn OrderSheet>,
        notifier: Arc<dyn Notify>,
        tz: Tz,
        account_id: Option<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            sheet,
            notifier,
            tz,
            account_id,
            in_flight: tokio::sync::Mutex::new(()),
            status: Mutex::new(EngineStatus::default()),
            shutdown,
        }
    }

    /// Snapshot of the last run for status surfaces.
    pub fn status(&self) -> EngineStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Active orders due on the given instant, for status previews.
    pub async fn due_preview(&self, now: DateTime<Utc>) -> Result<Vec<RecurringOrder>> {
        let date = now.with_timezone(&self.tz).date_naive();
        let orders = self.sheet.list_orders().await?;
        Ok(orders
            .into_iter()
            .filter(|order| order.is_active())
            .filter(|order| {
                Frequency::parse(&order.frequency).is_some_and(|f| f.is_due(date))
            })
            .collect())
    }

    /// Execute every due order once.
    ///
    /// Returns `Err(Busy)` when a run is already in flight; every other
    /// failure mode is captured inside the returned aggregate.
    pub async fn execute_due(&self, now: DateTime<Utc>) -> Result<AggregateResult> {
        let _guard = self.in_flight.try_lock().map_err(|_| Error::Busy)?;
        tracing::info!(%now, "recurring order run started");

        let report = self.run_batch(now).await;

        if let Err(e) = self.notifier.send(&report).await {
            tracing::warn!(error = %e, "run notification could not be delivered");
        }
        *self.status.lock().expect("status lock poisoned") = EngineStatus {
            last_run_at: Some(now),
            last_result: Some(report.clone()),
        };
        tracing::info!(
            total = report.total(),
            placed = report.success_count(),
            aborted = report.aborted.is_some(),
            "recurring order run finished"
        );
        Ok(report)
    }

    async fn run_batch(&self, now: DateTime<Utc>) -> AggregateResult {
        let local = now.with_timezone(&self.tz);
        let date = local.date_naive();
        let timestamp_local = local.format(LOG_TIMESTAMP_FORMAT).to_string();

        let abort = |reason: String| AggregateResult {
            started_at: now,
            finished_at: Utc::now(),
            results: Vec::new(),
            aborted: Some(reason),
        };

        let orders = match self.sheet.list_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "could not list recurring orders");
                return abort(format!("failed to list recurring orders: {e}"));
            }
        };

        // Row-order work list: each active row is either due, silently not
        // due, or malformed enough that its dueness cannot be decided (which
        // is a row-scoped error, not a batch failure). Each row runs at most
        // once per call.
        let mut seen = HashSet::new();
        let mut work: Vec<(RecurringOrder, std::result::Result<Frequency, String>)> = Vec::new();
        for order in orders {
            if !order.is_active() || !seen.insert(order.row_index) {
                continue;
            }
            match Frequency::parse(&order.frequency) {
                Some(frequency) if frequency.is_due(date) => {
                    work.push((order, Ok(frequency)));
                }
                Some(_) => {}
                None => {
                    let reason = format!("unrecognized frequency `{}`", order.frequency);
                    work.push((order, Err(reason)));
                }
            }
        }

        let account = if work.iter().any(|(_, w)| w.is_ok()) {
            match &self.account_id {
                Some(account) => Some(account.clone()),
                None => match self.broker.primary_account().await {
                    Ok(account) => Some(account),
                    Err(e) => {
                        tracing::error!(error = %e, "could not resolve brokerage account");
                        return abort(format!("failed to resolve brokerage account: {e}"));
                    }
                },
            }
        } else {
            None
        };

        let mut results = Vec::with_capacity(work.len());
        for (order, item) in work {
            let result = match item {
                Err(reason) => {
                    self.result_for(&order, 0, 0.0, None, Outcome::Rejected, reason)
                }
                Ok(_) => {
                    if *self.shutdown.borrow() {
                        self.result_for(&order, 0, 0.0, None, Outcome::Skipped, "shutdown".into())
                    } else {
                        let account = account.as_deref().expect("account resolved for due work");
                        self.execute_order(account, &order).await
                    }
                }
            };

            let line = result.log_line(&timestamp_local);
            if let Err(e) = self.sheet.append_log(result.row_index, &line).await {
                tracing::warn!(row = result.row_index, error = %e, "log append failed");
            }
            results.push(result);
        }

        AggregateResult {
            started_at: now,
            finished_at: Utc::now(),
            results,
            aborted: None,
        }
    }

    /// Resolve → price → quantity → place for one due row.
    async fn execute_order(&self, account: &str, order: &RecurringOrder) -> ExecutionResult {
        let symbol = order.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return self.result_for(order, 0, 0.0, None, Outcome::Rejected, "missing symbol".into());
        }

        let conid = match self.broker.resolve_symbol(&symbol).await {
            Ok(Some(conid)) => conid,
            Ok(None) => {
                return self.result_for(order, 0, 0.0, None, Outcome::Rejected, "unresolved symbol".into());
            }
            Err(e) => {
                tracing::warn!(%symbol, error = %e, "symbol resolution failed");
                return self.result_for(order, 0, 0.0, None, Outcome::Rejected, "unresolved symbol".into());
            }
        };

        let fill_price = match self.broker.snapshot(conid).await {
            Ok(snapshot) => snapshot.best_price().or(order.price_hint),
            Err(e) => {
                tracing::warn!(%symbol, error = %e, "snapshot failed, falling back to hint");
                order.price_hint
            }
        };
        let Some(fill_price) = fill_price.filter(|p| *p > 0.0) else {
            return self.result_for(order, 0, 0.0, None, Outcome::Rejected, "no price".into());
        };

        let quantity = match (order.qty_to_buy, order.amount_usd) {
            (Some(qty), _) if qty >= 1 => qty,
            (_, Some(amount)) if amount > 0.0 => (amount / fill_price).floor() as i64,
            _ => {
                return self.result_for(order, 0, fill_price, None, Outcome::Rejected, "no quantity or amount".into());
            }
        };
        if quantity < 1 {
            return self.result_for(order, 0, fill_price, None, Outcome::Rejected, "sub-share notional".into());
        }

        match self.broker.place_market_buy(account, conid, quantity).await {
            Ok(placement) => self.result_for(
                order,
                quantity,
                fill_price,
                Some(placement.order_id),
                Outcome::Placed,
                "placed".into(),
            ),
            Err(e) => {
                self.result_for(order, quantity, fill_price, None, Outcome::Error, e.to_string())
            }
        }
    }

    fn result_for(
        &self,
        order: &RecurringOrder,
        requested_qty: i64,
        fill_price: f64,
        order_id: Option<String>,
        outcome: Outcome,
        message: String,
    ) -> ExecutionResult {
        ExecutionResult {
            row_index: order.row_index,
            symbol: order.symbol.trim().to_uppercase(),
            requested_qty,
            fill_price,
            order_id,
            outcome,
            message,
            frequency: order.frequency.trim().to_owned(),
            timestamp: Utc::now(),
        }
    }
}
