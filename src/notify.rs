//! Run notifications.
//!
//! One webhook POST per engine run: a rich-embed summary plus one field per
//! order, a "no orders today" variant for an empty due set, and a terminal
//! variant when the batch aborted. Delivery failure never fails the run —
//! it is logged, retried once after a short delay (honoring `Retry-After`
//! on 429), and then only recorded.

use std::time::Duration;

use serde_json::{Value, json};

use crate::constants::notify::RETRY_DELAY_SECS;
use crate::constants::timeouts;
use crate::error::{Error, Result};
use crate::model::AggregateResult;

/// Embed accent colors.
const COLOR_OK: u32 = 0x2ecc71;
const COLOR_PARTIAL: u32 = 0xe67e22;
const COLOR_FAILED: u32 = 0xe74c3c;

/// Sink for per-run reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Notify: Send + Sync {
    /// Deliver one run report.
    async fn send(&self, report: &AggregateResult) -> Result<()>;
}

/// Webhook-backed notifier.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    retry_delay: Duration,
}

impl WebhookNotifier {
    /// Build a notifier for the configured webhook URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeouts::WEBHOOK_SECS))
                .build()
                .expect("failed to build reqwest client"),
            url: url.into(),
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }

    async fn post_once(&self, payload: &Value) -> std::result::Result<(), (String, Option<u64>)> {
        let resp = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| (e.to_string(), None))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = resp.text().await.unwrap_or_default();
        Err((format!("HTTP {status}: {body}"), retry_after))
    }
}

#[async_trait::async_trait]
impl Notify for WebhookNotifier {
    async fn send(&self, report: &AggregateResult) -> Result<()> {
        let payload = build_payload(report);
        let (first_failure, retry_after) = match self.post_once(&payload).await {
            Ok(()) => return Ok(()),
            Err((reason, retry_after)) => (reason, retry_after),
        };

        let delay = retry_after
            .map(Duration::from_secs)
            .unwrap_or(self.retry_delay);
        tracing::warn!(error = %first_failure, ?delay, "webhook delivery failed, retrying once");
        tokio::time::sleep(delay).await;

        self.post_once(&payload)
            .await
            .map_err(|(reason, _)| Error::Notify(reason))
    }
}

// ---------------------------------------------------------------------------
// Payload construction
// ---------------------------------------------------------------------------

/// Build the webhook document for one run report.
pub(crate) fn build_payload(report: &AggregateResult) -> Value {
    if let Some(reason) = &report.aborted {
        return json!({
            "content": "❌ Recurring order run failed",
            "embeds": [{
                "title": "Recurring orders",
                "description": reason,
                "color": COLOR_FAILED,
                "timestamp": report.finished_at.to_rfc3339(),
            }],
        });
    }

    if report.results.is_empty() {
        return json!({
            "content": "📭 No orders today",
            "embeds": [{
                "title": "Recurring orders",
                "description": "No recurring orders were due this run.",
                "color": COLOR_OK,
                "timestamp": report.finished_at.to_rfc3339(),
            }],
        });
    }

    let success = report.success_count();
    let total = report.total();
    let color = if success == total {
        COLOR_OK
    } else if success > 0 {
        COLOR_PARTIAL
    } else {
        COLOR_FAILED
    };

    let fields: Vec<Value> = report
        .results
        .iter()
        .map(|result| {
            let value = match &result.order_id {
                Some(order_id) => format!(
                    "{} @ ${:.2} = ${:.2}\norder {order_id}",
                    result.requested_qty,
                    result.fill_price,
                    result.notional(),
                ),
                None => result.message.clone(),
            };
            json!({
                "name": format!("{} {}", result.outcome.icon(), result.symbol),
                "value": value,
                "inline": true,
            })
        })
        .collect();

    json!({
        "embeds": [{
            "title": "Recurring orders",
            "description": format!(
                "{success}/{total} placed · ${:.2} total",
                report.total_notional()
            ),
            "color": color,
            "fields": fields,
            "timestamp": report.finished_at.to_rfc3339(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionResult, Outcome};
    use chrono::Utc;

    fn placed(symbol: &str, qty: i64, price: f64) -> ExecutionResult {
        ExecutionResult {
            row_index: 2,
            symbol: symbol.into(),
            requested_qty: qty,
            fill_price: price,
            order_id: Some("X1".into()),
            outcome: Outcome::Placed,
            message: "placed".into(),
            frequency: "Daily".into(),
            timestamp: Utc::now(),
        }
    }

    fn report(results: Vec<ExecutionResult>, aborted: Option<String>) -> AggregateResult {
        AggregateResult {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results,
            aborted,
        }
    }

    #[test]
    fn empty_run_produces_no_orders_variant() {
        let payload = build_payload(&report(vec![], None));
        assert_eq!(payload["content"], "📭 No orders today");
    }

    #[test]
    fn summary_counts_and_notional() {
        let mut failed = placed("ZZZZ", 0, 0.0);
        failed.outcome = Outcome::Rejected;
        failed.order_id = None;
        failed.message = "unresolved symbol".into();

        let payload = build_payload(&report(vec![placed("AAPL", 2, 200.0), failed], None));
        let embed = &payload["embeds"][0];
        assert_eq!(embed["description"], "1/2 placed · $400.00 total");
        assert_eq!(embed["color"], COLOR_PARTIAL);
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0]["name"], "✅ AAPL");
        assert_eq!(fields[1]["value"], "unresolved symbol");
    }

    #[test]
    fn aborted_run_reports_the_reason() {
        let payload = build_payload(&report(vec![], Some("sheet unreachable".into())));
        assert_eq!(payload["content"], "❌ Recurring order run failed");
        assert_eq!(payload["embeds"][0]["description"], "sheet unreachable");
        assert_eq!(payload["embeds"][0]["color"], COLOR_FAILED);
    }

    #[tokio::test]
    async fn delivery_retries_exactly_once() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("boom")
            .expect(2)
            .create_async()
            .await;

        let notifier = WebhookNotifier {
            http: reqwest::Client::new(),
            url: format!("{}/hook", server.url()),
            retry_delay: Duration::from_millis(10),
        };
        let err = notifier.send(&report(vec![], None)).await;
        assert!(matches!(err, Err(Error::Notify(_))));
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn successful_delivery_posts_once() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let notifier = WebhookNotifier {
            http: reqwest::Client::new(),
            url: format!("{}/hook", server.url()),
            retry_delay: Duration::from_millis(10),
        };
        notifier.send(&report(vec![placed("SPY", 1, 445.75)], None)).await.unwrap();
        hook.assert_async().await;
    }
}
