//! Order submission and live-order endpoints.
//!
//! Submission runs the broker's confirmation-reply protocol: the first POST
//! may answer with one or more prompts, each carrying a reply id that must
//! be confirmed before an order id is issued. The loop is a small state
//! machine with an explicit reply budget; blowing the budget is a protocol
//! error, not a retry.

use serde_json::Value;

use crate::broker::client::BrokerClient;
use crate::broker::types::orders::{
    ConfirmRequest, LiveOrdersResponse, OrderPlacement, OrderTicket, OrdersPayload,
};
use crate::constants::{endpoints, orders::MAX_CONFIRM_REPLIES};
use crate::error::{Error, Result};

/// Where one reply-protocol response leaves the submission.
#[derive(Debug, Clone, PartialEq)]
enum ReplyStep {
    /// An order id was issued.
    Done(OrderPlacement),
    /// The server wants a confirmation for this reply id.
    Replying(String),
    /// The server rejected the submission.
    Failed(String),
}

/// Classify one response of the reply protocol.
fn next_step(response: &Value) -> ReplyStep {
    if let Some(items) = response.as_array() {
        for item in items {
            if let Some(order_id) = item.get("order_id").and_then(Value::as_str) {
                return ReplyStep::Done(OrderPlacement {
                    order_id: order_id.to_owned(),
                    order_status: item
                        .get("order_status")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                });
            }
        }
        for item in items {
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                return ReplyStep::Replying(id.to_owned());
            }
        }
        let detail = items
            .iter()
            .filter_map(|item| item.get("error").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; ");
        if !detail.is_empty() {
            return ReplyStep::Failed(detail);
        }
        return ReplyStep::Failed("reply carried neither an order id nor a prompt".into());
    }
    if let Some(error) = response.get("error").and_then(Value::as_str) {
        return ReplyStep::Failed(error.to_owned());
    }
    ReplyStep::Failed("unexpected reply shape".into())
}

impl BrokerClient {
    /// Submit an order and drive the confirmation-reply protocol to an
    /// order id.
    ///
    /// **Endpoints:** `POST /iserver/account/{acct}/orders`,
    /// `POST /iserver/reply/{replyId}`
    pub async fn place_order(
        &self,
        account: &str,
        ticket: &OrderTicket,
    ) -> Result<OrderPlacement> {
        let payload = OrdersPayload {
            orders: vec![ticket.clone()],
        };
        let mut response: Value = self
            .post(&format!("/iserver/account/{account}/orders"), &payload)
            .await?;

        let mut replies = 0u32;
        loop {
            match next_step(&response) {
                ReplyStep::Done(placement) => {
                    tracing::info!(
                        order_id = %placement.order_id,
                        conid = ticket.conid,
                        quantity = ticket.quantity,
                        "order placed"
                    );
                    return Ok(placement);
                }
                ReplyStep::Failed(reason) => return Err(Error::OrderProtocol(reason)),
                ReplyStep::Replying(id) => {
                    if replies >= MAX_CONFIRM_REPLIES {
                        return Err(Error::OrderProtocol(format!(
                            "confirmation prompts exceeded {MAX_CONFIRM_REPLIES} replies"
                        )));
                    }
                    replies += 1;
                    tracing::debug!(reply_id = %id, replies, "answering confirmation prompt");
                    response = self
                        .post(
                            &format!("/iserver/reply/{id}"),
                            &ConfirmRequest { confirmed: true },
                        )
                        .await?;
                }
            }
        }
    }

    /// Retrieve the live orders known to this session.
    ///
    /// **Endpoint:** `GET /iserver/account/orders`
    pub async fn get_orders(&self) -> Result<LiveOrdersResponse> {
        self.get(endpoints::ORDERS).await
    }
}
