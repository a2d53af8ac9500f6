//! Order submission, confirmation reply, and live order types.
//!
//! Variant names use the exact wire strings the order endpoints expect, so
//! the Rust naming convention lint is suppressed where they collide.
#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order ticket
// ---------------------------------------------------------------------------

/// Buy or sell side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    BUY,
    SELL,
}

/// Order type supported by the submission payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order.
    MKT,
    /// Limit order.
    LMT,
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    /// Valid for the trading day.
    DAY,
    /// Good till cancelled.
    GTC,
}

/// One order leg of a submission payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTicket {
    /// Contract identifier to trade.
    pub conid: i64,
    /// Order type.
    pub order_type: OrderType,
    /// Side.
    pub side: OrderSide,
    /// Time in force.
    pub tif: Tif,
    /// Share quantity.
    pub quantity: i64,
}

impl OrderTicket {
    /// A DAY market buy, the shape the recurring engine submits.
    pub fn market_buy(conid: i64, quantity: i64) -> Self {
        Self {
            conid,
            order_type: OrderType::MKT,
            side: OrderSide::BUY,
            tif: Tif::DAY,
            quantity,
        }
    }
}

/// Body of `POST /iserver/account/{acct}/orders`.
#[derive(Debug, Clone, Serialize)]
pub struct OrdersPayload {
    /// Order legs; the recurring engine always submits exactly one.
    pub orders: Vec<OrderTicket>,
}

// ---------------------------------------------------------------------------
// Confirmation replies
// ---------------------------------------------------------------------------

/// Body of `POST /iserver/reply/{replyId}`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmRequest {
    /// Always `true`: accept the prompt and proceed.
    pub confirmed: bool,
}

/// An order acknowledgement extracted from the reply protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlacement {
    /// Broker-issued order id.
    pub order_id: String,
    /// Submission status, when reported.
    pub order_status: Option<String>,
}

// ---------------------------------------------------------------------------
// Live orders
// ---------------------------------------------------------------------------

/// Response from `GET /iserver/account/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveOrdersResponse {
    /// Orders known to the session for the day.
    #[serde(default)]
    pub orders: Vec<LiveOrder>,
}

/// One live order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveOrder {
    /// Broker order id.
    pub order_id: i64,
    /// Current status, e.g. `Submitted`, `Filled`.
    #[serde(default)]
    pub status: Option<String>,
    /// Ticker symbol.
    #[serde(default)]
    pub ticker: Option<String>,
    /// Side as reported by the server.
    #[serde(default)]
    pub side: Option<String>,
    /// Total order size.
    #[serde(default)]
    pub total_size: Option<f64>,
}
