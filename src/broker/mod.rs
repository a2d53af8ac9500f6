//! OAuth1-signed broker client.
//!
//! [`BrokerClient`] owns the authenticated session: RSA-SHA256-signed
//! live-session-token derivation ([`lst`]), HMAC-SHA256 request signing
//! ([`oauth`]), the keep-alive [`tickler`], and typed endpoint wrappers
//! ([`api`] / [`types`]).
//!
//! The [`Broker`] trait is the seam the order engine consumes: the concrete
//! client implements it, and tests substitute mocks. One client value is
//! constructed at startup and shared by reference; there are no process
//! globals.

pub mod api;
pub mod client;
pub(crate) mod lst;
pub(crate) mod oauth;
pub mod tickler;
pub mod types;

pub use client::BrokerClient;
pub use lst::LiveSession;
pub use tickler::{Tickler, TicklerState};

use crate::broker::types::marketdata::MarketSnapshot;
use crate::broker::types::orders::{OrderPlacement, OrderTicket};
use crate::error::Result;

/// The broker operations the recurring-order engine depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// The account id to trade against.
    async fn primary_account(&self) -> Result<String>;

    /// Resolve a ticker symbol to a conid; `None` when unresolved.
    async fn resolve_symbol(&self, symbol: &str) -> Result<Option<i64>>;

    /// Last/bid/ask snapshot for a contract.
    async fn snapshot(&self, conid: i64) -> Result<MarketSnapshot>;

    /// Submit a DAY market buy and drive it to an order id.
    async fn place_market_buy(
        &self,
        account: &str,
        conid: i64,
        quantity: i64,
    ) -> Result<OrderPlacement>;
}

#[async_trait::async_trait]
impl Broker for BrokerClient {
    async fn primary_account(&self) -> Result<String> {
        BrokerClient::primary_account(self).await
    }

    async fn resolve_symbol(&self, symbol: &str) -> Result<Option<i64>> {
        BrokerClient::resolve_symbol(self, symbol).await
    }

    async fn snapshot(&self, conid: i64) -> Result<MarketSnapshot> {
        self.get_snapshot(conid).await
    }

    async fn place_market_buy(
        &self,
        account: &str,
        conid: i64,
        quantity: i64,
    ) -> Result<OrderPlacement> {
        self.place_order(account, &OrderTicket::market_buy(conid, quantity))
            .await
    }
}
