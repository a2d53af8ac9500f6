//! Session keep-alive endpoint.

use crate::broker::client::BrokerClient;
use crate::broker::types::session::TickleResponse;
use crate::constants::endpoints;
use crate::error::Result;

impl BrokerClient {
    /// Keep the broker session alive.
    ///
    /// **Endpoint:** `GET /tickle`
    pub async fn tickle(&self) -> Result<TickleResponse> {
        self.get(endpoints::TICKLE).await
    }
}
