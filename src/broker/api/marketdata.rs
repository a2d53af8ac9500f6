//! Market data snapshot endpoints.

use crate::broker::client::BrokerClient;
use crate::broker::types::marketdata::{MarketSnapshot, SnapshotRow};
use crate::constants::{endpoints, fields};
use crate::error::Result;

impl BrokerClient {
    /// Retrieve a last/bid/ask snapshot for one contract.
    ///
    /// **Endpoint:** `GET /iserver/marketdata/snapshot?conids={conid}&fields=31,84,86`
    pub async fn get_snapshot(&self, conid: i64) -> Result<MarketSnapshot> {
        let rows: Vec<SnapshotRow> = self
            .get_with_query(
                endpoints::MARKETDATA_SNAPSHOT,
                &[
                    ("conids", conid.to_string()),
                    (
                        "fields",
                        format!(
                            "{},{},{}",
                            fields::LAST_PRICE,
                            fields::BID_PRICE,
                            fields::ASK_PRICE
                        ),
                    ),
                ],
            )
            .await?;
        Ok(rows
            .first()
            .map(MarketSnapshot::from_row)
            .unwrap_or_default())
    }
}
