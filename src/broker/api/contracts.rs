//! Symbol resolution endpoints.

use crate::broker::client::BrokerClient;
use crate::broker::types::contracts::SecdefSearchResult;
use crate::constants::endpoints;
use crate::error::Result;

impl BrokerClient {
    /// Search instrument definitions by symbol.
    ///
    /// **Endpoint:** `GET /iserver/secdef/search?symbol={sym}`
    pub async fn search_symbol(&self, symbol: &str) -> Result<Vec<SecdefSearchResult>> {
        self.get_with_query(endpoints::SECDEF_SEARCH, &[("symbol", symbol.to_owned())])
            .await
    }

    /// Resolve a ticker symbol to a conid.
    ///
    /// Takes the first search match carrying a stock section; `None` when
    /// the symbol does not resolve to a tradeable stock.
    pub async fn resolve_symbol(&self, symbol: &str) -> Result<Option<i64>> {
        let matches = self.search_symbol(symbol).await?;
        Ok(matches.into_iter().find(SecdefSearchResult::is_stock).map(|m| m.conid))
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::client::tests::seeded_client;
    use mockito::Matcher;

    #[tokio::test]
    async fn resolve_takes_first_stock_match() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/iserver/secdef/search")
            .match_query(Matcher::UrlEncoded("symbol".into(), "AAPL".into()))
            .with_body(
                r#"[
                    {"conid": 1, "symbol": "AAPL", "sections": [{"secType": "OPT"}]},
                    {"conid": 265598, "symbol": "AAPL", "sections": [{"secType": "STK"}]}
                ]"#,
            )
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let conid = client.resolve_symbol("AAPL").await.unwrap();
        assert_eq!(conid, Some(265598));
    }

    #[tokio::test]
    async fn resolve_returns_none_for_empty_search() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/iserver/secdef/search")
            .match_query(Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        assert_eq!(client.resolve_symbol("ZZZZZZ").await.unwrap(), None);
    }
}
