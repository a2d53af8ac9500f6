//! Account discovery and portfolio endpoints.

use crate::broker::client::BrokerClient;
use crate::broker::types::accounts::{AccountsResponse, Position};
use crate::constants::{endpoints, orders};
use crate::error::{Error, Result};

impl BrokerClient {
    /// Retrieve the brokerage accounts accessible to this session.
    ///
    /// **Endpoint:** `GET /iserver/accounts`
    pub async fn get_accounts(&self) -> Result<AccountsResponse> {
        self.get(endpoints::ACCOUNTS).await
    }

    /// The account id the engine should trade against.
    ///
    /// The server-selected account wins; otherwise the first listed.
    pub async fn primary_account(&self) -> Result<String> {
        let accounts = self.get_accounts().await?;
        accounts
            .primary()
            .map(str::to_owned)
            .ok_or_else(|| Error::Auth("session has no brokerage accounts".into()))
    }

    /// Retrieve one page of positions for an account.
    ///
    /// **Endpoint:** `GET /portfolio/{acct}/positions/{page}`
    pub async fn get_positions_page(&self, account: &str, page: u32) -> Result<Vec<Position>> {
        self.get(&format!("/portfolio/{account}/positions/{page}"))
            .await
    }

    /// Retrieve all positions for an account, following pagination until a
    /// short page or the page cap.
    pub async fn get_account_positions(&self, account: &str) -> Result<Vec<Position>> {
        let mut all = Vec::new();
        for page in 0..orders::MAX_POSITION_PAGES {
            let batch = self.get_positions_page(account, page).await?;
            let len = batch.len();
            all.extend(batch);
            if len < orders::POSITIONS_PAGE_SIZE {
                break;
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::client::tests::seeded_client;

    #[tokio::test]
    async fn positions_stop_at_short_page() {
        let mut server = mockito::Server::new_async().await;
        let page0 = server
            .mock("GET", "/portfolio/U111/positions/0")
            .with_body(r#"[{"conid":1,"position":1.0},{"conid":2,"position":2.0}]"#)
            .expect(1)
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let positions = client.get_account_positions("U111").await.unwrap();
        assert_eq!(positions.len(), 2);
        page0.assert_async().await;
    }
}
