//! Account discovery and portfolio position types.

use serde::Deserialize;

/// Response from `GET /iserver/accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    /// Brokerage accounts accessible to the session.
    pub accounts: Vec<String>,
    /// The account currently selected server-side, when one is.
    #[serde(default, rename = "selectedAccount")]
    pub selected_account: Option<String>,
}

impl AccountsResponse {
    /// The account the session should trade against: the server-selected
    /// account when present, otherwise the first listed.
    pub fn primary(&self) -> Option<&str> {
        self.selected_account
            .as_deref()
            .or_else(|| self.accounts.first().map(String::as_str))
    }
}

/// One position from `GET /portfolio/{acct}/positions/{page}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Contract identifier.
    pub conid: i64,
    /// Human-readable contract description.
    #[serde(default)]
    pub contract_desc: Option<String>,
    /// Signed position size.
    pub position: f64,
    /// Mark price, when the server supplies one.
    #[serde(default)]
    pub mkt_price: Option<f64>,
    /// Mark value, when the server supplies one.
    #[serde(default)]
    pub mkt_value: Option<f64>,
    /// Position currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Average acquisition cost.
    #[serde(default)]
    pub avg_cost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_prefers_selected_account() {
        let resp: AccountsResponse = serde_json::from_str(
            r#"{"accounts":["U111","U222"],"selectedAccount":"U222"}"#,
        )
        .unwrap();
        assert_eq!(resp.primary(), Some("U222"));
    }

    #[test]
    fn primary_falls_back_to_first() {
        let resp: AccountsResponse =
            serde_json::from_str(r#"{"accounts":["U111","U222"]}"#).unwrap();
        assert_eq!(resp.primary(), Some("U111"));
    }

    #[test]
    fn position_parses_partial_payload() {
        let position: Position = serde_json::from_str(
            r#"{"conid":265598,"contractDesc":"AAPL","position":12.0,"mktPrice":201.5}"#,
        )
        .unwrap();
        assert_eq!(position.conid, 265598);
        assert_eq!(position.mkt_price, Some(201.5));
        assert_eq!(position.currency, None);
    }
}
