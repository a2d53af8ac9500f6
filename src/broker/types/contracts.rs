//! Symbol search (secdef) types.

use serde::{Deserialize, Deserializer};

/// One match from `GET /iserver/secdef/search`.
///
/// The server is loose with `conid` — sometimes a number, sometimes a
/// string — so it is accepted either way.
#[derive(Debug, Clone, Deserialize)]
pub struct SecdefSearchResult {
    /// Contract identifier.
    #[serde(deserialize_with = "de_flexible_i64")]
    pub conid: i64,
    /// Ticker symbol of the match.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Company name header.
    #[serde(default, rename = "companyHeader")]
    pub company_header: Option<String>,
    /// Primary listing description (usually the exchange).
    #[serde(default)]
    pub description: Option<String>,
    /// Instrument sections available under this conid.
    #[serde(default)]
    pub sections: Vec<SecdefSection>,
}

impl SecdefSearchResult {
    /// Whether this match carries a stock section.
    pub fn is_stock(&self) -> bool {
        self.sections
            .iter()
            .any(|s| s.sec_type.as_deref() == Some("STK"))
    }
}

/// One instrument section of a search match.
#[derive(Debug, Clone, Deserialize)]
pub struct SecdefSection {
    /// Security type, e.g. `STK`, `OPT`, `FUT`.
    #[serde(default, rename = "secType")]
    pub sec_type: Option<String>,
    /// Exchanges the section trades on.
    #[serde(default)]
    pub exchange: Option<String>,
}

fn de_flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        String(String),
    }
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conid_accepts_number_and_string() {
        let a: SecdefSearchResult =
            serde_json::from_str(r#"{"conid":265598,"symbol":"AAPL"}"#).unwrap();
        assert_eq!(a.conid, 265598);
        let b: SecdefSearchResult =
            serde_json::from_str(r#"{"conid":"265598","symbol":"AAPL"}"#).unwrap();
        assert_eq!(b.conid, 265598);
    }

    #[test]
    fn stock_section_detection() {
        let result: SecdefSearchResult = serde_json::from_str(
            r#"{"conid":1,"sections":[{"secType":"OPT"},{"secType":"STK","exchange":"NASDAQ"}]}"#,
        )
        .unwrap();
        assert!(result.is_stock());

        let fut: SecdefSearchResult =
            serde_json::from_str(r#"{"conid":2,"sections":[{"secType":"FUT"}]}"#).unwrap();
        assert!(!fut.is_stock());
    }
}
