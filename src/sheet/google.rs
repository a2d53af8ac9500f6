//! Google Sheets v4 implementation of the worksheet adapter.
//!
//! Authenticates as a service account: an RS256-signed JWT is exchanged for
//! a bearer token, cached until shortly before expiry. The worksheet is
//! addressed by spreadsheet URL + zero-based worksheet index; the worksheet
//! title is resolved once from spreadsheet metadata and cached.
//!
//! All operations are serialized through a single async mutex: the adapter
//! assumes nothing about the API tolerating interleaved writes.

use std::sync::Mutex;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::broker::oauth::rsa_sha256_raw;
use crate::config::SheetConfig;
use crate::constants::sheet::{LOG_COLUMNS, TRUNCATION_MARKER};
use crate::error::{Error, Result};
use crate::model::RecurringOrder;
use crate::sheet::{Columns, OrderSheet, first_empty_log_slot, map_columns, parse_rows};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// ---------------------------------------------------------------------------
// Service account credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_owned()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// GoogleSheet
// ---------------------------------------------------------------------------

/// Cached worksheet facts resolved on first use.
#[derive(Default)]
struct SheetState {
    title: Option<String>,
    columns: Option<Columns>,
}

/// Google Sheets v4 adapter for one worksheet.
pub struct GoogleSheet {
    http: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    worksheet_index: usize,
    client_email: String,
    signing_key: RsaPrivateKey,
    token_uri: String,
    /// Serializes every sheet operation.
    io: tokio::sync::Mutex<SheetState>,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheet {
    /// Build an adapter from the sheet configuration, loading the service
    /// account key into memory.
    pub fn new(config: &SheetConfig) -> Result<Self> {
        let raw = std::fs::read_to_string(&config.credentials_path).map_err(|e| {
            Error::Config(format!(
                "cannot read {}: {e}",
                config.credentials_path.display()
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("service account credentials are malformed: {e}"))
        })?;
        let signing_key = RsaPrivateKey::from_pkcs8_pem(&key.private_key).map_err(|e| {
            Error::Config(format!("service account private key is invalid: {e}"))
        })?;
        let spreadsheet_id = spreadsheet_id_from_url(&config.spreadsheet_url)?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_base: SHEETS_API_BASE.to_owned(),
            spreadsheet_id,
            worksheet_index: config.worksheet_index,
            client_email: key.client_email,
            signing_key,
            token_uri: key.token_uri,
            io: tokio::sync::Mutex::new(SheetState::default()),
            token: Mutex::new(None),
        })
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    async fn bearer_token(&self) -> Result<String> {
        let now = Utc::now();
        if let Some(cached) = self.token.lock().expect("token lock poisoned").as_ref() {
            if cached.expires_at > now {
                return Ok(cached.value.clone());
            }
        }

        let assertion = signed_jwt(&self.signing_key, &self.client_email, &self.token_uri, now);
        let resp = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| Error::SheetIo(format!("token exchange failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::SheetIo(format!(
                "token exchange failed: HTTP {status}: {body}"
            )));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::SheetIo(format!("token response malformed: {e}")))?;

        let value = token.access_token.clone();
        *self.token.lock().expect("token lock poisoned") = Some(CachedToken {
            value: token.access_token,
            // Refresh a minute early so in-flight calls don't race expiry.
            expires_at: now + Duration::seconds(token.expires_in - 60),
        });
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Raw API calls
    // -----------------------------------------------------------------------

    async fn api_get(&self, path_and_query: &str) -> Result<Value> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}{path_and_query}", self.api_base, self.spreadsheet_id);
        tracing::debug!(%url, "sheets GET");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::SheetIo(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::SheetIo(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| Error::SheetIo(e.to_string()))
    }

    async fn api_put(&self, path_and_query: &str, body: &Value) -> Result<()> {
        let token = self.bearer_token().await?;
        let url = format!("{}/{}{path_and_query}", self.api_base, self.spreadsheet_id);
        tracing::debug!(%url, "sheets PUT");
        let resp = self
            .http
            .put(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::SheetIo(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::SheetIo(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Worksheet resolution and reads
    // -----------------------------------------------------------------------

    async fn worksheet_title(&self, state: &mut SheetState) -> Result<String> {
        if let Some(title) = &state.title {
            return Ok(title.clone());
        }
        let meta = self.api_get("?fields=sheets.properties").await?;
        let title = meta["sheets"]
            .as_array()
            .into_iter()
            .flatten()
            .find_map(|sheet| {
                let props = &sheet["properties"];
                // The API omits `index` for the first worksheet.
                let index = props["index"].as_u64().unwrap_or(0);
                (index == self.worksheet_index as u64)
                    .then(|| props["title"].as_str().map(str::to_owned))
                    .flatten()
            })
            .ok_or_else(|| {
                Error::SheetIo(format!(
                    "worksheet index {} not found in spreadsheet",
                    self.worksheet_index
                ))
            })?;
        state.title = Some(title.clone());
        Ok(title)
    }

    async fn read_range(&self, title: &str, cells: &str) -> Result<Vec<Vec<String>>> {
        let range = encode_range(title, cells);
        let value = self.api_get(&format!("/values/{range}")).await?;
        let rows = value["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .into_iter()
                            .flatten()
                            .map(cell_to_string)
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn columns(&self, state: &mut SheetState, title: &str) -> Result<Columns> {
        if let Some(columns) = state.columns {
            return Ok(columns);
        }
        let header = self.read_range(title, "A1:Z1").await?;
        let columns = map_columns(header.first().map(Vec::as_slice).unwrap_or(&[]))?;
        state.columns = Some(columns);
        Ok(columns)
    }
}

#[async_trait::async_trait]
impl OrderSheet for GoogleSheet {
    async fn list_orders(&self) -> Result<Vec<RecurringOrder>> {
        let mut state = self.io.lock().await;
        let title = self.worksheet_title(&mut state).await?;
        let grid = self.read_range(&title, "A1:Z").await?;
        let orders = parse_rows(&grid)?;
        if let Some(headers) = grid.first() {
            state.columns = Some(map_columns(headers)?);
        }
        tracing::debug!(rows = orders.len(), "listed recurring orders");
        Ok(orders)
    }

    async fn append_log(&self, row_index: u32, message: &str) -> Result<()> {
        let mut state = self.io.lock().await;
        let title = self.worksheet_title(&mut state).await?;
        let columns = self.columns(&mut state, &title).await?;

        let first = col_letters(columns.log);
        let last = col_letters(columns.log + LOG_COLUMNS - 1);
        let row = self
            .read_range(&title, &format!("{first}{row_index}:{last}{row_index}"))
            .await?;
        let log_cells = row.into_iter().next().unwrap_or_default();

        let (slot, text) = match first_empty_log_slot(&log_cells) {
            Some(slot) => (slot, message.to_owned()),
            None => (
                LOG_COLUMNS - 1,
                format!("{TRUNCATION_MARKER}{message}"),
            ),
        };
        let target = format!("{}{row_index}", col_letters(columns.log + slot));
        tracing::debug!(row_index, %target, "appending log cell");
        self.api_put(
            &format!(
                "/values/{}?valueInputOption=RAW",
                encode_range(&title, &target)
            ),
            &json!({ "values": [[text]] }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the spreadsheet id from a `…/spreadsheets/d/{id}/…` URL.
fn spreadsheet_id_from_url(url: &str) -> Result<String> {
    url.split_once("/d/")
        .map(|(_, rest)| {
            rest.split(['/', '?', '#'])
                .next()
                .unwrap_or(rest)
                .to_owned()
        })
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::Config(format!("sheet.spreadsheet_url `{url}` has no /d/<id> segment"))
        })
}

/// A1 column letters for a 0-based column index.
fn col_letters(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        letters.push(b'A' + ((n - 1) % 26) as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).expect("letters are ASCII")
}

/// Percent-encode a quoted A1 range for a URL path segment.
fn encode_range(title: &str, cells: &str) -> String {
    utf8_percent_encode(&format!("'{title}'!{cells}"), NON_ALPHANUMERIC).to_string()
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// RS256 service-account assertion for the Sheets scope.
fn signed_jwt(
    key: &RsaPrivateKey,
    email: &str,
    token_uri: &str,
    now: DateTime<Utc>,
) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        json!({
            "iss": email,
            "scope": SHEETS_SCOPE,
            "aud": token_uri,
            "iat": now.timestamp(),
            "exp": now.timestamp() + 3600,
        })
        .to_string(),
    );
    let signing_input = format!("{header}.{claims}");
    let signature = URL_SAFE_NO_PAD.encode(rsa_sha256_raw(key, signing_input.as_bytes()));
    format!("{signing_input}.{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_sheet(api_base: &str, token_uri: &str) -> GoogleSheet {
        let mut rng = rand::thread_rng();
        GoogleSheet {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_owned(),
            spreadsheet_id: "sheet123".into(),
            worksheet_index: 0,
            client_email: "svc@project.iam.gserviceaccount.com".into(),
            signing_key: RsaPrivateKey::new(&mut rng, 512).expect("generate test key"),
            token_uri: token_uri.to_owned(),
            io: tokio::sync::Mutex::new(SheetState::default()),
            token: Mutex::new(None),
        }
    }

    #[test]
    fn extracts_spreadsheet_id() {
        let id = spreadsheet_id_from_url(
            "https://docs.google.com/spreadsheets/d/abc_123-x/edit#gid=0",
        )
        .unwrap();
        assert_eq!(id, "abc_123-x");
        assert!(spreadsheet_id_from_url("https://docs.google.com/").is_err());
    }

    #[test]
    fn column_letters() {
        assert_eq!(col_letters(0), "A");
        assert_eq!(col_letters(6), "G");
        assert_eq!(col_letters(25), "Z");
        assert_eq!(col_letters(26), "AA");
        assert_eq!(col_letters(27), "AB");
    }

    #[test]
    fn jwt_carries_the_expected_claims() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let now = Utc::now();
        let jwt = signed_jwt(&key, "svc@x", "https://oauth2.googleapis.com/token", now);

        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS256");

        let claims: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["iss"], "svc@x");
        assert_eq!(claims["scope"], SHEETS_SCOPE);
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            3600
        );
    }

    #[tokio::test]
    async fn list_orders_round_trip() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_body(r#"{"access_token":"tok","expires_in":3600}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/sheet123")
            .match_query(Matcher::UrlEncoded(
                "fields".into(),
                "sheets.properties".into(),
            ))
            .with_body(r#"{"sheets":[{"properties":{"sheetId":9,"title":"Orders","index":0}}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/sheet123/values/%27Orders%27%21A1%3AZ")
            .match_header("authorization", "Bearer tok")
            .with_body(
                r#"{"values":[
                    ["Status","Symbol","Price","Amount_USD","Qty_To_Buy","Frequency","Log"],
                    ["Active","AAPL","200","","2","Daily",""]
                ]}"#,
            )
            .create_async()
            .await;

        let token_uri = format!("{}/token", server.url());
        let sheet = test_sheet(&server.url(), &token_uri);
        let orders = sheet.list_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "AAPL");
        assert_eq!(orders[0].row_index, 2);
    }

    #[tokio::test]
    async fn append_log_writes_first_empty_slot() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_body(r#"{"access_token":"tok","expires_in":3600}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/sheet123")
            .match_query(Matcher::Any)
            .with_body(r#"{"sheets":[{"properties":{"title":"Orders","index":0}}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/sheet123/values/%27Orders%27%21A1%3AZ1")
            .with_body(
                r#"{"values":[["Status","Symbol","Price","Amount_USD","Qty_To_Buy","Frequency","Log"]]}"#,
            )
            .create_async()
            .await;
        // Log columns G..L for row 2; G2 already holds an entry.
        server
            .mock("GET", "/sheet123/values/%27Orders%27%21G2%3AL2")
            .with_body(r#"{"values":[["old entry"]]}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/sheet123/values/%27Orders%27%21H2")
            .match_query(Matcher::UrlEncoded(
                "valueInputOption".into(),
                "RAW".into(),
            ))
            .match_body(Matcher::PartialJsonString(
                r#"{"values":[["✅ new entry"]]}"#.to_owned(),
            ))
            .expect(1)
            .create_async()
            .await;

        let token_uri = format!("{}/token", server.url());
        let sheet = test_sheet(&server.url(), &token_uri);
        sheet.append_log(2, "✅ new entry").await.unwrap();
        update.assert_async().await;
    }
}
