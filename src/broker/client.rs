//! Core HTTP client for the broker Web API.
//!
//! [`BrokerClient`] wraps [`reqwest::Client`] with OAuth1 signing and the
//! live-session-token lifecycle, and provides typed `get`/`post` helpers.
//! API endpoint methods are added via `impl` blocks in the
//! [`crate::broker::api`] module.
//!
//! Every authenticated request signs with HMAC-SHA256 keyed by the current
//! session token; a missing or expiring token is re-derived first. A 401 (or
//! a "Session expired" body) discards the token and replays the request once
//! after re-derivation; a second authentication failure surfaces as an auth
//! error rather than looping.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use num_bigint::BigUint;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use rsa::RsaPrivateKey;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::broker::lst::LiveSession;
use crate::broker::oauth;
use crate::config::Config;
use crate::constants::oauth::SIG_METHOD_HMAC;
use crate::constants::{API_BASE_URL, retry, timeouts};
use crate::error::{Error, Result};

/// Outcome of a single signed attempt, before replay dispatch.
enum Attempt {
    /// 2xx with the response body.
    Ok(String),
    /// 401 or a "Session expired" body; the token must be re-derived.
    AuthExpired,
}

/// OAuth1-signed HTTP client holding the live-session-token state.
///
/// One instance lives for the whole process and is shared by reference; the
/// session token inside is swapped atomically as an immutable snapshot.
pub struct BrokerClient {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) consumer_key: String,
    pub(crate) access_token: String,
    pub(crate) access_token_secret: String,
    pub(crate) realm: String,
    pub(crate) signature_key: RsaPrivateKey,
    pub(crate) encryption_key: RsaPrivateKey,
    pub(crate) dh_prime: BigUint,
    /// Current session snapshot. Readers clone the `Arc`; the writer swaps it.
    session: Mutex<Option<Arc<LiveSession>>>,
    /// Serializes token derivation so concurrent callers derive once.
    derive_lock: tokio::sync::Mutex<()>,
}

impl BrokerClient {
    /// Build a client from the loaded configuration.
    ///
    /// Reads both private keys into memory and parses the DH prime; the
    /// session token itself is derived lazily on the first authenticated
    /// call.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts::BROKER_SECS))
            .build()
            .expect("failed to build reqwest client");

        let signature_key = oauth::load_private_key(&config.broker.signature_key_path)?;
        let encryption_key = oauth::load_private_key(&config.broker.encryption_key_path)?;
        let dh_prime = BigUint::parse_bytes(config.broker.dh_prime.as_bytes(), 16)
            .ok_or_else(|| Error::Config("broker.dh_prime is not a hex integer".into()))?;

        let base_url = config
            .broker
            .base_url
            .clone()
            .unwrap_or_else(|| API_BASE_URL.to_owned());

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            consumer_key: config.broker.consumer_key.clone(),
            access_token: config.broker.access_token.clone(),
            access_token_secret: config.broker.access_token_secret.clone(),
            realm: config.realm().to_owned(),
            signature_key,
            encryption_key,
            dh_prime,
            session: Mutex::new(None),
            derive_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Current session snapshot, if one is held.
    pub(crate) fn current_session(&self) -> Option<Arc<LiveSession>> {
        self.session.lock().expect("session lock poisoned").clone()
    }

    /// Atomically publish a new session snapshot.
    pub(crate) fn install_session(&self, session: LiveSession) {
        *self.session.lock().expect("session lock poisoned") = Some(Arc::new(session));
    }

    /// Discard the current session so the next call re-derives.
    pub(crate) fn invalidate_session(&self) {
        *self.session.lock().expect("session lock poisoned") = None;
    }

    /// Return a valid session, deriving one when missing or close to expiry.
    async fn ensure_session(&self) -> Result<Arc<LiveSession>> {
        let now = Utc::now();
        if let Some(session) = self.current_session() {
            if !session.needs_refresh(now) {
                return Ok(session);
            }
        }

        let _guard = self.derive_lock.lock().await;
        // Another caller may have finished deriving while we waited.
        if let Some(session) = self.current_session() {
            if !session.needs_refresh(now) {
                return Ok(session);
            }
        }
        let session = self.derive_live_session().await?;
        self.install_session(session);
        Ok(self
            .current_session()
            .expect("session installed by this call"))
    }

    // -----------------------------------------------------------------------
    // Typed request helpers
    // -----------------------------------------------------------------------

    /// Perform a signed GET request and deserialize the JSON response.
    pub(crate) async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.request(Method::GET, path, &[], None).await
    }

    /// Perform a signed GET request with query parameters.
    pub(crate) async fn get_with_query<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<R> {
        self.request(Method::GET, path, query, None).await
    }

    /// Perform a signed POST request with a JSON body.
    pub(crate) async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, &[], Some(body)).await
    }

    /// Signed request with the one-shot auth replay around the inner attempt.
    async fn request<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<R> {
        match self.attempt(&method, path, query, body.as_ref()).await? {
            Attempt::Ok(text) => Ok(serde_json::from_str(&text)?),
            Attempt::AuthExpired => {
                tracing::warn!(path, "session expired, re-deriving live session token");
                self.invalidate_session();
                match self.attempt(&method, path, query, body.as_ref()).await? {
                    Attempt::Ok(text) => Ok(serde_json::from_str(&text)?),
                    Attempt::AuthExpired => Err(Error::Auth(
                        "session still expired after token re-derivation".into(),
                    )),
                }
            }
        }
    }

    /// One signed attempt, with bounded backoff on transport errors and 5xx.
    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Attempt> {
        let url = self.url(path);
        let full_url = if query.is_empty() {
            url.clone()
        } else {
            let qs = query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{url}?{qs}")
        };

        let mut delay_ms = retry::BASE_DELAY_MS;
        let mut last_failure: Option<Error> = None;
        for attempt in 1..=retry::MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(jittered(delay_ms)).await;
                delay_ms *= retry::FACTOR;
            }

            let session = self.ensure_session().await?;
            let header = self.sign(method, &url, query, &session);
            tracing::debug!(%full_url, %method, attempt, "signed request");

            let mut request = self
                .http
                .request(method.clone(), &full_url)
                .header(AUTHORIZATION, header);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(Attempt::Ok(text));
                    }
                    if status == StatusCode::UNAUTHORIZED || text.contains("Session expired") {
                        return Ok(Attempt::AuthExpired);
                    }
                    let failure = Error::Broker { status, body: text };
                    if !status.is_server_error() {
                        return Err(failure);
                    }
                    tracing::warn!(%status, attempt, "broker 5xx, backing off");
                    last_failure = Some(failure);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "transport error, backing off");
                    last_failure = Some(e.into());
                }
            }
        }
        Err(last_failure.expect("at least one attempt recorded a failure"))
    }

    /// Build the HMAC-SHA256 Authorization header for one request.
    ///
    /// Query parameters join the oauth parameters in the signature base
    /// string but stay out of the header itself.
    fn sign(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, String)],
        session: &LiveSession,
    ) -> String {
        let mut oauth_params: BTreeMap<String, String> = BTreeMap::new();
        oauth_params.insert("oauth_consumer_key".into(), self.consumer_key.clone());
        oauth_params.insert("oauth_nonce".into(), oauth::nonce());
        oauth_params.insert("oauth_signature_method".into(), SIG_METHOD_HMAC.into());
        oauth_params.insert("oauth_timestamp".into(), oauth::timestamp());
        oauth_params.insert("oauth_token".into(), self.access_token.clone());

        let mut base_params = oauth_params.clone();
        for (k, v) in query {
            base_params.insert((*k).to_owned(), v.clone());
        }
        let base = oauth::base_string(method.as_str(), url, &base_params);
        let signature = oauth::hmac_sha256_signature(session.key(), &base);
        oauth_params.insert("oauth_signature".into(), oauth::pct(&signature));
        oauth::authorization_header(&self.realm, &oauth_params)
    }

    /// Build the full URL from a path segment.
    pub(crate) fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Apply ±[`retry::JITTER`] to a backoff delay.
fn jittered(delay_ms: u64) -> Duration {
    let factor = 1.0 + retry::JITTER * (2.0 * rand::random::<f64>() - 1.0);
    Duration::from_millis((delay_ms as f64 * factor).round() as u64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::constants::endpoints;
    use chrono::Duration as ChronoDuration;
    use mockito::Matcher;

    /// A client pointed at a mock server, with a pre-installed session so
    /// requests sign without hitting the token endpoint.
    pub(crate) fn seeded_client(base_url: &str) -> BrokerClient {
        let client = unseeded_client(base_url);
        client.install_session(LiveSession::new(
            vec![0x0b; 20],
            Utc::now() + ChronoDuration::hours(2),
        ));
        client
    }

    /// A client with no session; the first signed call derives one. The
    /// stored access-token secret is a real OAEP ciphertext under the test
    /// key so derivation reaches the token endpoint.
    pub(crate) fn unseeded_client(base_url: &str) -> BrokerClient {
        use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
        use rsa::{Oaep, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 512).expect("generate test key");
        let ciphertext = RsaPublicKey::from(&key)
            .encrypt(&mut rng, Oaep::new::<sha1::Sha1>(), b"prepend")
            .expect("encrypt test secret");
        BrokerClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.trim_end_matches('/').to_owned(),
            consumer_key: "TESTCONSUMER".into(),
            access_token: "test-access-token".into(),
            access_token_secret: BASE64.encode(ciphertext),
            realm: "test_realm".into(),
            signature_key: key.clone(),
            encryption_key: key,
            dh_prime: BigUint::parse_bytes(b"f51d", 16).expect("hex prime"),
            session: Mutex::new(None),
            derive_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[tokio::test]
    async fn signed_get_carries_oauth_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tickle")
            .match_header(
                "authorization",
                Matcher::Regex(
                    "^OAuth realm=\"test_realm\", oauth_consumer_key=\"TESTCONSUMER\", \
                     oauth_nonce=\"[0-9a-f]{16}\", oauth_signature=\"[A-Za-z0-9%]+\", \
                     oauth_signature_method=\"HMAC-SHA256\", oauth_timestamp=\"\\d+\", \
                     oauth_token=\"test-access-token\"$"
                        .to_owned(),
                ),
            )
            .with_status(200)
            .with_body(r#"{"session":"abc"}"#)
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let resp: serde_json::Value = client.get("/tickle").await.unwrap();
        assert_eq!(resp["session"], "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn query_params_enter_the_signature_base() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iserver/secdef/search")
            .match_query(Matcher::UrlEncoded("symbol".into(), "AAPL".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let _: serde_json::Value = client
            .get_with_query(endpoints::SECDEF_SEARCH, &[("symbol", "AAPL".to_owned())])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iserver/accounts")
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let err = client.get::<serde_json::Value>("/iserver/accounts").await;
        match err {
            Err(Error::Broker { status, body }) => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(body, "not found");
            }
            other => panic!("expected Broker error, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_retried_to_the_cap() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iserver/accounts")
            .with_status(503)
            .with_body("unavailable")
            .expect(retry::MAX_ATTEMPTS as usize)
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let err = client.get::<serde_json::Value>("/iserver/accounts").await;
        assert!(matches!(err, Err(Error::Broker { status, .. }) if status.as_u16() == 503));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn expired_session_re_derives_exactly_once() {
        let mut server = mockito::Server::new_async().await;
        let endpoint = server
            .mock("GET", "/tickle")
            .with_status(401)
            .with_body("")
            .expect(1)
            .create_async()
            .await;
        // Re-derivation itself fails; the request must surface an auth error
        // after exactly one derivation attempt, not loop.
        let lst = server
            .mock("POST", "/oauth/live_session_token")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let client = seeded_client(&server.url());
        let err = client.get::<serde_json::Value>("/tickle").await;
        assert!(matches!(err, Err(Error::Auth(_))), "got {err:?}");
        endpoint.assert_async().await;
        lst.assert_async().await;
    }
}
