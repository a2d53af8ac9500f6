//! Live-session-token (LST) derivation and verification.
//!
//! The LST is an opaque bearer credential derived per session: the client
//! runs a Diffie-Hellman exchange with the broker, decrypts the long-lived
//! access-token secret with its RSA-OAEP encryption key, and computes
//! `HMAC-SHA1(key = DH shared secret, msg = decrypted secret)`. The broker
//! proves it derived the same value by returning
//! `hex(HMAC-SHA1(key = LST, msg = consumer_key))`, which the client checks
//! before storing the token. The decoded LST then keys the HMAC-SHA256
//! signature of every authenticated request.
//!
//! The token itself is never transmitted.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use num_bigint::{BigUint, RandBigInt};
use reqwest::header::AUTHORIZATION;
use rsa::Oaep;
use serde::Deserialize;
use sha1::Sha1;

use crate::broker::client::BrokerClient;
use crate::broker::oauth;
use crate::constants::endpoints;
use crate::constants::oauth::{REFRESH_THRESHOLD_SECS, SIG_METHOD_RSA};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// LiveSession
// ---------------------------------------------------------------------------

/// An immutable, verified live session token with its expiration.
///
/// Published atomically by the client as an `Arc` snapshot; readers never
/// observe a half-derived token.
#[derive(Debug, Clone)]
pub struct LiveSession {
    token: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl LiveSession {
    pub(crate) fn new(token: Vec<u8>, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Decoded token bytes, used as the HMAC-SHA256 signing key.
    pub fn key(&self) -> &[u8] {
        &self.token
    }

    /// Instant the broker will stop honoring this token.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is expired or within the refresh threshold of it.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_THRESHOLD_SECS) >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Wire response
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LstResponse {
    diffie_hellman_response: String,
    live_session_token_signature: String,
    live_session_token_expiration: i64,
}

// ---------------------------------------------------------------------------
// Big-integer and HMAC primitives
// ---------------------------------------------------------------------------

/// Serialize a DH value with the broker's big-integer convention:
/// big-endian magnitude with a leading `0x00` byte whenever the top bit is
/// set (positive two's-complement). `0x80` therefore encodes as
/// `[0x00, 0x80]`, not `[0x80]` — dropping the pad byte makes the HMAC key
/// differ from the broker's and verification fail.
pub(crate) fn positive_be_bytes(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0x00);
        padded.extend_from_slice(&bytes);
        padded
    } else {
        bytes
    }
}

/// `HMAC-SHA1(key = shared secret bytes, msg = decrypted access-token
/// secret)` — the decoded live session token.
pub(crate) fn compute_live_session_token(shared_secret: &BigUint, prepend: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha1>::new_from_slice(&positive_be_bytes(shared_secret))
        .expect("HMAC can take key of any size");
    mac.update(prepend);
    mac.finalize().into_bytes().to_vec()
}

/// Check the broker's proof: `hex(HMAC-SHA1(key = LST, msg = consumer_key))`
/// must equal the returned signature.
pub(crate) fn verify_live_session_token(
    token: &[u8],
    consumer_key: &str,
    signature_hex: &str,
) -> bool {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(token).expect("HMAC can take key of any size");
    mac.update(consumer_key.as_bytes());
    hex::encode(mac.finalize().into_bytes()) == signature_hex.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Derivation request
// ---------------------------------------------------------------------------

impl BrokerClient {
    /// Derive a fresh live session token.
    ///
    /// **Endpoint:** `POST /oauth/live_session_token`
    ///
    /// The one RSA-SHA256-signed request in the protocol: the base string is
    /// prefixed with the hex of the OAEP-decrypted access-token secret, and
    /// the OAuth parameter set carries the Diffie-Hellman challenge.
    pub(crate) async fn derive_live_session(&self) -> Result<LiveSession> {
        let dh_random = {
            let mut rng = rand::thread_rng();
            let low = BigUint::from(2u8);
            let high = &self.dh_prime - 1u8;
            rng.gen_biguint_range(&low, &high)
        };
        let dh_challenge = BigUint::from(2u8).modpow(&dh_random, &self.dh_prime);

        let ciphertext = BASE64
            .decode(&self.access_token_secret)
            .map_err(|e| Error::Auth(format!("access token secret is not base64: {e}")))?;
        let prepend = self
            .encryption_key
            .decrypt(Oaep::new::<Sha1>(), &ciphertext)
            .map_err(|e| Error::Auth(format!("access token secret decryption failed: {e}")))?;

        let url = self.url(endpoints::LIVE_SESSION_TOKEN);
        let mut params: BTreeMap<String, String> = BTreeMap::new();
        params.insert("oauth_consumer_key".into(), self.consumer_key.clone());
        params.insert("oauth_nonce".into(), oauth::nonce());
        params.insert("oauth_signature_method".into(), SIG_METHOD_RSA.into());
        params.insert("oauth_timestamp".into(), oauth::timestamp());
        params.insert("oauth_token".into(), self.access_token.clone());
        params.insert(
            "diffie_hellman_challenge".into(),
            format!("{dh_challenge:x}"),
        );

        let base = format!(
            "{}{}",
            hex::encode(&prepend),
            oauth::base_string("POST", &url, &params)
        );
        let signature = oauth::rsa_sha256_signature(&self.signature_key, &base);
        params.insert("oauth_signature".into(), oauth::pct(&signature));
        let header = oauth::authorization_header(&self.realm, &params);

        tracing::debug!(%url, "POST live_session_token");
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, header)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "live session token request failed: HTTP {status}: {body}"
            )));
        }
        let lst: LstResponse = resp.json().await?;

        let dh_response = BigUint::parse_bytes(lst.diffie_hellman_response.as_bytes(), 16)
            .ok_or_else(|| {
                Error::Auth("diffie_hellman_response is not a hex integer".into())
            })?;
        let shared_secret = dh_response.modpow(&dh_random, &self.dh_prime);
        let token = compute_live_session_token(&shared_secret, &prepend);

        if !verify_live_session_token(&token, &self.consumer_key, &lst.live_session_token_signature)
        {
            return Err(Error::Auth(
                "live session token failed HMAC verification".into(),
            ));
        }

        let expires_at = DateTime::from_timestamp_millis(lst.live_session_token_expiration)
            .ok_or_else(|| {
                Error::Auth("live_session_token_expiration is out of range".into())
            })?;
        tracing::info!(%expires_at, "live session token derived");
        Ok(LiveSession::new(token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_be_bytes_pads_high_bit() {
        assert_eq!(positive_be_bytes(&BigUint::from(0x80u32)), vec![0x00, 0x80]);
        assert_eq!(positive_be_bytes(&BigUint::from(0x7fu32)), vec![0x7f]);
        assert_eq!(
            positive_be_bytes(&BigUint::from(0xabcdu32)),
            vec![0x00, 0xab, 0xcd]
        );
        assert_eq!(positive_be_bytes(&BigUint::from(0u32)), vec![0x00]);
    }

    #[test]
    fn modpow_small_modulus() {
        // 2^5 mod 23 = 32 mod 23 = 9
        let result = BigUint::from(2u8).modpow(&BigUint::from(5u8), &BigUint::from(23u8));
        assert_eq!(result, BigUint::from(9u8));
    }

    #[test]
    fn lst_matches_rfc_2202_case_1() {
        // RFC 2202 test case 1: key = 0x0b * 20, data = "Hi There".
        // A shared secret of exactly those bytes (top bit clear, no padding)
        // must produce the published HMAC-SHA1 digest as the token.
        let shared = BigUint::from_bytes_be(&[0x0b; 20]);
        let token = compute_live_session_token(&shared, b"Hi There");
        assert_eq!(
            hex::encode(&token),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
    }

    #[test]
    fn verification_accepts_matching_signature() {
        let token = [0x0b; 20];
        assert!(verify_live_session_token(
            &token,
            "Hi There",
            "b617318655057264e28bc0b6fb378c8ef146be00"
        ));
        // Hex case must not matter.
        assert!(verify_live_session_token(
            &token,
            "Hi There",
            "B617318655057264E28BC0B6FB378C8EF146BE00"
        ));
    }

    #[test]
    fn verification_rejects_mismatch() {
        let token = [0x0b; 20];
        assert!(!verify_live_session_token(
            &token,
            "Hi There",
            "b617318655057264e28bc0b6fb378c8ef146be01"
        ));
        assert!(!verify_live_session_token(&token, "someone else", ""));
    }

    #[test]
    fn refresh_threshold() {
        let now = Utc::now();
        let expiring = LiveSession::new(vec![1], now + Duration::seconds(30));
        assert!(expiring.needs_refresh(now));
        let fresh = LiveSession::new(vec![1], now + Duration::hours(2));
        assert!(!fresh.needs_refresh(now));
    }
}
