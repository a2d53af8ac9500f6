//! OAuth1 request signing for the broker API.
//!
//! Two signature methods are in play: `RSA-SHA256` for the live-session-token
//! derivation request, and `HMAC-SHA256` (keyed by the decoded LST) for every
//! other authenticated call. Both sign the same shape of base string:
//!
//! ```text
//! METHOD&pct(url)&pct(sorted_params_joined_by_&)
//! ```
//!
//! Query-string parameters participate in the base string; JSON bodies do not.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;

use crate::constants::oauth;
use crate::error::{Error, Result};

/// RFC 3986 unreserved characters pass through; everything else is escaped.
const OAUTH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode `value` for OAuth base strings and header values.
pub(crate) fn pct(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ESCAPE).to_string()
}

/// Random nonce of [`oauth::NONCE_LEN`] lowercase hex characters.
pub(crate) fn nonce() -> String {
    debug_assert_eq!(oauth::NONCE_LEN, 16);
    format!("{:016x}", rand::random::<u64>())
}

/// Current unix timestamp in seconds, as OAuth wants it.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Assemble the signature base string from the method, request URL, and the
/// full (oauth + query) parameter set.
///
/// Parameters are sorted by key, joined as `k=v` pairs with `&`, and the
/// joined string is percent-encoded as a single component.
pub(crate) fn base_string(method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{method}&{}&{}", pct(url), pct(&joined))
}

/// Sign `base` with HMAC-SHA256 under `key` and return the base64 MAC.
pub(crate) fn hmac_sha256_signature(key: &[u8], base: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(base.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Sign `data` with RSA-SHA256 (PKCS#1 v1.5) and return the raw signature.
pub(crate) fn rsa_sha256_raw(key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    signing_key.sign(data).to_bytes().into_vec()
}

/// Sign `base` with RSA-SHA256 (PKCS#1 v1.5) and return the base64 signature.
pub(crate) fn rsa_sha256_signature(key: &RsaPrivateKey, base: &str) -> String {
    BASE64.encode(rsa_sha256_raw(key, base.as_bytes()))
}

/// Render the `Authorization: OAuth …` header value.
///
/// The realm leads; the remaining pairs are sorted by key with double-quoted
/// values. `params` must already carry the percent-encoded `oauth_signature`.
pub(crate) fn authorization_header(realm: &str, params: &BTreeMap<String, String>) -> String {
    let pairs = params
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!("OAuth realm=\"{realm}\", {pairs}")
}

/// Load a PEM private key, accepting both PKCS#8 and PKCS#1 envelopes.
pub(crate) fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read key {}: {e}", path.display())))?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| Error::Config(format!("{} is not an RSA private key: {e}", path.display())))
}
