//! Session keep-alive types.

use serde::Deserialize;

/// Response from `GET /tickle`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickleResponse {
    /// Opaque session identifier.
    #[serde(default)]
    pub session: Option<String>,
    /// Milliseconds until SSO expiry, when reported.
    #[serde(default, rename = "ssoExpires")]
    pub sso_expires: Option<i64>,
}
