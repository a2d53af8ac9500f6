//! Constants for the IBKR Client Portal Web API and the recurring-order
//! service built on top of it.
//!
//! Contains base URLs, endpoint paths, market-data field ids, and the
//! retry/timeout values used internally by
//! [`BrokerClient`](crate::broker::BrokerClient) and the service layers.
//! Exported for advanced usage.

// ---------------------------------------------------------------------------
// Base URLs
// ---------------------------------------------------------------------------

/// Base URL for the IBKR Client Portal Web API.
pub const API_BASE_URL: &str = "https://api.ibkr.com/v1/api";

/// OAuth realm for live accounts.
pub const LIVE_REALM: &str = "limited_poa";

/// OAuth realm for paper accounts.
pub const PAPER_REALM: &str = "test_realm";

// ---------------------------------------------------------------------------
// Endpoint paths
// ---------------------------------------------------------------------------

/// Endpoint paths consumed by the broker client.
pub mod endpoints {
    /// Live-session-token derivation.
    pub const LIVE_SESSION_TOKEN: &str = "/oauth/live_session_token";
    /// Session keep-alive.
    pub const TICKLE: &str = "/tickle";
    /// Symbol search (symbol → conid).
    pub const SECDEF_SEARCH: &str = "/iserver/secdef/search";
    /// Market data snapshot.
    pub const MARKETDATA_SNAPSHOT: &str = "/iserver/marketdata/snapshot";
    /// Brokerage account discovery.
    pub const ACCOUNTS: &str = "/iserver/accounts";
    /// Live orders for the day.
    pub const ORDERS: &str = "/iserver/account/orders";
}

// ---------------------------------------------------------------------------
// Market data field ids
// ---------------------------------------------------------------------------

/// Numeric field ids for `/iserver/marketdata/snapshot`.
pub mod fields {
    /// Last traded price.
    pub const LAST_PRICE: u32 = 31;
    /// Best bid.
    pub const BID_PRICE: u32 = 84;
    /// Best ask.
    pub const ASK_PRICE: u32 = 86;
}

// ---------------------------------------------------------------------------
// OAuth / session lifecycle
// ---------------------------------------------------------------------------

/// OAuth signing and live-session-token lifecycle values.
pub mod oauth {
    /// Signature method for the LST derivation request.
    pub const SIG_METHOD_RSA: &str = "RSA-SHA256";
    /// Signature method for all other authenticated requests.
    pub const SIG_METHOD_HMAC: &str = "HMAC-SHA256";
    /// Length of the random hex nonce.
    pub const NONCE_LEN: usize = 16;
    /// Re-derive the LST when it expires within this many seconds.
    pub const REFRESH_THRESHOLD_SECS: i64 = 60;
}

/// Tickler keep-alive values.
pub mod tickler {
    /// Interval between keep-alive requests, in seconds.
    pub const INTERVAL_SECS: u64 = 60;
    /// Consecutive failures after which the session token is invalidated.
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
}

// ---------------------------------------------------------------------------
// Retry, timeouts, and protocol bounds
// ---------------------------------------------------------------------------

/// Transport retry policy for network errors and 5xx responses.
pub mod retry {
    /// Initial backoff delay in milliseconds.
    pub const BASE_DELAY_MS: u64 = 500;
    /// Backoff multiplier between attempts.
    pub const FACTOR: u64 = 2;
    /// Jitter applied to each delay, as a fraction.
    pub const JITTER: f64 = 0.2;
    /// Maximum number of attempts per request.
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// Request timeouts.
pub mod timeouts {
    /// Timeout for any single broker API call, in seconds.
    pub const BROKER_SECS: u64 = 15;
    /// Timeout for a webhook delivery, in seconds.
    pub const WEBHOOK_SECS: u64 = 5;
}

/// Order submission bounds.
pub mod orders {
    /// Maximum confirmation prompts answered before giving up.
    pub const MAX_CONFIRM_REPLIES: u32 = 5;
    /// Positions page size returned by the portfolio endpoint.
    pub const POSITIONS_PAGE_SIZE: usize = 30;
    /// Hard cap on position pages fetched per account.
    pub const MAX_POSITION_PAGES: u32 = 10;
}

// ---------------------------------------------------------------------------
// Service layer
// ---------------------------------------------------------------------------

/// Scheduler values.
pub mod scheduler {
    /// Interval of the lightweight health tick, in seconds.
    pub const HEALTH_TICK_SECS: u64 = 300;
    /// A fire observed later than this past its scheduled instant is
    /// skipped rather than executed.
    pub const MISSED_FIRE_GRACE_SECS: i64 = 300;
}

/// Supervisor restart policy for the scheduler loop.
pub mod supervisor {
    /// Initial restart delay in seconds.
    pub const RESTART_BASE_SECS: u64 = 1;
    /// Maximum restart delay in seconds.
    pub const RESTART_CAP_SECS: u64 = 60;
    /// Restart attempts before recording a terminal failure.
    pub const MAX_RESTARTS: u32 = 10;
    /// Grace period after SIGTERM before escalating to SIGKILL, in seconds.
    pub const STOP_GRACE_SECS: u64 = 10;
    /// Rotated log files retained on disk.
    pub const LOG_FILES_KEPT: usize = 5;
}

/// Sheet adapter bounds.
pub mod sheet {
    /// Number of log cells available per row, starting at the `log` column.
    pub const LOG_COLUMNS: usize = 6;
    /// Marker prefix written when every log cell for a row is occupied.
    pub const TRUNCATION_MARKER: &str = "[truncated] ";
}

/// Notifier retry values.
pub mod notify {
    /// Delay before the single webhook retry, in seconds.
    pub const RETRY_DELAY_SECS: u64 = 2;
}
