//! Error types for the `autoinvest` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, Error>`.
//!
//! [`Error`] covers:
//! - **Config errors** — missing or malformed configuration; fatal at startup
//! - **Auth errors** — OAuth signing or live-session-token derivation failures
//! - **Broker errors** — non-auth 4xx/5xx responses with status and body
//! - **Order protocol errors** — confirmation-reply loop exhausted or no order id
//! - **Sheet errors** — worksheet schema mismatches and I/O failures
//! - **Notify errors** — webhook delivery failures (never fatal to a run)
//! - **Busy** — re-entrant engine invocation rejected without side effects
//! - **Shutdown** — cooperative cancellation observed mid-run
//! - **Validation errors** — malformed recurring-order rows
//! - **Transport/JSON/IO errors** — `reqwest`, `serde_json`, `std::io`

/// All possible errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// OAuth signing, LST derivation, or LST verification failed.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The broker returned a non-auth 4xx/5xx response.
    #[error("broker error: HTTP {status}: {body}")]
    Broker {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The response body text.
        body: String,
    },

    /// The order confirmation-reply protocol did not produce an order id.
    #[error("order protocol error: {0}")]
    OrderProtocol(String),

    /// The worksheet is missing required columns.
    #[error("sheet schema error: missing column(s) {0}")]
    SheetSchema(String),

    /// A sheet read or write failed.
    #[error("sheet I/O error: {0}")]
    SheetIo(String),

    /// Webhook delivery failed. Recorded, never fatal to an engine run.
    #[error("notification error: {0}")]
    Notify(String),

    /// `execute_due` was invoked while a run was already in flight.
    #[error("an engine run is already in progress")]
    Busy,

    /// Cooperative shutdown was requested.
    #[error("shutdown requested")]
    Shutdown,

    /// A recurring-order row is malformed.
    #[error("invalid order row: {0}")]
    Validation(String),

    /// `start` found a live process behind the PID file.
    #[error("already running (pid {0})")]
    AlreadyRunning(u32),

    /// `stop` found no live process behind the PID file.
    #[error("not running")]
    NotRunning,

    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A filesystem-level error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for the CLI surface.
    ///
    /// 0 success, 1 generic failure, 2 misconfiguration, 3 already running
    /// on `start`, 4 not running on `stop`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::AlreadyRunning(_) => 3,
            Error::NotRunning => 4,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
