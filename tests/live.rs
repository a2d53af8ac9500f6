//! Integration tests against the live broker API.
//!
//! # Running
//!
//! These tests require real OAuth credentials. Point `AUTOINVEST_CONFIG` at
//! a working configuration document before running:
//!
//! ```sh
//! export AUTOINVEST_CONFIG="$HOME/.config/autoinvest/autoinvest.toml"
//! cargo test --test live -- --nocapture
//! ```
//!
//! Without the env var, every test is silently skipped. Use a paper
//! configuration: the tests never place orders, but they do authenticate,
//! derive a live session token, and read account state.
//!
//! # What is tested
//!
//! - **Session** — LST derivation and the keep-alive endpoint
//! - **Accounts** — discovery and position pagination
//! - **Contracts** — symbol resolution for a liquid US stock
//! - **Market data** — snapshot parsing on a live conid
//! - **Orders** — live-order listing (read only)

use std::path::Path;

use autoinvest::BrokerClient;
use autoinvest::config::Config;

/// A liquid, well-known symbol for resolution tests.
const TEST_SYMBOL: &str = "AAPL";

/// Helper: build a live client or skip the test.
fn live_client() -> Option<BrokerClient> {
    let path = std::env::var("AUTOINVEST_CONFIG").ok()?;
    let config = Config::load(Path::new(&path)).ok()?;
    BrokerClient::new(&config).ok()
}

/// Macro to skip a test when credentials are missing.
macro_rules! require_client {
    () => {
        match live_client() {
            Some(c) => c,
            None => {
                eprintln!("⏭  Skipped (AUTOINVEST_CONFIG not set or unreadable)");
                return;
            }
        }
    };
}

// ===================================================================
// Session
// ===================================================================

#[tokio::test]
async fn test_tickle_derives_a_session() {
    let client = require_client!();
    let tickle = client.tickle().await.expect("tickle failed");
    println!("✔ Tickle: session={:?}", tickle.session);
}

// ===================================================================
// Accounts
// ===================================================================

#[tokio::test]
async fn test_accounts() {
    let client = require_client!();
    let accounts = client.get_accounts().await.expect("get_accounts failed");
    assert!(
        !accounts.accounts.is_empty(),
        "session should expose at least one account"
    );
    println!("✔ Accounts: {:?}", accounts.accounts);
}

#[tokio::test]
async fn test_positions() {
    let client = require_client!();
    let account = client
        .primary_account()
        .await
        .expect("primary_account failed");
    let positions = client
        .get_account_positions(&account)
        .await
        .expect("get_account_positions failed");
    println!("✔ Positions: {} open in {account}", positions.len());
}

// ===================================================================
// Contracts & market data
// ===================================================================

#[tokio::test]
async fn test_resolve_and_snapshot() {
    let client = require_client!();
    let conid = client
        .resolve_symbol(TEST_SYMBOL)
        .await
        .expect("resolve_symbol failed")
        .expect("a liquid US stock should resolve");
    println!("✔ Resolved {TEST_SYMBOL} → conid {conid}");

    let snapshot = client.get_snapshot(conid).await.expect("snapshot failed");
    println!(
        "✔ Snapshot: last={:?} bid={:?} ask={:?}",
        snapshot.last, snapshot.bid, snapshot.ask
    );
}

// ===================================================================
// Orders (read only)
// ===================================================================

#[tokio::test]
async fn test_live_orders_listing() {
    let client = require_client!();
    let orders = client.get_orders().await.expect("get_orders failed");
    println!("✔ Live orders: {}", orders.orders.len());
}
