//! Request and response types for the broker Web API.
//!
//! Strongly-typed structs used for serializing requests and deserializing
//! responses, grouped by API area:
//!
//! - [`accounts`] — account discovery and portfolio positions
//! - [`contracts`] — symbol search results
//! - [`marketdata`] — snapshot fields and price selection
//! - [`orders`] — order tickets, confirmation replies, live orders
//! - [`session`] — keep-alive payloads

pub mod accounts;
pub mod contracts;
pub mod marketdata;
pub mod orders;
pub mod session;
