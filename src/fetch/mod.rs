//! Request/response types and the network the agent fetches through.
//!
//! The `Network` trait is the only way the agent reaches the origin, so tests
//! substitute a scripted implementation for `HttpNetwork`.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod types;

pub use client::{HttpNetwork, Network, NetworkError};
pub use types::{Request, RequestMode, Response, OFFLINE_FALLBACK_HTML};
