//! Async client for the router's binary control API.
//!
//! The device speaks length-prefixed words over TCP (optionally TLS):
//! a command path plus `=key=value` / `?key=value` parameter words, answered
//! by ordered `!re` records and a closing `!done`. This crate owns framing,
//! session login, and the error taxonomy of that wire; connection reuse,
//! caching, and command deadlines belong to `wispctl-core`.

pub mod error;
pub mod session;
pub mod transport;
pub mod wire;

#[cfg(feature = "test-util")]
pub mod testing;

pub use error::Error;
pub use session::RouterSession;
pub use transport::{TlsMode, TransportConfig};
pub use wire::{FlatRecord, Param};
