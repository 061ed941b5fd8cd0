//! # Backpack Exchange Client
//!
//! monoio-native client for the Backpack exchange.
//!
//! ## Architecture
//!
//! - **Streaming engine** - one WebSocket session with reader, writer and
//!   keepalive tasks feeding a subscription registry
//! - **Ed25519 signing** - the same signer authenticates REST calls and the
//!   stream handshake
//! - **REST** - market data, orders and account endpoints over rustls
//! - **Exact decimals** - prices and quantities stay `rust_decimal::Decimal`

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod http;
pub mod rest;
pub mod stream;
pub mod traits;
pub mod types;
pub mod websocket;

// Re-export main types
pub use auth::{Credentials, RequestSigner, SignedHeaders};
pub use client::BackpackClient;
pub use config::BackpackConfig;
pub use errors::{ExchangeError, Result};
pub use http::{HttpMethod, MonoioHttpsClient};
pub use rest::BackpackRestClient;
pub use stream::{Channel, ConnectionState, ReconnectConfig, StreamEvent, SubscriptionKey};
pub use traits::{AccountData, HistoryRange, MarketData, OrderRef, SignedTransport, Trading};
pub use types::*;
pub use websocket::MonoioWebSocket;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::auth::{Credentials, RequestSigner};
    pub use crate::client::BackpackClient;
    pub use crate::config::BackpackConfig;
    pub use crate::errors::{ExchangeError, Result};
    pub use crate::rest::BackpackRestClient;
    pub use crate::stream::{Channel, ConnectionState, ReconnectConfig, StreamEvent, SubscriptionKey};
    pub use crate::traits::{AccountData, HistoryRange, MarketData, OrderRef, Trading};
    pub use crate::types::*;
    pub use backpack_core::prelude::*;
}
