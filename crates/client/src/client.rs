//! Facade over the streaming engine and the REST client

use crate::auth::{Credentials, RequestSigner};
use crate::config::BackpackConfig;
use crate::errors::{ExchangeError, Result};
use crate::rest::BackpackRestClient;
use crate::stream::{
    Channel, CloseHandler, ConnectionSession, ConnectionState, Dispatcher, FailureHandler, Handler, RawObserver,
    ReconnectConfig, SessionState, StreamEvent, SubscriptionKey, SubscriptionRegistry, PING_FRAME,
};
use crate::types::{Balance, Candle, Order, OrderBook, Position, Ticker, Trade};
use backpack_core::next_request_id;

use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// `{"method":..,"params":[streams],"id":n}`
pub fn subscription_frame(method: &str, streams: &[String]) -> String {
    json!({
        "method": method,
        "params": streams,
        "id": next_request_id().value(),
    })
    .to_string()
}

/// Wrap a closure over a typed payload; a payload that does not deserialize
/// is reported as a handler error
fn typed_handler<T, F>(handler: F) -> Handler
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(move |event: &StreamEvent| {
        let payload = T::deserialize(&event.data)
            .map_err(|e| ExchangeError::HandlerError(format!("{}: {e}", event.stream)))?;
        handler(payload);
        Ok(())
    })
}

/// Backpack exchange client
///
/// Owns one streaming session, the handler registry and a REST client that
/// shares the same credentials.
pub struct BackpackClient {
    config: BackpackConfig,
    signer: Option<RequestSigner>,
    rest: BackpackRestClient,
    registry: SubscriptionRegistry,
    dispatcher: Dispatcher,
    session: ConnectionSession,
    reconnect_config: ReconnectConfig,
}

impl BackpackClient {
    /// Validates the config and decodes credentials when present
    pub fn new(config: BackpackConfig) -> Result<Self> {
        config.validate()?;

        let signer = if config.has_credentials() {
            let credentials = Credentials::new(config.api_key.clone(), &config.api_secret)?;
            Some(RequestSigner::with_window(credentials, config.window_ms))
        } else {
            None
        };

        let registry = SubscriptionRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone(), SessionState::new());
        let session = ConnectionSession::new(&config, dispatcher.clone())?;
        let rest = BackpackRestClient::with_parts(&config, signer.clone())?;

        Ok(Self {
            config,
            signer,
            rest,
            registry,
            dispatcher,
            session,
            reconnect_config: ReconnectConfig::default(),
        })
    }

    /// Replace credentials for both transports
    pub fn set_credentials(&mut self, api_key: impl Into<String>, private_key_b64: &str) -> Result<()> {
        let credentials = Credentials::new(api_key, private_key_b64)?;
        let signer = RequestSigner::with_window(credentials, self.config.window_ms);
        self.rest = BackpackRestClient::with_parts(&self.config, Some(signer.clone()))?;
        self.signer = Some(signer);
        Ok(())
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn config(&self) -> &BackpackConfig {
        &self.config
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    pub fn rest(&self) -> &BackpackRestClient {
        &self.rest
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Currently bound keys, sorted
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.registry.keys()
    }

    pub fn on_raw_message(&self, observer: impl Fn(&str, &serde_json::Value) + Send + Sync + 'static) {
        let observer: RawObserver = Arc::new(observer);
        self.dispatcher.on_raw_message(observer);
    }

    pub fn on_close(&self, handler: impl Fn(u16, &str) + Send + Sync + 'static) {
        let handler: CloseHandler = Arc::new(handler);
        self.session.on_close(handler);
    }

    pub fn on_failure(&self, handler: impl Fn(&ExchangeError) + Send + Sync + 'static) {
        let handler: FailureHandler = Arc::new(handler);
        self.session.on_failure(handler);
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.session.connect().await
    }

    /// Close the session and drop every handler; idempotent
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
        self.registry.clear();
    }

    /// Queue a raw text frame
    pub fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.session.send(frame)
    }

    pub fn ping(&self) -> Result<()> {
        self.session.send(PING_FRAME)
    }

    /// Sign and send the handshake, then wait for the server's verdict
    ///
    /// Needs credentials and an open connection. Rejection leaves the session
    /// Connected; so does a timeout, after which the caller may retry.
    pub async fn authenticate(&self) -> Result<()> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            ExchangeError::MissingCredentials("stream authentication requires API credentials".to_string())
        })?;

        let state = self.session.session_state();
        match state.get() {
            ConnectionState::Authenticated => return Ok(()),
            ConnectionState::Authenticating => return self.wait_for_auth().await,
            ConnectionState::Connected => {}
            other => {
                return Err(ExchangeError::NotConnected(format!("cannot authenticate while {other}")));
            }
        }

        let signed = signer.sign_stream_auth()?;
        if !state.begin_auth() {
            return self.wait_for_auth().await;
        }
        self.dispatcher.take_auth_rejection();

        if let Err(e) = self.session.send(signed.to_auth_frame()) {
            state.auth_rejected();
            return Err(e);
        }
        info!("🔐 Authenticating stream session");
        self.wait_for_auth().await
    }

    async fn wait_for_auth(&self) -> Result<()> {
        let state = self.session.session_state();
        let deadline = Instant::now() + self.config.auth_timeout();

        loop {
            match state.get() {
                ConnectionState::Authenticated => return Ok(()),
                ConnectionState::Authenticating => {}
                ConnectionState::Connected => {
                    let reason = self
                        .dispatcher
                        .take_auth_rejection()
                        .unwrap_or_else(|| "authentication rejected".to_string());
                    return Err(ExchangeError::AuthenticationFailed(reason));
                }
                other => {
                    return Err(ExchangeError::NotConnected(format!("connection {other} during authentication")));
                }
            }

            if Instant::now() >= deadline {
                state.auth_rejected();
                warn!("❌ No authentication response within {:?}", self.config.auth_timeout());
                return Err(ExchangeError::Timeout(format!(
                    "authentication not acknowledged within {:?}",
                    self.config.auth_timeout()
                )));
            }
            monoio::time::sleep(self.config.auth_poll_interval()).await;
        }
    }

    /// Bind `handler` to (channel, symbol) and send SUBSCRIBE
    ///
    /// Private channels authenticate first. The handler is registered before
    /// the frame is queued and rolled back if queueing fails. An empty symbol
    /// catches every symbol of the channel.
    pub async fn subscribe<F>(&self, channel: Channel, symbol: &str, handler: F) -> Result<()>
    where
        F: Fn(&StreamEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe_handler(channel, symbol, Arc::new(handler)).await
    }

    async fn subscribe_handler(&self, channel: Channel, symbol: &str, handler: Handler) -> Result<()> {
        if channel.requires_auth() && !self.is_authenticated() {
            self.authenticate().await?;
        }

        let state = self.state();
        if !state.is_open() {
            return Err(ExchangeError::NotConnected(format!("cannot subscribe while {state}")));
        }

        let key = SubscriptionKey::new(channel, symbol);
        let previous = self.registry.register(key.clone(), handler);

        let frame = subscription_frame("SUBSCRIBE", &[key.stream_id()]);
        if let Err(e) = self.session.send(frame) {
            match previous {
                Some(previous) => {
                    self.registry.register(key, previous);
                }
                None => {
                    self.registry.remove(&key);
                }
            }
            return Err(e);
        }

        info!("📊 Subscribed to {}", key);
        Ok(())
    }

    /// Drop the binding now and tell the server if connected
    pub fn unsubscribe(&self, channel: Channel, symbol: &str) -> Result<()> {
        let key = SubscriptionKey::new(channel, symbol);
        self.registry.remove(&key);

        if self.is_connected() {
            self.session
                .send(subscription_frame("UNSUBSCRIBE", &[key.stream_id()]))?;
        }
        info!("📊 Unsubscribed from {}", key);
        Ok(())
    }

    /// Reconnect with backoff and restore authentication and subscriptions
    pub async fn reconnect(&mut self) -> Result<()> {
        let snapshot = self.registry.snapshot();
        let needs_auth = self.is_authenticated() || self.registry.has_private_subscriptions();
        info!("🔄 Reconnecting ({} subscriptions)", snapshot.len());

        self.disconnect().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.session.connect().await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < self.reconnect_config.max_attempts => {
                    let delay = self.reconnect_config.backoff_delay(attempt);
                    warn!("🔄 Reconnect attempt {} failed: {}; retrying in {:?}", attempt, e, delay);
                    monoio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Keep the bindings so a later reconnect can restore them
                    for (key, handler) in snapshot {
                        self.registry.register(key, handler);
                    }
                    return Err(e);
                }
            }
        }

        if needs_auth && self.signer.is_some() {
            if let Err(e) = self.authenticate().await {
                warn!("❌ Re-authentication failed: {}", e);
            }
        }

        let mut first_error = None;
        for (key, handler) in snapshot {
            if let Err(e) = self.subscribe_handler(key.channel, &key.symbol, handler).await {
                warn!("❌ Could not restore {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("✅ Reconnected after {} attempt(s)", attempt);
                Ok(())
            }
        }
    }

    pub async fn subscribe_ticker(&self, symbol: &str, handler: impl Fn(Ticker) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::Ticker, symbol, typed_handler(handler)).await
    }

    pub async fn subscribe_trades(&self, symbol: &str, handler: impl Fn(Trade) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::Trades, symbol, typed_handler(handler)).await
    }

    /// `interval` is one of `1m 5m 15m 1h 4h 1d`
    pub async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: &str,
        handler: impl Fn(Candle) + Send + Sync + 'static,
    ) -> Result<()> {
        let channel = Channel::candles(interval)?;
        self.subscribe_handler(channel, symbol, typed_handler(handler)).await
    }

    pub async fn subscribe_depth(&self, symbol: &str, handler: impl Fn(OrderBook) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::Depth, symbol, typed_handler(handler)).await
    }

    pub async fn subscribe_depth_snapshot(
        &self,
        symbol: &str,
        handler: impl Fn(OrderBook) + Send + Sync + 'static,
    ) -> Result<()> {
        self.subscribe_handler(Channel::DepthSnapshot, symbol, typed_handler(handler)).await
    }

    pub async fn subscribe_orders(&self, handler: impl Fn(Order) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::UserOrders, "", typed_handler(handler)).await
    }

    pub async fn subscribe_user_trades(&self, handler: impl Fn(Trade) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::UserTrades, "", typed_handler(handler)).await
    }

    pub async fn subscribe_positions(&self, handler: impl Fn(Position) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::UserPositions, "", typed_handler(handler)).await
    }

    pub async fn subscribe_balances(&self, handler: impl Fn(Balance) + Send + Sync + 'static) -> Result<()> {
        self.subscribe_handler(Channel::UserBalances, "", typed_handler(handler)).await
    }
}
